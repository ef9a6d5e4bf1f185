use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order API

Checkout, coupon, payment reconciliation and pricing endpoints for the storefront.

## Authentication

Customer and admin endpoints expect a bearer JWT issued by the account service:

```
Authorization: Bearer <your-jwt-token>
```

`POST /orders` also accepts guest checkouts without a token. Coupons require a signed-in customer.

## Error Handling

Errors share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Coupon has expired",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Gateway notifications and hosted checkout"),
        (name = "Coupons", description = "Coupon validation and administration"),
        (name = "Settings", description = "Store shipping and COD settings"),
        (name = "Products", description = "Effective product pricing"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::my_orders,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::verify_payment,
        crate::handlers::orders::sales_stats,

        // Payments
        crate::handlers::orders::payment_notification,
        crate::handlers::payments::initiate_gopayfast,

        // Coupons
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::list_active_coupons,
        crate::handlers::coupons::list_all_coupons,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::delete_coupon,

        // Settings and pricing
        crate::handlers::settings::get_settings,
        crate::handlers::settings::update_settings,
        crate::handlers::products::product_pricing,

        // Health
        crate::health_check,
        crate::api_status,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::ResponseMeta,
            crate::errors::ErrorResponse,

            crate::entities::order::Model,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order::PaymentStatus,
            crate::entities::order::ShippingAddress,
            crate::entities::order::ImageRef,
            crate::entities::order::PaymentResult,
            crate::entities::order_item::Model,
            crate::entities::coupon::Model,
            crate::entities::coupon::DiscountType,
            crate::entities::settings::Model,

            crate::services::cart::CartLine,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderWithItems,
            crate::services::orders::OrderPage,
            crate::services::orders::SalesStats,
            crate::services::payments::VerifyPaymentRequest,
            crate::services::coupons::CreateCouponRequest,
            crate::services::coupons::UpdateCouponRequest,
            crate::services::coupons::CouponPreview,
            crate::services::settings::UpdateSettingsRequest,
            crate::services::products::ProductPricing,
            crate::services::products::OptionPricing,
            crate::services::pricing::PriceQuote,
            crate::payfast::GoPayFastCheckout,
            crate::handlers::orders::UpdateStatusRequest,
            crate::handlers::coupons::ValidateCouponRequest,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

/// Registers the `Bearer` scheme referenced by `security(("Bearer" = []))`.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_storefront_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/orders/notify"));
        assert!(json.contains("/api/v1/coupons/validate"));
        assert!(json.contains("\"Bearer\""));
    }
}
