use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use super::PayFastError;
use crate::{config::GoPayFastConfig, entities::order};

const PROCCODE: &str = "00";
const CURRENCY_CODE: &str = "PKR";
const CLIENT_VERSION: &str = "STOREFRONT-RS-1.0";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(rename = "ACCESS_TOKEN")]
    access_token: Option<String>,
}

/// Form the client auto-submits to the GoPayFast hosted checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoPayFastCheckout {
    pub redirect_url: String,
    pub form: BTreeMap<String, String>,
}

/// GoPayFast web checkout: token fetch plus SHA-256 basket signature.
#[derive(Clone)]
pub struct GoPayFastClient {
    client: reqwest::Client,
    config: GoPayFastConfig,
}

impl GoPayFastClient {
    pub fn new(config: GoPayFastConfig) -> Result<Self, PayFastError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// `sha256(basket_id + merchant_id + secured_key)` as lower-case hex.
    pub fn signature(&self, basket_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(basket_id.as_bytes());
        hasher.update(self.config.merchant_id.as_bytes());
        hasher.update(self.config.secured_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Fetches a one-time access token bound to the basket and amount.
    #[instrument(skip(self))]
    pub async fn fetch_token(&self, basket_id: &str, amount: &str) -> Result<String, PayFastError> {
        let form = [
            ("MERCHANT_ID", self.config.merchant_id.as_str()),
            ("SECURED_KEY", self.config.secured_key.as_str()),
            ("BASKET_ID", basket_id),
            ("TXNAMT", amount),
        ];

        let response = self
            .client
            .post(self.endpoint("GetAccessToken"))
            .form(&form)
            .send()
            .await?
            .error_for_status()?;

        let body: TokenResponse = response.json().await?;
        match body.access_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(token),
            None => {
                error!(basket_id, "GoPayFast token response had no ACCESS_TOKEN");
                Err(PayFastError::MissingToken)
            }
        }
    }

    /// Builds the hosted-checkout form for an order.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn checkout(&self, order: &order::Model) -> Result<GoPayFastCheckout, PayFastError> {
        let basket_id = order.id.to_string();
        // The token is bound to this exact amount string
        let amount = format!("{:.2}", order.total_amount.round_dp(2));
        let token = self.fetch_token(&basket_id, &amount).await?;

        let fields = [
            ("MERCHANT_ID", self.config.merchant_id.clone()),
            ("MERCHANT_NAME", self.config.merchant_name.clone()),
            ("TOKEN", token),
            ("PROCCODE", PROCCODE.to_string()),
            ("TXNAMT", amount),
            ("CURRENCY_CODE", CURRENCY_CODE.to_string()),
            ("CUSTOMER_MOBILE_NO", order.shipping_address.phone.clone()),
            ("CUSTOMER_EMAIL_ADDRESS", order.shipping_address.email.clone()),
            ("SIGNATURE", self.signature(&basket_id)),
            ("VERSION", CLIENT_VERSION.to_string()),
            ("TXNDESC", format!("Order #{}", basket_id)),
            ("SUCCESS_URL", self.config.success_url.clone()),
            ("FAILURE_URL", self.config.failure_url.clone()),
            ("BASKET_ID", basket_id.clone()),
            ("ORDER_DATE", Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            ("CHECKOUT_URL", self.config.checkout_url.clone()),
        ];

        info!("GoPayFast checkout prepared");
        Ok(GoPayFastCheckout {
            redirect_url: self.endpoint("PostTransaction"),
            form: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> GoPayFastClient {
        GoPayFastClient::new(GoPayFastConfig {
            base_url: base_url.to_string(),
            merchant_id: "102".into(),
            secured_key: "zWHjBp2AlttNu1sK".into(),
            merchant_name: "MS Foods".into(),
            success_url: "https://shop.example.com/payment/success".into(),
            failure_url: "https://shop.example.com/payment/failure".into(),
            checkout_url: "https://api.example.com/api/v1/orders/notify".into(),
        })
        .unwrap()
    }

    fn order(total: rust_decimal::Decimal) -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            user_id: None,
            shipping_address: ShippingAddress {
                full_name: "Bilal Ahmed".into(),
                address: "12 Mall Road".into(),
                city: "Lahore".into(),
                country: "Pakistan".into(),
                email: "bilal@example.com".into(),
                phone: "03001234567".into(),
                postal_code: None,
            },
            payment_method: PaymentMethod::PayFast,
            payment_status: PaymentStatus::Confirmed,
            payment_proof: None,
            status: OrderStatus::Pending,
            tracking_id: None,
            coupon_id: None,
            coupon_code: None,
            subtotal: total,
            shipping_cost: dec!(0),
            discount: dec!(0),
            cod_fee: dec!(0),
            total_amount: total,
            payment_result: None,
            delivered_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn signature_is_sha256_of_basket_merchant_and_key() {
        let c = client("http://localhost");
        let expected = hex::encode(Sha256::digest(b"basket-1102zWHjBp2AlttNu1sK"));
        assert_eq!(c.signature("basket-1"), expected);
    }

    #[tokio::test]
    async fn checkout_uses_fetched_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/GetAccessToken"))
            .and(body_string_contains("MERCHANT_ID=102"))
            .and(body_string_contains("TXNAMT=1250.00"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ACCESS_TOKEN": "tok-123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server.uri());
        let order = order(dec!(1250));
        let checkout = c.checkout(&order).await.unwrap();

        assert_eq!(checkout.redirect_url, format!("{}/PostTransaction", server.uri()));
        assert_eq!(checkout.form["TOKEN"], "tok-123");
        assert_eq!(checkout.form["TXNAMT"], "1250.00");
        assert_eq!(checkout.form["BASKET_ID"], order.id.to_string());
        assert_eq!(checkout.form["CUSTOMER_MOBILE_NO"], "03001234567");
        assert_eq!(checkout.form["SIGNATURE"], c.signature(&order.id.to_string()));
    }

    #[tokio::test]
    async fn missing_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/GetAccessToken"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "code": "401" })),
            )
            .mount(&server)
            .await;

        let result = client(&server.uri()).checkout(&order(dec!(99))).await;
        assert_matches!(result, Err(PayFastError::MissingToken));
    }
}
