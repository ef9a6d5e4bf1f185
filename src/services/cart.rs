//! Prices requested cart lines against the live catalog.

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{price_option, product},
    errors::ServiceError,
    services::pricing::{self, PriceQuote},
};

/// One requested line of a cart or checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub price_option_id: Uuid,
    pub quantity: i32,
}

/// A cart line resolved to its product, option and effective price.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product: product::Model,
    pub option: price_option::Model,
    pub quote: PriceQuote,
    pub quantity: i32,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.quote.price * Decimal::from(self.quantity)
    }
}

/// Loads and prices every line. Unknown products are 404, unknown options
/// and non-positive quantities are 400.
pub async fn price_lines<C: ConnectionTrait>(
    conn: &C,
    lines: &[CartLine],
) -> Result<Vec<PricedLine>, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order must contain at least one item".to_string(),
        ));
    }

    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be at least 1 for product {}",
                line.product_id
            )));
        }

        let product = product::Entity::find_by_id(line.product_id)
            .one(conn)
            .await
            .map_err(|e| {
                error!(product_id = %line.product_id, error = %e, "Failed to load product");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", line.product_id)))?;

        let option = price_option::Entity::find_by_id(line.price_option_id)
            .filter(price_option::Column::ProductId.eq(product.id))
            .one(conn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                warn!(product_id = %product.id, price_option_id = %line.price_option_id, "Unknown price option");
                ServiceError::ValidationError("Invalid price option".to_string())
            })?;

        let quote = pricing::quote_option(&option, product.sale_percentage);
        priced.push(PricedLine {
            product,
            option,
            quote,
            quantity: line.quantity,
        });
    }

    Ok(priced)
}

pub fn subtotal(lines: &[PricedLine]) -> Decimal {
    lines.iter().map(PricedLine::line_total).sum()
}
