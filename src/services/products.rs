//! Read-only pricing view of a product.

use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait, ModelTrait, QueryOrder};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{price_option, product},
    errors::ServiceError,
    services::pricing::{self, PriceQuote},
};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptionPricing {
    pub id: Uuid,
    pub option_type: price_option::PriceOptionType,
    pub weight: i32,
    #[serde(flatten)]
    pub quote: PriceQuote,
    pub on_sale: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductPricing {
    pub product_id: Uuid,
    pub name: String,
    pub sale_percentage: Option<Decimal>,
    pub options: Vec<OptionPricing>,
    pub lowest_price: Option<Decimal>,
    pub has_active_sales: bool,
}

pub fn pricing_view(product: &product::Model, options: &[price_option::Model]) -> ProductPricing {
    ProductPricing {
        product_id: product.id,
        name: product.name.clone(),
        sale_percentage: product.sale_percentage,
        options: options
            .iter()
            .map(|option| {
                let quote = pricing::quote_option(option, product.sale_percentage);
                OptionPricing {
                    id: option.id,
                    option_type: option.option_type,
                    weight: option.weight,
                    on_sale: quote.is_discounted(),
                    quote,
                }
            })
            .collect(),
        lowest_price: pricing::lowest_price(options, product.sale_percentage),
        has_active_sales: pricing::has_active_sale(options, product.sale_percentage),
    }
}

#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn pricing(&self, product_id: Uuid) -> Result<ProductPricing, ServiceError> {
        let db = &*self.db;
        let product = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        let options = product
            .find_related(price_option::Entity)
            .order_by_asc(price_option::Column::Position)
            .all(db)
            .await?;
        Ok(pricing_view(&product, &options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use price_option::PriceOptionType;
    use rust_decimal_macros::dec;

    #[test]
    fn view_marks_sale_options_and_lowest_price() {
        let now = Utc::now();
        let product = product::Model {
            id: Uuid::new_v4(),
            name: "Chakki Atta".into(),
            description: None,
            image_url: None,
            stock: 40,
            sale_percentage: Some(dec!(10)),
            created_at: now,
            updated_at: now,
        };
        let option = |weight, price, sale_price| price_option::Model {
            id: Uuid::new_v4(),
            product_id: product.id,
            option_type: PriceOptionType::WeightBased,
            weight,
            price,
            sale_price,
            position: 0,
        };
        let options = vec![
            option(1000, dec!(1000), None),
            option(5000, dec!(4500), Some(dec!(4000))),
        ];

        let view = pricing_view(&product, &options);
        assert_eq!(view.options[0].quote.price, dec!(900));
        assert_eq!(view.options[0].quote.sale_percentage, Some(dec!(10)));
        assert_eq!(view.options[1].quote.price, dec!(4000));
        assert_eq!(view.options[1].quote.sale_percentage, None);
        assert!(view.options.iter().all(|o| o.on_sale));
        assert_eq!(view.lowest_price, Some(dec!(900)));
        assert!(view.has_active_sales);
    }
}
