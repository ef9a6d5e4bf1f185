use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Row id of the singleton settings record
pub const SINGLETON_ID: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "settings")]
#[serde(rename_all = "camelCase")]
#[schema(as = Settings)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    #[serde(skip)]
    pub id: i32,
    pub shipping_fee: Decimal,
    pub free_shipping_threshold: Decimal,
    pub cod_fee: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn defaults() -> Self {
        Self {
            id: SINGLETON_ID,
            shipping_fee: Decimal::ZERO,
            free_shipping_threshold: dec!(2000),
            cod_fee: dec!(100),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
