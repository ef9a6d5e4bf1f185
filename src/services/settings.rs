use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set,
};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::{entities::settings, errors::ServiceError};

/// Returns the singleton, inserting the defaults when it does not exist yet.
pub async fn load_or_default<C: ConnectionTrait>(conn: &C) -> Result<settings::Model, ServiceError> {
    if let Some(existing) = settings::Entity::find_by_id(settings::SINGLETON_ID)
        .one(conn)
        .await?
    {
        return Ok(existing);
    }

    let defaults = settings::Model::defaults();
    let active = settings::ActiveModel {
        id: Set(defaults.id),
        shipping_fee: Set(defaults.shipping_fee),
        free_shipping_threshold: Set(defaults.free_shipping_threshold),
        cod_fee: Set(defaults.cod_fee),
        updated_at: Set(defaults.updated_at),
    };
    // A concurrent first read may insert the row first
    let inserted = settings::Entity::insert(active)
        .on_conflict(
            OnConflict::column(settings::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    if inserted > 0 {
        info!("Created default store settings");
    }

    settings::Entity::find_by_id(settings::SINGLETON_ID)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError("Settings row missing".to_string()))
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub shipping_fee: Option<Decimal>,
    pub free_shipping_threshold: Option<Decimal>,
    pub cod_fee: Option<Decimal>,
}

#[derive(Clone)]
pub struct SettingsService {
    db: Arc<DatabaseConnection>,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get(&self) -> Result<settings::Model, ServiceError> {
        load_or_default(&*self.db).await
    }

    #[instrument(skip(self))]
    pub async fn update(
        &self,
        request: UpdateSettingsRequest,
    ) -> Result<settings::Model, ServiceError> {
        for (label, value) in [
            ("Shipping fee", request.shipping_fee),
            ("Free shipping threshold", request.free_shipping_threshold),
            ("COD fee", request.cod_fee),
        ] {
            if matches!(value, Some(v) if v < Decimal::ZERO) {
                return Err(ServiceError::ValidationError(format!(
                    "{} cannot be negative",
                    label
                )));
            }
        }

        let current = load_or_default(&*self.db).await?;
        let mut active: settings::ActiveModel = current.into();
        if let Some(v) = request.shipping_fee {
            active.shipping_fee = Set(v);
        }
        if let Some(v) = request.free_shipping_threshold {
            active.free_shipping_threshold = Set(v);
        }
        if let Some(v) = request.cod_fee {
            active.cod_fee = Set(v);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        info!(
            shipping_fee = %updated.shipping_fee,
            free_shipping_threshold = %updated.free_shipping_threshold,
            cod_fee = %updated.cod_fee,
            "Store settings updated"
        );
        Ok(updated)
    }
}
