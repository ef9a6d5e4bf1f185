//! Coupon eligibility rules, redemption counters and coupon administration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        coupon::{self, DiscountType, UuidList},
        coupon_usage,
    },
    errors::ServiceError,
    services::{cart, pricing::round_money},
};

/// Why a coupon cannot be applied. Rules are evaluated in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("Coupon code not found")]
    NotFound,
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon has not started yet")]
    NotStarted,
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon usage limit reached")]
    UsageLimitReached,
    #[error("Eligible products subtotal must be at least Rs{0}")]
    BelowMinimum(Decimal),
    #[error("Eligible products subtotal must be less than Rs{0}")]
    AboveMaximum(Decimal),
    #[error("Coupon not valid for this user")]
    UserNotEligible,
    #[error("Coupon not valid for these products")]
    ProductsNotEligible,
    #[error("Maximum uses per user reached ({0})")]
    PerUserLimitReached(i32),
}

impl From<CouponRejection> for ServiceError {
    fn from(rejection: CouponRejection) -> Self {
        ServiceError::CouponRejected(rejection.to_string())
    }
}

/// A cart line as seen by the coupon rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouponLine {
    pub product_id: Uuid,
    pub line_total: Decimal,
}

impl From<&cart::PricedLine> for CouponLine {
    fn from(line: &cart::PricedLine) -> Self {
        Self {
            product_id: line.product.id,
            line_total: line.line_total(),
        }
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponEvaluation {
    pub eligible_subtotal: Decimal,
    pub eligible_products: Vec<Uuid>,
    pub discount: Decimal,
}

/// Subtotal the coupon applies to: allowlisted lines only, or everything when
/// the allowlist is empty.
pub fn eligible_subtotal(coupon: &coupon::Model, lines: &[CouponLine], subtotal: Decimal) -> Decimal {
    if coupon.eligible_products.is_empty() {
        return subtotal;
    }
    lines
        .iter()
        .filter(|l| coupon.eligible_products.contains(&l.product_id))
        .map(|l| l.line_total)
        .sum()
}

/// Discount over the eligible subtotal, never more than that subtotal.
pub fn discount_for(coupon: &coupon::Model, eligible: Decimal) -> Decimal {
    let eligible = eligible.max(Decimal::ZERO);
    let raw = match coupon.discount_type {
        DiscountType::Percentage => eligible * coupon.discount_value / dec!(100),
        DiscountType::Fixed => coupon.discount_value,
    };
    round_money(raw.max(Decimal::ZERO).min(eligible))
}

/// Runs the eligibility rules against a loaded coupon. Pure; the first failing
/// rule wins.
pub fn evaluate(
    coupon: &coupon::Model,
    user_id: Uuid,
    times_used: i32,
    lines: &[CouponLine],
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<CouponEvaluation, CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if now < coupon.start_date {
        return Err(CouponRejection::NotStarted);
    }
    if now >= coupon.expiry_date {
        return Err(CouponRejection::Expired);
    }
    if coupon.used_coupons >= coupon.total_coupons {
        return Err(CouponRejection::UsageLimitReached);
    }

    let eligible = eligible_subtotal(coupon, lines, subtotal);
    if eligible < coupon.min_purchase {
        return Err(CouponRejection::BelowMinimum(coupon.min_purchase.normalize()));
    }
    if let Some(max) = coupon.max_purchase {
        if eligible > max {
            return Err(CouponRejection::AboveMaximum(max.normalize()));
        }
    }
    if !coupon.eligible_users.is_empty() && !coupon.eligible_users.contains(&user_id) {
        return Err(CouponRejection::UserNotEligible);
    }

    let eligible_products: Vec<Uuid> = if coupon.eligible_products.is_empty() {
        lines.iter().map(|l| l.product_id).collect()
    } else {
        lines
            .iter()
            .map(|l| l.product_id)
            .filter(|id| coupon.eligible_products.contains(id))
            .collect()
    };
    if !coupon.eligible_products.is_empty() && eligible_products.is_empty() {
        return Err(CouponRejection::ProductsNotEligible);
    }

    let cap = coupon.max_uses_per_user.max(1);
    if times_used >= cap {
        return Err(CouponRejection::PerUserLimitReached(cap));
    }

    Ok(CouponEvaluation {
        eligible_subtotal: eligible,
        eligible_products,
        discount: discount_for(coupon, eligible),
    })
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub async fn find_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<coupon::Model>, DbErr> {
    coupon::Entity::find()
        .filter(coupon::Column::Code.eq(normalize_code(code)))
        .one(conn)
        .await
}

async fn times_used<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    user_id: Uuid,
) -> Result<i32, DbErr> {
    Ok(coupon_usage::Entity::find()
        .filter(coupon_usage::Column::CouponId.eq(coupon_id))
        .filter(coupon_usage::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .map(|usage| usage.times_used)
        .unwrap_or(0))
}

/// Looks up `code` and evaluates it for `user_id`. Does not mutate counters.
pub async fn validate<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    user_id: Uuid,
    lines: &[CouponLine],
    subtotal: Decimal,
) -> Result<(coupon::Model, CouponEvaluation), ServiceError> {
    let coupon = find_by_code(conn, code)
        .await?
        .ok_or(CouponRejection::NotFound)?;
    let used = times_used(conn, coupon.id, user_id).await?;

    match evaluate(&coupon, user_id, used, lines, subtotal, Utc::now()) {
        Ok(evaluation) => Ok((coupon, evaluation)),
        Err(rejection) => {
            info!(code = %coupon.code, %user_id, reason = %rejection, "Coupon rejected");
            Err(rejection.into())
        }
    }
}

/// Records one redemption. Both counters are bumped with guarded updates so a
/// concurrent redemption cannot push either past its cap. Call inside the
/// order transaction.
pub async fn record_redemption<C: ConnectionTrait>(
    conn: &C,
    coupon: &coupon::Model,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    let global = coupon::Entity::update_many()
        .col_expr(
            coupon::Column::UsedCoupons,
            Expr::col(coupon::Column::UsedCoupons).add(1),
        )
        .filter(coupon::Column::Id.eq(coupon.id))
        .filter(Expr::col(coupon::Column::UsedCoupons).lt(Expr::col(coupon::Column::TotalCoupons)))
        .exec(conn)
        .await?;
    if global.rows_affected == 0 {
        warn!(code = %coupon.code, "Coupon cap reached during redemption");
        return Err(CouponRejection::UsageLimitReached.into());
    }

    let cap = coupon.max_uses_per_user.max(1);
    let per_user = coupon_usage::Entity::update_many()
        .col_expr(
            coupon_usage::Column::TimesUsed,
            Expr::col(coupon_usage::Column::TimesUsed).add(1),
        )
        .filter(coupon_usage::Column::CouponId.eq(coupon.id))
        .filter(coupon_usage::Column::UserId.eq(user_id))
        .filter(coupon_usage::Column::TimesUsed.lt(cap))
        .exec(conn)
        .await?;
    if per_user.rows_affected == 1 {
        return Ok(());
    }

    if times_used(conn, coupon.id, user_id).await? > 0 {
        return Err(CouponRejection::PerUserLimitReached(cap).into());
    }

    coupon_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(coupon.id),
        user_id: Set(user_id),
        times_used: Set(1),
    }
    .insert(conn)
    .await
    .map_err(|e| match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            CouponRejection::PerUserLimitReached(cap).into()
        }
        _ => ServiceError::DatabaseError(e),
    })?;

    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Coupon code is required"))]
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_purchase: Option<Decimal>,
    #[serde(default)]
    pub max_purchase: Option<Decimal>,
    #[validate(range(min = 0, message = "Total coupons cannot be negative"))]
    pub total_coupons: i32,
    #[serde(default)]
    #[validate(range(min = 1, message = "Max uses per user must be at least 1"))]
    pub max_uses_per_user: Option<i32>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    pub expiry_date: DateTime<Utc>,
    #[serde(default)]
    pub eligible_users: Vec<Uuid>,
    #[serde(default)]
    pub eligible_products: Vec<Uuid>,
}

/// Partial update; `code` is accepted only so a changed value can be rejected.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCouponRequest {
    pub code: Option<String>,
    pub discount_value: Option<Decimal>,
    pub min_purchase: Option<Decimal>,
    pub max_purchase: Option<Decimal>,
    #[validate(range(min = 0, message = "Total coupons cannot be negative"))]
    pub total_coupons: Option<i32>,
    #[validate(range(min = 1, message = "Max uses per user must be at least 1"))]
    pub max_uses_per_user: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub eligible_users: Option<Vec<Uuid>>,
    pub eligible_products: Option<Vec<Uuid>>,
}

/// Dry-run result for the coupon preview endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponPreview {
    pub valid: bool,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount: Decimal,
    pub eligible_items: Vec<Uuid>,
    pub eligible_subtotal: Decimal,
}

fn check_discount_value(discount_type: DiscountType, value: Decimal) -> Result<(), ServiceError> {
    if value < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Discount value cannot be negative".to_string(),
        ));
    }
    if discount_type == DiscountType::Percentage && value > dec!(100) {
        return Err(ServiceError::ValidationError(
            "Percentage discount cannot exceed 100%".to_string(),
        ));
    }
    Ok(())
}

fn check_non_negative(label: &str, value: Option<Decimal>) -> Result<(), ServiceError> {
    match value {
        Some(v) if v < Decimal::ZERO => Err(ServiceError::ValidationError(format!(
            "{} cannot be negative",
            label
        ))),
        _ => Ok(()),
    }
}

/// Coupon administration and the authenticated dry-run check.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create(&self, request: CreateCouponRequest) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        check_discount_value(request.discount_type, request.discount_value)?;
        check_non_negative("Minimum purchase", request.min_purchase)?;
        check_non_negative("Max purchase", request.max_purchase)?;

        let db = &*self.db;
        let code = normalize_code(&request.code);
        if find_by_code(db, &code).await?.is_some() {
            return Err(ServiceError::ValidationError(
                "Coupon code already exists".to_string(),
            ));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            discount_type: Set(request.discount_type),
            discount_value: Set(request.discount_value),
            min_purchase: Set(request.min_purchase.unwrap_or(Decimal::ZERO)),
            max_purchase: Set(request.max_purchase),
            total_coupons: Set(request.total_coupons),
            used_coupons: Set(0),
            max_uses_per_user: Set(request.max_uses_per_user.unwrap_or(1)),
            eligible_users: Set(UuidList(request.eligible_users)),
            eligible_products: Set(UuidList(request.eligible_products)),
            start_date: Set(request.start_date.unwrap_or(now)),
            expiry_date: Set(request.expiry_date),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::ValidationError("Coupon code already exists".to_string())
            }
            _ => {
                error!(error = %e, "Failed to insert coupon");
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(code = %code, "Coupon created");
        Ok(model)
    }

    /// Active and unexpired coupons.
    pub async fn list_active(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        let now = Utc::now();
        coupon::Entity::find()
            .filter(coupon::Column::IsActive.eq(true))
            .filter(coupon::Column::ExpiryDate.gt(now))
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn list_all(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        coupon::Entity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        code: &str,
        request: UpdateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        let existing = find_by_code(db, code)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Coupon not found".to_string()))?;

        if let Some(new_code) = request.code.as_deref() {
            if normalize_code(new_code) != existing.code {
                return Err(ServiceError::ValidationError(
                    "Coupon code cannot be changed".to_string(),
                ));
            }
        }
        if let Some(value) = request.discount_value {
            check_discount_value(existing.discount_type, value)?;
        }
        check_non_negative("Minimum purchase", request.min_purchase)?;
        check_non_negative("Max purchase", request.max_purchase)?;

        let mut active: coupon::ActiveModel = existing.into();
        if let Some(v) = request.discount_value {
            active.discount_value = Set(v);
        }
        if let Some(v) = request.min_purchase {
            active.min_purchase = Set(v);
        }
        if let Some(v) = request.max_purchase {
            active.max_purchase = Set(Some(v));
        }
        if let Some(v) = request.total_coupons {
            active.total_coupons = Set(v);
        }
        if let Some(v) = request.max_uses_per_user {
            active.max_uses_per_user = Set(v);
        }
        if let Some(v) = request.start_date {
            active.start_date = Set(v);
        }
        if let Some(v) = request.expiry_date {
            active.expiry_date = Set(v);
        }
        if let Some(v) = request.is_active {
            active.is_active = Set(v);
        }
        if let Some(v) = request.eligible_users {
            active.eligible_users = Set(UuidList(v));
        }
        if let Some(v) = request.eligible_products {
            active.eligible_products = Set(UuidList(v));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await.map_err(|e| {
            error!(error = %e, "Failed to update coupon");
            ServiceError::DatabaseError(e)
        })?;
        info!(code = %updated.code, "Coupon updated");
        Ok(updated)
    }

    /// Hard delete together with the per-user ledger.
    #[instrument(skip(self))]
    pub async fn delete(&self, code: &str) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let existing = find_by_code(&txn, code)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Coupon not found".to_string()))?;

        coupon_usage::Entity::delete_many()
            .filter(coupon_usage::Column::CouponId.eq(existing.id))
            .exec(&txn)
            .await?;
        coupon::Entity::delete_by_id(existing.id).exec(&txn).await?;
        txn.commit().await?;

        info!(code = %existing.code, "Coupon deleted");
        Ok(())
    }

    /// Prices `items` and evaluates `code` for `user_id` without redeeming it.
    /// `cart_total` is only used when no items are supplied.
    #[instrument(skip(self, items))]
    pub async fn preview(
        &self,
        code: &str,
        user_id: Uuid,
        items: &[cart::CartLine],
        cart_total: Option<Decimal>,
    ) -> Result<CouponPreview, ServiceError> {
        let db = &*self.db;
        let (lines, subtotal) = if items.is_empty() {
            (Vec::new(), cart_total.unwrap_or(Decimal::ZERO))
        } else {
            let priced = cart::price_lines(db, items).await?;
            let subtotal = cart::subtotal(&priced);
            (priced.iter().map(CouponLine::from).collect(), subtotal)
        };

        let (coupon, evaluation) = validate(db, code, user_id, &lines, subtotal).await?;
        Ok(CouponPreview {
            valid: true,
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount: evaluation.discount,
            eligible_items: evaluation.eligible_products,
            eligible_subtotal: evaluation.eligible_subtotal,
        })
    }
}
