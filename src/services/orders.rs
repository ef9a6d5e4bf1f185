//! Order assembly, queries and sales reporting.

use std::sync::Arc;

use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, Iterable,
    LoaderTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    config::PayFastConfig,
    entities::{
        order::{self, ImageRef, OrderStatus, PaymentMethod, PaymentResult, PaymentStatus, ShippingAddress},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payfast::{self, PayFastError},
    services::{
        cart::{self, CartLine, PricedLine},
        coupons::{self, CouponLine},
        inventory,
        order_status::find_order,
        pricing::round_money,
        settings,
    },
};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// Typed checkout input. The HTTP layer normalizes JSON and multipart bodies
/// into this shape.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<CartLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// Order with its frozen line items.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<OrderWithItems>,
    pub total: u64,
    pub total_pages: u64,
    pub current_page: u64,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SalesQuery {
    /// week, month, year or all
    pub period: Option<String>,
    /// RFC 3339 timestamp or YYYY-MM-DD
    pub start_date: Option<String>,
    /// RFC 3339 timestamp or YYYY-MM-DD (inclusive)
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SalesStats {
    pub total_orders: u64,
    pub total_revenue: Decimal,
    pub total_sales: Decimal,
    pub total_shipping: Decimal,
    pub total_coupon_discounts: Decimal,
    pub total_sale_discounts: Decimal,
    pub total_discount: Decimal,
    pub total_cod_fee: Decimal,
    pub coupons_used: u64,
}

/// Money figures for a priced cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub cod_fee: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// `total = max(0, subtotal - discount + shipping + cod_fee)`, shipping is
/// waived strictly above the threshold.
pub fn compute_totals(
    subtotal: Decimal,
    discount: Decimal,
    method: PaymentMethod,
    settings: &crate::entities::settings::Model,
) -> Totals {
    let subtotal = round_money(subtotal);
    let shipping_cost = if subtotal > settings.free_shipping_threshold {
        Decimal::ZERO
    } else {
        settings.shipping_fee
    };
    let cod_fee = if method == PaymentMethod::Cod {
        settings.cod_fee
    } else {
        Decimal::ZERO
    };
    let discount = round_money(discount);
    let total = round_money((subtotal - discount + shipping_cost + cod_fee).max(Decimal::ZERO));
    Totals {
        subtotal,
        shipping_cost,
        cod_fee,
        discount,
        total,
    }
}

fn initial_state(method: PaymentMethod) -> (OrderStatus, PaymentStatus) {
    match method {
        PaymentMethod::Cod => (OrderStatus::Processing, PaymentStatus::Confirmed),
        PaymentMethod::BankTransfer => (OrderStatus::Processing, PaymentStatus::Pending),
        PaymentMethod::PayFast => (OrderStatus::Pending, PaymentStatus::Confirmed),
    }
}

/// All required shipping fields present and the email well-formed.
pub fn check_shipping_address(address: &ShippingAddress) -> Result<(), ServiceError> {
    let missing = address.missing_fields();
    if !missing.is_empty() {
        return Err(ServiceError::ValidationError(format!(
            "Missing shipping fields: {}",
            missing.join(", ")
        )));
    }
    address.validate()?;
    Ok(())
}

pub fn check_payment_proof(method: PaymentMethod, has_proof: bool) -> Result<(), ServiceError> {
    if method == PaymentMethod::BankTransfer && !has_proof {
        return Err(ServiceError::ValidationError(
            "Payment proof screenshot is required for bank transfer".to_string(),
        ));
    }
    Ok(())
}

/// Rejects a checkout before any database work: address first, then
/// payment proof.
pub fn precheck(
    request: &CreateOrderRequest,
    payment_proof: Option<&ImageRef>,
) -> Result<(), ServiceError> {
    check_shipping_address(&request.shipping_address)?;
    check_payment_proof(request.payment_method, payment_proof.is_some())
}

fn item_snapshot(order_id: Uuid, line: &PricedLine) -> order_item::ActiveModel {
    order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        product_id: Set(line.product.id),
        name: Set(line.product.name.clone()),
        option_type: Set(line.option.option_type),
        weight: Set(line.option.weight),
        price: Set(line.quote.price),
        sale_price: Set(line.quote.sale_price),
        original_price: Set(line.quote.original_price),
        sale_percentage: Set(line.quote.sale_percentage),
        quantity: Set(line.quantity),
        image: Set(line.product.image_url.clone()),
    }
}

fn parse_status_filter(value: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::iter()
        .find(|s| s.to_string().eq_ignore_ascii_case(value.trim()))
        .ok_or_else(|| ServiceError::ValidationError("Invalid status value".to_string()))
}

fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, ServiceError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ServiceError::ValidationError(format!("Invalid date: {}", value)))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| ServiceError::InternalError("invalid time of day".to_string()))?;
    Ok(date.and_time(time).and_utc())
}

/// Resolves the reporting window. Explicit bounds win over `period`; an
/// unknown or missing period means all time.
pub fn date_range(
    query: &SalesQuery,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ServiceError> {
    if let (Some(start), Some(end)) = (query.start_date.as_deref(), query.end_date.as_deref()) {
        let start = parse_bound(start, false)?;
        let end = parse_bound(end, true)?;
        if start > end {
            return Err(ServiceError::ValidationError(
                "startDate must not be after endDate".to_string(),
            ));
        }
        return Ok((start, end));
    }

    let start = match query.period.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("week") => Some(now - chrono::Duration::days(7)),
        Some("month") => now.checked_sub_months(Months::new(1)),
        Some("year") => now.checked_sub_months(Months::new(12)),
        _ => None,
    }
    .unwrap_or_default();
    Ok((start, now))
}

/// Folds orders into sales figures. Callers pass only counted orders.
pub fn summarize(orders: &[(order::Model, Vec<order_item::Model>)]) -> SalesStats {
    let mut stats = SalesStats::default();
    for (order, items) in orders {
        stats.total_orders += 1;
        stats.total_revenue += order.total_amount;
        stats.total_sales += order.subtotal;
        stats.total_shipping += order.shipping_cost;
        stats.total_coupon_discounts += order.discount;
        stats.total_cod_fee += order.cod_fee;
        if order.coupon_id.is_some() {
            stats.coupons_used += 1;
        }
        stats.total_sale_discounts += items
            .iter()
            .filter(|item| item.original_price > item.price)
            .map(|item| (item.original_price - item.price) * Decimal::from(item.quantity))
            .sum::<Decimal>();
    }
    stats.total_discount = stats.total_coupon_discounts + stats.total_sale_discounts;
    stats
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
    payfast: PayFastConfig,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender, payfast: PayFastConfig) -> Self {
        Self {
            db,
            events,
            payfast,
        }
    }

    /// Creates an order in one transaction: price, reserve stock, apply the
    /// coupon, persist. Nothing is written if any step fails.
    #[instrument(skip(self, request, payment_proof), fields(method = %request.payment_method, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        user: Option<&AuthUser>,
        payment_proof: Option<ImageRef>,
    ) -> Result<OrderWithItems, ServiceError> {
        precheck(&request, payment_proof.as_ref())?;

        let coupon_code = request
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(coupons::normalize_code);

        if request.payment_method == PaymentMethod::PayFast && self.payfast.merchant_id.is_empty() {
            return Err(PayFastError::NotConfigured.into());
        }

        let txn = self.db.begin().await?;

        let priced = cart::price_lines(&txn, &request.items).await?;
        inventory::check_available(&priced)?;
        inventory::reserve(&txn, &priced).await?;

        let store_settings = settings::load_or_default(&txn).await?;
        let subtotal = cart::subtotal(&priced);

        let coupon = match coupon_code {
            Some(code) => {
                let user = user.ok_or_else(|| {
                    ServiceError::Unauthorized("Authentication required for coupon use".to_string())
                })?;
                let lines: Vec<CouponLine> = priced.iter().map(CouponLine::from).collect();
                let (coupon, evaluation) =
                    coupons::validate(&txn, &code, user.user_id, &lines, round_money(subtotal))
                        .await?;
                coupons::record_redemption(&txn, &coupon, user.user_id).await?;
                Some((coupon, evaluation.discount))
            }
            None => None,
        };

        let discount = coupon.as_ref().map(|(_, d)| *d).unwrap_or(Decimal::ZERO);
        let totals = compute_totals(subtotal, discount, request.payment_method, &store_settings);
        let (status, payment_status) = initial_state(request.payment_method);

        let order_id = Uuid::new_v4();
        let payment_result = if request.payment_method == PaymentMethod::PayFast {
            Some(PaymentResult {
                status: Some("pending".to_string()),
                redirect_url: Some(payfast::redirect_url(&self.payfast, order_id, totals.total)?),
                ..Default::default()
            })
        } else {
            None
        };

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user.map(|u| u.user_id)),
            shipping_address: Set(request.shipping_address),
            payment_method: Set(request.payment_method),
            payment_status: Set(payment_status),
            payment_proof: Set(payment_proof),
            status: Set(status),
            tracking_id: Set(None),
            coupon_id: Set(coupon.as_ref().map(|(c, _)| c.id)),
            coupon_code: Set(coupon.as_ref().map(|(c, _)| c.code.clone())),
            subtotal: Set(totals.subtotal),
            shipping_cost: Set(totals.shipping_cost),
            discount: Set(totals.discount),
            cod_fee: Set(totals.cod_fee),
            total_amount: Set(totals.total),
            payment_result: Set(payment_result),
            delivered_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(priced.len());
        for line in &priced {
            items.push(item_snapshot(order_id, line).insert(&txn).await?);
        }

        txn.commit().await?;
        info!(
            %order_id,
            total = %order.total_amount,
            coupon = ?order.coupon_code,
            "Order created"
        );

        self.events.emit(Event::OrderCreated(order_id));
        Ok(OrderWithItems { order, items })
    }

    async fn with_items(
        &self,
        orders: Vec<order::Model>,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let items = orders.load_many(order_item::Entity, &*self.db).await?;
        Ok(orders
            .into_iter()
            .zip(items)
            .map(|(order, items)| OrderWithItems { order, items })
            .collect())
    }

    /// The caller's orders, newest first.
    pub async fn my_orders(&self, user_id: Uuid) -> Result<Vec<OrderWithItems>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.with_items(orders).await
    }

    /// Admin listing with paging and an optional status filter.
    pub async fn list(&self, query: OrderListQuery) -> Result<OrderPage, ServiceError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let page = query.page.unwrap_or(1).max(1);

        let mut select = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
            select = select.filter(order::Column::Status.eq(parse_status_filter(status)?));
        }

        let paginator = select.paginate(&*self.db, limit);
        let counts = paginator.num_items_and_pages().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders: self.with_items(orders).await?,
            total: counts.number_of_items,
            total_pages: counts.number_of_pages,
            current_page: page,
        })
    }

    /// One order, visible to its owner and to admins.
    pub async fn get(&self, order_id: Uuid, viewer: &AuthUser) -> Result<OrderWithItems, ServiceError> {
        let order = find_order(&*self.db, order_id).await?;
        let owns = order.user_id == Some(viewer.user_id);
        if !owns && !viewer.is_admin() {
            warn!(%order_id, user_id = %viewer.user_id, "Order access denied");
            return Err(ServiceError::Forbidden("Unauthorized".to_string()));
        }
        let mut found = self.with_items(vec![order]).await?;
        found
            .pop()
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// Sales figures over a window, excluding cancelled and returned orders.
    #[instrument(skip(self))]
    pub async fn sales_stats(&self, query: SalesQuery) -> Result<SalesStats, ServiceError> {
        let (start, end) = date_range(&query, Utc::now())?;
        let orders = order::Entity::find()
            .filter(order::Column::CreatedAt.gte(start))
            .filter(order::Column::CreatedAt.lte(end))
            .filter(order::Column::Status.is_not_in([OrderStatus::Cancelled, OrderStatus::Returned]))
            .all(&*self.db)
            .await?;
        let items = orders.load_many(order_item::Entity, &*self.db).await?;
        let rows: Vec<_> = orders.into_iter().zip(items).collect();
        Ok(summarize(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{price_option::PriceOptionType, settings as settings_entity};
    use chrono::TimeZone;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn store() -> settings_entity::Model {
        settings_entity::Model {
            id: settings_entity::SINGLETON_ID,
            shipping_fee: dec!(200),
            free_shipping_threshold: dec!(2000),
            cod_fee: dec!(100),
            updated_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(dec!(2500), PaymentMethod::BankTransfer, dec!(0), dec!(0), dec!(2500))]
    #[case(dec!(1500), PaymentMethod::BankTransfer, dec!(200), dec!(0), dec!(1700))]
    #[case(dec!(2000), PaymentMethod::Cod, dec!(200), dec!(100), dec!(2300))]
    #[case(dec!(2000.01), PaymentMethod::Cod, dec!(0), dec!(100), dec!(2100.01))]
    fn shipping_threshold_and_cod_fee(
        #[case] subtotal: Decimal,
        #[case] method: PaymentMethod,
        #[case] shipping: Decimal,
        #[case] cod: Decimal,
        #[case] total: Decimal,
    ) {
        let t = compute_totals(subtotal, Decimal::ZERO, method, &store());
        assert_eq!(t.shipping_cost, shipping);
        assert_eq!(t.cod_fee, cod);
        assert_eq!(t.total, total);
    }

    #[test]
    fn total_never_goes_negative() {
        let t = compute_totals(dec!(100), dec!(500), PaymentMethod::PayFast, &store());
        assert_eq!(t.total, dec!(0));
        assert_eq!(t.subtotal - t.discount + t.shipping_cost + t.cod_fee, dec!(-200));
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Sana Iqbal".into(),
            address: "22 Gulberg III".into(),
            city: "Lahore".into(),
            country: "Pakistan".into(),
            email: "sana@example.com".into(),
            phone: "03211234567".into(),
            postal_code: None,
        }
    }

    fn request(method: PaymentMethod) -> CreateOrderRequest {
        CreateOrderRequest {
            items: vec![],
            shipping_address: address(),
            payment_method: method,
            coupon_code: None,
        }
    }

    #[test]
    fn precheck_lists_missing_address_fields() {
        let mut req = request(PaymentMethod::Cod);
        req.shipping_address.city = " ".into();
        req.shipping_address.phone = String::new();
        let err = precheck(&req, None).unwrap_err();
        assert_eq!(err.response_message(), "Missing shipping fields: city, phone");
    }

    #[test]
    fn precheck_requires_proof_for_bank_transfer() {
        let req = request(PaymentMethod::BankTransfer);
        let err = precheck(&req, None).unwrap_err();
        assert_eq!(
            err.response_message(),
            "Payment proof screenshot is required for bank transfer"
        );
        let proof = ImageRef {
            public_id: "payment-proofs/abc".into(),
            url: "/uploads/payment-proofs/abc.png".into(),
        };
        assert!(precheck(&req, Some(&proof)).is_ok());
    }

    #[test]
    fn initial_states_follow_payment_method() {
        assert_eq!(
            initial_state(PaymentMethod::PayFast),
            (OrderStatus::Pending, PaymentStatus::Confirmed)
        );
        assert_eq!(
            initial_state(PaymentMethod::BankTransfer),
            (OrderStatus::Processing, PaymentStatus::Pending)
        );
        assert_eq!(
            initial_state(PaymentMethod::Cod),
            (OrderStatus::Processing, PaymentStatus::Confirmed)
        );
    }

    #[test]
    fn explicit_dates_win_over_period() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let query = SalesQuery {
            period: Some("week".into()),
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-01-31".into()),
        };
        let (start, end) = date_range(&query, now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());

        let month = SalesQuery {
            period: Some("Month".into()),
            ..Default::default()
        };
        assert_eq!(
            date_range(&month, now).unwrap().0,
            Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
        );

        let all = SalesQuery::default();
        assert_eq!(date_range(&all, now).unwrap().0, DateTime::<Utc>::default());
    }

    #[test]
    fn invalid_or_inverted_dates_are_rejected() {
        let now = Utc::now();
        let bad = SalesQuery {
            start_date: Some("yesterday".into()),
            end_date: Some("2024-01-31".into()),
            ..Default::default()
        };
        assert!(date_range(&bad, now).is_err());
        let inverted = SalesQuery {
            start_date: Some("2024-02-01".into()),
            end_date: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert!(date_range(&inverted, now).is_err());
    }

    fn order_row(discount: Decimal, coupon: bool) -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            user_id: None,
            shipping_address: address(),
            payment_method: PaymentMethod::Cod,
            payment_status: PaymentStatus::Confirmed,
            payment_proof: None,
            status: OrderStatus::Delivered,
            tracking_id: None,
            coupon_id: coupon.then(Uuid::new_v4),
            coupon_code: None,
            subtotal: dec!(1000),
            shipping_cost: dec!(200),
            discount,
            cod_fee: dec!(100),
            total_amount: dec!(1300) - discount,
            payment_result: None,
            delivered_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn line(order_id: Uuid, original: Decimal, price: Decimal, quantity: i32) -> order_item::Model {
        order_item::Model {
            id: Uuid::new_v4(),
            order_id,
            product_id: Uuid::new_v4(),
            name: "Desi Ghee".into(),
            option_type: PriceOptionType::WeightBased,
            weight: 500,
            price,
            sale_price: None,
            original_price: original,
            sale_percentage: None,
            quantity,
            image: None,
        }
    }

    #[test]
    fn summarize_adds_sale_and_coupon_discounts() {
        let a = order_row(dec!(100), true);
        let b = order_row(dec!(0), false);
        let rows = vec![
            (a.clone(), vec![line(a.id, dec!(600), dec!(500), 2)]),
            (b.clone(), vec![line(b.id, dec!(400), dec!(400), 1)]),
        ];
        let stats = summarize(&rows);
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.total_revenue, dec!(2500));
        assert_eq!(stats.total_sales, dec!(2000));
        assert_eq!(stats.total_shipping, dec!(400));
        assert_eq!(stats.total_cod_fee, dec!(200));
        assert_eq!(stats.coupons_used, 1);
        assert_eq!(stats.total_coupon_discounts, dec!(100));
        assert_eq!(stats.total_sale_discounts, dec!(200));
        assert_eq!(stats.total_discount, dec!(300));
    }

    #[test]
    fn status_filter_is_case_insensitive() {
        assert_eq!(parse_status_filter("shipped").unwrap(), OrderStatus::Shipped);
        assert_eq!(parse_status_filter("PENDING").unwrap(), OrderStatus::Pending);
        assert!(parse_status_filter("lost").is_err());
    }
}
