//! Message bodies for order notifications.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use super::TemplateParam;
use crate::entities::{
    order::{self, OrderStatus},
    order_item,
};

const PREPARATION_TIME: &str = "2-3 days";

struct StatusCopy {
    title: &'static str,
    message: &'static str,
    color: &'static str,
}

fn status_copy(status: OrderStatus) -> StatusCopy {
    match status {
        OrderStatus::Pending => StatusCopy {
            title: "Order Received",
            message: "We've received your order and are waiting for payment confirmation.",
            color: "#7f8c8d",
        },
        OrderStatus::Processing => StatusCopy {
            title: "Order Processing",
            message: "We've received your order and are preparing it for shipment.",
            color: "#3498db",
        },
        OrderStatus::Shipped => StatusCopy {
            title: "Order Shipped!",
            message: "Your order is on its way to you!",
            color: "#2ecc71",
        },
        OrderStatus::Delivered => StatusCopy {
            title: "Order Delivered",
            message: "Your order has been successfully delivered.",
            color: "#27ae60",
        },
        OrderStatus::Cancelled => StatusCopy {
            title: "Order Cancelled",
            message: "Your order has been cancelled.",
            color: "#e74c3c",
        },
        OrderStatus::Returned => StatusCopy {
            title: "Return Processed",
            message: "We've received your returned items.",
            color: "#f39c12",
        },
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn money(amount: Decimal) -> String {
    format!("Rs{:.2}", amount.round_dp(2))
}

pub fn first_name(full_name: &str) -> String {
    full_name
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Last six characters of the order id, as shown to customers.
pub fn short_order_number(order_id: &uuid::Uuid) -> String {
    let id = order_id.to_string();
    id[id.len() - 6..].to_string()
}

fn items_table(items: &[order_item::Model]) -> String {
    let rows: String = items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{} ({}g)</td><td>{}</td><td>{}</td></tr>",
                escape_html(&item.name),
                item.weight,
                item.quantity,
                money(item.line_total())
            )
        })
        .collect();
    format!(
        "<table width=\"100%\" cellpadding=\"6\"><tr><th align=\"left\">Item</th><th>Qty</th><th>Total</th></tr>{}</table>",
        rows
    )
}

fn totals(order: &order::Model) -> String {
    let mut out = format!("<p>Subtotal: {}</p>", money(order.subtotal));
    if order.discount > Decimal::ZERO {
        let code = order.coupon_code.as_deref().unwrap_or_default();
        out.push_str(&format!(
            "<p>Discount {}: -{}</p>",
            escape_html(code),
            money(order.discount)
        ));
    }
    out.push_str(&format!("<p>Shipping: {}</p>", money(order.shipping_cost)));
    if order.cod_fee > Decimal::ZERO {
        out.push_str(&format!("<p>COD fee: {}</p>", money(order.cod_fee)));
    }
    out.push_str(&format!("<h3>Total: {}</h3>", money(order.total_amount)));
    out
}

pub fn confirmation_subject(store_name: &str) -> String {
    format!("Order Confirmation - {}", store_name)
}

pub fn confirmation_email(
    order: &order::Model,
    items: &[order_item::Model],
    store_name: &str,
) -> String {
    let address = &order.shipping_address;
    format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
<h2>Thank you for your order, {name}!</h2>\
<p>Order #{id}</p>{items}{totals}\
<p>Payment Method: {method}</p>\
<h4>Shipping to</h4><p>{line}, {city}, {country}</p>\
<p>{store}</p></div>",
        name = escape_html(&first_name(&address.full_name)),
        id = order.id,
        items = items_table(items),
        totals = totals(order),
        method = order.payment_method,
        line = escape_html(&address.address),
        city = escape_html(&address.city),
        country = escape_html(&address.country),
        store = escape_html(store_name),
    )
}

pub fn status_subject(order: &order::Model, status: OrderStatus) -> String {
    format!("{} Update - Order #{}", status, order.id)
}

pub fn status_email(
    order: &order::Model,
    items: &[order_item::Model],
    status: OrderStatus,
    order_url: &str,
) -> String {
    let copy = status_copy(status);
    let tracking = match (status, order.tracking_id.as_deref()) {
        (OrderStatus::Shipped, Some(tracking_id)) => format!(
            "<div style=\"border-left: 4px solid {}; padding: 12px;\"><p>Tracking ID: <strong>{}</strong></p></div>",
            copy.color,
            escape_html(tracking_id)
        ),
        _ => String::new(),
    };
    format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
<div style=\"background-color: {color}; color: white; padding: 24px; text-align: center;\"><h1>{title}</h1></div>\
<p>Hi {name},</p><p>{message}</p>\
<p>Order #{id}<br>Status: {status}</p>{tracking}{items}{totals}\
<p><a href=\"{url}\">View your order</a></p></div>",
        color = copy.color,
        title = copy.title,
        name = escape_html(&first_name(&order.shipping_address.full_name)),
        message = copy.message,
        id = order.id,
        status = status,
        tracking = tracking,
        items = items_table(items),
        totals = totals(order),
        url = escape_html(order_url),
    )
}

pub fn order_url(base_url: &str, order_id: &uuid::Uuid) -> String {
    format!(
        "{}/user/dashboard/order-history/{}",
        base_url.trim_end_matches('/'),
        order_id
    )
}

fn estimated_date(now: DateTime<Utc>, days: i64) -> String {
    (now + Duration::days(days)).format("%b %-d, %Y").to_string()
}

/// WhatsApp template and parameters for a status change, if the status has one.
pub fn status_template(
    order: &order::Model,
    status: OrderStatus,
    base_url: &str,
    now: DateTime<Utc>,
) -> Option<(&'static str, Vec<TemplateParam>)> {
    let mut params = vec![
        TemplateParam::new(
            "customer_name",
            first_name(&order.shipping_address.full_name),
        ),
        TemplateParam::new("order_number", short_order_number(&order.id)),
        TemplateParam::new("order_url", order_url(base_url, &order.id)),
    ];

    let template = match status {
        OrderStatus::Pending => return None,
        OrderStatus::Processing => {
            params.push(TemplateParam::new("estimated_date", estimated_date(now, 3)));
            "order_process"
        }
        OrderStatus::Shipped => {
            params.push(TemplateParam::new(
                "tracking_id",
                order
                    .tracking_id
                    .clone()
                    .unwrap_or_else(|| "Not available, will update soon".to_string()),
            ));
            params.push(TemplateParam::new("estimated_date", estimated_date(now, 2)));
            "order_shipped"
        }
        OrderStatus::Delivered => "order_deliver",
        OrderStatus::Returned => "order_return",
        OrderStatus::Cancelled => {
            params.push(TemplateParam::new("estimated_date", "4"));
            "order_cancel"
        }
    };
    Some((template, params))
}

pub const CONFIRMATION_TEMPLATE: &str = "order_confirmation_utility";

pub fn confirmation_params(order: &order::Model, item_count: usize) -> Vec<TemplateParam> {
    let noun = if item_count == 1 { "item" } else { "items" };
    vec![
        TemplateParam::new(
            "customer_name",
            first_name(&order.shipping_address.full_name),
        ),
        TemplateParam::new("order_id", order.id.to_string()),
        TemplateParam::new("item_count", format!("{} {}", item_count, noun)),
        TemplateParam::new("order_total", money(order.total_amount)),
        TemplateParam::new("preparation_time", PREPARATION_TIME),
    ]
}
