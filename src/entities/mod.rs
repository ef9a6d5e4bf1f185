//! sea-orm entities backing the storefront order pipeline.

pub mod coupon;
pub mod coupon_usage;
pub mod order;
pub mod order_item;
pub mod price_option;
pub mod product;
pub mod settings;
pub mod user;
