// Pricing and cart resolution
pub mod cart;
pub mod pricing;
pub mod products;

// Checkout pipeline
pub mod coupons;
pub mod inventory;
pub mod orders;

// Post-checkout lifecycle
pub mod order_status;
pub mod payments;

// Store configuration
pub mod settings;
