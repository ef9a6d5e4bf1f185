//! PayFast redirect gateway: MD5 signature scheme, signed redirect URL and
//! notification verification. The GoPayFast web-checkout variant lives in
//! [`gopayfast`].

pub mod gopayfast;

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use rust_decimal::Decimal;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::{config::PayFastConfig, errors::ServiceError};

pub use gopayfast::{GoPayFastCheckout, GoPayFastClient};

pub const SIGNATURE_FIELD: &str = "signature";

#[derive(Debug, Error)]
pub enum PayFastError {
    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned no access token")]
    MissingToken,
    #[error("gateway is not configured")]
    NotConfigured,
}

impl From<PayFastError> for ServiceError {
    fn from(err: PayFastError) -> Self {
        match err {
            PayFastError::NotConfigured => {
                ServiceError::InvalidOperation("Payment gateway is not configured".to_string())
            }
            PayFastError::InvalidUrl(msg) => ServiceError::InternalError(msg),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

/// JavaScript `encodeURIComponent`: everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )`
/// is percent-encoded.
pub fn encode_uri_component(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}

/// The string that gets hashed: sorted `key=value` pairs joined by `&`, with
/// the passphrase appended when configured.
pub fn signature_base<'a, I>(fields: I, passphrase: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = fields
        .into_iter()
        .filter(|(key, _)| *key != SIGNATURE_FIELD)
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut base = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, encode_uri_component(value)))
        .collect::<Vec<_>>()
        .join("&");

    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        base.push_str("&passphrase=");
        base.push_str(&encode_uri_component(passphrase));
    }
    base
}

/// Lower-case hex MD5 of [`signature_base`].
pub fn sign<'a, I>(fields: I, passphrase: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let digest = Md5::digest(signature_base(fields, passphrase).as_bytes());
    hex::encode(digest)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Checks the `signature` field of a notification against the other fields.
pub fn verify_notification(payload: &BTreeMap<String, String>, passphrase: Option<&str>) -> bool {
    let Some(received) = payload.get(SIGNATURE_FIELD) else {
        return false;
    };
    let expected = sign(
        payload.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        passphrase,
    );
    constant_time_eq(expected.as_bytes(), received.as_bytes())
}

/// Builds the signed redirect URL for an order.
pub fn redirect_url(
    config: &PayFastConfig,
    order_id: Uuid,
    amount: Decimal,
) -> Result<String, PayFastError> {
    let order_ref = order_id.to_string();
    let amount = format!("{:.2}", amount.round_dp(2));
    let item_name = format!("Order #{}", order_ref);

    let mut params: Vec<(&str, &str)> = vec![
        ("merchant_id", config.merchant_id.as_str()),
        ("merchant_key", config.merchant_key.as_str()),
        ("return_url", config.return_url.as_str()),
        ("cancel_url", config.cancel_url.as_str()),
        ("notify_url", config.notify_url.as_str()),
        ("m_payment_id", order_ref.as_str()),
        ("amount", amount.as_str()),
        ("item_name", item_name.as_str()),
    ];
    let signature = sign(params.iter().copied(), config.passphrase.as_deref());
    params.push((SIGNATURE_FIELD, signature.as_str()));

    Url::parse_with_params(&config.url, &params)
        .map(String::from)
        .map_err(|e| PayFastError::InvalidUrl(e.to_string()))
}
