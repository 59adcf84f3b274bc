//! Webhook payload signatures

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Shipyard-Signature";
pub const DELIVERY_HEADER: &str = "X-Shipyard-Delivery";
pub const EVENT_HEADER: &str = "X-Shipyard-Event";

const PREFIX: &str = "sha256=";

/// Hex HMAC-SHA256 of `body` keyed by `secret`
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Value of the signature header: `sha256=<hex>`
pub fn signature_header(secret: &[u8], body: &[u8]) -> String {
    format!("{}{}", PREFIX, sign(secret, body))
}

/// Constant-time check of a received signature header
pub fn verify(secret: &[u8], body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.trim().strip_prefix(PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
