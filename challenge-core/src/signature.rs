//! Webhook payload signatures (`X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Check `header` against the HMAC-SHA256 of `body`.
///
/// With no secret configured every payload is accepted. Otherwise the header
/// must be `sha256=` followed by the lowercase hex digest, compared in
/// constant time.
pub fn verify_signature(secret: Option<&str>, body: &[u8], header: &str) -> bool {
    let Some(secret) = secret else {
        return true;
    };

    let Some(signature_hex) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    if !signature_hex
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return false;
    }

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(body);

    mac.verify_slice(&signature_bytes).is_ok()
}

/// Header value a sender holding `secret` would attach to `body`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}
