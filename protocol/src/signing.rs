use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the hex-lowercase HMAC-SHA256 of `bytes` under `secret`.
#[must_use]
pub fn hmac_hex(secret: &[u8], bytes: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(bytes);
    hex::encode(mac.finalize().into_bytes())
}

/// Recomputes the HMAC-SHA256 of `bytes` under `secret` and constant-time
/// compares it against `signature_hex`.
#[must_use]
pub fn hmac_verify(secret: &[u8], bytes: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(bytes);
    mac.verify_slice(&expected).is_ok()
}

/// Verifies a webhook signature in the `sha256=<hex>` form used by external
/// adapters, shared here so adapters don't reimplement HMAC handling.
#[must_use]
pub fn verify_webhook_signature(secret: &[u8], body: &[u8], header: &str) -> bool {
    let Some(hex_part) = header.strip_prefix("sha256=") else {
        return false;
    };
    hmac_verify(secret, body, hex_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_hex_is_deterministic() {
        let a = hmac_hex(b"secret", b"payload");
        let b = hmac_hex(b"secret", b"payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hmac_verify_round_trips() {
        let sig = hmac_hex(b"secret", b"payload");
        assert!(hmac_verify(b"secret", b"payload", &sig));
        assert!(!hmac_verify(b"other", b"payload", &sig));
    }

    #[test]
    fn webhook_signature_requires_prefix() {
        let sig = hmac_hex(b"secret", b"body");
        assert!(verify_webhook_signature(b"secret", b"body", &format!("sha256={sig}")));
        assert!(!verify_webhook_signature(b"secret", b"body", &sig));
    }
}
