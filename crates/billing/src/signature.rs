//! Checkout signature verification
//!
//! The gateway signs `"{order_id}|{payment_id}"` with the account's key
//! secret using HMAC-SHA256 and hands the hex digest to the browser.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC the gateway would have produced for this order/payment pair
pub fn expected_signature(
    key_secret: &str,
    order_id: &str,
    payment_id: &str,
) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(key_secret.as_bytes())
        .map_err(|_| BillingError::Internal("Invalid HMAC key".to_string()))?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Exact, constant-time comparison against the supplied signature
pub fn verify_payment_signature(
    key_secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    match expected_signature(key_secret, order_id, payment_id) {
        Ok(expected) => expected.as_bytes().ct_eq(signature.as_bytes()).into(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_key_secret";

    #[test]
    fn test_signature_is_hex_sha256() {
        let sig = expected_signature(SECRET, "order_abc", "pay_xyz").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_valid_signature_accepted() {
        let sig = expected_signature(SECRET, "order_abc", "pay_xyz").unwrap();
        assert!(verify_payment_signature(SECRET, "order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let sig = expected_signature(SECRET, "order_abc", "pay_xyz").unwrap();
        let mut tampered = sig.clone().into_bytes();
        tampered[0] = if tampered[0] == b'a' { b'b' } else { b'a' };
        let tampered = String::from_utf8(tampered).unwrap();

        assert!(!verify_payment_signature(SECRET, "order_abc", "pay_xyz", &tampered));
        assert!(!verify_payment_signature(SECRET, "order_abc", "pay_xyz", ""));
        assert!(!verify_payment_signature(SECRET, "order_abc", "pay_xyz", &sig[..32]));
        assert!(!verify_payment_signature(
            SECRET,
            "order_abc",
            "pay_xyz",
            &sig.to_uppercase()
        ));
    }

    #[test]
    fn test_signature_bound_to_both_ids_and_secret() {
        let sig = expected_signature(SECRET, "order_abc", "pay_xyz").unwrap();
        assert!(!verify_payment_signature(SECRET, "order_other", "pay_xyz", &sig));
        assert!(!verify_payment_signature(SECRET, "order_abc", "pay_other", &sig));
        assert!(!verify_payment_signature("other_secret", "order_abc", "pay_xyz", &sig));
        // The separator matters: "a|bc" and "ab|c" must not collide
        assert_ne!(
            expected_signature(SECRET, "a", "bc").unwrap(),
            expected_signature(SECRET, "ab", "c").unwrap()
        );
    }
}
