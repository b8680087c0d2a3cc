//! Keyed signatures and secret generation.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length in hex characters of a truncated signature (128 bits).
pub const TRUNCATED_SIGNATURE_HEX_LEN: usize = 32;

/// Error type for keyed signatures.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// HMAC-SHA256 of `message`, hex-encoded and cut to the leftmost 32 characters.
pub fn sign_truncated(secret: &[u8], message: &str) -> Result<String, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(message.as_bytes());
    let mut signature = hex::encode(mac.finalize().into_bytes());
    signature.truncate(TRUNCATED_SIGNATURE_HEX_LEN);
    Ok(signature)
}

/// Constant-time check of a signature produced by [`sign_truncated`].
pub fn verify_truncated(secret: &[u8], message: &str, signature: &str) -> bool {
    if signature.len() != TRUNCATED_SIGNATURE_HEX_LEN {
        return false;
    }
    let Ok(bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_truncated_left(&bytes).is_ok()
}

/// Random secret of `len` bytes from the OS-seeded thread RNG.
pub fn random_secret(len: usize) -> Vec<u8> {
    let mut secret = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_truncated_is_prefix_of_full_hmac() {
        // RFC 4231 test case 2
        let signature = sign_truncated(b"Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(signature, "5bdcc146bf60754e6a042426089575c7");
        assert_eq!(signature.len(), TRUNCATED_SIGNATURE_HEX_LEN);
    }

    #[test]
    fn test_verify_truncated() {
        let secret = b"export-secret";
        let signature = sign_truncated(secret, "job|1700000000000").unwrap();

        assert!(verify_truncated(secret, "job|1700000000000", &signature));
        assert!(!verify_truncated(secret, "job|1700000000001", &signature));
        assert!(!verify_truncated(b"other-secret", "job|1700000000000", &signature));
    }

    #[test]
    fn test_verify_truncated_rejects_malformed() {
        let secret = b"export-secret";
        let signature = sign_truncated(secret, "msg").unwrap();

        assert!(!verify_truncated(secret, "msg", &signature[..16]));
        assert!(!verify_truncated(secret, "msg", ""));
        assert!(!verify_truncated(secret, "msg", &"z".repeat(32)));
    }

    #[test]
    fn test_random_secret() {
        let a = random_secret(32);
        let b = random_secret(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
