use argon2rs::argon2i_simple;

use crate::env;
use crate::error::{ServiceError, ServiceResult};

/// argon2 rejects shorter salts.
pub const MIN_SALT_LENGTH: usize = 8;

/// Fail if `salt` is too short to hash PINs with.
pub fn check_salt(salt: &str) -> ServiceResult<()> {
    if salt.len() < MIN_SALT_LENGTH {
        return Err(ServiceError::store(format!(
            "PIN_SALT must be at least {} bytes long",
            MIN_SALT_LENGTH
        )));
    }
    Ok(())
}

/// Create the hash version of a PIN
pub fn hash_pin(pin: &str) -> ServiceResult<String> {
    hash_pin_with_salt(pin, env::PIN_SALT.as_str())
}

fn hash_pin_with_salt(pin: &str, salt: &str) -> ServiceResult<String> {
    check_salt(salt)?;
    Ok(hex::encode(argon2i_simple(pin, salt)))
}

/// Outcome of comparing a submitted PIN to the stored value
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PinMatch {
    Hashed,
    /// Matched an old plaintext value, the caller should store the hash instead.
    LegacyPlaintext,
    Mismatch,
}

/// Verify a PIN to its stored version
pub fn verify_pin(stored: &str, pin: &str) -> ServiceResult<PinMatch> {
    if stored.is_empty() {
        return Ok(PinMatch::Mismatch);
    }
    let matched = if stored.eq_ignore_ascii_case(&hash_pin(pin)?) {
        PinMatch::Hashed
    } else if stored == pin {
        PinMatch::LegacyPlaintext
    } else {
        PinMatch::Mismatch
    };
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_salted() {
        let salt = "0123456789abcdef";
        let hash = hash_pin_with_salt("1234", salt).unwrap();
        assert_eq!(hash, hash_pin_with_salt("1234", salt).unwrap());
        assert_ne!(hash, hash_pin_with_salt("4321", salt).unwrap());
        assert_ne!(hash, hash_pin_with_salt("1234", "fedcba9876543210").unwrap());
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_short_salt_is_an_error() {
        let result = hash_pin_with_salt("1234", "short");
        assert!(matches!(result, Err(ServiceError::StoreFailure { .. })));
        assert!(check_salt("1234567").is_err());
        assert!(check_salt("12345678").is_ok());
    }

    #[test]
    fn test_verify_pin() {
        let stored = hash_pin("2468").unwrap();
        assert_eq!(verify_pin(&stored, "2468"), Ok(PinMatch::Hashed));
        assert_eq!(verify_pin(&stored.to_uppercase(), "2468"), Ok(PinMatch::Hashed));
        assert_eq!(verify_pin(&stored, "1357"), Ok(PinMatch::Mismatch));
        assert_eq!(verify_pin("2468", "2468"), Ok(PinMatch::LegacyPlaintext));
        assert_eq!(verify_pin("", ""), Ok(PinMatch::Mismatch));
    }
}
