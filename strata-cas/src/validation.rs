//! Input validation for chunk identifiers and file keys

use thiserror::Error;

/// Maximum length of a caller supplied file key
pub const MAX_FILE_KEY_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    #[error("Invalid file key: {0}")]
    InvalidFileKey(String),
}

/// Validate a hex encoded SHA-256 digest
pub fn validate_content_hash(hash: &str) -> Result<(), ValidationError> {
    // SHA-256 is 32 bytes = 64 hex characters
    if hash.len() != 64 {
        return Err(ValidationError::InvalidHash(format!(
            "Invalid length: {} (expected 64)",
            hash.len()
        )));
    }

    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidHash(
            "Not valid hexadecimal".to_string(),
        ));
    }

    Ok(())
}

/// Validate a file key. Keys are opaque but must be non-empty, bounded,
/// and free of control characters.
pub fn validate_file_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::InvalidFileKey("empty key".to_string()));
    }

    if key.len() > MAX_FILE_KEY_LEN {
        return Err(ValidationError::InvalidFileKey(format!(
            "length {} exceeds maximum {}",
            key.len(),
            MAX_FILE_KEY_LEN
        )));
    }

    if key.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidFileKey(
            "contains control characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content_hash() {
        assert!(validate_content_hash(&"a".repeat(64)).is_ok());
        assert!(validate_content_hash(&"a".repeat(63)).is_err());
        assert!(validate_content_hash(&"g".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_file_key() {
        assert!(validate_file_key("movie.mkv#v1").is_ok());
        assert!(validate_file_key("").is_err());
        assert!(validate_file_key("bad\nkey").is_err());
        assert!(validate_file_key(&"k".repeat(MAX_FILE_KEY_LEN + 1)).is_err());
    }
}
