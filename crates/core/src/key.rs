//! Key and value validation, and the bucket hash.
//!
//! Keys and values are null-free byte strings of at most
//! [`MAX_STRING_SIZE`](crate::limits::MAX_STRING_SIZE) bytes. A key must
//! additionally hash to a bucket: its first byte, lowercased, must be a
//! letter or a digit. Letters map to indices 0..=25 and digits to 0..=9,
//! folding both ranges into the same 26-slot array. The fold means keys
//! starting with `a` and `0` share a bucket; that aliasing is part of the
//! observable contract and is preserved deliberately.

use crate::limits::MAX_STRING_SIZE;
use thiserror::Error;

/// Compute the bucket index of a key, or `None` when the key has no
/// bucket (empty, or first byte not alphanumeric).
///
/// # Examples
///
/// ```
/// use shelf_core::key::bucket_index;
///
/// assert_eq!(bucket_index("apple"), Some(0));
/// assert_eq!(bucket_index("Apple"), Some(0)); // first byte is lowercased
/// assert_eq!(bucket_index("zebra"), Some(25));
/// assert_eq!(bucket_index("0day"), Some(0));  // digits fold into 0..=9
/// assert_eq!(bucket_index("-dash"), None);
/// assert_eq!(bucket_index(""), None);
/// ```
pub fn bucket_index(key: &str) -> Option<usize> {
    match key.as_bytes().first()?.to_ascii_lowercase() {
        b @ b'a'..=b'z' => Some((b - b'a') as usize),
        b @ b'0'..=b'9' => Some((b - b'0') as usize),
        _ => None,
    }
}

/// Validate a key: non-empty, null-free, at most 40 bytes, bucketable.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.contains('\0') {
        return Err(KeyError::ContainsNul);
    }
    if key.len() > MAX_STRING_SIZE {
        return Err(KeyError::TooLong {
            actual: key.len(),
            max: MAX_STRING_SIZE,
        });
    }
    if bucket_index(key).is_none() {
        return Err(KeyError::NoBucket);
    }
    Ok(())
}

/// Validate a value: null-free and at most 40 bytes.
///
/// Unlike keys, values may be empty and have no bucket rule.
pub fn validate_value(value: &str) -> Result<(), KeyError> {
    if value.contains('\0') {
        return Err(KeyError::ContainsNul);
    }
    if value.len() > MAX_STRING_SIZE {
        return Err(KeyError::TooLong {
            actual: value.len(),
            max: MAX_STRING_SIZE,
        });
    }
    Ok(())
}

/// Key/value validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Key is empty
    #[error("key cannot be empty")]
    Empty,

    /// Key or value contains a NUL byte
    #[error("key or value cannot contain NUL bytes")]
    ContainsNul,

    /// Key or value exceeds the maximum length
    #[error("string too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Actual length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Key's first byte is neither a letter nor a digit
    #[error("key does not hash to a bucket (first byte must be alphanumeric)")]
    NoBucket,
}
