//! Strict location validation.

use crate::{parse, Path, PointerError};

/// Maximum allowed location string length.
const MAX_POINTER_LENGTH: usize = 1024;

/// Maximum allowed path depth.
const MAX_PATH_LENGTH: usize = 256;

/// Validates a location string.
///
/// # Errors
///
/// - `PointerInvalid` if the string is non-empty and does not start with `/`
/// - `PointerTooLong` if it exceeds 1024 characters
/// - `PathTooLong` if it has more than 256 parts
pub fn validate_pointer(pointer: &str) -> Result<(), PointerError> {
    if pointer.is_empty() {
        return Ok(());
    }
    if !pointer.starts_with('/') {
        return Err(PointerError::PointerInvalid);
    }
    if pointer.len() > MAX_POINTER_LENGTH {
        return Err(PointerError::PointerTooLong);
    }
    if pointer.bytes().filter(|&b| b == b'/').count() > MAX_PATH_LENGTH {
        return Err(PointerError::PathTooLong);
    }
    Ok(())
}

/// Validates, then parses.
pub fn parse_strict(pointer: &str) -> Result<Path, PointerError> {
    validate_pointer(pointer)?;
    Ok(parse(pointer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_and_oversized() {
        assert!(validate_pointer("").is_ok());
        assert!(validate_pointer("/a/b").is_ok());
        assert_eq!(validate_pointer("a/b"), Err(PointerError::PointerInvalid));
        let long = format!("/{}", "x".repeat(MAX_POINTER_LENGTH));
        assert_eq!(validate_pointer(&long), Err(PointerError::PointerTooLong));
        let deep = "/a".repeat(MAX_PATH_LENGTH + 1);
        assert_eq!(validate_pointer(&deep), Err(PointerError::PathTooLong));
    }
}
