//! Identifier validation shared by API keys and subscriptions

use thiserror::Error;

/// Errors that can occur while validating a resource identifier
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdValidationError {
    #[error("ID cannot be empty")]
    Empty,

    #[error("ID exceeds maximum length of {0} characters")]
    TooLong(usize),

    #[error("ID must start with a letter or number")]
    InvalidStart,

    #[error("ID must end with a letter or number")]
    InvalidEnd,

    #[error("ID contains invalid character: '{0}'. Only alphanumeric characters and hyphens are allowed")]
    InvalidCharacter(char),

    #[error("ID cannot contain consecutive hyphens")]
    ConsecutiveHyphens,
}

const MAX_ID_LENGTH: usize = 64;

/// Validate a resource identifier
///
/// Identifiers are ASCII slugs: alphanumerics and single hyphens, starting and
/// ending with an alphanumeric, at most 64 characters.
pub fn validate_id(id: &str) -> Result<(), IdValidationError> {
    let (Some(first), Some(last)) = (id.chars().next(), id.chars().last()) else {
        return Err(IdValidationError::Empty);
    };

    if id.len() > MAX_ID_LENGTH {
        return Err(IdValidationError::TooLong(MAX_ID_LENGTH));
    }

    if !first.is_ascii_alphanumeric() {
        return Err(IdValidationError::InvalidStart);
    }

    if !last.is_ascii_alphanumeric() {
        return Err(IdValidationError::InvalidEnd);
    }

    let mut prev_hyphen = false;

    for c in id.chars() {
        match c {
            '-' if prev_hyphen => return Err(IdValidationError::ConsecutiveHyphens),
            '-' => prev_hyphen = true,
            c if c.is_ascii_alphanumeric() => prev_hyphen = false,
            c => return Err(IdValidationError::InvalidCharacter(c)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(validate_id("key-1").is_ok());
        assert!(validate_id("sub-1718000000000").is_ok());
        assert!(validate_id("a").is_ok());
        assert!(validate_id(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_invalid_ids() {
        assert_eq!(validate_id(""), Err(IdValidationError::Empty));
        assert_eq!(
            validate_id(&"a".repeat(65)),
            Err(IdValidationError::TooLong(64))
        );
        assert_eq!(validate_id("-key"), Err(IdValidationError::InvalidStart));
        assert_eq!(validate_id("key-"), Err(IdValidationError::InvalidEnd));
        assert_eq!(
            validate_id("key_1"),
            Err(IdValidationError::InvalidCharacter('_'))
        );
        assert_eq!(
            validate_id("key--1"),
            Err(IdValidationError::ConsecutiveHyphens)
        );
    }
}
