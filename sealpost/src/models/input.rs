//! Input DTOs with garde validation.
//!
//! These structs validate caller data before any storage I/O.

use garde::Validate;
use serde::Deserialize;

/// Validation constants
pub const MAX_USER_ID_LENGTH: usize = 128;
pub const MAX_MESSAGE_LENGTH: usize = 10000;

/// Reject identifiers that are blank once trimmed
fn validate_not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        Err(garde::Error::new("must not be blank"))
    } else {
        Ok(())
    }
}

/// Input for sending a message
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct SendInput {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH), custom(validate_not_blank))]
    pub recipient_id: String,
    #[garde(length(chars, min = 1, max = MAX_MESSAGE_LENGTH))]
    pub message: String,
}

impl SendInput {
    pub fn new(recipient_id: &str, message: &str) -> Self {
        Self {
            recipient_id: recipient_id.trim().to_string(),
            message: message.to_string(),
        }
    }
}

/// Helper trait to convert garde validation errors to String
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), String>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_input() {
        assert!(SendInput::new("bob", "hi").validate_input().is_ok());
    }

    #[test]
    fn test_recipient_is_trimmed() {
        let input = SendInput::new("  bob \n", "hi");
        assert_eq!(input.recipient_id, "bob");
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(SendInput::new("", "hi").validate_input().is_err());
        assert!(SendInput::new("   ", "hi").validate_input().is_err());
        assert!(SendInput::new("bob", "").validate_input().is_err());
    }

    #[test]
    fn test_length_limits() {
        let long_id = "x".repeat(MAX_USER_ID_LENGTH + 1);
        assert!(SendInput::new(&long_id, "hi").validate_input().is_err());

        let long_message = "m".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(SendInput::new("bob", &long_message).validate_input().is_err());

        // Limit counts characters, not bytes
        let wide = "\u{00e9}".repeat(MAX_MESSAGE_LENGTH);
        assert!(SendInput::new("bob", &wide).validate_input().is_ok());
    }
}
