//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::services::room_code::{CODE_ALPHABET, CODE_LENGTH};

/// Longest identity accepted from clients.
pub const MAX_IDENTITY_LEN: usize = 64;
/// Longest display name accepted from clients.
pub const MAX_NAME_LEN: usize = 32;

/// Validates that a room code has the expected length and only uses the code alphabet.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("ABC234") // Ok
/// validate_room_code("abc234") // Err - lowercase
/// validate_room_code("ABCD0I") // Err - ambiguous characters
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != CODE_LENGTH {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {CODE_LENGTH} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.bytes().all(|c| CODE_ALPHABET.contains(&c)) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code contains characters outside the code alphabet".into());
        return Err(err);
    }

    Ok(())
}

/// Validates an opaque player identity: non-blank, bounded, no control characters.
pub fn validate_identity(identity: &str) -> Result<(), ValidationError> {
    validate_text(identity, MAX_IDENTITY_LEN, "identity")
}

/// Validates a display name shown to other players.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    validate_text(name, MAX_NAME_LEN, "display_name")
}

fn validate_text(value: &str, max: usize, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some(format!("{field} must not be blank").into());
        return Err(err);
    }
    if value.chars().count() > max {
        let mut err = ValidationError::new("too_long");
        err.message = Some(format!("{field} must be at most {max} characters").into());
        return Err(err);
    }
    if value.chars().any(char::is_control) {
        let mut err = ValidationError::new("control_characters");
        err.message = Some(format!("{field} must not contain control characters").into());
        return Err(err);
    }
    Ok(())
}
