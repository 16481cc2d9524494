//! Validation helpers for DTOs.

use validator::ValidationError;

/// Rejects empty and whitespace-only text.
///
/// # Examples
///
/// ```ignore
/// validate_not_blank("Team C") // Ok
/// validate_not_blank("   ")    // Err
/// ```
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }

    Ok(())
}
