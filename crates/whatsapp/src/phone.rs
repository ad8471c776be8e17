use sarpras_core::dispatch::NotifyError;

const COUNTRY_CODE: &str = "62";

/// Normalises an Indonesian phone number to the digits-only international
/// form the gateway expects (`0812…` and `+62 812…` both become `62812…`).
pub fn normalize_phone(raw: &str) -> Result<String, NotifyError> {
    let trimmed = raw.trim();
    let mut digits = String::with_capacity(trimmed.len());
    for (index, ch) in trimmed.chars().enumerate() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '.' | '(' | ')' => {}
            '+' if index == 0 => {}
            _ => return Err(NotifyError::InvalidRecipient(raw.to_string())),
        }
    }

    let international = if let Some(local) = digits.strip_prefix('0') {
        format!("{COUNTRY_CODE}{local}")
    } else if digits.starts_with(COUNTRY_CODE) {
        digits
    } else if digits.starts_with('8') {
        format!("{COUNTRY_CODE}{digits}")
    } else {
        return Err(NotifyError::InvalidRecipient(raw.to_string()));
    };

    // 62 + 8..13 subscriber digits
    if !(10..=15).contains(&international.len()) {
        return Err(NotifyError::InvalidRecipient(raw.to_string()));
    }
    Ok(international)
}
