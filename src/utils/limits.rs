//! Column widths from the migrations, checked before a value reaches
//! Postgres so oversized input is a 400 rather than a driver error.

pub const TITLE_MAX: usize = 255;
pub const CASE_NUMBER_MAX: usize = 100;
pub const DOCUMENT_TYPE_MAX: usize = 100;
pub const CONTENT_TYPE_MAX: usize = 100;
pub const EMAIL_MAX: usize = 255;
pub const NAME_MAX: usize = 255;
pub const ORGANIZATION_MAX: usize = 255;
pub const PHONE_NUMBER_MAX: usize = 64;
pub const BAR_NUMBER_MAX: usize = 64;

/// Pushes an error when `value` holds more than `max` characters.
pub fn check_length(label: &str, value: Option<&str>, max: usize, errors: &mut Vec<String>) {
    if value.is_some_and(|text| text.chars().count() > max) {
        errors.push(format!("{label} must be at most {max} characters"));
    }
}
