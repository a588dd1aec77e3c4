use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::limits::{check_length, EMAIL_MAX, NAME_MAX};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("valid email pattern"));

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MIN_NAME_LENGTH: usize = 2;

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Collects every registration problem so the client can show them together.
pub fn validate_registration(
    email: Option<&str>,
    password: Option<&str>,
    name: Option<&str>,
) -> Vec<String> {
    let mut errors = Vec::new();

    match email.map(str::trim).filter(|value| !value.is_empty()) {
        None => errors.push("Email is required".to_string()),
        Some(value) if !is_valid_email(value) => {
            errors.push("Email format is invalid".to_string())
        }
        value => check_length("Email", value, EMAIL_MAX, &mut errors),
    }

    match password.filter(|value| !value.is_empty()) {
        None => errors.push("Password is required".to_string()),
        Some(value) if value.chars().count() < MIN_PASSWORD_LENGTH => errors.push(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )),
        Some(value) if !has_required_character_classes(value) => errors.push(
            "Password must contain at least one uppercase letter, one lowercase letter, and one number"
                .to_string(),
        ),
        Some(_) => {}
    }

    match name.map(str::trim).filter(|value| !value.is_empty()) {
        None => errors.push("Name is required".to_string()),
        Some(value) if value.chars().count() < MIN_NAME_LENGTH => errors.push(format!(
            "Name must be at least {MIN_NAME_LENGTH} characters long"
        )),
        value => check_length("Name", value, NAME_MAX, &mut errors),
    }

    errors
}

pub fn validate_login(email: Option<&str>, password: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();
    if email.map(str::trim).filter(|v| !v.is_empty()).is_none() {
        errors.push("Email is required".to_string());
    }
    if password.filter(|v| !v.is_empty()).is_none() {
        errors.push("Password is required".to_string());
    }
    errors
}

fn has_required_character_classes(password: &str) -> bool {
    password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_registration() {
        assert!(validate_registration(Some("a@x.com"), Some("Abcdef12"), Some("Ann")).is_empty());
    }

    #[test]
    fn reports_every_missing_field() {
        let errors = validate_registration(None, None, None);
        assert_eq!(
            errors,
            vec![
                "Email is required",
                "Password is required",
                "Name is required"
            ]
        );
    }

    #[test]
    fn rejects_weak_passwords() {
        let short = validate_registration(Some("a@x.com"), Some("Ab1"), Some("Ann"));
        assert_eq!(short, vec!["Password must be at least 8 characters long"]);

        for weak in ["abcdefgh1", "ABCDEFGH1", "Abcdefghi"] {
            let errors = validate_registration(Some("a@x.com"), Some(weak), Some("Ann"));
            assert_eq!(errors.len(), 1, "{weak}");
            assert!(errors[0].starts_with("Password must contain"));
        }
    }

    #[test]
    fn rejects_malformed_email_and_short_name() {
        let errors = validate_registration(Some("not-an-email"), Some("Abcdef12"), Some("A"));
        assert_eq!(
            errors,
            vec![
                "Email format is invalid",
                "Name must be at least 2 characters long"
            ]
        );
    }

    #[test]
    fn login_requires_both_fields() {
        assert_eq!(validate_login(Some("a@x.com"), None), vec!["Password is required"]);
        assert!(validate_login(Some("a@x.com"), Some("x")).is_empty());
    }

    #[test]
    fn rejects_values_wider_than_their_columns() {
        let email = format!("{}@example.com", "a".repeat(250));
        let name = "N".repeat(256);
        assert_eq!(
            validate_registration(Some(&email), Some("Abcdef12"), Some(&name)),
            vec![
                "Email must be at most 255 characters",
                "Name must be at most 255 characters"
            ]
        );
    }
}
