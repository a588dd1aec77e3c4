use serde_json::Value;

/// How a single field of a PATCH body was supplied.
#[derive(Debug, PartialEq, Eq)]
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

impl NullableValue {
    /// Change for an optional text column. `None` leaves the column alone,
    /// `Some(None)` clears it. Blank strings clear as well.
    pub fn into_optional_text(self) -> Option<Option<String>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::String(value) => {
                let trimmed = value.trim();
                Some((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
        }
    }

    /// Change for a NOT NULL text column; null and blank values are rejected.
    pub fn into_required_text(self, field: &str) -> Result<Option<String>, String> {
        match self {
            NullableValue::Omitted => Ok(None),
            NullableValue::Null => Err(format!("{field} cannot be null")),
            NullableValue::String(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Err(format!("{field} must not be empty"))
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
        }
    }
}

/// Classifies `body[field]` and maps it to an optional-column change.
pub fn optional_text_field(body: &Value, field: &str) -> Result<Option<Option<String>>, String> {
    Ok(classify_nullable(body.get(field))
        .map_err(|err| format!("{field}: {err}"))?
        .into_optional_text())
}

/// Classifies `body[field]` and maps it to a required-column change.
pub fn required_text_field(body: &Value, field: &str) -> Result<Option<String>, String> {
    classify_nullable(body.get(field))
        .map_err(|err| format!("{field}: {err}"))?
        .into_required_text(field)
}
