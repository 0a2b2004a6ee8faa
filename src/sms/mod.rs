pub mod extract;
pub mod format;

use chrono::NaiveDateTime;
use serde_json::Value;

/// Timestamp layout used by the panel in the first column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column positions in an `aaData` row
pub const DATE: usize = 0;
pub const ROUTE: usize = 1;
pub const NUMBER: usize = 2;
pub const SERVICE: usize = 3;
pub const BODY: usize = 4;

/// A field that cannot be rendered as text (nested array or object)
#[derive(Debug, thiserror::Error)]
#[error("field {index} is not renderable as text: {value}")]
pub struct FieldError {
    pub index: usize,
    pub value: String,
}

/// One SMS event as returned by the panel: a row of heterogeneous JSON values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<Value>,
}

impl Record {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Text of the field at `index`.
    ///
    /// Strings are returned verbatim, numbers and booleans as their JSON text.
    /// A missing index or `null` is `Ok(None)`; arrays and objects are errors.
    pub fn text(&self, index: usize) -> Result<Option<String>, FieldError> {
        match self.fields.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(v) => Err(FieldError {
                index,
                value: v.to_string(),
            }),
        }
    }

    /// The field at `index` when it is a JSON string.
    pub fn str_field(&self, index: usize) -> Option<&str> {
        self.fields.get(index)?.as_str()
    }

    /// Like [`Record::text`] but never fails: nested values render as JSON.
    pub fn text_lossy(&self, index: usize) -> Option<String> {
        match self.fields.get(index) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(v) => Some(v.to_string()),
        }
    }

    /// The row's timestamp, if the date column parses in full.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let raw = self.str_field(DATE)?;
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_renders_scalars() {
        let record = Record::new(vec![json!("2024-01-01 10:00:00"), json!(42), json!(true)]);
        assert_eq!(record.text(0).unwrap().as_deref(), Some("2024-01-01 10:00:00"));
        assert_eq!(record.text(1).unwrap().as_deref(), Some("42"));
        assert_eq!(record.text(2).unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn test_text_absent_for_null_and_missing() {
        let record = Record::new(vec![Value::Null]);
        assert_eq!(record.text(0).unwrap(), None);
        assert_eq!(record.text(7).unwrap(), None);
    }

    #[test]
    fn test_text_rejects_nested_values() {
        let record = Record::new(vec![json!(["a"]), json!({"k": 1})]);
        assert_eq!(record.text(0).unwrap_err().index, 0);
        assert!(record.text(1).is_err());
        assert_eq!(record.text_lossy(1).as_deref(), Some(r#"{"k":1}"#));
    }

    #[test]
    fn test_timestamp_requires_full_format() {
        let ok = Record::new(vec![json!("2024-03-05 07:08:09")]);
        assert!(ok.timestamp().is_some());

        let date_only = Record::new(vec![json!("2024-03-05")]);
        assert!(date_only.timestamp().is_none());
    }
}
