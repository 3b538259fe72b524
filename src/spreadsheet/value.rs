use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

/// One submitted record: logical field name to value.
pub type Record = BTreeMap<String, CellValue>;

/// A scalar cell value as exchanged with callers and the remote workbook service.
///
/// Serialized untagged so JSON `"text"`, `12.5`, `true` and `null` map directly.
/// A text value beginning with `=` is a formula and is passed through verbatim,
/// never evaluated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// True for `Empty` and for the empty string the remote service uses for blank cells.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Text(text) if text.starts_with('='))
    }

    /// Formula text without the leading `=`.
    pub fn formula(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => text.strip_prefix('='),
            _ => None,
        }
    }

    /// Textual form used for marker matching, `None` for empty cells.
    pub fn as_text(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(true) => write!(f, "TRUE"),
            CellValue::Bool(false) => write!(f, "FALSE"),
            CellValue::Number(number) if number.fract() == 0.0 && number.abs() < 1e15 => write!(f, "{}", *number as i64),
            CellValue::Number(number) => write!(f, "{number}"),
            CellValue::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_deserialize_untagged() {
        let values: Vec<CellValue> = serde_json::from_str(r#"["Total", 12, 1.5, true, null, ""]"#).unwrap();
        assert_eq!(values, vec![
            CellValue::Text("Total".into()),
            CellValue::Number(12.0),
            CellValue::Number(1.5),
            CellValue::Bool(true),
            CellValue::Empty,
            CellValue::Text(String::new()),
        ]);
        assert!(values[4].is_empty());
        assert!(values[5].is_empty());
    }

    #[test]
    fn formula_detection_ignores_declared_type() {
        let value = CellValue::from("=SUM(B2:B9)");
        assert!(value.is_formula());
        assert_eq!(value.formula(), Some("SUM(B2:B9)"));
        assert!(!CellValue::from("SUM").is_formula());
    }

    #[test]
    fn display_prints_whole_numbers_without_fraction() {
        assert_eq!(CellValue::Number(1500.0).to_string(), "1500");
        assert_eq!(CellValue::Number(0.25).to_string(), "0.25");
        assert_eq!(CellValue::Bool(false).to_string(), "FALSE");
        assert_eq!(CellValue::Empty.as_text(), None);
    }
}
