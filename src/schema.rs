//! # Section and Field Schemas
//!
//! Declarative description of where a template's logical sections live
//! relative to their text markers. Schemas are configuration: they arrive as
//! JSON from an external store, are validated once by [`Template::new`], and
//! are read-only afterwards.

use crate::error::SheetMarkerError;
use crate::spreadsheet::reference::ColumnSpan;
use crate::spreadsheet::reference::MAX_COLUMN;
use crate::spreadsheet::reference::MAX_ROW;
use crate::spreadsheet::value::CellValue;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

/// Date layouts accepted for `date` fields.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Declared type of a field, used for validation and documentation only.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Text,
    Number,
    Date,
    Boolean,
    Formula,
}

impl DataType {
    /// Whether a submitted value fits the declared type.
    ///
    /// Empty values and `=` formulas fit every type. Values are never coerced.
    pub fn accepts(&self, value: &CellValue) -> bool {
        if value.is_empty() || value.is_formula() {
            return true;
        }
        match (self, value) {
            (DataType::Text, _) => true,
            (DataType::Number, CellValue::Number(_)) => true,
            (DataType::Number, CellValue::Text(text)) => text.trim().parse::<f64>().is_ok(),
            (DataType::Boolean, CellValue::Bool(_)) => true,
            (DataType::Date, CellValue::Number(_)) => true,
            (DataType::Date, CellValue::Text(text)) => is_date(text.trim()),
            _ => false,
        }
    }
}

fn is_date(text: &str) -> bool {
    DATE_FORMATS.iter().any(|format| NaiveDate::parse_from_str(text, format).is_ok())
        || DATETIME_FORMATS.iter().any(|format| NaiveDateTime::parse_from_str(text, format).is_ok())
}

/// One named value slot of a section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_key: String,
    /// Columns to the right of the section's first write column.
    #[serde(default)]
    pub column_offset: u32,
    #[serde(default)]
    pub data_type: DataType,
}

/// One logical area of a template, anchored on a marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionSchema {
    pub key: String,
    pub marker_text: String,
    /// Target worksheet; the first sheet when absent.
    #[serde(default)]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub is_table: bool,
    #[serde(default)]
    pub row_offset: u32,
    #[serde(default)]
    pub column_offset: u32,
    /// Same-row column pairs such as `"A:C"`, merged on every written table row.
    #[serde(default)]
    pub merge_range_templates: Vec<String>,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,

    #[serde(skip)]
    field_index: HashMap<String, usize>,
    #[serde(skip)]
    merge_spans: Vec<ColumnSpan>,
}

impl SectionSchema {
    pub fn new(key: &str, marker_text: &str) -> SectionSchema {
        SectionSchema {
            key: key.to_owned(),
            marker_text: marker_text.to_owned(),
            sheet_name: None,
            is_table: false,
            row_offset: 0,
            column_offset: 0,
            merge_range_templates: Vec::new(),
            order_index: 0,
            fields: Vec::new(),
            field_index: HashMap::new(),
            merge_spans: Vec::new(),
        }
    }

    pub fn sheet(mut self, name: &str) -> Self {
        self.sheet_name = Some(name.to_owned());
        self
    }

    pub fn table(mut self) -> Self {
        self.is_table = true;
        self
    }

    pub fn offsets(mut self, row_offset: u32, column_offset: u32) -> Self {
        self.row_offset = row_offset;
        self.column_offset = column_offset;
        self
    }

    pub fn order(mut self, order_index: i32) -> Self {
        self.order_index = order_index;
        self
    }

    pub fn field(mut self, key: &str, column_offset: u32, data_type: DataType) -> Self {
        self.fields.push(FieldSchema { field_key: key.to_owned(), column_offset, data_type });
        self
    }

    pub fn merge(mut self, template: &str) -> Self {
        self.merge_range_templates.push(template.to_owned());
        self
    }

    /// Looks up a field through the key table built by [`Template::new`].
    pub fn field_schema(&self, key: &str) -> Option<&FieldSchema> {
        self.field_index.get(key).map(|index| &self.fields[*index])
    }

    /// Smallest and largest field column offsets.
    pub fn field_span(&self) -> Option<(u32, u32)> {
        let offsets = self.fields.iter().map(|field| field.column_offset);
        offsets.clone().min().zip(offsets.max())
    }

    pub(crate) fn merge_spans(&self) -> &[ColumnSpan] {
        &self.merge_spans
    }

    /// Validates the section and builds its lookup tables.
    fn prepare(&mut self) -> Result<(), SheetMarkerError> {
        if self.marker_text.is_empty() {
            Err(SheetMarkerError::SchemaIncomplete(format!("section '{}' has an empty marker", self.key)))?;
        }
        if self.fields.is_empty() {
            Err(SheetMarkerError::SchemaIncomplete(format!("section '{}' has no fields", self.key)))?;
        }
        if self.row_offset >= MAX_ROW {
            Err(SheetMarkerError::SchemaIncomplete(format!(
                "section '{}' has row offset {} beyond the worksheet grid",
                self.key, self.row_offset
            )))?;
        }
        for field in &self.fields {
            if u64::from(self.column_offset) + u64::from(field.column_offset) >= u64::from(MAX_COLUMN) {
                Err(SheetMarkerError::SchemaIncomplete(format!(
                    "section '{}' places field '{}' beyond the worksheet grid",
                    self.key, field.field_key
                )))?;
            }
        }
        self.field_index.clear();
        for (index, field) in self.fields.iter().enumerate() {
            if self.field_index.insert(field.field_key.to_owned(), index).is_some() {
                Err(SheetMarkerError::SchemaIncomplete(format!(
                    "section '{}' declares field '{}' twice",
                    self.key, field.field_key
                )))?;
            }
        }
        self.merge_spans = self.merge_range_templates
            .iter()
            .map(|template| ColumnSpan::parse(template).map_err(|error| {
                SheetMarkerError::SchemaIncomplete(format!("section '{}': {}", self.key, error))
            }))
            .collect::<Result<_, _>>()?;
        Ok(())
    }
}

/// The validated section set of one template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SectionSchema>", into = "Vec<SectionSchema>")]
pub struct Template {
    /// Sections in processing order.
    sections: Vec<SectionSchema>,
    index: HashMap<String, usize>,
}

impl Template {
    pub fn new(mut sections: Vec<SectionSchema>) -> Result<Template, SheetMarkerError> {
        sections.sort_by_key(|section| section.order_index);
        let mut index = HashMap::new();
        for (position, section) in sections.iter_mut().enumerate() {
            section.prepare()?;
            if index.insert(section.key.to_owned(), position).is_some() {
                Err(SheetMarkerError::SchemaIncomplete(format!("section '{}' is declared twice", section.key)))?;
            }
        }
        Ok(Template { sections, index })
    }

    pub fn section(&self, key: &str) -> Result<&SectionSchema, SheetMarkerError> {
        self.index
            .get(key)
            .map(|position| &self.sections[*position])
            .ok_or_else(|| SheetMarkerError::SchemaIncomplete(format!("section '{key}' is not configured")))
    }

    /// Sections ordered by `order_index`; ties keep declaration order.
    pub fn sections(&self) -> &[SectionSchema] {
        &self.sections
    }
}

impl TryFrom<Vec<SectionSchema>> for Template {
    type Error = SheetMarkerError;

    fn try_from(sections: Vec<SectionSchema>) -> Result<Self, Self::Error> {
        Template::new(sections)
    }
}

impl From<Template> for Vec<SectionSchema> {
    fn from(template: Template) -> Self {
        template.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_deserializes_and_builds_lookup_tables() {
        let template: Template = serde_json::from_str(r#"[
            {"key": "pagos", "marker_text": "Pagos:", "is_table": true, "row_offset": 2, "order_index": 2,
             "merge_range_templates": ["A:C"],
             "fields": [{"field_key": "fecha", "data_type": "date"}, {"field_key": "monto", "column_offset": 3, "data_type": "number"}]},
            {"key": "cliente", "marker_text": "DATOS DEL CLIENTE:", "row_offset": 1, "order_index": 1,
             "fields": [{"field_key": "nombre"}]}
        ]"#).unwrap();
        let keys: Vec<&str> = template.sections().iter().map(|section| section.key.as_str()).collect();
        assert_eq!(keys, vec!["cliente", "pagos"]);

        let pagos = template.section("pagos").unwrap();
        assert!(pagos.is_table);
        assert_eq!(pagos.field_schema("monto").unwrap().column_offset, 3);
        assert_eq!(pagos.field_schema("fecha").unwrap().data_type, DataType::Date);
        assert_eq!(pagos.field_span(), Some((0, 3)));
        assert_eq!(pagos.merge_spans().len(), 1);
        assert_eq!(template.section("cliente").unwrap().field_schema("nombre").unwrap().data_type, DataType::Text);
    }

    #[test]
    fn incomplete_configuration_is_rejected() {
        let no_fields = Template::new(vec![SectionSchema::new("a", "A:")]);
        assert!(matches!(no_fields, Err(SheetMarkerError::SchemaIncomplete(_))));

        let no_marker = Template::new(vec![SectionSchema::new("a", "").field("x", 0, DataType::Text)]);
        assert!(matches!(no_marker, Err(SheetMarkerError::SchemaIncomplete(_))));

        let duplicate_field = Template::new(vec![SectionSchema::new("a", "A:")
            .field("x", 0, DataType::Text)
            .field("x", 1, DataType::Text)]);
        assert!(matches!(duplicate_field, Err(SheetMarkerError::SchemaIncomplete(_))));

        let duplicate_section = Template::new(vec![
            SectionSchema::new("a", "A:").field("x", 0, DataType::Text),
            SectionSchema::new("a", "B:").field("y", 0, DataType::Text),
        ]);
        assert!(matches!(duplicate_section, Err(SheetMarkerError::SchemaIncomplete(_))));

        let bad_merge = Template::new(vec![SectionSchema::new("a", "A:").field("x", 0, DataType::Text).merge("A1:C1")]);
        assert!(matches!(bad_merge, Err(SheetMarkerError::SchemaIncomplete(_))));

        let template = Template::new(vec![SectionSchema::new("a", "A:").field("x", 0, DataType::Text)]).unwrap();
        assert!(matches!(template.section("b"), Err(SheetMarkerError::SchemaIncomplete(_))));
    }

    #[test]
    fn offsets_outside_the_grid_are_rejected() {
        let far_row = Template::new(vec![SectionSchema::new("a", "A:").offsets(u32::MAX, 0).field("x", 0, DataType::Text)]);
        assert!(matches!(far_row, Err(SheetMarkerError::SchemaIncomplete(message)) if message.contains("row offset")));

        let far_field = Template::new(vec![SectionSchema::new("a", "A:").field("x", 0, DataType::Text).field("y", 4_000_000_000, DataType::Text)]);
        assert!(matches!(far_field, Err(SheetMarkerError::SchemaIncomplete(message)) if message.contains("'y'")));

        let summed = Template::new(vec![SectionSchema::new("a", "A:").offsets(0, u32::MAX).field("x", 1, DataType::Text)]);
        assert!(matches!(summed, Err(SheetMarkerError::SchemaIncomplete(_))));

        let widest = Template::new(vec![SectionSchema::new("a", "A:").offsets(MAX_ROW - 1, 1).field("x", MAX_COLUMN - 2, DataType::Text)]);
        assert!(widest.is_ok());
    }

    #[test]
    fn declared_types_validate_without_coercion() {
        assert!(DataType::Number.accepts(&CellValue::Number(3.5)));
        assert!(DataType::Number.accepts(&CellValue::from("1500")));
        assert!(!DataType::Number.accepts(&CellValue::from("mil")));
        assert!(DataType::Date.accepts(&CellValue::from("2024-03-01")));
        assert!(DataType::Date.accepts(&CellValue::from("01/03/2024")));
        assert!(!DataType::Date.accepts(&CellValue::from("marzo")));
        assert!(!DataType::Boolean.accepts(&CellValue::from("yes")));
        assert!(DataType::Boolean.accepts(&CellValue::from("=B2>0")));
        assert!(DataType::Formula.accepts(&CellValue::from("=SUM(A1:A3)")));
        assert!(!DataType::Formula.accepts(&CellValue::from("SUM")));
        assert!(DataType::Number.accepts(&CellValue::Empty));
    }
}
