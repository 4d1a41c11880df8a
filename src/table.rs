//! Warehouse-facing table shapes.
//!
//! Each row type declares its columns through [`TableRow`]; a
//! [`TablePayload`] pairs that schema with the rows serialized as JSON objects,
//! which is what every warehouse implementation consumes.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Integer,
    Float,
    String,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    Nullable,
}

/// One column of a table schema. Serializes to the BigQuery `TableFieldSchema` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: FieldMode,
}

impl Field {
    pub const fn required(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            mode: FieldMode::Required,
        }
    }

    pub const fn nullable(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            mode: FieldMode::Nullable,
        }
    }
}

/// A row type that can be written to the warehouse.
///
/// `schema` must list the fields in the same order and with the same names the
/// type serializes to.
pub trait TableRow: Serialize {
    /// Destination table name.
    const TABLE: &'static str;

    fn schema() -> Vec<Field>;
}

/// A table ready to hand to a warehouse.
#[derive(Debug, Clone)]
pub struct TablePayload {
    pub name: String,
    pub schema: Vec<Field>,
    pub rows: Vec<Value>,
}

impl TablePayload {
    pub fn from_rows<R: TableRow>(rows: &[R]) -> Result<Self, serde_json::Error> {
        let rows = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: R::TABLE.to_string(),
            schema: R::schema(),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Newline-delimited JSON, one object per row.
    pub fn to_ndjson(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = Vec::new();
        for row in &self.rows {
            serde_json::to_writer(&mut out, row)?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Pair {
        id: i64,
        label: Option<String>,
    }

    impl TableRow for Pair {
        const TABLE: &'static str = "pairs";

        fn schema() -> Vec<Field> {
            vec![
                Field::required("id", FieldType::Integer),
                Field::nullable("label", FieldType::String),
            ]
        }
    }

    #[test]
    fn test_field_serializes_as_bigquery_schema() {
        let json = serde_json::to_value(Field::nullable("zone_id", FieldType::Integer)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "zone_id", "type": "INTEGER", "mode": "NULLABLE"})
        );
    }

    #[test]
    fn test_payload_from_rows() {
        let rows = vec![
            Pair {
                id: 1,
                label: Some("a".into()),
            },
            Pair { id: 2, label: None },
        ];
        let payload = TablePayload::from_rows(&rows).unwrap();

        assert_eq!(payload.name, "pairs");
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.schema.len(), 2);
        assert_eq!(payload.rows[1]["label"], Value::Null);
    }

    #[test]
    fn test_ndjson_has_one_line_per_row() {
        let rows = vec![Pair { id: 1, label: None }, Pair { id: 2, label: None }];
        let payload = TablePayload::from_rows(&rows).unwrap();
        let text = String::from_utf8(payload.to_ndjson().unwrap()).unwrap();

        assert_eq!(text, "{\"id\":1,\"label\":null}\n{\"id\":2,\"label\":null}\n");
    }

    #[test]
    fn test_empty_payload_keeps_schema() {
        let payload = TablePayload::from_rows::<Pair>(&[]).unwrap();
        assert!(payload.is_empty());
        assert_eq!(payload.schema.len(), 2);
        assert!(payload.to_ndjson().unwrap().is_empty());
    }
}
