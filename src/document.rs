/// Document Model
///
/// Field values, documents and field-level update operations. Updates are a
/// map of field -> operation rather than a merged document, so that removing
/// a field (`FieldOp::Delete`) is distinct from setting it to null.

use std::collections::BTreeMap;
use std::fmt;
use crate::path::DocumentPath;

pub type Fields = BTreeMap<String, Value>;

/// Numeric value, as stored or as used by an increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Double(f64),
}

impl Number {
    pub const ZERO: Number = Number::Integer(0);

    /// Add two numbers the way the document store does for increments:
    /// integers stay integers (saturating), any double makes a double.
    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => Number::Integer(a.saturating_add(b)),
            (Number::Integer(a), Number::Double(b)) => Number::Double(a as f64 + b),
            (Number::Double(a), Number::Integer(b)) => Number::Double(a + b as f64),
            (Number::Double(a), Number::Double(b)) => Number::Double(a + b),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(v) => v as f64,
            Number::Double(v) => v,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(v) => write!(f, "{}", v),
            Number::Double(v) => write!(f, "{}", v),
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Integer(v) => Value::Integer(v),
            Number::Double(v) => Value::Double(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    /// RFC 3339 timestamp
    Timestamp(String),
    String(String),
    /// Base64 encoded bytes
    Bytes(String),
    Reference(DocumentPath),
    GeoPoint { latitude: f64, longitude: f64 },
    Array(Vec<Value>),
    Map(Fields),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Integer(v) => Some(Number::Integer(*v)),
            Value::Double(v) => Some(Number::Double(*v)),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&DocumentPath> {
        match self {
            Value::Reference(p) => Some(p),
            _ => None,
        }
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
}

impl Document {
    pub fn new(path: DocumentPath, fields: Fields) -> Self {
        Self { path, fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Operation applied to a single field by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Increment(Number),
    /// Remove the field entirely.
    Delete,
}

/// Field-level update of an existing document.
///
/// Updates require the document to exist when the transaction commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    ops: BTreeMap<String, FieldOp>,
}

impl DocumentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.ops.insert(field.to_string(), FieldOp::Set(value));
        self
    }

    pub fn increment(mut self, field: &str, by: Number) -> Self {
        self.ops.insert(field.to_string(), FieldOp::Increment(by));
        self
    }

    pub fn delete_field(mut self, field: &str) -> Self {
        self.ops.insert(field.to_string(), FieldOp::Delete);
        self
    }

    pub fn ops(&self) -> impl Iterator<Item = (&String, &FieldOp)> {
        self.ops.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply the operations to a set of fields in place.
    pub fn apply_to(&self, fields: &mut Fields) {
        for (name, op) in &self.ops {
            match op {
                FieldOp::Set(value) => {
                    fields.insert(name.clone(), value.clone());
                }
                FieldOp::Increment(by) => {
                    // Non-numeric or missing fields count as zero.
                    let current = fields
                        .get(name)
                        .and_then(Value::as_number)
                        .unwrap_or(Number::ZERO);
                    fields.insert(name.clone(), current.add(*by).into());
                }
                FieldOp::Delete => {
                    fields.remove(name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_number_add() {
        assert_eq!(Number::Integer(100).add(Number::Integer(50)), Number::Integer(150));
        assert_eq!(Number::Integer(1).add(Number::Double(0.5)), Number::Double(1.5));
        assert_eq!(Number::Double(1.5).add(Number::Integer(1)), Number::Double(2.5));
        assert_eq!(Number::Integer(i64::MAX).add(Number::Integer(1)), Number::Integer(i64::MAX));
    }

    #[test]
    fn test_delete_removes_field() {
        let mut doc = fields(&[
            ("used", Value::Boolean(true)),
            ("redeemedAt", Value::Timestamp("2024-01-01T00:00:00Z".into())),
        ]);

        DocumentUpdate::new()
            .set("used", Value::Boolean(false))
            .delete_field("redeemedAt")
            .apply_to(&mut doc);

        assert_eq!(doc.get("used"), Some(&Value::Boolean(false)));
        assert!(!doc.contains_key("redeemedAt"));
    }

    #[test]
    fn test_set_null_keeps_field() {
        let mut doc = fields(&[("redeemedAt", Value::Timestamp("2024-01-01T00:00:00Z".into()))]);
        DocumentUpdate::new()
            .set("redeemedAt", Value::Null)
            .apply_to(&mut doc);
        assert_eq!(doc.get("redeemedAt"), Some(&Value::Null));
    }

    #[test]
    fn test_increment() {
        let mut doc = fields(&[("totalPoints", Value::Integer(100))]);
        DocumentUpdate::new()
            .increment("totalPoints", Number::Integer(50))
            .apply_to(&mut doc);
        assert_eq!(doc.get("totalPoints"), Some(&Value::Integer(150)));

        // Missing and non-numeric fields start from zero
        let mut empty = Fields::new();
        DocumentUpdate::new()
            .increment("totalPoints", Number::Double(2.5))
            .apply_to(&mut empty);
        assert_eq!(empty.get("totalPoints"), Some(&Value::Double(2.5)));

        let mut text = fields(&[("totalPoints", Value::String("lots".into()))]);
        DocumentUpdate::new()
            .increment("totalPoints", Number::Integer(7))
            .apply_to(&mut text);
        assert_eq!(text.get("totalPoints"), Some(&Value::Integer(7)));
    }
}
