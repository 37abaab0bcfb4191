//! Output schema: the declared type of every clean field and the final cast
//! applied after a field's transform chain.

use std::{fmt, str::FromStr};

use chrono::NaiveDate;

use crate::{
    data::{
        Value, at_midnight, parse_boolean, parse_naive_date, parse_naive_datetime,
        whole_float_as_i64,
    },
    error::TypeMismatchError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "int",
            FieldType::Float => "float",
            FieldType::Boolean => "bool",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "int", "float", "bool", "date", "datetime"]
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "str" | "text" => Ok(FieldType::String),
            "int" | "integer" => Ok(FieldType::Integer),
            "float" | "double" | "number" => Ok(FieldType::Float),
            "bool" | "boolean" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "datetime" | "timestamp" => Ok(FieldType::DateTime),
            _ => Err(value.to_string()),
        }
    }
}

/// Field name to declared type, in output column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(String, FieldType)>,
}

impl Schema {
    pub fn new(fields: Vec<(String, FieldType)>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| *ty)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(field, _)| field == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Casts a transformed value to its declared type. Nulls pass through.
pub fn cast(value: Option<Value>, ty: FieldType) -> Result<Option<Value>, TypeMismatchError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let mismatch = |value: &Value| TypeMismatchError {
        value: value.as_display(),
        found: value.type_name(),
        expected: ty,
    };
    let cast = match (ty, &value) {
        (FieldType::String, Value::String(_)) => Some(value.clone()),
        (FieldType::String, other) => Some(Value::String(other.as_display())),
        (FieldType::Integer, Value::Integer(_)) => Some(value.clone()),
        (FieldType::Integer, Value::Float(f)) => whole_float_as_i64(*f).map(Value::Integer),
        (FieldType::Integer, Value::Boolean(b)) => Some(Value::Integer(i64::from(*b))),
        (FieldType::Integer, Value::String(s)) => s.trim().parse().ok().map(Value::Integer),
        (FieldType::Float, Value::Float(_)) => Some(value.clone()),
        (FieldType::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
        (FieldType::Float, Value::String(s)) => s.trim().parse().ok().map(Value::Float),
        (FieldType::Boolean, Value::Boolean(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::Integer(0)) => Some(Value::Boolean(false)),
        (FieldType::Boolean, Value::Integer(1)) => Some(Value::Boolean(true)),
        (FieldType::Boolean, Value::String(s)) => parse_boolean(s).map(Value::Boolean),
        (FieldType::Date, Value::Date(_)) => Some(value.clone()),
        (FieldType::Date, Value::DateTime(dt)) => Some(Value::Date(dt.date())),
        (FieldType::Date, Value::String(s)) => parse_date_like(s).map(Value::Date),
        (FieldType::DateTime, Value::DateTime(_)) => Some(value.clone()),
        (FieldType::DateTime, Value::Date(d)) => Some(Value::DateTime(at_midnight(*d))),
        (FieldType::DateTime, Value::String(s)) => parse_naive_datetime(s).map(Value::DateTime),
        _ => None,
    };
    cast.map(Some).ok_or_else(|| mismatch(&value))
}

fn parse_date_like(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    parse_naive_date(trimmed).or_else(|| parse_naive_datetime(trimmed).map(|dt| dt.date()))
}
