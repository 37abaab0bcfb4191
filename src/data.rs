use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};

/// Typed cell value produced by a transform chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => match whole_float_as_i64(*f) {
                Some(i) => i.to_string(),
                None => f.to_string(),
            },
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::Boolean(_) => "bool",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) | Value::Float(_) => 1,
            Value::Date(_) | Value::DateTime(_) => 2,
            Value::String(_) => 3,
        }
    }

    /// Total order used for recency comparisons. Numbers compare across
    /// integer/float, dates compare with datetimes at midnight, and any other
    /// mix falls back to a fixed variant rank.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Date(a), Value::DateTime(b)) => at_midnight(*a).cmp(b),
            (Value::DateTime(a), Value::Date(b)) => a.cmp(&at_midnight(*b)),
            (left, right) => left.variant_rank().cmp(&right.variant_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Date(_) | Value::DateTime(_) => serializer.serialize_str(&self.as_display()),
        }
    }
}

/// Optional value ordered with nulls first.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparableValue<'a>(pub Option<&'a Value>);

impl Eq for ComparableValue<'_> {}

impl Ord for ComparableValue<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0, other.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => left.total_cmp(right),
        }
    }
}

impl PartialOrd for ComparableValue<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Scalar cell as delivered by a reader, before any transform runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Blank,
    Text(String),
    Integer(i64),
    Float(f64),
}

impl RawValue {
    /// Blank cells and empty text both become null pipeline input.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            RawValue::Blank => None,
            RawValue::Text(s) if s.is_empty() => None,
            RawValue::Text(s) => Some(Value::String(s.clone())),
            RawValue::Integer(i) => Some(Value::Integer(*i)),
            RawValue::Float(f) if f.is_nan() => None,
            RawValue::Float(f) => Some(Value::Float(*f)),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            RawValue::Blank
        } else {
            RawValue::Text(value.to_string())
        }
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        if value.is_empty() {
            RawValue::Blank
        } else {
            RawValue::Text(value)
        }
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Integer(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

/// One input record keyed by source column name. Never mutated once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: BTreeMap<String, RawValue>,
}

impl RawRow {
    pub fn new(cells: BTreeMap<String, RawValue>) -> Self {
        Self { cells }
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<RawValue>,
    {
        Self {
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.cells.get(column)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

pub fn at_midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Parses the common timestamp layouts found in ticket exports. Date-only
/// inputs resolve to midnight. Day-first layouts win over month-first ones.
pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%d-%m-%Y %H:%M:%S",
        "%d-%m-%Y %H:%M",
    ];
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| parse_naive_date(trimmed).map(at_midnight))
}

/// Parses with an explicit strftime layout, accepting date-only layouts.
pub fn parse_datetime_with_format(value: &str, format: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    NaiveDateTime::parse_from_str(trimmed, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, format)
                .ok()
                .map(at_midnight)
        })
}

/// Integer value of a whole float that fits in `i64`; `None` for fractions,
/// non-finite values and anything an `as` cast would saturate.
pub fn whole_float_as_i64(value: f64) -> Option<i64> {
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    (value.fract() == 0.0 && (-BOUND..BOUND).contains(&value)).then_some(value as i64)
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "si" | "sí" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_naive_datetime_supports_multiple_formats() {
        let expected =
            NaiveDateTime::parse_from_str("2024-01-15 10:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_naive_datetime("2024-01-15 10:30"), Some(expected));
        assert_eq!(parse_naive_datetime("2024-01-15T10:30:00"), Some(expected));
        assert_eq!(parse_naive_datetime("15/01/2024 10:30"), Some(expected));
        assert_eq!(parse_naive_datetime("not a date"), None);
    }

    #[test]
    fn parse_naive_datetime_promotes_dates_to_midnight() {
        let parsed = parse_naive_datetime("2024-02-01").unwrap();
        assert_eq!(parsed, at_midnight(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
    }

    #[test]
    fn parse_datetime_with_format_accepts_date_only_layouts() {
        let parsed = parse_datetime_with_format("25/07/2025", "%d/%m/%Y").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2025-07-25 00:00");
        assert!(parse_datetime_with_format("2025-07-25", "%d/%m/%Y").is_none());
    }

    #[test]
    fn raw_value_blank_and_empty_text_are_null() {
        assert_eq!(RawValue::Blank.to_value(), None);
        assert_eq!(RawValue::Text(String::new()).to_value(), None);
        assert_eq!(RawValue::Float(f64::NAN).to_value(), None);
        assert_eq!(RawValue::from("x").to_value(), Some(Value::String("x".into())));
    }

    #[test]
    fn comparable_value_orders_none_before_some() {
        let zero = Value::Integer(0);
        assert!(ComparableValue(None) < ComparableValue(Some(&zero)));
    }

    #[test]
    fn total_cmp_mixes_numbers_and_dates() {
        assert_eq!(
            Value::Integer(2).total_cmp(&Value::Float(1.5)),
            Ordering::Greater
        );
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            Value::Date(date).total_cmp(&Value::DateTime(at_midnight(date))),
            Ordering::Equal
        );
    }

    #[test]
    fn float_display_drops_zero_fraction() {
        assert_eq!(Value::Float(3.0).as_display(), "3");
        assert_eq!(Value::Float(3.25).as_display(), "3.25");
    }

    #[test]
    fn float_display_keeps_values_beyond_integer_range() {
        assert_eq!(Value::Float(1e20).as_display(), "100000000000000000000");
        assert_ne!(Value::Float(1e20).as_display(), Value::Float(5e20).as_display());
        assert_eq!(Value::Float(-4.0).as_display(), "-4");
    }

    #[test]
    fn whole_float_as_i64_rejects_saturating_casts() {
        assert_eq!(whole_float_as_i64(42.0), Some(42));
        assert_eq!(whole_float_as_i64(-9_223_372_036_854_775_808.0), Some(i64::MIN));
        assert_eq!(whole_float_as_i64(9_223_372_036_854_775_808.0), None);
        assert_eq!(whole_float_as_i64(1e20), None);
        assert_eq!(whole_float_as_i64(f64::INFINITY), None);
        assert_eq!(whole_float_as_i64(f64::NAN), None);
        assert_eq!(whole_float_as_i64(2.5), None);
    }
}
