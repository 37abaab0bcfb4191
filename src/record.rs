//! Record mapper: one raw row in, one mapped record out.

use crate::{
    data::{RawRow, Value},
    error::FieldError,
    field::FieldPlan,
};

/// Error raised by one field while mapping a row.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    pub field: String,
    pub error: FieldError,
}

/// Typed slots for every schema field of one input row, plus the errors
/// collected while filling them. `origin` is the row's 0-based input position.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub origin: usize,
    pub values: Vec<Option<Value>>,
    pub failures: Vec<FieldFailure>,
}

impl MappedRecord {
    pub fn value(&self, slot: usize) -> Option<&Value> {
        self.values.get(slot).and_then(Option::as_ref)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A record that passed the quality checks. Under the omit null policy,
/// absent fields are missing from `fields` entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub origin: usize,
    pub fields: Vec<(String, Option<Value>)>,
}

impl CleanRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == field)
    }
}

/// Runs every field plan against `row`. Plans are in schema order, so the
/// slot index of a field equals its schema position. A failing field leaves
/// its slot null and never stops the others.
pub fn map_row(origin: usize, row: &RawRow, plans: &[FieldPlan]) -> MappedRecord {
    let mut values = Vec::with_capacity(plans.len());
    let mut failures = Vec::new();
    for plan in plans {
        match plan.execute(row) {
            Ok(value) => values.push(value),
            Err(error) => {
                values.push(None);
                failures.push(FieldFailure {
                    field: plan.field.clone(),
                    error,
                });
            }
        }
    }
    MappedRecord {
        origin,
        values,
        failures,
    }
}
