//! Error taxonomy for the cleaning pipeline.
//!
//! Configuration errors are fatal and surface before any row is read. Every
//! other error here is scoped to a field or a record and travels through the
//! diagnostics channel instead of aborting the run.

use thiserror::Error;

use crate::schema::FieldType;

/// Problems detected while turning a parsed configuration into a runnable pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Field '{field}': unknown transform '{name}'")]
    UnknownTransform { field: String, name: String },
    #[error("Field '{field}': transform '{transform}' requires parameter '{param}'")]
    MissingParameter {
        field: String,
        transform: String,
        param: String,
    },
    #[error("Field '{field}': transform '{transform}' does not accept parameter '{param}'")]
    UnknownParameter {
        field: String,
        transform: String,
        param: String,
    },
    #[error("Field '{field}': transform '{transform}' parameter '{param}' {reason}")]
    InvalidParameter {
        field: String,
        transform: String,
        param: String,
        reason: String,
    },
    #[error("Field '{field}': transform '{transform}' has an invalid pattern: {reason}")]
    InvalidPattern {
        field: String,
        transform: String,
        reason: String,
    },
    #[error("{context} references field '{field}' which is not declared in the schema")]
    UnknownField { field: String, context: String },
    #[error("Schema field '{field}' has unknown type '{name}'. Supported types: {supported}")]
    UnknownType {
        field: String,
        name: String,
        supported: String,
    },
    #[error("Schema field '{field}' has no mapping")]
    UnmappedField { field: String },
    #[error("Invalid quality configuration: {0}")]
    InvalidQuality(String),
}

/// Failure of a single transform step on a single value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("{transform}: cannot coerce '{value}' to {target}")]
    Coercion {
        transform: &'static str,
        value: String,
        target: &'static str,
    },
    #[error("{transform}: unable to parse '{value}' as a timestamp")]
    UnparsableDate {
        transform: &'static str,
        value: String,
    },
    #[error("{transform}: value is null")]
    NullInput { transform: &'static str },
    #[error("{transform}: expected {expected} input but found {found}")]
    UnexpectedInput {
        transform: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

/// The transformed value could not be represented as the field's declared type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot cast '{value}' ({found}) to {expected}")]
pub struct TypeMismatchError {
    pub value: String,
    pub found: &'static str,
    pub expected: FieldType,
}

/// Error attached to one field of a mapped record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
}

/// Dataset-level reason for excluding a record from the output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QualityViolation {
    #[error("duplicate of key '{key}' (first seen at row {kept})")]
    DuplicateDropped { key: String, kept: usize },
    #[error("superseded by row {by} for key '{key}'")]
    Superseded { key: String, by: usize },
    #[error("value '{value}' is not allowed for field '{field}'")]
    AllowedValueViolation { field: String, value: String },
}

impl QualityViolation {
    pub fn reason(&self) -> &'static str {
        match self {
            QualityViolation::DuplicateDropped { .. } => "duplicate_dropped",
            QualityViolation::Superseded { .. } => "superseded",
            QualityViolation::AllowedValueViolation { .. } => "allowed_value_violation",
        }
    }
}
