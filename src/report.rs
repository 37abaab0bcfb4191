//! Run diagnostics and summary tables.

use std::{borrow::Cow, collections::BTreeMap, fmt::Write as _};

use crate::{
    error::{FieldError, QualityViolation, TransformError},
    quality::{Adjustment, AllowedValueNote, Decision, DuplicateMark, RecordOutcome},
    record::{CleanRecord, FieldFailure},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    TransformError,
    TypeMismatch,
    DuplicateDropped,
    DuplicateMarked,
    Superseded { by: usize },
    AllowedValueViolation,
    AllowedValueFlagged,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::TransformError => "transform_error",
            DiagnosticKind::TypeMismatch => "type_mismatch",
            DiagnosticKind::DuplicateDropped => "duplicate_dropped",
            DiagnosticKind::DuplicateMarked => "duplicate_marked",
            DiagnosticKind::Superseded { .. } => "superseded",
            DiagnosticKind::AllowedValueViolation => "allowed_value_violation",
            DiagnosticKind::AllowedValueFlagged => "allowed_value_flagged",
        }
    }

    pub fn is_field_error(&self) -> bool {
        matches!(
            self,
            DiagnosticKind::TransformError | DiagnosticKind::TypeMismatch
        )
    }
}

/// One entry of the diagnostics channel. `origin` is the 0-based input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub origin: usize,
    pub field: Option<String>,
    pub value: Option<String>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn from_failure(origin: usize, failure: &FieldFailure) -> Self {
        let (kind, value) = match &failure.error {
            FieldError::Transform(err) => {
                let value = match err {
                    TransformError::Coercion { value, .. }
                    | TransformError::UnparsableDate { value, .. } => Some(value.clone()),
                    TransformError::NullInput { .. } | TransformError::UnexpectedInput { .. } => {
                        None
                    }
                };
                (DiagnosticKind::TransformError, value)
            }
            FieldError::TypeMismatch(err) => (DiagnosticKind::TypeMismatch, Some(err.value.clone())),
        };
        Diagnostic {
            origin,
            field: Some(failure.field.clone()),
            value,
            kind,
            message: failure.error.to_string(),
        }
    }

    /// `None` for accepted records.
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        let violation = decision.outcome.violation()?;
        let message = violation.to_string();
        let (kind, field, value) = match violation {
            QualityViolation::DuplicateDropped { key, .. } => {
                (DiagnosticKind::DuplicateDropped, None, Some(key))
            }
            QualityViolation::Superseded { key, by } => {
                (DiagnosticKind::Superseded { by }, None, Some(key))
            }
            QualityViolation::AllowedValueViolation { field, value } => {
                (DiagnosticKind::AllowedValueViolation, Some(field), Some(value))
            }
        };
        Some(Diagnostic {
            origin: decision.origin,
            field,
            value,
            kind,
            message,
        })
    }

    pub fn from_mark(mark: &DuplicateMark) -> Self {
        Diagnostic {
            origin: mark.origin,
            field: None,
            value: Some(mark.key.clone()),
            kind: DiagnosticKind::DuplicateMarked,
            message: format!(
                "duplicate of key '{}' (first seen at row {}), kept and flagged",
                mark.key, mark.first
            ),
        }
    }

    pub fn from_note(note: &AllowedValueNote) -> Self {
        let action = match note.adjustment {
            Adjustment::Nullified => "set to null",
            Adjustment::Replaced => "replaced",
            Adjustment::Flagged => "kept",
        };
        Diagnostic {
            origin: note.origin,
            field: Some(note.field.clone()),
            value: Some(note.value.clone()),
            kind: DiagnosticKind::AllowedValueFlagged,
            message: format!(
                "value '{}' is not allowed for field '{}' ({action})",
                note.value, note.field
            ),
        }
    }
}

/// Aggregate counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub rows: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub superseded: usize,
    pub field_errors: usize,
    /// Repeated keys kept by the `mark` duplicate action.
    pub duplicates_marked: usize,
    /// Rejected and superseded records by reason.
    pub rejections: BTreeMap<&'static str, usize>,
    /// Field errors per field, schema order.
    pub errors_by_field: Vec<(String, usize)>,
    /// Null or absent values per field among accepted records, schema order.
    pub null_counts: Vec<(String, usize)>,
    /// Out-of-set values per field, whatever the policy did with them.
    pub allowed_value_violations: Vec<(String, usize)>,
}

impl Summary {
    pub fn tally(
        fields: &[String],
        decisions: &[Decision],
        diagnostics: &[Diagnostic],
        accepted: &[CleanRecord],
    ) -> Self {
        let mut summary = Summary {
            rows: decisions.len(),
            ..Summary::default()
        };
        for decision in decisions {
            match &decision.outcome {
                RecordOutcome::Accepted => summary.accepted += 1,
                RecordOutcome::Rejected(_) => summary.rejected += 1,
                RecordOutcome::Superseded { .. } => summary.superseded += 1,
            }
            if let Some(violation) = decision.outcome.violation() {
                *summary.rejections.entry(violation.reason()).or_default() += 1;
            }
        }

        let per_field = |wanted: fn(&DiagnosticKind) -> bool| {
            fields
                .iter()
                .map(|field| {
                    let count = diagnostics
                        .iter()
                        .filter(|d| wanted(&d.kind) && d.field.as_deref() == Some(field.as_str()))
                        .count();
                    (field.clone(), count)
                })
                .collect::<Vec<_>>()
        };
        summary.duplicates_marked = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::DuplicateMarked)
            .count();
        summary.errors_by_field = per_field(DiagnosticKind::is_field_error);
        summary.field_errors = summary.errors_by_field.iter().map(|(_, n)| n).sum();
        summary.allowed_value_violations = per_field(|kind| {
            matches!(
                kind,
                DiagnosticKind::AllowedValueViolation | DiagnosticKind::AllowedValueFlagged
            )
        });
        summary.null_counts = fields
            .iter()
            .map(|field| {
                let nulls = accepted
                    .iter()
                    .filter(|record| record.get(field).is_none())
                    .count();
                (field.clone(), nulls)
            })
            .collect();
        summary
    }

    /// Every record ends in exactly one state.
    pub fn is_balanced(&self) -> bool {
        self.accepted + self.rejected + self.superseded == self.rows
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        let mut totals = vec![
            vec!["rows".to_string(), self.rows.to_string()],
            vec!["accepted".to_string(), self.accepted.to_string()],
            vec!["rejected".to_string(), self.rejected.to_string()],
            vec!["superseded".to_string(), self.superseded.to_string()],
            vec!["field errors".to_string(), self.field_errors.to_string()],
        ];
        if self.duplicates_marked > 0 {
            totals.push(vec![
                "duplicates marked".to_string(),
                self.duplicates_marked.to_string(),
            ]);
        }
        output.push_str(&render_table(&["metric", "count"], &totals));

        if !self.rejections.is_empty() {
            let rows = self
                .rejections
                .iter()
                .map(|(reason, count)| vec![reason.to_string(), count.to_string()])
                .collect::<Vec<_>>();
            output.push('\n');
            output.push_str(&render_table(&["reason", "records"], &rows));
        }

        let rows = self
            .null_counts
            .iter()
            .zip(&self.errors_by_field)
            .map(|((field, nulls), (_, errors))| {
                vec![field.clone(), nulls.to_string(), errors.to_string()]
            })
            .collect::<Vec<_>>();
        if !rows.is_empty() {
            output.push('\n');
            output.push_str(&render_table(&["field", "nulls", "errors"], &rows));
        }

        let rows = self
            .allowed_value_violations
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(field, count)| vec![field.clone(), count.to_string()])
            .collect::<Vec<_>>();
        if !rows.is_empty() {
            output.push('\n');
            output.push_str(&render_table(&["field", "disallowed values"], &rows));
        }
        output
    }
}

/// Renders an aligned plain-text table with a dashed separator under the header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let header = headers.iter().map(|h| Cow::Borrowed(*h)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header, &widths));
    let separator = widths
        .iter()
        .map(|width| Cow::Owned("-".repeat(*width)))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let cells = row.iter().map(|cell| sanitize_cell(cell)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", format_row(&cells, &widths));
    }
    output
}

fn format_row(cells: &[Cow<'_, str>], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
