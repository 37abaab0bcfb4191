//! Pipeline orchestrator: a parallel mapping pass over every row, then the
//! sequential quality pass once all rows are mapped.

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    config::CleanerConfig,
    data::RawRow,
    error::ConfigError,
    field::FieldPlan,
    quality::QualityEngine,
    record::{CleanRecord, MappedRecord, map_row},
    report::{Diagnostic, Summary},
};

/// Result of one run. Records are in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub records: Vec<CleanRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: Summary,
}

/// A validated configuration with every transform chain resolved.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: CleanerConfig,
    plans: Vec<FieldPlan>,
    quality: QualityEngine,
    workers: Option<usize>,
}

impl Pipeline {
    pub fn new(config: CleanerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let plans = config
            .schema
            .fields()
            .iter()
            .map(|(field, _)| {
                let mapping = config
                    .mappings
                    .iter()
                    .find(|mapping| &mapping.field == field)
                    .ok_or_else(|| ConfigError::UnmappedField {
                        field: field.clone(),
                    })?;
                FieldPlan::resolve(mapping, &config.schema, config.quality.null_handling)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let quality = QualityEngine::new(&config.quality, &config.schema)?;
        debug!("Resolved {} field plan(s)", plans.len());
        Ok(Pipeline {
            config,
            plans,
            quality,
            workers: None,
        })
    }

    /// Caps the mapping pass at `workers` threads. Zero keeps rayon's default.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = (workers > 0).then_some(workers);
        self
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    pub fn plans(&self) -> &[FieldPlan] {
        &self.plans
    }

    /// Columns of every clean record, in output order.
    pub fn output_fields(&self) -> Vec<String> {
        self.quality.output_fields()
    }

    pub fn run(&self, rows: &[RawRow]) -> RunReport {
        let mapped = self.map_rows(rows);

        let mut diagnostics = mapped
            .iter()
            .flat_map(|record| {
                record
                    .failures
                    .iter()
                    .map(|failure| Diagnostic::from_failure(record.origin, failure))
            })
            .collect::<Vec<_>>();
        if !diagnostics.is_empty() {
            warn!(
                "{} field error(s) across {} row(s)",
                diagnostics.len(),
                mapped.iter().filter(|r| r.has_failures()).count()
            );
        }

        let outcome = self.quality.evaluate(mapped);
        if !outcome.notes.is_empty() {
            warn!(
                "{} disallowed value(s) kept under policy {:?}",
                outcome.notes.len(),
                self.config.quality.allowed_values_policy
            );
        }
        if !outcome.marks.is_empty() {
            info!("Flagged {} repeated key(s)", outcome.marks.len());
        }
        diagnostics.extend(outcome.marks.iter().map(Diagnostic::from_mark));
        diagnostics.extend(outcome.notes.iter().map(Diagnostic::from_note));
        diagnostics.extend(outcome.decisions.iter().filter_map(Diagnostic::from_decision));
        diagnostics.sort_by_key(|diagnostic| diagnostic.origin);

        let summary = Summary::tally(
            &self.config.schema.field_names(),
            &outcome.decisions,
            &diagnostics,
            &outcome.accepted,
        );
        info!(
            "Cleaned {} row(s): {} accepted, {} rejected, {} superseded",
            summary.rows, summary.accepted, summary.rejected, summary.superseded
        );
        RunReport {
            records: outcome.accepted,
            diagnostics,
            summary,
        }
    }

    fn map_rows(&self, rows: &[RawRow]) -> Vec<MappedRecord> {
        let map_all = || {
            rows.par_iter()
                .enumerate()
                .map(|(origin, row)| map_row(origin, row, &self.plans))
                .collect::<Vec<_>>()
        };
        match self.workers {
            Some(workers) => match rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
            {
                Ok(pool) => {
                    debug!("Mapping {} row(s) on {} worker(s)", rows.len(), workers);
                    pool.install(map_all)
                }
                Err(err) => {
                    warn!("Falling back to the global thread pool: {err}");
                    map_all()
                }
            },
            None => {
                debug!(
                    "Mapping {} row(s) on {} worker(s)",
                    rows.len(),
                    rayon::current_num_threads()
                );
                map_all()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Value, report::DiagnosticKind};

    const CONFIG: &str = r#"
schema:
  id: string
  nivel: int
  estado: string
mappings:
  estado:
    source: Estado
    transforms:
      - { name: normalize_text }
  id:
    source: ID
  nivel:
    source: Nivel
    transforms:
      - { name: regex_extract, pattern: "(\\d+)", as_type: int }
quality:
  duplicates: { key: id, action: drop }
  allowed_values:
    estado: [abierto, cerrado]
"#;

    fn pipeline() -> Pipeline {
        Pipeline::new(CleanerConfig::from_yaml_str(CONFIG).expect("config")).expect("pipeline")
    }

    #[test]
    fn plans_follow_schema_order() {
        let pipeline = pipeline();
        let names = pipeline
            .plans()
            .iter()
            .map(|plan| plan.field.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "nivel", "estado"]);
    }

    #[test]
    fn run_accounts_for_every_row() {
        let rows = vec![
            RawRow::from_pairs([("ID", "1"), ("Nivel", "Nivel 2"), ("Estado", "Abierto")]),
            RawRow::from_pairs([("ID", "1"), ("Nivel", "Nivel 3"), ("Estado", "Cerrado")]),
            RawRow::from_pairs([("ID", "2"), ("Nivel", "n/a"), ("Estado", "Pendiente")]),
            RawRow::from_pairs([("ID", "3"), ("Nivel", "1"), ("Estado", "CERRADO")]),
        ];
        let report = pipeline().with_workers(2).run(&rows);
        assert!(report.summary.is_balanced());
        assert_eq!(report.summary.accepted, 2);
        assert_eq!(report.summary.rejected, 2);
        let origins = report.records.iter().map(|r| r.origin).collect::<Vec<_>>();
        assert_eq!(origins, vec![0, 3]);
        assert_eq!(report.records[0].get("nivel"), Some(&Value::Integer(2)));
        assert_eq!(report.records[1].get("estado"), Some(&Value::String("cerrado".into())));
        let kinds = report
            .diagnostics
            .iter()
            .map(|d| (d.origin, d.kind))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                (1, DiagnosticKind::DuplicateDropped),
                (2, DiagnosticKind::AllowedValueViolation),
            ]
        );
    }

    #[test]
    fn field_errors_are_reported_for_rejected_records_too() {
        let config = CleanerConfig::from_yaml_str(
            r#"
schema: { id: string, nivel: int }
mappings:
  id: { source: ID }
  nivel: { source: Nivel }
quality:
  duplicates: { key: id, action: drop }
"#,
        )
        .expect("config");
        let rows = vec![
            RawRow::from_pairs([("ID", "1"), ("Nivel", "4")]),
            RawRow::from_pairs([("ID", "1"), ("Nivel", "alto")]),
        ];
        let report = Pipeline::new(config).expect("pipeline").run(&rows);
        assert_eq!(report.summary.field_errors, 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::TypeMismatch);
        assert_eq!(report.diagnostics[1].kind, DiagnosticKind::DuplicateDropped);
    }

    #[test]
    fn mark_action_adds_flag_column_and_diagnostics() {
        let config = CleanerConfig::from_yaml_str(
            r#"
schema: { id: string }
mappings:
  id: { source: ID }
quality:
  duplicates: { key: id, action: mark, flag_column: repetido }
"#,
        )
        .expect("config");
        let pipeline = Pipeline::new(config).expect("pipeline");
        assert_eq!(pipeline.output_fields(), vec!["id", "repetido"]);
        let rows = vec![
            RawRow::from_pairs([("ID", "1")]),
            RawRow::from_pairs([("ID", "1")]),
        ];
        let report = pipeline.run(&rows);
        assert_eq!(report.summary.accepted, 2);
        assert_eq!(report.summary.duplicates_marked, 1);
        assert_eq!(report.records[1].get("repetido"), Some(&Value::Boolean(true)));
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].origin, 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::DuplicateMarked);
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let report = pipeline().run(&[]);
        assert!(report.records.is_empty());
        assert_eq!(report.summary.rows, 0);
        assert!(report.summary.is_balanced());
    }

    #[test]
    fn bad_transform_fails_before_any_row() {
        let config = CleanerConfig::from_yaml_str(
            "schema: { id: string }\nmappings:\n  id: { source: ID, transforms: [ { name: reencode } ] }\n",
        )
        .expect("config");
        assert!(matches!(
            Pipeline::new(config),
            Err(ConfigError::UnknownTransform { .. })
        ));
    }
}
