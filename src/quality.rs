//! Dataset-wide quality enforcement.
//!
//! Runs after every row has been mapped, because duplicate resolution needs
//! the complete set of records. Each record ends in exactly one terminal
//! [`RecordOutcome`]; only accepted records become [`CleanRecord`]s.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::{
    config::{AllowedValuePolicy, DuplicateAction, NullHandling, QualityConfig},
    data::{ComparableValue, Value},
    error::{ConfigError, QualityViolation},
    record::{CleanRecord, MappedRecord},
    schema::{Schema, cast},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted,
    Rejected(QualityViolation),
    Superseded { key: String, by: usize },
}

impl RecordOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RecordOutcome::Accepted)
    }

    /// The violation behind a non-accepted outcome.
    pub fn violation(&self) -> Option<QualityViolation> {
        match self {
            RecordOutcome::Accepted => None,
            RecordOutcome::Rejected(violation) => Some(violation.clone()),
            RecordOutcome::Superseded { key, by } => Some(QualityViolation::Superseded {
                key: key.clone(),
                by: *by,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub origin: usize,
    pub outcome: RecordOutcome,
}

/// What the allowed-value policy did to a kept record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Nullified,
    Replaced,
    Flagged,
}

/// An allowed-value violation on a record that stayed in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedValueNote {
    pub origin: usize,
    pub field: String,
    pub value: String,
    pub adjustment: Adjustment,
}

/// A record kept by the `mark` duplicate action although its key was seen
/// before at row `first`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMark {
    pub origin: usize,
    pub key: String,
    pub first: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityOutcome {
    /// Accepted records in origin order.
    pub accepted: Vec<CleanRecord>,
    /// One decision per input record, in origin order.
    pub decisions: Vec<Decision>,
    pub notes: Vec<AllowedValueNote>,
    pub marks: Vec<DuplicateMark>,
}

#[derive(Debug, Clone)]
struct AllowedRule {
    slot: usize,
    field: String,
    values: BTreeSet<String>,
    replacement: Option<Value>,
}

/// Quality rules bound to schema slots.
#[derive(Debug, Clone)]
pub struct QualityEngine {
    fields: Vec<String>,
    duplicates: Option<(usize, DuplicateAction, Option<usize>)>,
    flag_column: Option<String>,
    allowed: Vec<AllowedRule>,
    policy: AllowedValuePolicy,
    null_handling: NullHandling,
}

impl QualityEngine {
    pub fn new(config: &QualityConfig, schema: &Schema) -> Result<Self, ConfigError> {
        let slot = |field: &str, context: &str| {
            schema
                .position(field)
                .ok_or_else(|| ConfigError::UnknownField {
                    field: field.to_string(),
                    context: context.to_string(),
                })
        };
        let duplicates = match &config.duplicates {
            Some(rule) => {
                let latest = match rule.latest_by.as_deref() {
                    Some(field) => Some(slot(field, "Duplicate rule latest_by")?),
                    None => None,
                };
                Some((slot(&rule.key, "Duplicate rule key")?, rule.action, latest))
            }
            None => None,
        };
        let mut allowed = Vec::with_capacity(config.allowed_values.len());
        for (field, values) in &config.allowed_values {
            let slot = slot(field, "Allowed values")?;
            let replacement = match &config.allowed_values_policy {
                AllowedValuePolicy::ReplaceWith(text) => {
                    let (_, ty) = &schema.fields()[slot];
                    cast(Some(Value::String(text.clone())), *ty).map_err(|err| {
                        ConfigError::InvalidQuality(format!(
                            "replacement for field '{field}': {err}"
                        ))
                    })?
                }
                _ => None,
            };
            allowed.push(AllowedRule {
                slot,
                field: field.clone(),
                values: values.clone(),
                replacement,
            });
        }
        Ok(QualityEngine {
            fields: schema.field_names(),
            duplicates,
            flag_column: config
                .duplicates
                .as_ref()
                .and_then(|rule| rule.mark_column())
                .map(str::to_string),
            allowed,
            policy: config.allowed_values_policy.clone(),
            null_handling: config.null_handling,
        })
    }

    /// Output columns: the schema fields, then the duplicate flag column when
    /// the `mark` action is configured.
    pub fn output_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .cloned()
            .chain(self.flag_column.clone())
            .collect()
    }

    pub fn evaluate(&self, mut records: Vec<MappedRecord>) -> QualityOutcome {
        records.sort_by_key(|record| record.origin);
        let mut outcomes: Vec<Option<RecordOutcome>> = vec![None; records.len()];

        let marks = match self.duplicates {
            Some((key_slot, action, latest_slot)) => {
                self.resolve_duplicates(&records, &mut outcomes, key_slot, action, latest_slot)
            }
            None => Vec::new(),
        };
        let notes = self.enforce_allowed_values(&mut records, &mut outcomes);

        let mut accepted = Vec::new();
        let mut decisions = Vec::with_capacity(records.len());
        let mut marked = marks.iter().map(|mark| mark.origin).peekable();
        for (record, outcome) in records.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or(RecordOutcome::Accepted);
            let is_marked = marked.next_if_eq(&record.origin).is_some();
            if outcome.is_accepted() {
                accepted.push(self.finish(record.origin, record.values, is_marked));
            }
            decisions.push(Decision {
                origin: record.origin,
                outcome,
            });
        }
        QualityOutcome {
            accepted,
            decisions,
            notes,
            marks,
        }
    }

    /// Groups records by key in origin order. Null keys never form a group.
    /// Returns the records flagged by the `mark` action, in origin order.
    fn resolve_duplicates(
        &self,
        records: &[MappedRecord],
        outcomes: &mut [Option<RecordOutcome>],
        key_slot: usize,
        action: DuplicateAction,
        latest_slot: Option<usize>,
    ) -> Vec<DuplicateMark> {
        let mut marks = Vec::new();
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let Some(key) = record.value(key_slot) else {
                continue;
            };
            let key = key.as_display();
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(idx);
        }

        for key in order {
            let members = &groups[&key];
            if members.len() < 2 {
                continue;
            }
            match (action, latest_slot) {
                (DuplicateAction::KeepLatest, Some(latest_slot)) => {
                    let winner = members
                        .iter()
                        .copied()
                        .max_by(|&a, &b| {
                            ComparableValue(records[a].value(latest_slot))
                                .cmp(&ComparableValue(records[b].value(latest_slot)))
                                .then(records[a].origin.cmp(&records[b].origin))
                        })
                        .unwrap_or(members[0]);
                    let by = records[winner].origin;
                    for &idx in members.iter().filter(|&&idx| idx != winner) {
                        outcomes[idx] = Some(RecordOutcome::Superseded {
                            key: key.clone(),
                            by,
                        });
                    }
                }
                (DuplicateAction::Mark, _) => {
                    let first = records[members[0]].origin;
                    marks.extend(members[1..].iter().map(|&idx| DuplicateMark {
                        origin: records[idx].origin,
                        key: key.clone(),
                        first,
                    }));
                }
                _ => {
                    let kept = records[members[0]].origin;
                    for &idx in &members[1..] {
                        outcomes[idx] = Some(RecordOutcome::Rejected(
                            QualityViolation::DuplicateDropped {
                                key: key.clone(),
                                kept,
                            },
                        ));
                    }
                }
            }
            debug!("Key '{}' resolved across {} record(s)", key, members.len());
        }
        marks.sort_by_key(|mark| mark.origin);
        marks
    }

    /// Checks every still-pending record. Null values are never violations.
    fn enforce_allowed_values(
        &self,
        records: &mut [MappedRecord],
        outcomes: &mut [Option<RecordOutcome>],
    ) -> Vec<AllowedValueNote> {
        let mut notes = Vec::new();
        for (record, outcome) in records.iter_mut().zip(outcomes.iter_mut()) {
            if outcome.is_some() {
                continue;
            }
            for rule in &self.allowed {
                let Some(value) = record.value(rule.slot) else {
                    continue;
                };
                let display = value.as_display();
                if rule.values.contains(&display) {
                    continue;
                }
                let adjustment = match &self.policy {
                    AllowedValuePolicy::Reject => {
                        *outcome = Some(RecordOutcome::Rejected(
                            QualityViolation::AllowedValueViolation {
                                field: rule.field.clone(),
                                value: display,
                            },
                        ));
                        break;
                    }
                    AllowedValuePolicy::Nullify => {
                        record.values[rule.slot] = None;
                        Adjustment::Nullified
                    }
                    AllowedValuePolicy::ReplaceWith(_) => {
                        record.values[rule.slot] = rule.replacement.clone();
                        Adjustment::Replaced
                    }
                    AllowedValuePolicy::Flag => Adjustment::Flagged,
                };
                notes.push(AllowedValueNote {
                    origin: record.origin,
                    field: rule.field.clone(),
                    value: display,
                    adjustment,
                });
            }
        }
        notes
    }

    fn finish(&self, origin: usize, values: Vec<Option<Value>>, marked: bool) -> CleanRecord {
        let mut fields = self
            .fields
            .iter()
            .zip(values)
            .filter(|(_, value)| value.is_some() || self.null_handling == NullHandling::FillWithNull)
            .map(|(name, value)| (name.clone(), value))
            .collect::<Vec<_>>();
        if let Some(column) = &self.flag_column {
            fields.push((column.clone(), Some(Value::Boolean(marked))));
        }
        CleanRecord { origin, fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DuplicateRule,
        data::parse_naive_datetime,
        schema::FieldType,
    };

    fn schema() -> Schema {
        Schema::new(vec![
            ("id".into(), FieldType::String),
            ("fecha_creacion".into(), FieldType::DateTime),
            ("estado".into(), FieldType::String),
        ])
    }

    fn record(origin: usize, id: Option<&str>, fecha: Option<&str>, estado: Option<&str>) -> MappedRecord {
        MappedRecord {
            origin,
            values: vec![
                id.map(|v| Value::String(v.into())),
                fecha.and_then(parse_naive_datetime).map(Value::DateTime),
                estado.map(|v| Value::String(v.into())),
            ],
            failures: Vec::new(),
        }
    }

    fn keep_latest() -> QualityConfig {
        QualityConfig {
            duplicates: Some(DuplicateRule {
                key: "id".into(),
                action: DuplicateAction::KeepLatest,
                latest_by: Some("fecha_creacion".into()),
                flag_column: None,
            }),
            ..QualityConfig::default()
        }
    }

    fn allowed(policy: AllowedValuePolicy) -> QualityConfig {
        QualityConfig {
            allowed_values: vec![(
                "estado".into(),
                ["abierto", "cerrado", "en espera", "otro"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            )],
            allowed_values_policy: policy,
            ..QualityConfig::default()
        }
    }

    #[test]
    fn keep_latest_supersedes_older_record() {
        let config = keep_latest();
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![
            record(0, Some("A1"), Some("2024-01-01"), Some("abierto")),
            record(1, Some("A1"), Some("2024-02-01"), Some("cerrado")),
        ]);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].origin, 1);
        assert_eq!(
            outcome.decisions[0].outcome,
            RecordOutcome::Superseded {
                key: "A1".into(),
                by: 1
            }
        );
    }

    #[test]
    fn keep_latest_ties_favour_last_seen() {
        let config = keep_latest();
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![
            record(2, Some("A1"), Some("2024-01-01"), None),
            record(0, Some("A1"), Some("2024-01-01"), None),
            record(1, Some("B2"), None, None),
        ]);
        let accepted = outcome.accepted.iter().map(|r| r.origin).collect::<Vec<_>>();
        assert_eq!(accepted, vec![1, 2]);
        assert_eq!(outcome.decisions[0].origin, 0);
        assert!(!outcome.decisions[0].outcome.is_accepted());
    }

    #[test]
    fn keep_latest_ranks_null_recency_lowest() {
        let config = keep_latest();
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![
            record(0, Some("A1"), Some("2024-01-01"), None),
            record(1, Some("A1"), None, None),
        ]);
        assert_eq!(outcome.accepted[0].origin, 0);
        let violation = outcome.decisions[1].outcome.violation().expect("superseded");
        assert_eq!(violation.to_string(), "superseded by row 0 for key 'A1'");
    }

    #[test]
    fn drop_keeps_first_occurrence() {
        let config = QualityConfig {
            duplicates: Some(DuplicateRule {
                key: "id".into(),
                action: DuplicateAction::Drop,
                latest_by: None,
                flag_column: None,
            }),
            ..QualityConfig::default()
        };
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![
            record(0, Some("1"), None, None),
            record(1, Some("1"), None, None),
            record(2, Some("2"), None, None),
            record(3, None, None, None),
            record(4, None, None, None),
        ]);
        let accepted = outcome.accepted.iter().map(|r| r.origin).collect::<Vec<_>>();
        assert_eq!(accepted, vec![0, 2, 3, 4]);
        assert_eq!(
            outcome.decisions[1].outcome,
            RecordOutcome::Rejected(QualityViolation::DuplicateDropped {
                key: "1".into(),
                kept: 0
            })
        );
    }

    #[test]
    fn allowed_values_reject_outsiders() {
        let config = allowed(AllowedValuePolicy::Reject);
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![
            record(0, Some("1"), None, Some("pendiente")),
            record(1, Some("2"), None, Some("abierto")),
            record(2, Some("3"), None, None),
        ]);
        assert_eq!(
            outcome.decisions[0].outcome,
            RecordOutcome::Rejected(QualityViolation::AllowedValueViolation {
                field: "estado".into(),
                value: "pendiente".into()
            })
        );
        assert!(outcome.decisions[1].outcome.is_accepted());
        assert!(outcome.decisions[2].outcome.is_accepted());
        assert!(outcome.notes.is_empty());
    }

    #[test]
    fn mark_keeps_every_record_and_flags_repeats() {
        let config = QualityConfig {
            duplicates: Some(DuplicateRule {
                key: "id".into(),
                action: DuplicateAction::Mark,
                latest_by: None,
                flag_column: None,
            }),
            ..QualityConfig::default()
        };
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        assert_eq!(
            engine.output_fields(),
            vec!["id", "fecha_creacion", "estado", "duplicado"]
        );
        let outcome = engine.evaluate(vec![
            record(0, Some("1"), None, None),
            record(1, Some("2"), None, None),
            record(2, Some("1"), None, None),
            record(3, Some("1"), None, None),
            record(4, None, None, None),
        ]);
        assert_eq!(outcome.accepted.len(), 5);
        assert!(outcome.decisions.iter().all(|d| d.outcome.is_accepted()));
        let flags = outcome
            .accepted
            .iter()
            .map(|r| r.get("duplicado").cloned())
            .collect::<Vec<_>>();
        let flag = |b| Some(Value::Boolean(b));
        assert_eq!(flags, vec![flag(false), flag(false), flag(true), flag(true), flag(false)]);
        assert_eq!(
            outcome.marks,
            vec![
                DuplicateMark { origin: 2, key: "1".into(), first: 0 },
                DuplicateMark { origin: 3, key: "1".into(), first: 0 },
            ]
        );
    }

    #[test]
    fn large_float_keys_stay_distinct() {
        let schema = Schema::new(vec![("monto".into(), FieldType::Float)]);
        let config = QualityConfig {
            duplicates: Some(DuplicateRule {
                key: "monto".into(),
                action: DuplicateAction::Drop,
                latest_by: None,
                flag_column: None,
            }),
            ..QualityConfig::default()
        };
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let float = |origin, f| MappedRecord {
            origin,
            values: vec![Some(Value::Float(f))],
            failures: Vec::new(),
        };
        let outcome = engine.evaluate(vec![float(0, 1e20), float(1, 5e20), float(2, 1e20)]);
        let accepted = outcome.accepted.iter().map(|r| r.origin).collect::<Vec<_>>();
        assert_eq!(accepted, vec![0, 1]);
        assert_eq!(
            outcome.decisions[2].outcome,
            RecordOutcome::Rejected(QualityViolation::DuplicateDropped {
                key: "100000000000000000000".into(),
                kept: 0
            })
        );
    }

    #[test]
    fn allowed_values_flag_keeps_value_unchanged() {
        let config = allowed(AllowedValuePolicy::Flag);
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![
            record(0, Some("1"), None, Some("pendiente")),
            record(1, Some("2"), None, Some("abierto")),
        ]);
        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.decisions.iter().all(|d| d.outcome.is_accepted()));
        assert_eq!(
            outcome.accepted[0].get("estado"),
            Some(&Value::String("pendiente".into()))
        );
        assert_eq!(
            outcome.notes,
            vec![AllowedValueNote {
                origin: 0,
                field: "estado".into(),
                value: "pendiente".into(),
                adjustment: Adjustment::Flagged,
            }]
        );
    }

    #[test]
    fn allowed_values_nullify_keeps_record() {
        let config = allowed(AllowedValuePolicy::Nullify);
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![record(0, Some("1"), None, Some("pendiente"))]);
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.accepted[0].contains("estado"));
        assert_eq!(outcome.accepted[0].get("estado"), None);
        assert_eq!(outcome.notes[0].adjustment, Adjustment::Nullified);
        assert_eq!(outcome.notes[0].value, "pendiente");
    }

    #[test]
    fn allowed_values_replace_with_fixed_value() {
        let config = allowed(AllowedValuePolicy::ReplaceWith("otro".into()));
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![record(0, Some("1"), None, Some("pendiente"))]);
        assert_eq!(
            outcome.accepted[0].get("estado"),
            Some(&Value::String("otro".into()))
        );
        assert_eq!(outcome.notes[0].adjustment, Adjustment::Replaced);
    }

    #[test]
    fn replacement_must_fit_field_type() {
        let config = QualityConfig {
            allowed_values: vec![("fecha_creacion".into(), BTreeSet::new())],
            allowed_values_policy: AllowedValuePolicy::ReplaceWith("otro".into()),
            ..QualityConfig::default()
        };
        let schema = schema();
        assert!(matches!(
            QualityEngine::new(&config, &schema),
            Err(ConfigError::InvalidQuality(_))
        ));
    }

    #[test]
    fn omit_policy_drops_absent_fields() {
        let config = QualityConfig {
            null_handling: NullHandling::Omit,
            ..QualityConfig::default()
        };
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![record(0, Some("1"), None, Some("abierto"))]);
        let names = outcome.accepted[0]
            .fields
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "estado"]);
    }

    #[test]
    fn fill_policy_keeps_every_column() {
        let config = QualityConfig::default();
        let schema = schema();
        let engine = QualityEngine::new(&config, &schema).unwrap();
        let outcome = engine.evaluate(vec![record(0, Some("1"), None, None)]);
        assert_eq!(outcome.accepted[0].fields.len(), 3);
        assert!(outcome.accepted[0].contains("fecha_creacion"));
    }
}
