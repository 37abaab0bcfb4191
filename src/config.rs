//! Cleaning configuration: schema, ordered field mappings, quality rules and
//! output preferences.
//!
//! The YAML document is deserialized into a loose model first, then checked
//! and frozen into a [`CleanerConfig`]. Transform parameters are checked later,
//! when the pipeline resolves each chain against the transform registry.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};

use crate::{
    error::ConfigError,
    schema::{FieldType, Schema},
};

/// One named step of a field's transform chain. Parameters sit next to the
/// name in YAML: `{ name: regex_extract, pattern: "(\\d+)", as_type: int }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub name: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, YamlValue>,
}

impl TransformSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, param: &str, value: impl Into<YamlValue>) -> Self {
        self.params.insert(param.to_string(), value.into());
        self
    }
}

/// Binds an output field to its source column and transform chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub field: String,
    pub source: String,
    pub transforms: Vec<TransformSpec>,
}

impl FieldMapping {
    pub fn new(field: &str, source: &str, transforms: Vec<TransformSpec>) -> Self {
        Self {
            field: field.to_string(),
            source: source.to_string(),
            transforms,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFieldMapping {
    source: String,
    #[serde(default)]
    transforms: Vec<TransformSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    Drop,
    KeepLatest,
    /// Keep every record and add a boolean flag column.
    Mark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRule {
    pub key: String,
    pub action: DuplicateAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_by: Option<String>,
    /// Output column written by the `mark` action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_column: Option<String>,
}

pub const DEFAULT_FLAG_COLUMN: &str = "duplicado";

impl DuplicateRule {
    /// The flag column name, only for the `mark` action.
    pub fn mark_column(&self) -> Option<&str> {
        (self.action == DuplicateAction::Mark)
            .then(|| self.flag_column.as_deref().unwrap_or(DEFAULT_FLAG_COLUMN))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullHandling {
    #[default]
    FillWithNull,
    Omit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawAllowedValuePolicy {
    #[default]
    Reject,
    Nullify,
    ReplaceWith,
    Flag,
}

/// What happens to a record whose value falls outside a field's allowed set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllowedValuePolicy {
    /// Exclude the record from the output.
    #[default]
    Reject,
    /// Keep the record with the offending slot set to null.
    Nullify,
    /// Keep the record with the offending slot replaced by a fixed value.
    ReplaceWith(String),
    /// Keep the record unchanged.
    Flag,
}

#[derive(Debug, Default, Deserialize)]
struct RawQuality {
    #[serde(default)]
    duplicates: Option<DuplicateRule>,
    #[serde(default)]
    allowed_values: Mapping,
    #[serde(default)]
    allowed_values_policy: RawAllowedValuePolicy,
    #[serde(default)]
    replacement: Option<String>,
    #[serde(default)]
    null_handling: NullHandling,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityConfig {
    pub duplicates: Option<DuplicateRule>,
    pub allowed_values: Vec<(String, BTreeSet<String>)>,
    pub allowed_values_policy: AllowedValuePolicy,
    pub null_handling: NullHandling,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<PathBuf>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema: Mapping,
    mappings: Mapping,
    #[serde(default)]
    quality: RawQuality,
    #[serde(default)]
    output: OutputConfig,
}

/// Immutable configuration shared by reference across the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanerConfig {
    pub schema: Schema,
    pub mappings: Vec<FieldMapping>,
    pub quality: QualityConfig,
    pub output: OutputConfig,
}

impl CleanerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let raw: RawConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        Ok(Self::from_raw(raw)?)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(input).context("Parsing config YAML")?;
        Ok(Self::from_raw(raw)?)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let schema = parse_schema(&raw.schema)?;
        let mappings = parse_mappings(raw.mappings)?;
        let quality = parse_quality(raw.quality)?;
        let config = CleanerConfig {
            schema,
            mappings,
            quality,
            output: raw.output,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every field referenced by a mapping or quality rule is
    /// declared, and that every declared field can be produced.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut mapped = BTreeSet::new();
        for mapping in &self.mappings {
            self.require_field(&mapping.field, "Mapping")?;
            mapped.insert(mapping.field.as_str());
        }
        for (field, _) in self.schema.fields() {
            if !mapped.contains(field.as_str()) {
                return Err(ConfigError::UnmappedField {
                    field: field.clone(),
                });
            }
        }
        if let Some(rule) = &self.quality.duplicates {
            self.require_field(&rule.key, "Duplicate rule key")?;
            match (rule.action, rule.latest_by.as_deref()) {
                (DuplicateAction::KeepLatest, None) => {
                    return Err(ConfigError::InvalidQuality(
                        "duplicate action 'keep_latest' requires 'latest_by'".to_string(),
                    ));
                }
                (_, Some(latest_by)) => self.require_field(latest_by, "Duplicate rule latest_by")?,
                (DuplicateAction::Drop | DuplicateAction::Mark, None) => {}
            }
            if let Some(column) = rule.mark_column()
                && self.schema.contains(column)
            {
                return Err(ConfigError::InvalidQuality(format!(
                    "flag column '{column}' collides with a schema field"
                )));
            }
        }
        for (field, _) in &self.quality.allowed_values {
            self.require_field(field, "Allowed values")?;
        }
        Ok(())
    }

    fn require_field(&self, field: &str, context: &str) -> Result<(), ConfigError> {
        if self.schema.contains(field) {
            Ok(())
        } else {
            Err(ConfigError::UnknownField {
                field: field.to_string(),
                context: context.to_string(),
            })
        }
    }
}

fn mapping_key(key: &YamlValue) -> Result<String, ConfigError> {
    scalar_to_string(key).ok_or_else(|| {
        ConfigError::InvalidQuality(format!("expected a field name but found {key:?}"))
    })
}

/// Renders a YAML scalar the way it reads in the file.
pub(crate) fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_schema(raw: &Mapping) -> Result<Schema, ConfigError> {
    let mut fields = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let field = mapping_key(key)?;
        let token = value.as_str().unwrap_or_default();
        let ty = token
            .parse::<FieldType>()
            .map_err(|name| ConfigError::UnknownType {
                field: field.clone(),
                name,
                supported: FieldType::variants().join(", "),
            })?;
        fields.push((field, ty));
    }
    Ok(Schema::new(fields))
}

fn parse_mappings(raw: Mapping) -> Result<Vec<FieldMapping>, ConfigError> {
    let mut mappings = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let field = mapping_key(&key)?;
        let parsed: RawFieldMapping = serde_yaml::from_value(value).map_err(|err| {
            ConfigError::InvalidParameter {
                field: field.clone(),
                transform: "mapping".to_string(),
                param: "source/transforms".to_string(),
                reason: err.to_string(),
            }
        })?;
        mappings.push(FieldMapping {
            field,
            source: parsed.source,
            transforms: parsed.transforms,
        });
    }
    Ok(mappings)
}

fn parse_quality(raw: RawQuality) -> Result<QualityConfig, ConfigError> {
    let mut allowed_values = Vec::with_capacity(raw.allowed_values.len());
    for (key, value) in &raw.allowed_values {
        let field = mapping_key(key)?;
        let values = value
            .as_sequence()
            .ok_or_else(|| {
                ConfigError::InvalidQuality(format!(
                    "allowed values for '{field}' must be a list"
                ))
            })?
            .iter()
            .map(|item| {
                scalar_to_string(item).ok_or_else(|| {
                    ConfigError::InvalidQuality(format!(
                        "allowed values for '{field}' must be scalars"
                    ))
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        allowed_values.push((field, values));
    }
    let allowed_values_policy = match (raw.allowed_values_policy, raw.replacement) {
        (RawAllowedValuePolicy::Reject, _) => AllowedValuePolicy::Reject,
        (RawAllowedValuePolicy::Nullify, _) => AllowedValuePolicy::Nullify,
        (RawAllowedValuePolicy::Flag, _) => AllowedValuePolicy::Flag,
        (RawAllowedValuePolicy::ReplaceWith, Some(replacement)) => {
            AllowedValuePolicy::ReplaceWith(replacement)
        }
        (RawAllowedValuePolicy::ReplaceWith, None) => {
            return Err(ConfigError::InvalidQuality(
                "allowed_values_policy 'replace_with' requires 'replacement'".to_string(),
            ));
        }
    };
    Ok(QualityConfig {
        duplicates: raw.duplicates,
        allowed_values,
        allowed_values_policy,
        null_handling: raw.null_handling,
    })
}
