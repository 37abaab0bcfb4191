//! Transform registry.
//!
//! Every transform a configuration can name is described by a static
//! [`TransformKind`]: its parameters, the input it expects, what it produces
//! and how it treats a null input. [`resolve`] validates a [`TransformSpec`]
//! against that description once, at load time, and returns a [`Transform`]
//! with its parameters already parsed and its patterns compiled.

pub mod string_ops;

use std::{borrow::Cow, collections::BTreeMap, fmt};

use chrono::{
    NaiveDateTime,
    format::{Item, StrftimeItems},
};
use regex::{Regex, RegexBuilder};
use serde_yaml::Value as YamlValue;

use crate::{
    config::{NullHandling, TransformSpec, scalar_to_string},
    data::{
        Value, at_midnight, parse_datetime_with_format, parse_naive_datetime, whole_float_as_i64,
    },
    error::{ConfigError, TransformError},
};

use self::string_ops::NormalizeOptions;

/// How a transform reacts to a null input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullRule {
    /// Null in, null out.
    Propagate,
    /// Null is replaced by a configured value.
    Fill,
    /// Null is a [`TransformError::NullInput`].
    Reject,
}

impl NullRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            NullRule::Propagate => "propagate",
            NullRule::Fill => "fill",
            NullRule::Reject => "reject",
        }
    }
}

/// Input a transform expects from the previous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Any value; typed values are rendered to their display text first.
    Text,
    /// Any value, used as is.
    Any,
    /// A date or datetime.
    Temporal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Text,
    DateTime,
    /// Decided by the `as_type`/`to` parameter.
    Declared,
    /// Same as the input.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Text,
    Pattern,
    Type,
    Choice(&'static [&'static str]),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Bool => f.write_str("bool"),
            ParamKind::Int => f.write_str("int"),
            ParamKind::Text => f.write_str("string"),
            ParamKind::Pattern => f.write_str("regex"),
            ParamKind::Type => f.write_str("string|int|float"),
            ParamKind::Choice(options) => f.write_str(&options.join("|")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<&'static str>,
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        default: None,
    }
}

const fn optional(name: &'static str, kind: ParamKind, default: Option<&'static str>) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default,
    }
}

/// Identity of a registered transform; [`resolve`] matches on it
/// exhaustively to build the [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformTag {
    NormalizeText,
    RemovePattern,
    RegexExtract,
    ToDatetime,
    ToIsoformat,
    Trim,
    CastType,
    StripLeadingZeros,
    SplitBy,
    SplitByRest,
    FillNull,
    Required,
}

/// Static description of one named transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformKind {
    pub tag: TransformTag,
    pub name: &'static str,
    pub summary: &'static str,
    pub params: &'static [ParamSpec],
    pub input: InputKind,
    pub output: OutputKind,
    pub null_rule: NullRule,
}

impl TransformKind {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|param| param.name == name)
    }
}

const ON_INVALID: &[&str] = &["null", "error"];

static CATALOG: &[TransformKind] = &[
    TransformKind {
        tag: TransformTag::NormalizeText,
        name: "normalize_text",
        summary: "Strip accents, lowercase, then trim and collapse whitespace",
        params: &[
            optional("lowercase", ParamKind::Bool, Some("true")),
            optional("strip_accents", ParamKind::Bool, Some("true")),
            optional("trim", ParamKind::Bool, Some("true")),
        ],
        input: InputKind::Text,
        output: OutputKind::Text,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::RemovePattern,
        name: "remove_pattern",
        summary: "Remove every match of a regular expression",
        params: &[
            required("pattern", ParamKind::Pattern),
            optional("ignore_case", ParamKind::Bool, Some("true")),
        ],
        input: InputKind::Text,
        output: OutputKind::Text,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::RegexExtract,
        name: "regex_extract",
        summary: "Extract a capture group of the first match; no match yields null",
        params: &[
            required("pattern", ParamKind::Pattern),
            optional("group", ParamKind::Int, Some("1")),
            optional("as_type", ParamKind::Type, Some("string")),
            optional("ignore_case", ParamKind::Bool, Some("true")),
        ],
        input: InputKind::Text,
        output: OutputKind::Declared,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::ToDatetime,
        name: "to_datetime",
        summary: "Parse text into a timestamp",
        params: &[
            optional("format", ParamKind::Text, None),
            optional("on_invalid", ParamKind::Choice(ON_INVALID), None),
        ],
        input: InputKind::Any,
        output: OutputKind::DateTime,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::ToIsoformat,
        name: "to_isoformat",
        summary: "Render a timestamp as 'YYYY-MM-DD HH:MM:SS'",
        params: &[],
        input: InputKind::Temporal,
        output: OutputKind::Text,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::Trim,
        name: "trim",
        summary: "Strip leading and trailing whitespace",
        params: &[],
        input: InputKind::Text,
        output: OutputKind::Text,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::CastType,
        name: "cast_type",
        summary: "Coerce to string, int or float; unparsable numbers become null",
        params: &[required("to", ParamKind::Type)],
        input: InputKind::Any,
        output: OutputKind::Declared,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::StripLeadingZeros,
        name: "strip_leading_zeros",
        summary: "Drop leading zeros from all-digit text",
        params: &[],
        input: InputKind::Text,
        output: OutputKind::Text,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::SplitBy,
        name: "split_by",
        summary: "Split on a delimiter and keep one trimmed part",
        params: &[
            optional("delimiter", ParamKind::Text, Some(">")),
            optional("index", ParamKind::Int, Some("0")),
        ],
        input: InputKind::Text,
        output: OutputKind::Text,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::SplitByRest,
        name: "split_by_rest",
        summary: "Split on a delimiter and re-join the parts from start_index on",
        params: &[
            optional("delimiter", ParamKind::Text, Some(">")),
            optional("start_index", ParamKind::Int, Some("2")),
            optional("join_with", ParamKind::Text, Some(" > ")),
        ],
        input: InputKind::Text,
        output: OutputKind::Text,
        null_rule: NullRule::Propagate,
    },
    TransformKind {
        tag: TransformTag::FillNull,
        name: "fill_null",
        summary: "Replace a null value with fixed text",
        params: &[required("value", ParamKind::Text)],
        input: InputKind::Any,
        output: OutputKind::Unchanged,
        null_rule: NullRule::Fill,
    },
    TransformKind {
        tag: TransformTag::Required,
        name: "required",
        summary: "Fail the field when the value is null",
        params: &[],
        input: InputKind::Any,
        output: OutputKind::Unchanged,
        null_rule: NullRule::Reject,
    },
];

/// All registered transforms, in catalog order.
pub fn catalog() -> &'static [TransformKind] {
    CATALOG
}

pub fn kind(name: &str) -> Option<&'static TransformKind> {
    CATALOG.iter().find(|kind| kind.name == name)
}

/// Target type of `regex_extract`'s `as_type` and `cast_type`'s `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Int,
    Float,
}

impl ScalarType {
    fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Some(ScalarType::String),
            "int" | "integer" => Some(ScalarType::Int),
            "float" => Some(ScalarType::Float),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnInvalid {
    Null,
    Error,
}

/// A transform with parsed parameters.
#[derive(Debug, Clone)]
pub enum Operation {
    NormalizeText(NormalizeOptions),
    RemovePattern(Regex),
    RegexExtract {
        regex: Regex,
        group: usize,
        as_type: ScalarType,
    },
    ToDatetime {
        format: Option<String>,
        on_invalid: OnInvalid,
    },
    ToIsoformat,
    Trim,
    CastType(ScalarType),
    StripLeadingZeros,
    SplitBy {
        delimiter: String,
        index: usize,
    },
    SplitByRest {
        delimiter: String,
        start_index: usize,
        join_with: String,
    },
    FillNull(String),
    Required,
}

/// A resolved chain step, ready to run against any number of values.
#[derive(Debug, Clone)]
pub struct Transform {
    kind: &'static TransformKind,
    operation: Operation,
}

/// Settings a transform may inherit when its own parameters are silent.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub field: &'a str,
    pub null_handling: NullHandling,
}

/// Looks up a transform by name and validates its parameters.
pub fn resolve(spec: &TransformSpec, context: ResolveContext<'_>) -> Result<Transform, ConfigError> {
    let kind = kind(&spec.name).ok_or_else(|| ConfigError::UnknownTransform {
        field: context.field.to_string(),
        name: spec.name.clone(),
    })?;
    let params = Params::check(kind, context.field, &spec.params)?;
    let operation = match kind.tag {
        TransformTag::NormalizeText => Operation::NormalizeText(NormalizeOptions {
            lowercase: params.bool("lowercase", true)?,
            strip_accents: params.bool("strip_accents", true)?,
            trim: params.bool("trim", true)?,
        }),
        TransformTag::RemovePattern => Operation::RemovePattern(params.pattern()?),
        TransformTag::RegexExtract => {
            let regex = params.pattern()?;
            let group = params.index("group", 1)?;
            if group >= regex.captures_len() {
                return Err(params.invalid(
                    "group",
                    format!(
                        "refers to group {group} but the pattern has {} group(s)",
                        regex.captures_len() - 1
                    ),
                ));
            }
            Operation::RegexExtract {
                regex,
                group,
                as_type: params.scalar_type("as_type")?.unwrap_or(ScalarType::String),
            }
        }
        TransformTag::ToDatetime => {
            let format = params.text("format")?;
            if let Some(fmt) = format.as_deref()
                && StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error))
            {
                return Err(params.invalid("format", format!("'{fmt}' is not a valid format")));
            }
            let on_invalid = match params.text("on_invalid")?.as_deref() {
                Some("null") => OnInvalid::Null,
                Some(_) => OnInvalid::Error,
                None => match context.null_handling {
                    NullHandling::FillWithNull => OnInvalid::Null,
                    NullHandling::Omit => OnInvalid::Error,
                },
            };
            Operation::ToDatetime { format, on_invalid }
        }
        TransformTag::ToIsoformat => Operation::ToIsoformat,
        TransformTag::Trim => Operation::Trim,
        TransformTag::CastType => Operation::CastType(
            params
                .scalar_type("to")?
                .ok_or_else(|| params.missing("to"))?,
        ),
        TransformTag::StripLeadingZeros => Operation::StripLeadingZeros,
        TransformTag::SplitBy => Operation::SplitBy {
            delimiter: params.text("delimiter")?.unwrap_or_else(|| ">".to_string()),
            index: params.index("index", 0)?,
        },
        TransformTag::SplitByRest => Operation::SplitByRest {
            delimiter: params.text("delimiter")?.unwrap_or_else(|| ">".to_string()),
            start_index: params.index("start_index", 2)?,
            join_with: params.text("join_with")?.unwrap_or_else(|| " > ".to_string()),
        },
        TransformTag::FillNull => Operation::FillNull(
            params
                .text("value")?
                .ok_or_else(|| params.missing("value"))?,
        ),
        TransformTag::Required => Operation::Required,
    };
    Ok(Transform { kind, operation })
}

impl Transform {
    pub fn kind(&self) -> &'static TransformKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Runs one step. Null inputs are settled by the declared [`NullRule`]
    /// and typed inputs are adapted to the declared [`InputKind`] before the
    /// operation sees anything.
    pub fn apply(&self, value: Option<Value>) -> Result<Option<Value>, TransformError> {
        let Some(value) = value else {
            return match self.kind.null_rule {
                NullRule::Propagate => Ok(None),
                NullRule::Fill => Ok(self.fill_value()),
                NullRule::Reject => Err(TransformError::NullInput {
                    transform: self.kind.name,
                }),
            };
        };
        let value = match (self.kind.input, value) {
            (InputKind::Text, Value::String(s)) => Value::String(s),
            (InputKind::Text, other) => Value::String(other.as_display()),
            (InputKind::Temporal, value @ (Value::Date(_) | Value::DateTime(_))) => value,
            (InputKind::Temporal, other) => return Err(self.unexpected(&other)),
            (InputKind::Any, value) => value,
        };
        self.run(value)
    }

    fn fill_value(&self) -> Option<Value> {
        match &self.operation {
            Operation::FillNull(text) => Some(Value::String(text.clone())),
            _ => None,
        }
    }

    fn unexpected(&self, value: &Value) -> TransformError {
        TransformError::UnexpectedInput {
            transform: self.kind.name,
            expected: "datetime",
            found: value.type_name(),
        }
    }

    fn run(&self, value: Value) -> Result<Option<Value>, TransformError> {
        let text = |value: Value| match value {
            Value::String(s) => s,
            other => other.as_display(),
        };
        let out = match &self.operation {
            Operation::NormalizeText(options) => {
                string_ops::normalize_text(&text(value), *options)
            }
            Operation::RemovePattern(regex) => {
                let text = text(value);
                match string_ops::remove_matches(&text, regex) {
                    Cow::Borrowed(_) => text,
                    Cow::Owned(removed) => removed,
                }
            }
            Operation::Trim => string_ops::trim(&text(value)).into_owned(),
            Operation::StripLeadingZeros => {
                string_ops::strip_leading_zeros(&text(value)).into_owned()
            }
            Operation::RegexExtract {
                regex,
                group,
                as_type,
            } => {
                let text = text(value);
                let captured = regex
                    .captures(&text)
                    .and_then(|captures| captures.get(*group))
                    .map(|m| m.as_str());
                return match captured {
                    Some(captured) => coerce_strict(self.kind.name, captured, *as_type).map(Some),
                    None => Ok(None),
                };
            }
            Operation::SplitBy { delimiter, index } => {
                return Ok(string_ops::split_part(&text(value), delimiter, *index)
                    .map(|part| Value::String(part.to_string())));
            }
            Operation::SplitByRest {
                delimiter,
                start_index,
                join_with,
            } => {
                return Ok(
                    string_ops::split_rest(&text(value), delimiter, *start_index, join_with)
                        .map(Value::String),
                );
            }
            Operation::ToIsoformat => match value {
                Value::DateTime(dt) => iso_format(dt),
                Value::Date(d) => iso_format(at_midnight(d)),
                other => return Err(self.unexpected(&other)),
            },
            Operation::ToDatetime { format, on_invalid } => {
                return self.to_datetime(value, format.as_deref(), *on_invalid);
            }
            Operation::CastType(target) => return Ok(coerce_lenient(value, *target)),
            Operation::FillNull(_) | Operation::Required => return Ok(Some(value)),
        };
        Ok(Some(Value::String(out)))
    }

    fn to_datetime(
        &self,
        value: Value,
        format: Option<&str>,
        on_invalid: OnInvalid,
    ) -> Result<Option<Value>, TransformError> {
        let parsed = match &value {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(d) => Some(at_midnight(*d)),
            other => {
                let text = other.as_display();
                match format {
                    Some(fmt) => parse_datetime_with_format(&text, fmt),
                    None => parse_naive_datetime(&text),
                }
            }
        };
        match (parsed, on_invalid) {
            (Some(dt), _) => Ok(Some(Value::DateTime(dt))),
            (None, OnInvalid::Null) => Ok(None),
            (None, OnInvalid::Error) => Err(TransformError::UnparsableDate {
                transform: self.kind.name,
                value: value.as_display(),
            }),
        }
    }
}

fn iso_format(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn coerce_strict(
    transform: &'static str,
    text: &str,
    target: ScalarType,
) -> Result<Value, TransformError> {
    let coercion = || TransformError::Coercion {
        transform,
        value: text.to_string(),
        target: target.as_str(),
    };
    match target {
        ScalarType::String => Ok(Value::String(text.to_string())),
        ScalarType::Int => text.trim().parse().map(Value::Integer).map_err(|_| coercion()),
        ScalarType::Float => text.trim().parse().map(Value::Float).map_err(|_| coercion()),
    }
}

fn coerce_lenient(value: Value, target: ScalarType) -> Option<Value> {
    match (target, value) {
        (ScalarType::String, Value::String(s)) => Some(Value::String(s)),
        (ScalarType::String, other) => Some(Value::String(other.as_display())),
        (ScalarType::Int, Value::Integer(i)) => Some(Value::Integer(i)),
        (ScalarType::Int, Value::Float(f)) => whole_float_as_i64(f).map(Value::Integer),
        (ScalarType::Int, Value::String(s)) => {
            let trimmed = s.trim();
            trimmed.parse().ok().map(Value::Integer).or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(whole_float_as_i64)
                    .map(Value::Integer)
            })
        }
        (ScalarType::Float, Value::Float(f)) => Some(Value::Float(f)),
        (ScalarType::Float, Value::Integer(i)) => Some(Value::Float(i as f64)),
        (ScalarType::Float, Value::String(s)) => s.trim().parse().ok().map(Value::Float),
        _ => None,
    }
}

/// Parameters of one spec, checked against the kind's declaration.
struct Params<'a> {
    kind: &'static TransformKind,
    field: &'a str,
    raw: &'a BTreeMap<String, YamlValue>,
}

impl<'a> Params<'a> {
    fn check(
        kind: &'static TransformKind,
        field: &'a str,
        raw: &'a BTreeMap<String, YamlValue>,
    ) -> Result<Self, ConfigError> {
        let params = Params { kind, field, raw };
        if let Some(unknown) = raw.keys().find(|name| kind.param(name).is_none()) {
            return Err(ConfigError::UnknownParameter {
                field: field.to_string(),
                transform: kind.name.to_string(),
                param: unknown.clone(),
            });
        }
        if let Some(missing) = kind
            .params
            .iter()
            .find(|param| param.required && params.get(param.name).is_none())
        {
            return Err(params.missing(missing.name));
        }
        for spec in kind.params {
            if let (ParamKind::Choice(options), Some(value)) = (spec.kind, params.get(spec.name)) {
                let token = scalar_to_string(value).unwrap_or_default();
                if !options.contains(&token.as_str()) {
                    return Err(params.invalid(
                        spec.name,
                        format!("must be one of {} but was '{token}'", options.join(", ")),
                    ));
                }
            }
        }
        Ok(params)
    }

    /// Explicit YAML nulls count as absent.
    fn get(&self, name: &str) -> Option<&'a YamlValue> {
        self.raw.get(name).filter(|value| !value.is_null())
    }

    fn missing(&self, param: &str) -> ConfigError {
        ConfigError::MissingParameter {
            field: self.field.to_string(),
            transform: self.kind.name.to_string(),
            param: param.to_string(),
        }
    }

    fn invalid(&self, param: &str, reason: String) -> ConfigError {
        ConfigError::InvalidParameter {
            field: self.field.to_string(),
            transform: self.kind.name.to_string(),
            param: param.to_string(),
            reason,
        }
    }

    fn bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| self.invalid(name, "must be true or false".to_string())),
        }
    }

    fn index(&self, name: &str, default: usize) -> Result<usize, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| self.invalid(name, "must be a non-negative integer".to_string())),
        }
    }

    fn text(&self, name: &str) -> Result<Option<String>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => scalar_to_string(value)
                .map(Some)
                .ok_or_else(|| self.invalid(name, "must be a scalar".to_string())),
        }
    }

    fn scalar_type(&self, name: &str) -> Result<Option<ScalarType>, ConfigError> {
        match self.text(name)? {
            None => Ok(None),
            Some(token) => ScalarType::parse(&token).map(Some).ok_or_else(|| {
                self.invalid(
                    name,
                    format!("must be one of string, int, float but was '{token}'"),
                )
            }),
        }
    }

    fn pattern(&self) -> Result<Regex, ConfigError> {
        let pattern = self.text("pattern")?.ok_or_else(|| self.missing("pattern"))?;
        RegexBuilder::new(&pattern)
            .case_insensitive(self.bool("ignore_case", true)?)
            .build()
            .map_err(|err| ConfigError::InvalidPattern {
                field: self.field.to_string(),
                transform: self.kind.name.to_string(),
                reason: err.to_string(),
            })
    }
}
