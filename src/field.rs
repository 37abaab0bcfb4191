//! Field pipeline executor: folds one field's transform chain over one raw
//! value and casts the result to the field's declared type.

use log::debug;

use crate::{
    config::{FieldMapping, NullHandling},
    data::{RawRow, Value},
    error::{ConfigError, FieldError},
    schema::{FieldType, Schema, cast},
    transform::{self, ResolveContext, Transform},
};

/// A field mapping with its chain resolved against the registry.
#[derive(Debug, Clone)]
pub struct FieldPlan {
    pub field: String,
    pub source: String,
    pub field_type: FieldType,
    pub chain: Vec<Transform>,
}

impl FieldPlan {
    pub fn resolve(
        mapping: &FieldMapping,
        schema: &Schema,
        null_handling: NullHandling,
    ) -> Result<Self, ConfigError> {
        let field_type =
            schema
                .field_type(&mapping.field)
                .ok_or_else(|| ConfigError::UnknownField {
                    field: mapping.field.clone(),
                    context: "Mapping".to_string(),
                })?;
        let context = ResolveContext {
            field: &mapping.field,
            null_handling,
        };
        let chain = mapping
            .transforms
            .iter()
            .map(|spec| transform::resolve(spec, context))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "Field '{}' <- '{}' [{}] as {}",
            mapping.field,
            mapping.source,
            chain
                .iter()
                .map(Transform::name)
                .collect::<Vec<_>>()
                .join(" -> "),
            field_type
        );
        Ok(FieldPlan {
            field: mapping.field.clone(),
            source: mapping.source.clone(),
            field_type,
            chain,
        })
    }

    /// Runs the chain against `row`. A missing source column is null input.
    /// The first failing step ends the chain for this field only.
    pub fn execute(&self, row: &RawRow) -> Result<Option<Value>, FieldError> {
        let input = row.get(&self.source).and_then(|raw| raw.to_value());
        let transformed = self
            .chain
            .iter()
            .try_fold(input, |value, step| step.apply(value))?;
        Ok(cast(transformed, self.field_type)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TransformSpec, error::TransformError};

    fn schema() -> Schema {
        Schema::new(vec![
            ("nivel".into(), FieldType::Integer),
            ("mesa".into(), FieldType::String),
        ])
    }

    fn plan(field: &str, source: &str, transforms: Vec<TransformSpec>) -> FieldPlan {
        FieldPlan::resolve(
            &FieldMapping::new(field, source, transforms),
            &schema(),
            NullHandling::FillWithNull,
        )
        .expect("plan")
    }

    #[test]
    fn folds_chain_left_to_right() {
        let plan = plan(
            "mesa",
            "Mesa de ayuda",
            vec![
                TransformSpec::new("normalize_text"),
                TransformSpec::new("remove_pattern").with("pattern", "nivel\\s*\\d+"),
                TransformSpec::new("trim"),
            ],
        );
        let row = RawRow::from_pairs([("Mesa de ayuda", "Soporte Nivel 2")]);
        assert_eq!(plan.execute(&row), Ok(Some(Value::String("soporte".into()))));
    }

    #[test]
    fn missing_column_is_null_not_error() {
        let plan = plan("mesa", "Mesa de ayuda", vec![TransformSpec::new("trim")]);
        assert_eq!(plan.execute(&RawRow::default()), Ok(None));
    }

    #[test]
    fn null_propagates_until_a_rejecting_step() {
        let plan = plan(
            "nivel",
            "Mesa de ayuda",
            vec![
                TransformSpec::new("regex_extract")
                    .with("pattern", "nivel\\s*(\\d+)")
                    .with("as_type", "int"),
                TransformSpec::new("trim"),
                TransformSpec::new("required"),
            ],
        );
        let row = RawRow::from_pairs([("Mesa de ayuda", "sin nivel")]);
        assert_eq!(
            plan.execute(&row),
            Err(FieldError::Transform(TransformError::NullInput {
                transform: "required"
            }))
        );
    }

    #[test]
    fn cast_failure_is_a_type_mismatch() {
        let plan = plan("nivel", "Nivel", vec![TransformSpec::new("normalize_text")]);
        let row = RawRow::from_pairs([("Nivel", "Alto")]);
        assert!(matches!(plan.execute(&row), Err(FieldError::TypeMismatch(_))));
        let row = RawRow::from_pairs([("Nivel", " 4 ")]);
        assert_eq!(plan.execute(&row), Ok(Some(Value::Integer(4))));
    }

    #[test]
    fn empty_chain_passes_values_through() {
        let plan = plan("nivel", "Nivel", Vec::new());
        let row = RawRow::from_pairs([("Nivel", 7_i64)]);
        assert_eq!(plan.execute(&row), Ok(Some(Value::Integer(7))));
    }

    #[test]
    fn resolve_surfaces_registry_errors() {
        let err = FieldPlan::resolve(
            &FieldMapping::new("mesa", "Mesa", vec![TransformSpec::new("reencode")]),
            &schema(),
            NullHandling::FillWithNull,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTransform { .. }));
    }
}
