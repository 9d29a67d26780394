use crmbot_types::FunctionProperty;
use thiserror::Error;
use tracing::debug;

/// Reasons a function definition cannot be saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Function name is required")]
    NameRequired,
    #[error("A stage is required when a pipeline is selected")]
    StageRequired,
    #[error("A pipeline is required when a stage is selected")]
    PipelineRequired,
}

/// Check the scalar fields of a function definition before submission.
///
/// Pipeline and stage go together: either both or neither. Properties are not
/// checked; a function may carry no field mappings at all.
pub fn validate(
    name: &str,
    properties: &[FunctionProperty],
    pipeline: Option<&str>,
    stage: Option<&str>,
) -> Result<(), ValidationError> {
    let present = |value: Option<&str>| value.is_some_and(|value| !value.trim().is_empty());

    if name.trim().is_empty() {
        return Err(ValidationError::NameRequired);
    }
    match (present(pipeline), present(stage)) {
        (true, false) => return Err(ValidationError::StageRequired),
        (false, true) => return Err(ValidationError::PipelineRequired),
        _ => {}
    }

    let unresolved = properties.iter().filter(|property| property.resolved_field_code().is_none()).count();
    if unresolved > 0 {
        debug!(unresolved, "properties without a field code will not be persisted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmbot_types::LocalId;

    #[test]
    fn name_is_required() {
        assert_eq!(validate("", &[], None, None), Err(ValidationError::NameRequired));
        assert_eq!(validate("   ", &[], Some("P1"), Some("S1")), Err(ValidationError::NameRequired));
    }

    #[test]
    fn pipeline_and_stage_come_together() {
        assert_eq!(validate("X", &[], Some("P1"), None), Err(ValidationError::StageRequired));
        assert_eq!(validate("X", &[], None, Some("S1")), Err(ValidationError::PipelineRequired));
        assert_eq!(validate("X", &[], Some("P1"), Some(" ")), Err(ValidationError::StageRequired));
        assert_eq!(validate("X", &[], Some("P1"), Some("S1")), Ok(()));
    }

    #[test]
    fn empty_and_blank_properties_are_accepted() {
        assert_eq!(validate("X", &[], None, None), Ok(()));
        let blank = FunctionProperty::blank(LocalId::new("p"));
        assert_eq!(validate("X", &[blank], None, None), Ok(()));
    }

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(ValidationError::NameRequired.to_string(), "Function name is required");
    }
}
