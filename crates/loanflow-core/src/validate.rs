use loanflow_types::{FieldMap, StepNumber};

use crate::error::ValidationError;

/// Per-step payload checks run before any network call.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, step: StepNumber, payload: &FieldMap) -> Result<(), ValidationError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl PayloadValidator for AcceptAll {
    fn validate(&self, _step: StepNumber, _payload: &FieldMap) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl<F> PayloadValidator for F
where
    F: Fn(StepNumber, &FieldMap) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, step: StepNumber, payload: &FieldMap) -> Result<(), ValidationError> {
        self(step, payload)
    }
}

/// Rejects payloads missing any of `fields` at `step`.
#[derive(Clone, Debug, Default)]
pub struct RequiredFields {
    rules: Vec<(StepNumber, Vec<String>)>,
}

impl RequiredFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, step: StepNumber, fields: &[&str]) -> Self {
        self.rules
            .push((step, fields.iter().map(|f| f.to_string()).collect()));
        self
    }
}

impl PayloadValidator for RequiredFields {
    fn validate(&self, step: StepNumber, payload: &FieldMap) -> Result<(), ValidationError> {
        let missing = self
            .rules
            .iter()
            .filter(|(s, _)| *s == step)
            .flat_map(|(_, fields)| fields)
            .find(|field| payload.get(field.as_str()).is_none_or(|v| v.is_null()));
        match missing {
            Some(field) => Err(ValidationError::Field {
                field: field.clone(),
                reason: "required".into(),
            }),
            None => Ok(()),
        }
    }
}
