// Workflow templates: parameter validation and instantiation
//
// A template holds a workflow definition body with `{{param}}` placeholders
// plus typed parameter definitions. Instantiation validates the provided
// values, merges defaults, interpolates, and parses the result back into a
// WorkflowDefinition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::interpolate;
use crate::model::WorkflowDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Float => "float",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Float => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

/// Range and enumeration constraints for one parameter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ParameterValidation>,
}

/// Reusable, parameterized workflow shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Workflow definition body with `{{param}}` placeholders
    pub template_data: Value,
    /// Parameter definitions, keyed by parameter name
    pub parameters: BTreeMap<String, ParameterDefinition>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, template_data: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            template_data,
            parameters: BTreeMap::new(),
            category: None,
            tags: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, def: ParameterDefinition) -> Self {
        self.parameters.insert(name.into(), def);
        self
    }

    /// Instantiate the template into a concrete workflow definition.
    ///
    /// `now` feeds the default workflow name (`{template}-{YYYYMMDD-HHMMSS}`)
    /// when no override is given; instantiation is otherwise deterministic
    /// in its inputs.
    pub fn instantiate(
        &self,
        values: &Map<String, Value>,
        workflow_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowDefinition> {
        if !self.is_active {
            return Err(EngineError::template(format!(
                "template '{}' is not active",
                self.name
            )));
        }

        let merged = self.merge_parameters(values)?;
        let context = Value::Object(merged);
        let rendered = interpolate::render_template(&self.template_data, &context)?;

        let mut definition: WorkflowDefinition = serde_json::from_value(rendered)
            .map_err(|e| EngineError::template(format!("instantiated body is not a workflow definition: {e}")))?;

        definition.name = workflow_name
            .unwrap_or_else(|| format!("{}-{}", self.name, now.format("%Y%m%d-%H%M%S")));

        Ok(definition)
    }

    /// Validate provided values against the definitions and merge defaults
    fn merge_parameters(&self, values: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut merged = Map::with_capacity(self.parameters.len());

        for (name, def) in &self.parameters {
            let value = values.get(name).cloned().or_else(|| def.default.clone());

            let Some(value) = value else {
                if def.required {
                    return Err(EngineError::template(format!(
                        "required parameter missing: {name}"
                    )));
                }
                continue;
            };

            validate_parameter(name, &value, def)?;
            merged.insert(name.clone(), value);
        }

        Ok(merged)
    }
}

fn validate_parameter(name: &str, value: &Value, def: &ParameterDefinition) -> Result<()> {
    if !def.kind.matches(value) {
        return Err(EngineError::template(format!(
            "parameter '{name}' must be of type {}",
            def.kind.as_str()
        )));
    }

    let Some(validation) = &def.validation else {
        return Ok(());
    };

    if let Some(number) = value.as_f64() {
        if let Some(min) = validation.min {
            if number < min {
                return Err(EngineError::template(format!(
                    "parameter '{name}' must be >= {min}"
                )));
            }
        }
        if let Some(max) = validation.max {
            if number > max {
                return Err(EngineError::template(format!(
                    "parameter '{name}' must be <= {max}"
                )));
            }
        }
    }

    if let Some(allowed) = &validation.allowed {
        if !allowed.contains(value) {
            return Err(EngineError::template(format!(
                "parameter '{name}' must be one of {}",
                serde_json::to_string(allowed).unwrap_or_default()
            )));
        }
    }

    Ok(())
}
