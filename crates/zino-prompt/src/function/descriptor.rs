//! YAML function descriptors.
//!
//! ```yaml
//! name: Greet
//! description: Greets someone by name.
//! template: |
//!   {{#message role="user"}}Hello {{get "name"}}{{/message}}
//! template_format: handlebars
//! input_variables:
//!   - name: name
//!     type: string
//!     required: true
//! execution_settings:
//!   - model_id_pattern: ^gpt-4
//!   - model_id: gpt-3.5-turbo
//!     temperature: 0.7
//! ```

use super::definition::{
    ExecutionSettings, FunctionDefinition, ParameterSpec, ParameterType, TemplateFormat,
};
use crate::error::Error;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Top-level fields of a descriptor document. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct FunctionDescriptor {
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    template: Option<String>,
    #[serde(default)]
    template_format: Option<String>,
    #[serde(default)]
    input_variables: Option<Vec<InputVariable>>,
    #[serde(default)]
    execution_settings: Option<Vec<ExecutionSettingsDescriptor>>,
}

#[derive(Debug, Deserialize)]
struct InputVariable {
    name: String,
    #[serde(default, rename = "type")]
    type_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "default_value")]
    default: Option<Value>,
    #[serde(default, alias = "is_required")]
    required: bool,
}

#[derive(Debug, Deserialize)]
struct ExecutionSettingsDescriptor {
    #[serde(default)]
    model_id: Option<String>,
    #[serde(default)]
    model_id_pattern: Option<String>,
    #[serde(flatten)]
    parameters: Map<String, Value>,
}

/// Parses a descriptor document into a function definition of the group.
pub(super) fn parse(group: String, content: &str) -> Result<FunctionDefinition, Error> {
    let descriptor = serde_yaml::from_str::<FunctionDescriptor>(content)?;
    let name = descriptor
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| Error::MalformedDescriptor("missing field `name`".to_owned()))?;
    let template = descriptor.template.ok_or_else(|| {
        Error::MalformedDescriptor(format!("missing field `template` in function `{name}`"))
    })?;
    let template_format = descriptor
        .template_format
        .as_deref()
        .unwrap_or_default()
        .parse::<TemplateFormat>()
        .unwrap_or_default();

    let mut definition = FunctionDefinition::new(group, name)
        .with_description(descriptor.description.unwrap_or_default())
        .with_template(template, template_format);
    for variable in descriptor.input_variables.unwrap_or_default() {
        if variable.name.trim().is_empty() {
            return Err(Error::MalformedDescriptor(format!(
                "input variable without a name in function `{}`",
                definition.name()
            )));
        }
        if definition.parameter(&variable.name).is_some() {
            return Err(Error::MalformedDescriptor(format!(
                "input variable `{}` is declared twice in function `{}`",
                variable.name,
                definition.name()
            )));
        }

        let parameter_type = ParameterType::from_descriptor(variable.type_name.as_deref());
        let mut parameter = ParameterSpec::new(variable.name, parameter_type);
        if let Some(description) = variable.description {
            parameter = parameter.with_description(description);
        }
        if let Some(value) = variable.default {
            parameter = parameter.with_default(value);
        }
        if variable.required {
            parameter = parameter.required();
        }
        definition = definition.with_parameter(parameter);
    }
    for settings in descriptor.execution_settings.unwrap_or_default() {
        let model_id_pattern = settings
            .model_id_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| {
                Error::MalformedDescriptor(format!("invalid `model_id_pattern`: {err}"))
            })?;
        let rule =
            ExecutionSettings::from_parts(settings.model_id, model_id_pattern, settings.parameters);
        definition = definition.with_execution_settings(rule);
    }
    Ok(definition)
}
