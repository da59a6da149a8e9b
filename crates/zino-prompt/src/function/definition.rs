//! Immutable descriptions of callable functions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::{fmt, path::Path, str::FromStr};

/// Semantic type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// Text.
    String,
    /// Integer or floating point number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// Any JSON value.
    #[default]
    Object,
    /// A JSON array.
    Array,
    /// The live kernel, injected at invocation time. Only native functions declare it.
    Kernel,
}

impl ParameterType {
    /// Parses a descriptor type name, falling back to [`ParameterType::Object`]
    /// for anything unrecognized.
    pub fn from_descriptor(type_name: Option<&str>) -> Self {
        match type_name.map(str::trim) {
            Some("string") => ParameterType::String,
            Some("number") => ParameterType::Number,
            Some("boolean") => ParameterType::Boolean,
            Some("array") => ParameterType::Array,
            _ => ParameterType::Object,
        }
    }

    /// Returns the type name.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
            ParameterType::Kernel => "kernel",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of a single function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    name: String,
    parameter_type: ParameterType,
    description: Option<String>,
    default_value: Option<Value>,
    required: bool,
}

impl ParameterSpec {
    /// Creates an optional parameter.
    pub fn new(name: impl Into<String>, parameter_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            parameter_type,
            description: None,
            default_value: None,
            required: false,
        }
    }

    /// Marks the parameter as required.
    #[inline]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the description.
    #[inline]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the default value.
    #[inline]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Returns the name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the semantic type.
    #[inline]
    pub fn parameter_type(&self) -> ParameterType {
        self.parameter_type
    }

    /// Returns the description.
    #[inline]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the default value.
    #[inline]
    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Returns `true` if the parameter must be supplied.
    #[inline]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns `true` if the parameter is injected with the live kernel.
    #[inline]
    pub fn is_injected(&self) -> bool {
        self.parameter_type == ParameterType::Kernel
    }
}

/// A backend selection rule with the request parameters forwarded to the selected service.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSettings {
    model_id: Option<String>,
    model_id_pattern: Option<Regex>,
    parameters: Map<String, Value>,
}

impl ExecutionSettings {
    /// Creates a rule matching the exact model id.
    pub fn for_model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Self::default()
        }
    }

    /// Creates a rule matching model ids with the regular expression.
    pub fn for_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            model_id_pattern: Some(Regex::new(pattern)?),
            ..Self::default()
        })
    }

    pub(crate) fn from_parts(
        model_id: Option<String>,
        model_id_pattern: Option<Regex>,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            model_id,
            model_id_pattern,
            parameters,
        }
    }

    /// Sets the request parameters.
    #[inline]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Adds a request parameter.
    #[inline]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns the exact model id.
    #[inline]
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    /// Returns the model id pattern.
    #[inline]
    pub fn model_id_pattern(&self) -> Option<&Regex> {
        self.model_id_pattern.as_ref()
    }

    /// Returns the request parameters.
    #[inline]
    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// Returns `true` if the rule accepts a service with the model id.
    pub fn matches(&self, model_id: &str) -> bool {
        self.model_id.as_deref() == Some(model_id)
            || self
                .model_id_pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(model_id))
    }
}

/// Template syntax of a function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemplateFormat {
    /// Handlebars.
    #[default]
    Handlebars,
    /// Any other format, kept so that invocation can report it.
    Other(String),
}

impl TemplateFormat {
    /// Returns the format name.
    pub fn as_str(&self) -> &str {
        match self {
            TemplateFormat::Handlebars => "handlebars",
            TemplateFormat::Other(format) => format,
        }
    }
}

impl FromStr for TemplateFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = s.trim();
        if format.is_empty()
            || format.eq_ignore_ascii_case("handlebars")
            || format.eq_ignore_ascii_case("hbs")
        {
            Ok(TemplateFormat::Handlebars)
        } else {
            Ok(TemplateFormat::Other(format.to_owned()))
        }
    }
}

/// The immutable description of a callable function.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    group: String,
    name: String,
    description: String,
    template: Option<String>,
    template_format: TemplateFormat,
    parameters: Vec<ParameterSpec>,
    execution_settings: Vec<ExecutionSettings>,
}

impl FunctionDefinition {
    /// Creates a definition for a function in the group.
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            description: String::new(),
            template: None,
            template_format: TemplateFormat::default(),
            parameters: Vec::new(),
            execution_settings: Vec::new(),
        }
    }

    /// Parses a YAML descriptor document.
    #[inline]
    pub fn from_yaml(group: impl Into<String>, content: &str) -> crate::Result<Self> {
        super::descriptor::parse(group.into(), content)
    }

    /// Reads and parses a YAML descriptor file.
    pub fn from_yaml_file(group: impl Into<String>, path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(group, &content)
    }

    /// Sets the description.
    #[inline]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the template source and its format.
    #[inline]
    pub fn with_template(mut self, template: impl Into<String>, format: TemplateFormat) -> Self {
        self.template = Some(template.into());
        self.template_format = format;
        self
    }

    /// Appends a parameter.
    #[inline]
    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Appends a backend selection rule.
    #[inline]
    pub fn with_execution_settings(mut self, settings: ExecutionSettings) -> Self {
        self.execution_settings.push(settings);
        self
    }

    /// Returns the group.
    #[inline]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the template source.
    #[inline]
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Returns the template format.
    #[inline]
    pub fn template_format(&self) -> &TemplateFormat {
        &self.template_format
    }

    /// Returns the parameters in declaration order.
    #[inline]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Looks up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Returns the backend selection rules in declaration order.
    #[inline]
    pub fn execution_settings(&self) -> &[ExecutionSettings] {
        &self.execution_settings
    }

    /// Describes the function and its parameters as a JSON schema document.
    /// Injected parameters are omitted since callers never supply them.
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for parameter in self.parameters.iter().filter(|p| !p.is_injected()) {
            let mut property = Map::new();
            property.insert("type".to_owned(), parameter.parameter_type.as_str().into());
            if let Some(description) = &parameter.description {
                property.insert("description".to_owned(), description.as_str().into());
            }
            if let Some(value) = &parameter.default_value {
                property.insert("default".to_owned(), value.clone());
            }
            properties.insert(parameter.name.clone(), Value::Object(property));
            if parameter.required {
                required.push(parameter.name.as_str());
            }
        }
        json!({
            "name": self.name,
            "group": self.group,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_types_default_to_object() {
        assert_eq!(ParameterType::from_descriptor(Some("string")), ParameterType::String);
        assert_eq!(ParameterType::from_descriptor(Some("number")), ParameterType::Number);
        assert_eq!(ParameterType::from_descriptor(Some("boolean")), ParameterType::Boolean);
        assert_eq!(ParameterType::from_descriptor(Some("array")), ParameterType::Array);
        assert_eq!(ParameterType::from_descriptor(Some("datetime")), ParameterType::Object);
        assert_eq!(ParameterType::from_descriptor(Some("kernel")), ParameterType::Object);
        assert_eq!(ParameterType::from_descriptor(None), ParameterType::Object);
    }

    #[test]
    fn test_execution_settings_matching() {
        let exact = ExecutionSettings::for_model("gpt-3.5-turbo");
        assert!(exact.matches("gpt-3.5-turbo"));
        assert!(!exact.matches("gpt-3.5-turbo-16k"));

        let pattern = ExecutionSettings::for_pattern("gpt-4").unwrap();
        assert!(pattern.matches("azure-gpt-4-32k"));
        assert!(!pattern.matches("gpt-3.5-turbo"));
    }

    #[test]
    fn test_template_format_parsing() {
        assert_eq!("Handlebars".parse(), Ok(TemplateFormat::Handlebars));
        assert_eq!("".parse(), Ok(TemplateFormat::Handlebars));
        assert_eq!(
            "jinja2".parse(),
            Ok(TemplateFormat::Other("jinja2".to_owned()))
        );
    }

    #[test]
    fn test_describe_lists_required_parameters() {
        let definition = FunctionDefinition::new("Math", "Add")
            .with_description("Adds two numbers")
            .with_parameter(ParameterSpec::new("a", ParameterType::Number).required())
            .with_parameter(
                ParameterSpec::new("b", ParameterType::Number)
                    .with_description("second operand")
                    .with_default(1),
            )
            .with_parameter(ParameterSpec::new("kernel", ParameterType::Kernel));
        let view = definition.describe();
        assert_eq!(view["name"], "Add");
        assert_eq!(view["group"], "Math");
        assert_eq!(view["parameters"]["required"], json!(["a"]));
        assert_eq!(view["parameters"]["properties"]["b"]["default"], 1);
        assert!(view["parameters"]["properties"].get("kernel").is_none());
    }
}
