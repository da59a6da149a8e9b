use super::{
    ExecutionSettings, FunctionDefinition, FunctionResult, Invocable, InvocationContext,
    TemplateFormat,
};
use crate::{
    error::{Error, Result},
    service::select_service,
    template::TemplateRenderer,
    transcript::extract_turns,
};
use std::path::Path;
use tracing::Instrument;

/// A function rendering its template into a chat transcript and completing
/// it with the selected backend service.
#[derive(Debug, Clone)]
pub struct TemplateFunction {
    definition: FunctionDefinition,
}

impl TemplateFunction {
    /// Creates a new instance.
    #[inline]
    pub fn new(definition: FunctionDefinition) -> Self {
        Self { definition }
    }

    /// Parses a YAML descriptor document.
    #[inline]
    pub fn from_yaml(group: impl Into<String>, content: &str) -> Result<Self> {
        FunctionDefinition::from_yaml(group, content).map(Self::new)
    }

    /// Reads and parses a YAML descriptor file.
    #[inline]
    pub fn from_yaml_file(group: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        FunctionDefinition::from_yaml_file(group, path).map(Self::new)
    }

    async fn execute(&self, context: InvocationContext) -> Result<FunctionResult> {
        let definition = &self.definition;
        let template = match definition.template_format() {
            TemplateFormat::Handlebars => definition.template().ok_or_else(|| {
                let message = format!("function `{}` has no template", definition.name());
                Error::MalformedDescriptor(message)
            })?,
            TemplateFormat::Other(format) => {
                return Err(Error::UnsupportedTemplateFormat(format.clone()));
            }
        };

        let registry = context.registry();
        let services = registry.services();
        let default_service = registry.default_service();
        let selection =
            select_service(definition.execution_settings(), &services, default_service.as_ref())?;
        let service = selection.service;
        let model_id = service.model_id();

        tracing::debug!(state = "rendering", model_id);
        let renderer = TemplateRenderer::new(registry.clone())
            .with_cancellation(context.cancellation().clone());
        let rendered = renderer.render_async(template, context.variables()).await?;
        let turns = extract_turns(&format!("<request>{rendered}</request>"));

        context.check_cancelled()?;
        tracing::debug!(state = "dispatching", model_id, turns = turns.len());
        let default_settings = ExecutionSettings::default();
        let settings = selection.settings.unwrap_or(&default_settings);
        let reply = service
            .complete_chat(&turns, settings)
            .await
            .map_err(|source| Error::BackendInvocationFailure {
                model_id: model_id.to_owned(),
                source,
            })?;

        tracing::debug!(state = "completed", model_id);
        Ok(FunctionResult::new(definition, reply).with_model_id(model_id))
    }
}

#[async_trait::async_trait]
impl Invocable for TemplateFunction {
    #[inline]
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn invoke(&self, context: InvocationContext) -> Result<FunctionResult> {
        let group = self.definition.group();
        let name = self.definition.name();
        let span = tracing::debug_span!("template_function", group, name);
        async move {
            tracing::debug!(state = "created");
            self.execute(context).await.map_err(|err| {
                tracing::debug!(state = "failed", error = %err);
                err.in_function(group, name)
            })
        }
        .instrument(span)
        .await
    }
}
