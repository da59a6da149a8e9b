//! The host orchestrator owning functions and backend services.

use crate::{
    config::{FunctionRef, KernelConfig},
    error::{Error, Result},
    function::{FunctionResult, Invocable, InvocationContext, TemplateFunction},
    service::BackendService,
    template::{TemplateRenderer, Variables, bind_arguments},
};
use std::{collections::HashMap, fmt, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Functions and backend services visible to templates.
pub trait FunctionRegistry: Send + Sync {
    /// Returns all functions in registration order.
    fn functions(&self) -> Vec<Arc<dyn Invocable>>;

    /// Looks up a function by group and name.
    fn function(&self, group: &str, name: &str) -> Option<Arc<dyn Invocable>>;

    /// Returns all backend services in registration order.
    fn services(&self) -> Vec<Arc<dyn BackendService>>;

    /// Returns the service used when no execution settings match.
    fn default_service(&self) -> Option<Arc<dyn BackendService>>;
}

/// A function registry with an entry point.
///
/// Functions and services are fixed once the kernel is built.
pub struct Kernel {
    functions: Vec<Arc<dyn Invocable>>,
    index: HashMap<(String, String), usize>,
    services: Vec<Arc<dyn BackendService>>,
    default_service: Option<Arc<dyn BackendService>>,
    entry_point: Option<FunctionRef>,
}

impl Kernel {
    /// Returns a builder.
    #[inline]
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    /// Invokes a registered function with a fresh cancellation token.
    pub async fn invoke(
        self: &Arc<Self>,
        group: &str,
        name: &str,
        variables: Variables,
    ) -> Result<FunctionResult> {
        self.invoke_with_cancellation(group, name, variables, CancellationToken::new())
            .await
    }

    /// Invokes a registered function. The token is checked before each nested dispatch.
    pub async fn invoke_with_cancellation(
        self: &Arc<Self>,
        group: &str,
        name: &str,
        variables: Variables,
        cancellation: CancellationToken,
    ) -> Result<FunctionResult> {
        let function = self.function(group, name).ok_or_else(|| Error::FunctionNotFound {
            group: group.to_owned(),
            name: name.to_owned(),
        })?;
        self.run_with_cancellation(&function, variables, cancellation)
            .await
    }

    /// Runs any function against this kernel, registered or not.
    pub async fn run(
        self: &Arc<Self>,
        function: &Arc<dyn Invocable>,
        variables: Variables,
    ) -> Result<FunctionResult> {
        self.run_with_cancellation(function, variables, CancellationToken::new())
            .await
    }

    /// Runs any function against this kernel with the cancellation token.
    pub async fn run_with_cancellation(
        self: &Arc<Self>,
        function: &Arc<dyn Invocable>,
        variables: Variables,
        cancellation: CancellationToken,
    ) -> Result<FunctionResult> {
        let definition = function.definition();
        bind_arguments(definition, None, &variables)?;
        let registry: Arc<dyn FunctionRegistry> = self.clone();
        let context = InvocationContext::new(registry, variables, cancellation);
        context.check_cancelled()?;
        tracing::info!(
            group = definition.group(),
            name = definition.name(),
            "invoking function"
        );
        function.invoke(context).await
    }

    /// Invokes the entry point.
    pub async fn run_entry_point(self: &Arc<Self>, variables: Variables) -> Result<FunctionResult> {
        self.run_entry_point_with_cancellation(variables, CancellationToken::new())
            .await
    }

    /// Invokes the entry point with the cancellation token.
    pub async fn run_entry_point_with_cancellation(
        self: &Arc<Self>,
        variables: Variables,
        cancellation: CancellationToken,
    ) -> Result<FunctionResult> {
        let entry_point = self
            .entry_point
            .as_ref()
            .ok_or_else(|| Error::Config("the entry point is not set".to_owned()))?;
        let FunctionRef { group, name } = entry_point;
        self.invoke_with_cancellation(group, name, variables, cancellation)
            .await
    }

    /// Renders a template with the functions of this kernel as helpers.
    pub async fn render(self: &Arc<Self>, source: &str, variables: &Variables) -> Result<String> {
        TemplateRenderer::new(self.clone())
            .render_async(source, variables)
            .await
    }

    /// Returns the entry point.
    #[inline]
    pub fn entry_point(&self) -> Option<&FunctionRef> {
        self.entry_point.as_ref()
    }
}

impl FunctionRegistry for Kernel {
    fn functions(&self) -> Vec<Arc<dyn Invocable>> {
        self.functions.clone()
    }

    fn function(&self, group: &str, name: &str) -> Option<Arc<dyn Invocable>> {
        let key = (group.to_owned(), name.to_owned());
        self.index
            .get(&key)
            .and_then(|&index| self.functions.get(index))
            .cloned()
    }

    fn services(&self) -> Vec<Arc<dyn BackendService>> {
        self.services.clone()
    }

    fn default_service(&self) -> Option<Arc<dyn BackendService>> {
        self.default_service.clone()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let functions = self
            .functions
            .iter()
            .map(|function| {
                let definition = function.definition();
                format!("{}.{}", definition.group(), definition.name())
            })
            .collect::<Vec<_>>();
        let services = self
            .services
            .iter()
            .map(|service| service.model_id())
            .collect::<Vec<_>>();
        f.debug_struct("Kernel")
            .field("functions", &functions)
            .field("services", &services)
            .field(
                "default_service",
                &self.default_service.as_ref().map(|s| s.model_id()),
            )
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

/// A builder for [`Kernel`].
#[derive(Default)]
pub struct KernelBuilder {
    functions: Vec<Arc<dyn Invocable>>,
    services: Vec<Arc<dyn BackendService>>,
    default_service: Option<String>,
    entry_point: Option<FunctionRef>,
}

impl KernelBuilder {
    /// Registers a function.
    #[inline]
    pub fn function(self, function: impl Invocable + 'static) -> Self {
        self.shared_function(Arc::new(function))
    }

    /// Registers a shared function.
    #[inline]
    pub fn shared_function(mut self, function: Arc<dyn Invocable>) -> Self {
        self.functions.push(function);
        self
    }

    /// Registers a backend service.
    #[inline]
    pub fn service(self, service: impl BackendService + 'static) -> Self {
        self.shared_service(Arc::new(service))
    }

    /// Registers a shared backend service.
    #[inline]
    pub fn shared_service(mut self, service: Arc<dyn BackendService>) -> Self {
        self.services.push(service);
        self
    }

    /// Sets the model id of the default service. Defaults to the first registered service.
    #[inline]
    pub fn default_service(mut self, model_id: impl Into<String>) -> Self {
        self.default_service = Some(model_id.into());
        self
    }

    /// Sets the entry point.
    #[inline]
    pub fn entry_point(mut self, group: impl Into<String>, name: impl Into<String>) -> Self {
        self.entry_point = Some(FunctionRef {
            group: group.into(),
            name: name.into(),
        });
        self
    }

    /// Registers the services and descriptor files of the configuration.
    pub fn with_config(mut self, config: &KernelConfig) -> Result<Self> {
        for service in &config.services {
            self = self.shared_service(service.build()?);
        }
        for function in &config.functions {
            let path = config.resolve_path(&function.path);
            let function = TemplateFunction::from_yaml_file(&function.group, &path)?;
            self = self.function(function);
        }
        if let Some(model_id) = &config.default_service {
            self = self.default_service(model_id);
        }
        if let Some(entry_point) = &config.entry_point {
            self.entry_point = Some(entry_point.clone());
        }
        Ok(self)
    }

    /// Builds the kernel, rejecting duplicate functions and dangling references.
    pub fn build(self) -> Result<Arc<Kernel>> {
        let mut index = HashMap::with_capacity(self.functions.len());
        for (position, function) in self.functions.iter().enumerate() {
            let definition = function.definition();
            let key = (definition.group().to_owned(), definition.name().to_owned());
            if index.insert(key, position).is_some() {
                return Err(Error::DuplicateFunction {
                    group: definition.group().to_owned(),
                    name: definition.name().to_owned(),
                });
            }
        }
        if let Some(entry_point) = &self.entry_point {
            let key = (entry_point.group.clone(), entry_point.name.clone());
            if !index.contains_key(&key) {
                return Err(Error::FunctionNotFound {
                    group: entry_point.group.clone(),
                    name: entry_point.name.clone(),
                });
            }
        }

        let default_service = match &self.default_service {
            Some(model_id) => {
                let service = self
                    .services
                    .iter()
                    .find(|service| service.model_id() == model_id)
                    .ok_or_else(|| {
                        Error::Config(format!("default service `{model_id}` is not registered"))
                    })?;
                Some(service.clone())
            }
            None => self.services.first().cloned(),
        };
        let kernel = Kernel {
            functions: self.functions,
            index,
            services: self.services,
            default_service,
            entry_point: self.entry_point,
        };
        tracing::debug!(kernel = ?kernel, "kernel built");
        Ok(Arc::new(kernel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        function::{NativeCall, NativeFunction, ParameterSpec, ParameterType},
        service::mock::MockService,
        transcript::{ChatTurn, extract_turns},
    };
    use serde_json::{Value, json};

    const GREET: &str = r#"
name: Greet
template: '{{message role="user"}}Hello {{get "name"}}{{/message}}'
input_variables:
  - name: name
    type: string
    required: true
"#;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn greet() -> TemplateFunction {
        TemplateFunction::from_yaml("Chat", GREET).unwrap()
    }

    #[tokio::test]
    async fn test_greet_renders_and_extracts() {
        init_tracing();
        let kernel = Kernel::builder().function(greet()).build().unwrap();
        let function = kernel.function("Chat", "Greet").unwrap();
        let template = function.definition().template().unwrap();
        let rendered = kernel
            .render(template, &Variables::new().with("name", "Ada"))
            .await
            .unwrap();
        assert_eq!(rendered, "<user~>Hello Ada</user~>");
        assert_eq!(extract_turns(&rendered), vec![ChatTurn::user("Hello Ada")]);
    }

    #[tokio::test]
    async fn test_set_then_get_in_async_render() {
        let kernel = Kernel::builder().build().unwrap();
        let output = kernel
            .render(r#"{{set "x" 5}}{{get "x"}}"#, &Variables::new())
            .await
            .unwrap();
        assert_eq!(output, "5");
    }

    #[tokio::test]
    async fn test_missing_required_parameter() {
        let kernel = Kernel::builder()
            .function(greet())
            .service(MockService::new("gpt-4", ""))
            .build()
            .unwrap();
        let err = kernel
            .invoke("Chat", "Greet", Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingRequiredParameter { ref parameter, ref function }
                if parameter == "name" && function == "Greet"
        ));
    }

    #[tokio::test]
    async fn test_function_helper_binds_into_shared_environment() {
        let service = MockService::echo("gpt-4");
        let kernel = Kernel::builder()
            .function(greet())
            .service(service.clone())
            .build()
            .unwrap();
        let variables = Variables::new();
        let output = kernel
            .render(
                r#"[{{Chat_Greet name="Ada"}}][{{get "name"}}][{{name}}]"#,
                &variables,
            )
            .await
            .unwrap();
        assert_eq!(output, "[Hello Ada][Ada][Ada]");
        assert_eq!(variables.get("name"), Some(json!("Ada")));
        assert_eq!(service.requests().len(), 1);

        let output = kernel
            .render(r#"{{Chat_Greet name="Grace"}} then {{name}}"#, &variables)
            .await
            .unwrap();
        assert!(output.ends_with("then Grace"));
    }

    #[tokio::test]
    async fn test_positional_argument_map() {
        let kernel = Kernel::builder()
            .function(greet())
            .service(MockService::echo("gpt-4"))
            .build()
            .unwrap();
        let variables = Variables::new().with("person", json!({"name": "Grace"}));
        let output = kernel.render("{{Chat_Greet person}}", &variables).await.unwrap();
        assert_eq!(output, "Hello Grace");

        let err = kernel
            .render(r#"{{Chat_Greet "Grace"}}"#, &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHelperArguments { ref helper, .. }
            if helper == "Chat_Greet"));
    }

    #[tokio::test]
    async fn test_missing_parameter_in_helper_aborts_render() {
        let service = MockService::echo("gpt-4");
        let kernel = Kernel::builder()
            .function(greet())
            .service(service.clone())
            .build()
            .unwrap();
        let err = kernel
            .render(r#"before {{Chat_Greet title="Dr."}} after"#, &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingRequiredParameter { .. }));
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn test_bound_variable_does_not_stand_in_for_call_site_argument() {
        let service = MockService::echo("gpt-4");
        let kernel = Kernel::builder()
            .function(greet())
            .service(service.clone())
            .build()
            .unwrap();
        let variables = Variables::new().with("name", "Bob");
        let err = kernel
            .render(r#"{{Chat_Greet title="Dr."}}"#, &variables)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingRequiredParameter { ref parameter, ref function }
                if parameter == "name" && function == "Greet"
        ));
        assert!(service.requests().is_empty());

        let result = kernel.invoke("Chat", "Greet", variables).await.unwrap();
        assert_eq!(result.to_string(), "Hello Bob");
    }

    #[tokio::test]
    async fn test_unknown_function_helper() {
        let kernel = Kernel::builder().function(greet()).build().unwrap();
        let err = kernel
            .render(r#"{{Chat_Farewell name="Ada"}}"#, &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHelper(ref name) if name == "Chat_Farewell"));

        let err = kernel
            .render("before {{Chat_Farewell}} after", &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHelper(ref name) if name == "Chat_Farewell"));

        let output = kernel
            .render("[{{first_name}}]", &Variables::new())
            .await
            .unwrap();
        assert_eq!(output, "[]");

        let err = kernel
            .invoke("Chat", "Farewell", Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_nested_template_functions() {
        let outer = r#"
name: Outer
template: '{{#message role="system"}}Use: {{Chat_Greet name=who}}{{/message}}{{#message role="user"}}{{get "name"}}?{{/message}}'
input_variables:
  - name: who
    required: true
"#;
        let service = MockService::echo("gpt-4");
        let kernel = Kernel::builder()
            .function(greet())
            .function(TemplateFunction::from_yaml("Chat", outer).unwrap())
            .service(service.clone())
            .build()
            .unwrap();
        let result = kernel
            .invoke("Chat", "Outer", Variables::new().with("who", "Ada"))
            .await
            .unwrap();
        assert_eq!(result.value(), &json!("Ada?"));

        let requests = service.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].turns, vec![ChatTurn::user("Hello Ada")]);
        assert_eq!(
            requests[1].turns,
            vec![ChatTurn::system("Use: Hello Ada"), ChatTurn::user("Ada?")]
        );
    }

    #[tokio::test]
    async fn test_nested_failure_names_every_function() {
        let outer = "name: Outer\ntemplate: '{{Chat_Greet name=\"Ada\"}}'\n";
        let kernel = Kernel::builder()
            .function(greet())
            .function(TemplateFunction::from_yaml("Chat", outer).unwrap())
            .service(MockService::failing("gpt-4", "offline"))
            .build()
            .unwrap();
        let err = kernel
            .invoke("Chat", "Outer", Variables::new())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`Chat.Outer`"));
        assert!(message.contains("`Chat.Greet`"));
        assert!(matches!(
            err.root_cause(),
            Error::BackendInvocationFailure { .. }
        ));
    }

    #[tokio::test]
    async fn test_native_function_helpers() {
        let add = NativeFunction::new("Math", "Add", |call: &NativeCall| {
            let a = call.parse_argument::<i64>("a")?;
            let b = call.parse_argument::<i64>("b")?;
            Ok(json!(a + b))
        })
        .with_parameter(ParameterSpec::new("a", ParameterType::Number).required())
        .with_parameter(ParameterSpec::new("b", ParameterType::Number).with_default(10));
        let is_even = NativeFunction::new("Math", "IsEven", |call: &NativeCall| {
            let n = call.parse_argument::<i64>("n")?;
            Ok(Value::Bool(n % 2 == 0))
        })
        .with_parameter(ParameterSpec::new("n", ParameterType::Number).required());
        let kernel = Kernel::builder()
            .function(add)
            .function(is_even)
            .build()
            .unwrap();
        let output = kernel
            .render(
                "{{Math_Add a=1 b=2}} {{Math_Add a=5}} {{#if (Math_IsEven n=4)}}even{{/if}}",
                &Variables::new(),
            )
            .await
            .unwrap();
        // `b` stays bound after the first call
        assert_eq!(output, "3 7 even");

        let output = kernel
            .render("{{Math_Add a=5}}", &Variables::new())
            .await
            .unwrap();
        assert_eq!(output, "15");
    }

    #[tokio::test]
    async fn test_kernel_injection() {
        let list = NativeFunction::new("Kernel", "List", |call: &NativeCall| {
            let names = call
                .registry()
                .functions()
                .iter()
                .map(|function| function.definition().name().to_owned())
                .collect::<Vec<_>>();
            Ok(json!(names.join(",")))
        })
        .with_parameter(ParameterSpec::new("kernel", ParameterType::Kernel).required());
        let kernel = Kernel::builder()
            .function(list)
            .function(greet())
            .entry_point("Kernel", "List")
            .build()
            .unwrap();
        let result = kernel.run_entry_point(Variables::new()).await.unwrap();
        assert_eq!(result.to_string(), "List,Greet");
    }

    #[tokio::test]
    async fn test_cancellation_before_nested_dispatch() {
        let kernel = Kernel::builder()
            .function(greet())
            .service(MockService::echo("gpt-4"))
            .build()
            .unwrap();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let err = TemplateRenderer::new(kernel.clone())
            .with_cancellation(cancellation.clone())
            .render_async(r#"{{Chat_Greet name="Ada"}}"#, &Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let err = kernel
            .invoke_with_cancellation(
                "Chat",
                "Greet",
                Variables::new().with("name", "Ada"),
                cancellation,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_renders_are_independent() {
        let kernel = Kernel::builder()
            .function(greet())
            .service(MockService::echo("gpt-4"))
            .build()
            .unwrap();
        let tasks = ["Ada", "Grace", "Edsger", "Barbara"].map(|name| {
            let kernel = kernel.clone();
            tokio::spawn(async move {
                let variables = Variables::new().with("name", name);
                kernel.invoke("Chat", "Greet", variables).await
            })
        });
        for (task, name) in futures::future::join_all(tasks)
            .await
            .into_iter()
            .zip(["Ada", "Grace", "Edsger", "Barbara"])
        {
            let result = task.unwrap().unwrap();
            assert_eq!(result.to_string(), format!("Hello {name}"));
        }
    }

    #[test]
    fn test_build_validation() {
        let err = Kernel::builder()
            .function(greet())
            .function(greet())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateFunction { ref name, .. } if name == "Greet"));

        let err = Kernel::builder().entry_point("Chat", "Greet").build().unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound { .. }));

        let err = Kernel::builder()
            .service(MockService::new("gpt-4", ""))
            .default_service("llama")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_default_service_resolution() {
        let kernel = Kernel::builder()
            .service(MockService::new("gpt-4", ""))
            .service(MockService::new("llama", ""))
            .build()
            .unwrap();
        let default_service = kernel.default_service().unwrap();
        assert_eq!(default_service.model_id(), "gpt-4");

        let kernel = Kernel::builder()
            .service(MockService::new("gpt-4", ""))
            .service(MockService::new("llama", ""))
            .default_service("llama")
            .build()
            .unwrap();
        let default_service = kernel.default_service().unwrap();
        assert_eq!(default_service.model_id(), "llama");
    }

    #[tokio::test]
    async fn test_with_config_loads_descriptors() {
        let dir = std::env::temp_dir().join(format!("zino-prompt-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("functions")).unwrap();
        std::fs::write(dir.join("functions/greet.yaml"), GREET).unwrap();
        let config = KernelConfig::from_toml(
            r#"
default-service = "llama"

[[service]]
model-id = "gpt-4"

[[service]]
model-id = "llama"
base-url = "http://localhost:11434/v1"

[[function]]
group = "Chat"
path = "functions/greet.yaml"
"#,
        )
        .unwrap()
        .with_base_dir(&dir);
        let kernel = Kernel::builder().with_config(&config).unwrap().build().unwrap();
        assert!(kernel.function("Chat", "Greet").is_some());
        assert_eq!(kernel.services().len(), 2);
        assert_eq!(
            kernel.default_service().map(|s| s.model_id().to_owned()),
            Some("llama".to_owned())
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
