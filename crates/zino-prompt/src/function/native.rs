use super::{FunctionDefinition, FunctionResult, Invocable, InvocationContext, ParameterSpec};
use crate::{
    error::{Error, Result},
    kernel::FunctionRegistry,
    template::Variables,
};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::{fmt, future::Future, sync::Arc};

type SyncHandler = dyn Fn(&NativeCall) -> Result<Value> + Send + Sync;
type AsyncHandler = dyn Fn(NativeCall) -> BoxFuture<'static, Result<Value>> + Send + Sync;

#[derive(Clone)]
enum Handler {
    Sync(Arc<SyncHandler>),
    Async(Arc<AsyncHandler>),
}

/// A function implemented in Rust.
///
/// # Examples
///
/// ```rust,ignore
/// use zino_prompt::{NativeFunction, ParameterSpec, ParameterType};
///
/// let add = NativeFunction::new("Math", "Add", |call| {
///     let a = call.parse_argument::<f64>("a")?;
///     let b = call.parse_argument::<f64>("b")?;
///     Ok((a + b).into())
/// })
/// .with_description("Adds two numbers")
/// .with_parameter(ParameterSpec::new("a", ParameterType::Number).required())
/// .with_parameter(ParameterSpec::new("b", ParameterType::Number).with_default(0));
/// ```
#[derive(Clone)]
pub struct NativeFunction {
    definition: FunctionDefinition,
    handler: Handler,
}

impl NativeFunction {
    /// Creates a function backed by a synchronous closure.
    pub fn new<F>(group: impl Into<String>, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&NativeCall) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            definition: FunctionDefinition::new(group, name),
            handler: Handler::Sync(Arc::new(function)),
        }
    }

    /// Creates a function backed by an asynchronous closure.
    pub fn new_async<F, Fut>(group: impl Into<String>, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(NativeCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler = move |call: NativeCall| -> BoxFuture<'static, Result<Value>> {
            Box::pin(function(call))
        };
        Self {
            definition: FunctionDefinition::new(group, name),
            handler: Handler::Async(Arc::new(handler)),
        }
    }

    /// Sets the description.
    #[inline]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.definition = self.definition.with_description(description);
        self
    }

    /// Appends a parameter.
    #[inline]
    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.definition = self.definition.with_parameter(parameter);
        self
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Invocable for NativeFunction {
    #[inline]
    fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    async fn invoke(&self, context: InvocationContext) -> Result<FunctionResult> {
        let definition = &self.definition;
        let call = NativeCall::new(definition, context);
        let value = match &self.handler {
            Handler::Sync(function) => function(&call),
            Handler::Async(function) => function(call).await,
        }
        .map_err(|err| err.in_function(definition.group(), definition.name()))?;
        tracing::debug!(
            group = definition.group(),
            name = definition.name(),
            "native function completed"
        );
        Ok(FunctionResult::new(definition, value))
    }
}

/// Arguments and collaborators handed to a native function.
#[derive(Debug, Clone)]
pub struct NativeCall {
    arguments: Map<String, Value>,
    context: InvocationContext,
}

impl NativeCall {
    fn new(definition: &FunctionDefinition, context: InvocationContext) -> Self {
        let variables = context.variables();
        let arguments = definition
            .parameters()
            .iter()
            .filter(|parameter| !parameter.is_injected())
            .filter_map(|parameter| {
                let name = parameter.name();
                variables.get(name).map(|value| (name.to_owned(), value))
            })
            .collect();
        Self { arguments, context }
    }

    /// Returns the bound values of the declared parameters.
    #[inline]
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Returns the bound value of a declared parameter.
    #[inline]
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// Deserializes the bound value of a declared parameter.
    pub fn parse_argument<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .arguments
            .get(name)
            .ok_or_else(|| Error::native(format!("argument `{name}` is not bound")))?;
        serde_json::from_value(value.clone())
            .map_err(|err| Error::native(format!("invalid argument `{name}`: {err}")))
    }

    /// Returns the injected registry.
    #[inline]
    pub fn registry(&self) -> &Arc<dyn FunctionRegistry> {
        self.context.registry()
    }

    /// Returns the shared variable environment.
    #[inline]
    pub fn variables(&self) -> &Variables {
        self.context.variables()
    }

    /// Returns the context of the invocation, for calling other functions.
    #[inline]
    pub fn context(&self) -> &InvocationContext {
        &self.context
    }
}
