//! Callable functions and their definitions.
//!
//! Both template-backed and native functions implement [`Invocable`]. A function
//! is invoked with an [`InvocationContext`] that carries the registry it belongs to,
//! the shared variable environment of the current render tree and a cancellation token.

use crate::{
    error::{Error, Result},
    kernel::FunctionRegistry,
    template::Variables,
};
use serde_json::Value;
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;

mod definition;
mod descriptor;
mod native;
mod template;

pub use definition::{
    ExecutionSettings, FunctionDefinition, ParameterSpec, ParameterType, TemplateFormat,
};
pub use native::{NativeCall, NativeFunction};
pub use template::TemplateFunction;

/// An executable unit that can be registered in a [`FunctionRegistry`].
#[async_trait::async_trait]
pub trait Invocable: Send + Sync {
    /// Returns the immutable definition.
    fn definition(&self) -> &FunctionDefinition;

    /// Invokes the function. The parameters have already been bound
    /// into the variable environment of the context.
    async fn invoke(&self, context: InvocationContext) -> Result<FunctionResult>;
}

/// Everything an invocation needs from its caller.
#[derive(Clone)]
pub struct InvocationContext {
    registry: Arc<dyn FunctionRegistry>,
    variables: Variables,
    cancellation: CancellationToken,
}

impl InvocationContext {
    /// Creates a new context.
    pub fn new(
        registry: Arc<dyn FunctionRegistry>,
        variables: Variables,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            registry,
            variables,
            cancellation,
        }
    }

    /// Returns the registry, which is also the value of `kernel`-typed parameters.
    #[inline]
    pub fn registry(&self) -> &Arc<dyn FunctionRegistry> {
        &self.registry
    }

    /// Returns the shared variable environment.
    #[inline]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Returns the cancellation token.
    #[inline]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fails with [`Error::Cancelled`] once cancellation was requested.
    #[inline]
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("variables", &self.variables)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// The value produced by a function invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    group: String,
    name: String,
    value: Value,
    model_id: Option<String>,
}

impl FunctionResult {
    /// Creates a result for the function.
    pub fn new(definition: &FunctionDefinition, value: impl Into<Value>) -> Self {
        Self {
            group: definition.group().to_owned(),
            name: definition.name().to_owned(),
            value: value.into(),
            model_id: None,
        }
    }

    /// Records the model id of the backend service that produced the value.
    #[inline]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Returns the group of the function.
    #[inline]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the name of the function.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the result and returns the value.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns the model id of the backend service, if any.
    #[inline]
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }
}

/// Strings are written as is, `null` as nothing and everything else as JSON.
impl fmt::Display for FunctionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(s) => f.write_str(s),
            Value::Null => Ok(()),
            value => write!(f, "{value}"),
        }
    }
}
