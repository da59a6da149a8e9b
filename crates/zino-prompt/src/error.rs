//! Error types for prompt rendering and function invocation.

/// Boxed error returned by backend services.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while loading, rendering or invoking functions.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The function descriptor is missing required fields or cannot be parsed.
    #[error("malformed function descriptor: {0}")]
    MalformedDescriptor(String),
    /// A required parameter was not supplied at call time.
    #[error("parameter `{parameter}` is required for function `{function}`")]
    MissingRequiredParameter {
        /// Name of the parameter.
        parameter: String,
        /// Name of the function.
        function: String,
    },
    /// A `message` helper was invoked without a role.
    #[error("message must have a role")]
    MissingRole,
    /// Neither a selection rule nor a default service yielded a backend.
    #[error("no backend service is available")]
    NoBackendAvailable,
    /// The backend service failed to complete the chat.
    #[error("backend service `{model_id}` failed: {source}")]
    BackendInvocationFailure {
        /// Model id of the selected service.
        model_id: String,
        /// Underlying error.
        #[source]
        source: BoxError,
    },
    /// A helper with arguments was called but nothing is registered under its name.
    #[error("helper `{0}` is not registered")]
    UnknownHelper(String),
    /// The function is not registered in the kernel.
    #[error("function `{group}.{name}` is not registered")]
    FunctionNotFound {
        /// Group of the function.
        group: String,
        /// Name of the function.
        name: String,
    },
    /// Another function is already registered with the same group and name.
    #[error("function `{group}.{name}` is already registered")]
    DuplicateFunction {
        /// Group of the function.
        group: String,
        /// Name of the function.
        name: String,
    },
    /// A built-in helper received arguments it can not work with.
    #[error("invalid arguments for helper `{helper}`: {reason}")]
    InvalidHelperArguments {
        /// Name of the helper.
        helper: String,
        /// What was wrong.
        reason: String,
    },
    /// The template format is not supported by the renderer.
    #[error("unsupported template format `{0}`")]
    UnsupportedTemplateFormat(String),
    /// The template engine failed to parse or render the template.
    #[error("template error: {0}")]
    Template(String),
    /// The render was cancelled before a nested dispatch.
    #[error("invocation cancelled")]
    Cancelled,
    /// A native function reported a failure.
    #[error("native function failed: {0}")]
    NativeFunction(String),
    /// The kernel configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// IO operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A function invocation failed.
    #[error("function `{group}.{name}` failed: {source}")]
    Function {
        /// Group of the function.
        group: String,
        /// Name of the function.
        name: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a `NativeFunction` error from any displayable message.
    #[inline]
    pub fn native(message: impl std::fmt::Display) -> Self {
        Self::NativeFunction(message.to_string())
    }

    /// Wraps the error with the group and name of the failing function.
    pub(crate) fn in_function(self, group: &str, name: &str) -> Self {
        Self::Function {
            group: group.to_owned(),
            name: name.to_owned(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping all `Function` wrappers.
    pub fn root_cause(&self) -> &Error {
        let mut error = self;
        while let Error::Function { source, .. } = error {
            error = source.as_ref();
        }
        error
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::MalformedDescriptor(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
