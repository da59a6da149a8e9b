#![doc = include_str!("../README.md")]
#![doc(html_favicon_url = "https://zino.cc/assets/zino-logo.png")]
#![doc(html_logo_url = "https://zino.cc/assets/zino-logo.svg")]

pub mod config;
pub mod error;
pub mod function;
pub mod kernel;
pub mod service;
pub mod template;
pub mod transcript;

pub use config::KernelConfig;
pub use error::{Error, Result};
pub use function::{
    ExecutionSettings, FunctionDefinition, FunctionResult, Invocable, InvocationContext,
    NativeCall, NativeFunction, ParameterSpec, ParameterType, TemplateFormat, TemplateFunction,
};
pub use kernel::{FunctionRegistry, Kernel, KernelBuilder};
pub use service::{BackendService, OpenAiChatService};
pub use template::{TemplateRenderer, Variables};
pub use transcript::{ChatTurn, Role, extract_turns, render_transcript};
