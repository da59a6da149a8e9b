//! Handlebars rendering with function helpers.
//!
//! A [`TemplateRenderer`] compiles a template once per call against a fresh
//! [`Handlebars`] registry holding the built-in helpers and one helper per function
//! of the [`FunctionRegistry`], named by [`helper_name`]. Every helper of a render
//! shares the same [`Variables`].
//!
//! Rendering itself is synchronous. A function helper blocks the render step
//! until the asynchronous function completes, so a render tree runs as one
//! sequential unit of work. [`TemplateRenderer::render_async`] moves the render
//! onto the blocking thread pool of the current Tokio runtime.

use crate::{error::Error, error::Result, kernel::FunctionRegistry};
use handlebars::{Handlebars, RenderError, RenderErrorReason};
use regex::Regex;
use serde_json::Value;
use std::{borrow::Cow, sync::Arc, sync::LazyLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

mod bridge;
mod helpers;
mod variables;

pub(crate) use bridge::bind_arguments;
pub use variables::Variables;

use bridge::FunctionHelper;
use helpers::{FailureSlot, RenderScope};

/// Returns the helper name of a function.
#[inline]
pub fn helper_name(group: &str, name: &str) -> String {
    format!("{group}_{name}")
}

/// Message blocks opened without the `#` sigil. A role argument has to follow,
/// so a plain `{{message}}` lookup is left alone.
static BARE_MESSAGE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(~?)\s*message(\s+[^}\s~])").expect("message block pattern should be valid")
});

/// Raw blocks, either with quadruple braces or written with double braces.
static RAW_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)\{\{\{\{raw\}\}\}\}.*?\{\{\{\{/raw\}\}\}\}|\{\{#?raw\}\}(?P<body>.*?)\{\{/raw\}\}",
    )
    .expect("raw block pattern should be valid")
});

/// Rewrites the block forms accepted on top of the handlebars syntax.
///
/// Raw blocks are located first and kept verbatim. Bare message blocks are
/// only rewritten outside of them.
fn normalize(source: &str) -> Cow<'_, str> {
    // Text outside raw blocks, each paired with the raw block following it.
    let mut pieces = Vec::new();
    let mut last = 0;
    for captures in RAW_BLOCK.captures_iter(source) {
        let Some(block) = captures.get(0) else {
            continue;
        };
        let body = captures.name("body").map(|body| body.as_str());
        pieces.push((&source[last..block.start()], Some((block.as_str(), body))));
        last = block.end();
    }
    pieces.push((&source[last..], None));

    let rewrite_messages = pieces.iter().any(|(text, _)| text.contains("/message}}"))
        && pieces.iter().any(|(text, _)| BARE_MESSAGE_BLOCK.is_match(text));
    let rewrite_raw = pieces.iter().any(|(_, raw)| matches!(raw, Some((_, Some(_)))));
    if !rewrite_messages && !rewrite_raw {
        return Cow::Borrowed(source);
    }

    let mut normalized = String::with_capacity(source.len() + 16);
    for (text, raw) in pieces {
        if rewrite_messages {
            normalized.push_str(&BARE_MESSAGE_BLOCK.replace_all(text, "{{${1}#message${2}"));
        } else {
            normalized.push_str(text);
        }
        match raw {
            Some((_, Some(body))) => {
                normalized.push_str("{{{{raw}}}}");
                normalized.push_str(body);
                normalized.push_str("{{{{/raw}}}}");
            }
            Some((block, None)) => normalized.push_str(block),
            None => {}
        }
    }
    Cow::Owned(normalized)
}

/// Renders templates against a function registry.
#[derive(Clone)]
pub struct TemplateRenderer {
    registry: Arc<dyn FunctionRegistry>,
    cancellation: CancellationToken,
}

impl TemplateRenderer {
    /// Creates a renderer exposing the functions of the registry as helpers.
    pub fn new(registry: Arc<dyn FunctionRegistry>) -> Self {
        Self {
            registry,
            cancellation: CancellationToken::new(),
        }
    }

    /// Sets the token checked before each nested function dispatch.
    #[inline]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Renders the template, blocking on nested function invocations.
    ///
    /// This must not be called from an asynchronous task of a Tokio runtime
    /// when the template invokes functions. Use [`render_async`](Self::render_async) there.
    pub fn render(&self, source: &str, variables: &Variables) -> Result<String> {
        let scope = RenderScope {
            registry: self.registry.clone(),
            variables: variables.clone(),
            cancellation: self.cancellation.clone(),
            runtime: Handle::try_current().ok(),
            failure: FailureSlot::default(),
        };
        let handlebars = self.handlebars(&scope);
        let source = normalize(source);
        let data = Value::Object(variables.snapshot());
        tracing::debug!(variables = data.as_object().map_or(0, |m| m.len()), "rendering template");
        handlebars
            .render_template(&source, &data)
            .map_err(|err| scope.failure.take().unwrap_or_else(|| translate_error(err)))
    }

    /// Renders the template on the blocking thread pool of the current runtime,
    /// or inline when there is no runtime.
    pub async fn render_async(&self, source: &str, variables: &Variables) -> Result<String> {
        let Ok(handle) = Handle::try_current() else {
            return self.render(source, variables);
        };
        let renderer = self.clone();
        let source = source.to_owned();
        let variables = variables.clone();
        let task = handle.spawn_blocking(move || renderer.render(&source, &variables));
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(Error::Template(format!("render task failed: {err}"))),
        }
    }

    /// Creates a registry with the built-in helpers, the function helpers and
    /// the fallback for unknown names, in that order.
    fn handlebars(&self, scope: &RenderScope) -> Handlebars<'static> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        helpers::register_builtins(&mut handlebars, scope);
        for function in self.registry.functions() {
            let definition = function.definition();
            let name = helper_name(definition.group(), definition.name());
            let helper = FunctionHelper::new(function.clone(), scope.clone());
            handlebars.register_helper(&name, Box::new(helper));
        }
        helpers::register_missing(&mut handlebars, scope);
        handlebars
    }
}

/// Maps errors that no helper recorded.
fn translate_error(err: RenderError) -> Error {
    match err.reason() {
        RenderErrorReason::HelperNotFound(name) => Error::UnknownHelper(name.clone()),
        _ => Error::Template(err.to_string()),
    }
}
