//! Built-in helpers.

use super::Variables;
use crate::{
    error::{Error, Result},
    function::InvocationContext,
    kernel::FunctionRegistry,
};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, Renderable, ScopedJson,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Keeps the first typed error raised by a helper, since handlebars only carries strings.
#[derive(Debug, Clone, Default)]
pub(super) struct FailureSlot(Arc<Mutex<Option<Error>>>);

impl FailureSlot {
    /// Records the error unless an earlier one is already recorded.
    pub(super) fn fail(&self, err: Error) -> RenderError {
        let message = err.to_string();
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        RenderErrorReason::Other(message).into()
    }

    /// Takes the recorded error.
    pub(super) fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// State shared by every helper of one render call.
#[derive(Clone)]
pub(super) struct RenderScope {
    pub(super) registry: Arc<dyn FunctionRegistry>,
    pub(super) variables: Variables,
    pub(super) cancellation: CancellationToken,
    pub(super) runtime: Option<Handle>,
    pub(super) failure: FailureSlot,
}

impl RenderScope {
    /// Returns the context for a nested invocation.
    pub(super) fn invocation_context(&self) -> InvocationContext {
        InvocationContext::new(
            self.registry.clone(),
            self.variables.clone(),
            self.cancellation.clone(),
        )
    }

    /// Makes later lookups of this render see the current bindings.
    pub(super) fn refresh_context(&self, rc: &mut RenderContext<'_, '_>) -> HelperResult {
        let context = Context::wraps(Value::Object(self.variables.snapshot()))?;
        rc.set_context(context);
        Ok(())
    }

    /// Returns `true` if the name starts with the group of a registered function.
    fn is_in_function_group(&self, name: &str) -> bool {
        self.registry.functions().iter().any(|function| {
            name.strip_prefix(function.definition().group())
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with('_'))
        })
    }

    /// Drives the future to completion on the current thread.
    pub(super) fn block_on<F: Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            Some(handle) => handle.block_on(future),
            None => futures::executor::block_on(future),
        }
    }
}

/// Registers the built-in helpers.
pub(super) fn register_builtins(handlebars: &mut Handlebars<'_>, scope: &RenderScope) {
    handlebars.register_helper("message", Box::new(MessageHelper(scope.clone())));
    handlebars.register_helper("set", Box::new(SetHelper(scope.clone())));
    handlebars.register_helper("get", Box::new(GetHelper(scope.clone())));
    handlebars.register_helper("json", Box::new(JsonHelper));
    handlebars.register_helper("eq", Box::new(EqHelper(scope.failure.clone())));
    handlebars.register_helper("raw", Box::new(RawHelper));
}

/// Registers the fallback for names that resolve to neither a helper nor a value.
pub(super) fn register_missing(handlebars: &mut Handlebars<'_>, scope: &RenderScope) {
    handlebars.register_helper("helperMissing", Box::new(MissingHelper(scope.clone())));
}

/// Returns the first positional argument or the named one.
fn argument<'a>(h: &'a Helper<'_>, index: usize, key: &str) -> Option<&'a Value> {
    h.hash_get(key)
        .or_else(|| h.param(index))
        .map(|param| param.value())
}

fn invalid_arguments(helper: &str, reason: &str) -> Error {
    Error::InvalidHelperArguments {
        helper: helper.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Reads a variable name from `name=` or the first positional argument.
fn variable_name(h: &Helper<'_>) -> Result<String> {
    match argument(h, 0, "name") {
        Some(Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        _ => Err(invalid_arguments(h.name(), "a variable name is required")),
    }
}

/// Writes a value as text: strings as is, `null` as nothing, others as JSON.
pub(super) fn write_value(out: &mut dyn Output, value: &Value) -> HelperResult {
    match value {
        Value::String(s) => out.write(s)?,
        Value::Null => {}
        value => out.write(&value.to_string())?,
    }
    Ok(())
}

/// `{{#message role="user"}}...{{/message}}`
///
/// A bare `{{message}}` writes the variable of that name.
struct MessageHelper(RenderScope);

impl HelperDef for MessageHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        if !h.is_block() && h.params().is_empty() && h.hash().is_empty() {
            return match self.0.variables.get("message") {
                Some(value) => write_value(out, &value),
                None => Ok(()),
            };
        }
        let role = match argument(h, 0, "role") {
            Some(Value::String(role)) if !role.trim().is_empty() => role.trim().to_owned(),
            _ => return Err(self.0.failure.fail(Error::MissingRole)),
        };
        out.write(&format!("<{role}~>"))?;
        if let Some(template) = h.template() {
            template.render(r, ctx, rc, out)?;
        }
        out.write(&format!("</{role}~>"))?;
        Ok(())
    }
}

/// `{{set "name" value}}` or `{{set name="name" value=value}}`
struct SetHelper(RenderScope);

impl HelperDef for SetHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        _: &mut dyn Output,
    ) -> HelperResult {
        let name = variable_name(h).map_err(|err| self.0.failure.fail(err))?;
        let value = argument(h, 1, "value").cloned().unwrap_or_default();
        self.0.variables.insert(name, value);
        self.0.refresh_context(rc)
    }
}

/// `{{get "name"}}`
struct GetHelper(RenderScope);

impl GetHelper {
    fn lookup(&self, h: &Helper<'_>) -> Result<Option<Value>, RenderError> {
        let name = variable_name(h).map_err(|err| self.0.failure.fail(err))?;
        Ok(self.0.variables.get(&name))
    }
}

impl HelperDef for GetHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let value = self.lookup(h)?.unwrap_or_default();
        Ok(ScopedJson::Derived(value))
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        match self.lookup(h)? {
            Some(value) => write_value(out, &value),
            None => Ok(()),
        }
    }
}

/// `{{json value}}`
struct JsonHelper;

impl HelperDef for JsonHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let value = h.param(0).map(|param| param.value());
        let json = value.map(Value::to_string).unwrap_or_else(|| "null".to_owned());
        out.write(&json)?;
        Ok(())
    }
}

/// `{{eq left right}}`
struct EqHelper(FailureSlot);

impl EqHelper {
    fn compare(&self, h: &Helper<'_>) -> Result<bool, RenderError> {
        match (h.param(0), h.param(1)) {
            (Some(left), Some(right)) => Ok(left.value() == right.value()),
            _ => Err(self.0.fail(invalid_arguments(h.name(), "two operands are required"))),
        }
    }
}

impl HelperDef for EqHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let equal = self.compare(h)?;
        Ok(ScopedJson::Derived(Value::Bool(equal)))
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        if self.compare(h)? {
            out.write("True")?;
        }
        Ok(())
    }
}

/// `{{{{raw}}}}...{{{{/raw}}}}`
struct RawHelper;

impl HelperDef for RawHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        if let Some(template) = h.template() {
            template.render(r, ctx, rc, out)?;
        }
        Ok(())
    }
}

/// A bare `{{name}}` with nothing to render stays empty, unless it names a
/// function of a registered group. Anything called with arguments has to be
/// a registered helper.
struct MissingHelper(RenderScope);

impl HelperDef for MissingHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        _: &mut dyn Output,
    ) -> HelperResult {
        let name = h.name();
        let is_function_call = self.0.is_in_function_group(name);
        if h.params().is_empty() && h.hash().is_empty() && !is_function_call {
            return Ok(());
        }
        Err(self.0.failure.fail(Error::UnknownHelper(name.to_owned())))
    }
}
