//! Function helpers.

use super::{
    Variables,
    helpers::{RenderScope, write_value},
};
use crate::{
    error::{Error, Result},
    function::{FunctionDefinition, FunctionResult, Invocable},
};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderError,
    ScopedJson,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Validates and binds the parameters of a function into the environment.
///
/// With call-site arguments, every required parameter has to be among them.
/// Without any, as for a top-level invocation, an existing binding or the
/// declared default satisfies it instead. Call-site values overwrite existing
/// bindings. An absent value keeps an existing binding or falls back to the
/// declared default. Validation runs before anything is bound, so a missing
/// required parameter leaves the environment untouched.
pub(crate) fn bind_arguments(
    definition: &FunctionDefinition,
    arguments: Option<&Map<String, Value>>,
    variables: &Variables,
) -> Result<()> {
    let parameters = definition
        .parameters()
        .iter()
        .filter(|parameter| !parameter.is_injected());
    for parameter in parameters.clone() {
        let name = parameter.name();
        let satisfied = match arguments {
            Some(arguments) => arguments.contains_key(name),
            None => variables.contains(name) || parameter.default_value().is_some(),
        };
        if parameter.is_required() && !satisfied {
            return Err(Error::MissingRequiredParameter {
                parameter: name.to_owned(),
                function: definition.name().to_owned(),
            });
        }
    }
    for parameter in parameters {
        let name = parameter.name();
        if let Some(value) = arguments.and_then(|args| args.get(name)) {
            variables.insert(name, value.clone());
        } else if !variables.contains(name) {
            if let Some(value) = parameter.default_value() {
                variables.insert(name, value.clone());
            }
        }
    }
    Ok(())
}

/// A helper dispatching to a registered function.
pub(super) struct FunctionHelper {
    function: Arc<dyn Invocable>,
    scope: RenderScope,
}

impl FunctionHelper {
    /// Creates a helper for the function.
    pub(super) fn new(function: Arc<dyn Invocable>, scope: RenderScope) -> Self {
        Self { function, scope }
    }

    /// Collects the hash arguments and an optional positional map of arguments.
    fn call_arguments(&self, h: &Helper<'_>) -> Result<Map<String, Value>> {
        let mut arguments = Map::new();
        match h.params().as_slice() {
            [] => {}
            [param] => match param.value() {
                Value::Object(map) => arguments.extend(map.clone()),
                Value::Null => {}
                _ => return Err(self.invalid_arguments(h, "the positional argument must be a map")),
            },
            _ => {
                return Err(self.invalid_arguments(h, "at most one positional argument is allowed"));
            }
        }
        for (key, param) in h.hash() {
            arguments.insert((*key).to_owned(), param.value().clone());
        }
        Ok(arguments)
    }

    fn invalid_arguments(&self, h: &Helper<'_>, reason: &str) -> Error {
        Error::InvalidHelperArguments {
            helper: h.name().to_owned(),
            reason: reason.to_owned(),
        }
    }

    /// Binds the arguments and invokes the function, blocking until it completes.
    ///
    /// The render context is refreshed afterwards, so later lookups see the
    /// bound arguments and anything the function bound.
    fn dispatch(
        &self,
        h: &Helper<'_>,
        rc: &mut RenderContext<'_, '_>,
    ) -> Result<FunctionResult, RenderError> {
        let scope = &self.scope;
        let definition = self.function.definition();
        let result = self
            .call_arguments(h)
            .and_then(|arguments| bind_arguments(definition, Some(&arguments), &scope.variables))
            .and_then(|_| {
                let context = scope.invocation_context();
                context.check_cancelled()?;
                tracing::debug!(
                    helper = h.name(),
                    group = definition.group(),
                    name = definition.name(),
                    "dispatching function helper"
                );
                scope.block_on(self.function.invoke(context))
            });
        let result = result.map_err(|err| scope.failure.fail(err))?;
        scope.refresh_context(rc)?;
        Ok(result)
    }
}

impl HelperDef for FunctionHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let result = self.dispatch(h, rc)?;
        Ok(ScopedJson::Derived(result.into_value()))
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let result = self.dispatch(h, rc)?;
        write_value(out, result.value())
    }
}
