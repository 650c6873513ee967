use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use obre_model::{Guard, RecordType};
use serde_json::Value;

use crate::error::{CallbackError, RuleError, ScriptError};
use crate::pool::DispatchContext;

/// A rule callback: maps the running view-model value, possibly
/// triggering nested dispatch through the supplied context.
pub type RuleFn = Arc<
    dyn Fn(DispatchContext, Value) -> BoxFuture<'static, Result<Value, CallbackError>>
        + Send
        + Sync,
>;

/// A validator callback: produces a list of loose issue maps.
pub type ValidatorFn = Arc<
    dyn Fn(
            DispatchContext,
            Value,
        ) -> BoxFuture<'static, Result<Vec<Value>, CallbackError>>
        + Send
        + Sync,
>;

/// Box an async closure into a [`RuleFn`].
pub fn rule_fn<F, Fut>(f: F) -> RuleFn
where
    F: Fn(DispatchContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CallbackError>> + Send + 'static,
{
    Arc::new(move |ctx, value| Box::pin(f(ctx, value)))
}

/// Box an async closure into a [`ValidatorFn`].
pub fn validator_fn<F, Fut>(f: F) -> ValidatorFn
where
    F: Fn(DispatchContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Value>, CallbackError>> + Send + 'static,
{
    Arc::new(move |ctx, value| Box::pin(f(ctx, value)))
}

/// One scripting interpreter instance. Implementations are not expected
/// to be reentrant or thread-safe; the executor wrapper serializes all
/// access.
pub trait ScriptEngine: Send {
    /// Execute script source. Registration calls the script makes land
    /// on `registrar`; a registration failure aborts the script.
    fn execute(
        &mut self,
        source: &str,
        registrar: &mut dyn RuleRegistrar,
    ) -> Result<(), ScriptError>;

    /// Clear breakpoints and interpreter state at disposal.
    fn reset(&mut self);
}

/// Builds one interpreter per pool worker.
pub trait EngineFactory: Send + Sync {
    fn create(&self, debug_mode: bool) -> Box<dyn ScriptEngine>;
}

/// Resolves the type names scripts use to concrete record type handles.
pub trait TypeBinder: Send + Sync {
    fn bind(&self, name: &str) -> Option<RecordType>;
}

/// Fetches the target of a `/// <reference path="..."/>` include
/// directive. Absence is non-fatal.
pub trait DataReferenceResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<Vec<u8>>;
}

/// The host's lifecycle dispatch chain. The registry asks it to insert
/// a rule adapter the first time any callback is registered for a type;
/// the bundle look-ahead probes it before marshaling a batch.
pub trait RuleChainHost: Send + Sync {
    fn ensure_adapter(&self, ty: &RecordType);
    fn has_adapter(&self, ty: &RecordType) -> bool;
}

/// The registration surface a script author sees. Missing ids are
/// generated; unresolvable target names fail immediately.
pub trait RuleRegistrar {
    fn add_business_rule(
        &mut self,
        id: Option<String>,
        target: &str,
        trigger: &str,
        guard: Option<Guard>,
        callback: RuleFn,
    ) -> Result<(), RuleError>;

    fn add_validator(
        &mut self,
        id: Option<String>,
        target: &str,
        callback: ValidatorFn,
    ) -> Result<(), RuleError>;
}
