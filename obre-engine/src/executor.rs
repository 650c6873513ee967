use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use obre_model::{
    DetectedIssue, Guard, IssuePriority, Record, RecordFields, RecordType, Trigger,
    ViewModelBridge, TYPE_TAG,
};
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::RuleError;
use crate::pool::DispatchContext;
use crate::registry::{CallbackBody, CallbackRegistration, CallbackRegistry};
use crate::traits::{
    DataReferenceResolver, RuleFn, RuleRegistrar, ScriptEngine, TypeBinder,
    ValidatorFn,
};

static REFERENCE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Textual include directives of the form `/// <reference path="..."/>`.
fn reference_pattern() -> &'static Regex {
    REFERENCE_PATTERN.get_or_init(|| {
        Regex::new(r#"(?m)///\s*?<reference\s*?path\s*=\s*["'](.*?)["']\s*?/>"#)
            .expect("reference pattern is valid")
    })
}

fn scan_references(source: &str) -> Vec<String> {
    reference_pattern()
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .collect()
}

/// Literal rendering of an untyped record for log and error context.
fn literal(value: &Value) -> String {
    match value.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| format!("{}={{{}}}", k, v))
            .collect::<Vec<_>>()
            .join(" "),
        None => value.to_string(),
    }
}

struct EngineState {
    engine: Box<dyn ScriptEngine>,
    executed: HashSet<String>,
    disposed: bool,
}

/// Wraps one non-reentrant scripting interpreter together with its
/// callback registry. Invocation exclusivity comes from pool checkout
/// (an executor off the free list belongs to exactly one call chain);
/// the internal lock serializes script loads, including broadcast loads
/// racing an in-flight chain.
pub struct ScriptExecutor {
    id: Uuid,
    registry: CallbackRegistry,
    binder: Arc<dyn TypeBinder>,
    resolver: Arc<dyn DataReferenceResolver>,
    engine: Mutex<EngineState>,
}

impl ScriptExecutor {
    pub fn new(
        engine: Box<dyn ScriptEngine>,
        registry: CallbackRegistry,
        binder: Arc<dyn TypeBinder>,
        resolver: Arc<dyn DataReferenceResolver>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            binder,
            resolver,
            engine: Mutex::new(EngineState {
                engine,
                executed: HashSet::new(),
                disposed: false,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Execute a script once. Re-loading an already-executed script id
    /// is a no-op; include directives are resolved and run first,
    /// best-effort; a failure in the main body is fatal to this load.
    pub async fn load_script(
        &self,
        script_id: &str,
        source: &str,
    ) -> Result<(), RuleError> {
        let mut state = self.engine.lock().await;
        if state.disposed {
            return Err(RuleError::ExecutorDisposed);
        }
        if state.executed.contains(script_id) {
            debug!(script_id, executor = %self.id, "script has already been run");
            return Ok(());
        }
        debug!(script_id, executor = %self.id, "adding rules to engine");
        state.executed.insert(script_id.to_string());

        for include in scan_references(source) {
            match self.resolver.resolve(&include) {
                None => warn!(include = %include, "include not found"),
                Some(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let mut registrar = ExecutorRegistrar {
                        registry: &self.registry,
                        binder: self.binder.as_ref(),
                    };
                    if let Err(e) = state.engine.execute(&text, &mut registrar) {
                        warn!(include = %include, error = %e, "skipping include");
                    }
                }
            }
        }

        let mut registrar = ExecutorRegistrar {
            registry: &self.registry,
            binder: self.binder.as_ref(),
        };
        state.engine.execute(source, &mut registrar).map_err(|e| {
            error!(
                script_id,
                line = ?e.line,
                column = ?e.column,
                error = %e,
                "error executing script"
            );
            RuleError::ScriptLoad {
                script_id: script_id.to_string(),
                source: e,
            }
        })
    }

    /// Register a callback directly, bypassing script execution. Hosts
    /// use this for natively-defined rules; the same idempotence and
    /// ordering rules apply.
    pub fn register_callback(&self, registration: CallbackRegistration) -> bool {
        self.registry.register(registration)
    }

    /// Run all callbacks registered for this record's concrete type and
    /// the adapter's bound type at `trigger`, folding each callback's
    /// result into the next. With no matching callbacks the record is
    /// returned untouched and the bridge is never consulted.
    pub async fn invoke<R: Record>(
        &self,
        ctx: &DispatchContext,
        trigger: Trigger,
        bound: &RecordType,
        data: R,
        bridge: &dyn ViewModelBridge<R>,
    ) -> Result<R, RuleError> {
        let concrete = data.type_name();
        let call_list = self.registry.call_list_union(&concrete, bound, trigger);
        if call_list.is_empty() {
            return Ok(data);
        }

        let mut view = bridge.to_view_model(&data)?;
        for c in &call_list {
            // Guards see the original typed record, not the running view
            if let Some(guard) = &c.guard {
                if !guard.matches(&RecordFields(&data))? {
                    continue;
                }
            }
            let CallbackBody::Rule(callback) = &c.body else {
                continue;
            };
            view = callback(ctx.clone(), view).await.map_err(|e| {
                error!(
                    trigger = %trigger,
                    id = %c.id,
                    record = %data.describe(),
                    error = %e,
                    "error running business rule"
                );
                RuleError::Callback {
                    trigger,
                    id: c.id.clone(),
                    record: data.describe(),
                    source: e,
                }
            })?;
        }

        let mut result = bridge.to_model(view)?;
        result.copy_annotations_from(&data);
        Ok(result)
    }

    /// Analog of [`invoke`](Self::invoke) for records that have not been
    /// resolved to a concrete host type yet, identified only by their
    /// `$type` tag. Used for bundle items.
    pub async fn invoke_raw(
        &self,
        ctx: &DispatchContext,
        trigger: Trigger,
        data: Value,
    ) -> Result<Value, RuleError> {
        let Some(ty) = self.bind_tag(&data) else {
            return Ok(data);
        };
        let call_list = self.registry.call_list(&ty, trigger);
        if call_list.is_empty() {
            return Ok(data);
        }

        // Guards evaluate against the input map, not the running value
        let original = match data.as_object() {
            Some(map) => map.clone(),
            None => return Ok(data),
        };
        let record = literal(&Value::Object(original.clone()));
        let mut current = data;
        for c in &call_list {
            if let Some(guard) = &c.guard {
                if !guard.matches(&original)? {
                    continue;
                }
            }
            let CallbackBody::Rule(callback) = &c.body else {
                continue;
            };
            current = callback(ctx.clone(), current).await.map_err(|e| {
                error!(
                    trigger = %trigger,
                    id = %c.id,
                    record = %record,
                    error = %e,
                    "error running business rule"
                );
                RuleError::Callback {
                    trigger,
                    id: c.id.clone(),
                    record: record.clone(),
                    source: e,
                }
            })?;
        }
        Ok(current)
    }

    /// Run every validator registered for this record. Validators are
    /// unconditional; a failing validator contributes one synthetic
    /// error issue and the remaining validators still run. Never raises
    /// to the caller.
    pub async fn validate<R: Record>(
        &self,
        ctx: &DispatchContext,
        bound: &RecordType,
        data: &R,
        bridge: &dyn ViewModelBridge<R>,
    ) -> Vec<DetectedIssue> {
        let concrete = data.type_name();
        let call_list =
            self.registry
                .call_list_union(&concrete, bound, Trigger::Validate);
        if call_list.is_empty() {
            return Vec::new();
        }
        let view = match bridge.to_view_model(data) {
            Ok(v) => v,
            Err(e) => {
                error!(record = %data.describe(), error = %e, "error validating record");
                return vec![DetectedIssue::new(
                    IssuePriority::Error,
                    format!("error validating {} - {}", data.describe(), e),
                )];
            }
        };
        self.run_validators(ctx, &call_list, view, &data.describe())
            .await
    }

    /// Untyped analog of [`validate`](Self::validate), keyed by `$type`.
    pub async fn validate_raw(
        &self,
        ctx: &DispatchContext,
        data: &Value,
    ) -> Vec<DetectedIssue> {
        let Some(ty) = self.bind_tag(data) else {
            return Vec::new();
        };
        let call_list = self.registry.call_list(&ty, Trigger::Validate);
        if call_list.is_empty() {
            return Vec::new();
        }
        self.run_validators(ctx, &call_list, data.clone(), &literal(data))
            .await
    }

    async fn run_validators(
        &self,
        ctx: &DispatchContext,
        call_list: &[Arc<CallbackRegistration>],
        view: Value,
        record: &str,
    ) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();
        for c in call_list {
            let CallbackBody::Validator(validator) = &c.body else {
                continue;
            };
            match validator(ctx.clone(), view.clone()).await {
                Ok(raw) => issues.extend(raw.iter().map(DetectedIssue::from_value)),
                Err(e) => {
                    error!(record, id = %c.id, error = %e, "error validating record");
                    issues.push(DetectedIssue::new(
                        IssuePriority::Error,
                        format!("error validating {} (rule: {}) - {}", record, c.id, e),
                    ));
                }
            }
        }
        issues
    }

    /// Clear interpreter state and drop all registrations. The executor
    /// must not be used afterwards.
    pub async fn dispose(&self) {
        let mut state = self.engine.lock().await;
        state.engine.reset();
        state.executed.clear();
        state.disposed = true;
        self.registry.clear();
    }

    fn bind_tag(&self, data: &Value) -> Option<RecordType> {
        data.as_object()
            .and_then(|map| map.get(TYPE_TAG))
            .and_then(|v| v.as_str())
            .and_then(|tag| self.binder.bind(tag))
    }
}

/// Registration surface handed to a script while it executes.
struct ExecutorRegistrar<'a> {
    registry: &'a CallbackRegistry,
    binder: &'a dyn TypeBinder,
}

impl RuleRegistrar for ExecutorRegistrar<'_> {
    fn add_business_rule(
        &mut self,
        id: Option<String>,
        target: &str,
        trigger: &str,
        guard: Option<Guard>,
        callback: RuleFn,
    ) -> Result<(), RuleError> {
        let ty = self
            .binder
            .bind(target)
            .ok_or_else(|| RuleError::UnknownType(target.to_string()))?;
        let trigger = trigger.parse::<Trigger>()?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.registry.register(CallbackRegistration {
            id,
            target: ty,
            trigger,
            guard,
            body: CallbackBody::Rule(callback),
        });
        Ok(())
    }

    fn add_validator(
        &mut self,
        id: Option<String>,
        target: &str,
        callback: ValidatorFn,
    ) -> Result<(), RuleError> {
        let ty = self
            .binder
            .bind(target)
            .ok_or_else(|| RuleError::UnknownType(target.to_string()))?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.registry.register(CallbackRegistration {
            id,
            target: ty,
            trigger: Trigger::Validate,
            guard: None,
            body: CallbackBody::Validator(callback),
        });
        Ok(())
    }
}
