use std::sync::Arc;

use obre_model::{Guard, RecordType, Trigger};
use tracing::warn;

use crate::traits::{RuleChainHost, RuleFn, ValidatorFn};

pub enum CallbackBody {
    Rule(RuleFn),
    Validator(ValidatorFn),
}

/// A registered callback. Owned by exactly one executor; never removed
/// individually, only cleared with the whole registry.
pub struct CallbackRegistration {
    pub id: String,
    pub target: RecordType,
    pub trigger: Trigger,
    pub guard: Option<Guard>,
    pub body: CallbackBody,
}

/// Per-executor callback store keyed by target type, preserving
/// registration order so callbacks fire deterministically.
pub struct CallbackRegistry {
    callbacks: scc::HashMap<RecordType, Vec<Arc<CallbackRegistration>>>,
    chain_host: Arc<dyn RuleChainHost>,
}

impl CallbackRegistry {
    pub fn new(chain_host: Arc<dyn RuleChainHost>) -> Self {
        Self {
            callbacks: scc::HashMap::new(),
            chain_host,
        }
    }

    /// Append a registration. A duplicate (id, trigger) for the target
    /// type is logged and ignored; the first registration for a type
    /// asks the host chain to install a rule adapter for it. Returns
    /// whether the registration was inserted.
    pub fn register(&self, registration: CallbackRegistration) -> bool {
        let reg = Arc::new(registration);
        let ty = reg.target.clone();
        if !self.callbacks.contains(&ty) {
            self.chain_host.ensure_adapter(&ty);
        }
        let mut inserted = true;
        self.callbacks
            .entry(ty)
            .and_modify(|list| {
                if list
                    .iter()
                    .any(|c| c.id == reg.id && c.trigger == reg.trigger)
                {
                    warn!(
                        trigger = %reg.trigger,
                        id = %reg.id,
                        "rule has already been registered with this engine"
                    );
                    inserted = false;
                } else {
                    list.push(reg.clone());
                }
            })
            .or_insert_with(|| vec![reg.clone()]);
        inserted
    }

    /// Ordered registrations for (type, trigger).
    pub fn call_list(
        &self,
        ty: &RecordType,
        trigger: Trigger,
    ) -> Vec<Arc<CallbackRegistration>> {
        self.callbacks
            .read(ty, |_, list| {
                list.iter()
                    .filter(|c| c.trigger == trigger)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Union of the concrete-type and generically-bound call lists,
    /// de-duplicated by callback id, concrete registrations first.
    pub fn call_list_union(
        &self,
        concrete: &RecordType,
        bound: &RecordType,
        trigger: Trigger,
    ) -> Vec<Arc<CallbackRegistration>> {
        let mut out = self.call_list(concrete, trigger);
        if bound != concrete {
            for c in self.call_list(bound, trigger) {
                if !out.iter().any(|e| e.id == c.id) {
                    out.push(c);
                }
            }
        }
        out
    }

    pub fn clear(&self) {
        self.callbacks.clear();
    }
}
