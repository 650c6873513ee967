pub mod chain;
pub mod error;
pub mod executor;
pub mod loader;
pub mod pool;
pub mod registry;
pub mod traits;

pub use chain::{BundleRule, BusinessRules, ChainDirectory, ScriptRule, BRE_ERROR_TAG};
pub use error::{CallbackError, RuleError, ScriptError};
pub use executor::ScriptExecutor;
pub use loader::{
    install_scripts, ChainedProviders, ScriptProvider, ScriptSource, StaticScripts,
};
pub use pool::{DispatchContext, ExecutorPool};
pub use registry::{CallbackBody, CallbackRegistration, CallbackRegistry};
pub use traits::{
    rule_fn, validator_fn, DataReferenceResolver, EngineFactory, RuleChainHost,
    RuleFn, RuleRegistrar, ScriptEngine, TypeBinder, ValidatorFn,
};

use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct EngineConfig {
    /// Pool size. Unset or zero falls back to the machine's logical CPU
    /// count.
    #[envconfig(from = "OBRE_WORKER_INSTANCES")]
    pub worker_instances: Option<usize>,

    /// Ask the engine factory for debuggable interpreters.
    #[envconfig(from = "OBRE_DEBUG_MODE", default = "false")]
    pub debug_mode: bool,
}

impl EngineConfig {
    pub fn effective_workers(&self) -> usize {
        self.worker_instances
            .filter(|w| *w > 0)
            .unwrap_or_else(num_cpus::get)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_instances: None,
            debug_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_override_wins_when_positive() {
        let config = EngineConfig {
            worker_instances: Some(3),
            debug_mode: false,
        };
        assert_eq!(config.effective_workers(), 3);
    }

    #[test]
    fn zero_and_unset_fall_back_to_cpu_count() {
        let cpus = num_cpus::get();
        let zero = EngineConfig {
            worker_instances: Some(0),
            debug_mode: false,
        };
        assert_eq!(zero.effective_workers(), cpus);
        assert_eq!(EngineConfig::default().effective_workers(), cpus);
    }
}
