use std::sync::Arc;

use tracing::{info, warn};

use crate::pool::ExecutorPool;

/// One script to be run on the engines, identified by a stable id so
/// repeat installs are no-ops.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    pub script_id: String,
    pub source: String,
}

impl ScriptSource {
    pub fn new(script_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            source: source.into(),
        }
    }
}

/// Enumerates the rule scripts a host wants installed, in install order.
pub trait ScriptProvider: Send + Sync {
    fn scripts(&self) -> Vec<ScriptSource>;
}

/// Install every script the provider offers on every pool worker. One
/// bad script is logged and skipped rather than aborting the install.
/// Returns how many scripts loaded cleanly.
pub async fn install_scripts(
    pool: &ExecutorPool,
    provider: &dyn ScriptProvider,
) -> usize {
    let scripts = provider.scripts();
    let mut installed = 0;
    for script in &scripts {
        match pool.load_script_global(&script.script_id, &script.source).await {
            Ok(()) => installed += 1,
            Err(e) => {
                warn!(script_id = %script.script_id, error = %e, "could not install script");
            }
        }
    }
    info!(installed, total = scripts.len(), "installed rule scripts");
    installed
}

/// Fixed list of scripts, in install order.
pub struct StaticScripts(pub Vec<ScriptSource>);

impl ScriptProvider for StaticScripts {
    fn scripts(&self) -> Vec<ScriptSource> {
        self.0.clone()
    }
}

/// Providers compose; later providers' scripts install after earlier
/// ones.
pub struct ChainedProviders(pub Vec<Arc<dyn ScriptProvider>>);

impl ScriptProvider for ChainedProviders {
    fn scripts(&self) -> Vec<ScriptSource> {
        self.0.iter().flat_map(|p| p.scripts()).collect()
    }
}
