use obre_model::{BridgeError, GuardError, Trigger, UnknownTrigger};

/// Error raised by a script body while the interpreter executes it.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

/// Error produced by a callback body. Opaque to the engine, carried for
/// reporting only.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum RuleError {
    /// The main body of a script failed to execute. Fatal to that load,
    /// unlike include failures which are logged and skipped.
    #[error("error executing script `{script_id}`: {source}")]
    ScriptLoad {
        script_id: String,
        #[source]
        source: ScriptError,
    },

    /// A callback raised during a mutating trigger. Carries enough
    /// context for the chain adapter to report and fail open.
    #[error("error running business rule {trigger} (rule id: {id}) for {record}: {source}")]
    Callback {
        trigger: Trigger,
        id: String,
        record: String,
        #[source]
        source: CallbackError,
    },

    #[error("could not find resource type registration `{0}`")]
    UnknownType(String),

    #[error(transparent)]
    UnknownTrigger(#[from] UnknownTrigger),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("executor pool has been disposed")]
    PoolDisposed,

    #[error("executor has been disposed")]
    ExecutorDisposed,
}
