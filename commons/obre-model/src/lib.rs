//! Value types and collaborator contracts shared between business rule
//! engine components and their hosts.

mod guard;
mod issue;
mod record;
mod trigger;

pub use guard::{Guard, GuardClause, GuardError, CONTROL_PREFIX, NULL_SENTINEL};
pub use issue::{DetectedIssue, IssuePriority, BUSINESS_RULE_VIOLATION};
pub use record::{
    BatchRecord, BridgeError, FieldView, Record, RecordFields, RecordType,
    ViewModelBridge, TYPE_TAG,
};
pub use trigger::{Trigger, UnknownTrigger};
