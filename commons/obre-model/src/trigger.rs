use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle points at which registered callbacks may run. The string
/// form of each variant is the name scripts pass to `addBusinessRule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeObsolete,
    AfterObsolete,
    AfterRetrieve,
    AfterQuery,
    Validate,
}

impl Trigger {
    pub const ALL: [Trigger; 9] = [
        Trigger::BeforeInsert,
        Trigger::AfterInsert,
        Trigger::BeforeUpdate,
        Trigger::AfterUpdate,
        Trigger::BeforeObsolete,
        Trigger::AfterObsolete,
        Trigger::AfterRetrieve,
        Trigger::AfterQuery,
        Trigger::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::BeforeInsert => "BeforeInsert",
            Trigger::AfterInsert => "AfterInsert",
            Trigger::BeforeUpdate => "BeforeUpdate",
            Trigger::AfterUpdate => "AfterUpdate",
            Trigger::BeforeObsolete => "BeforeObsolete",
            Trigger::AfterObsolete => "AfterObsolete",
            Trigger::AfterRetrieve => "AfterRetrieve",
            Trigger::AfterQuery => "AfterQuery",
            Trigger::Validate => "Validate",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown trigger `{0}`")]
pub struct UnknownTrigger(pub String);

impl FromStr for Trigger {
    type Err = UnknownTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownTrigger(s.to_string()))
    }
}
