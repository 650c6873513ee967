use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::FieldView;

/// Fields whose name starts with this prefix carry control metadata and
/// never act as guard constraints.
pub const CONTROL_PREFIX: char = '_';

/// Literal string that, when it is the *first* accepted value of a
/// clause, changes the clause to an absent-or-null check. Scripts depend
/// on the sentinel being a plain string.
pub const NULL_SENTINEL: &str = "null";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("rule guards can only be simple property paths: `{0}`")]
    ComplexPath(String),
}

/// One guard constraint: the named field must equal one of the accepted
/// literal values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardClause {
    pub field: String,
    pub values: Vec<String>,
}

/// A conjunction of field-equals-one-of-values clauses evaluated against
/// a string-keyed view of a record. An empty guard always matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guard {
    clauses: Vec<GuardClause>,
}

impl Guard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause. Dotted or indexed paths are a script author
    /// error and are rejected outright.
    pub fn clause<F, I, V>(mut self, field: F, values: I) -> Result<Self, GuardError>
    where
        F: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let field = field.into();
        check_simple_path(&field)?;
        self.clauses.push(GuardClause {
            field,
            values: values.into_iter().map(Into::into).collect(),
        });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[GuardClause] {
        &self.clauses
    }

    /// True when every constraint-bearing clause is satisfied. Clauses
    /// OR across their accepted values; the guard ANDs across clauses.
    pub fn matches(&self, data: &dyn FieldView) -> Result<bool, GuardError> {
        for clause in &self.clauses {
            check_simple_path(&clause.field)?;
            if clause.field.starts_with(CONTROL_PREFIX) {
                continue;
            }
            let actual = data.field(&clause.field);
            let satisfied = if clause.values.first().map(String::as_str)
                == Some(NULL_SENTINEL)
            {
                matches!(actual, None | Some(Value::Null))
            } else {
                match actual {
                    Some(value) => {
                        clause.values.iter().any(|v| literal_eq(&value, v))
                    }
                    None => false,
                }
            };
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn check_simple_path(field: &str) -> Result<(), GuardError> {
    if field.contains('.') || field.contains('[') {
        return Err(GuardError::ComplexPath(field.to_string()));
    }
    Ok(())
}

/// Value equality between a record field and a guard literal. Scalars
/// compare through their canonical text form; null, arrays and objects
/// never equal a literal.
fn literal_eq(value: &Value, literal: &str) -> bool {
    match value {
        Value::String(s) => s == literal,
        Value::Number(n) => n.to_string() == literal,
        Value::Bool(b) => {
            (*b && literal == "true") || (!*b && literal == "false")
        }
        _ => false,
    }
}
