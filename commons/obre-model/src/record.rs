use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Key under which an untyped view-model map carries the name of its
/// domain record kind.
pub const TYPE_TAG: &str = "$type";

/// Cheap clonable handle identifying a domain record kind. Produced by
/// the host's type binder; compared and hashed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(Arc<str>);

impl RecordType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordType {
    fn from(name: &str) -> Self {
        RecordType::new(name)
    }
}

/// String-keyed read access to a record's fields, the shape guard
/// evaluation works over.
pub trait FieldView {
    fn field(&self, name: &str) -> Option<Value>;
}

impl FieldView for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Adapter exposing a typed record as a [`FieldView`], so guards are
/// evaluated against the original record rather than the mutated view
/// model.
pub struct RecordFields<'a, R: Record>(pub &'a R);

impl<R: Record> FieldView for RecordFields<'_, R> {
    fn field(&self, name: &str) -> Option<Value> {
        self.0.field(name)
    }
}

/// Host domain record, consumed through a narrow surface: the engine
/// never looks inside a record except through these operations.
pub trait Record: Clone + Send + Sync + 'static {
    /// Concrete kind of this record instance.
    fn type_name(&self) -> RecordType;

    /// Simple (non-dotted) field lookup for guard evaluation.
    fn field(&self, name: &str) -> Option<Value>;

    /// Attach a diagnostic annotation, e.g. the fail-open error tag.
    fn set_tag(&mut self, key: &str, value: &str);

    /// Carry transient host bookkeeping over from the record a callback
    /// chain started from, so the view-model round trip cannot drop it.
    fn copy_annotations_from(&mut self, original: &Self);

    /// Literal rendering used in log and error context.
    fn describe(&self) -> String;
}

/// A heterogeneous batch of records submitted together. Items are
/// exposed untyped (maps tagged with [`TYPE_TAG`]) because bundle
/// processing happens before individual items are deserialized.
pub trait BatchRecord: Record {
    fn item_values(&self) -> Vec<Value>;
    fn replace_items(&mut self, items: Vec<Value>);
}

#[derive(thiserror::Error, Debug, Clone)]
#[error("view model conversion failed: {0}")]
pub struct BridgeError(pub String);

/// Converts records to and from the loosely-typed representation
/// scripts manipulate. A callback that does not touch a field must find
/// it unchanged after the round trip.
pub trait ViewModelBridge<R: Record>: Send + Sync {
    fn to_view_model(&self, record: &R) -> Result<Value, BridgeError>;
    fn to_model(&self, value: Value) -> Result<R, BridgeError>;
}
