#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Mutex};

use obre_engine::{
    ChainDirectory, DataReferenceResolver, EngineConfig, EngineFactory, ExecutorPool,
    RuleError, RuleRegistrar, ScriptEngine, ScriptError, ScriptSource, TypeBinder,
};
use obre_model::{
    BatchRecord, BridgeError, Record, RecordType, ViewModelBridge, TYPE_TAG,
};
use serde_json::{json, Map, Value};

/// Minimal host record: a type name, a flat field map, and transient
/// tags that intentionally do NOT survive the view-model round trip, so
/// tests can observe annotation copy-back.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRecord {
    pub type_name: String,
    pub fields: Map<String, Value>,
    pub tags: HashMap<String, String>,
}

impl TestRecord {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            fields: Map::new(),
            tags: HashMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn tagged(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

impl Record for TestRecord {
    fn type_name(&self) -> RecordType {
        RecordType::new(&self.type_name)
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    fn copy_annotations_from(&mut self, original: &Self) {
        for (k, v) in &original.tags {
            self.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    fn describe(&self) -> String {
        format!("{} ({} fields)", self.type_name, self.fields.len())
    }
}

/// Bridge that serializes the field map plus a `$type` tag, counting
/// conversions so tests can assert the marshaling fast path.
#[derive(Default)]
pub struct TestBridge {
    pub to_view_calls: AtomicUsize,
    pub to_model_calls: AtomicUsize,
}

impl TestBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn view_calls(&self) -> usize {
        self.to_view_calls.load(SeqCst)
    }

    pub fn model_calls(&self) -> usize {
        self.to_model_calls.load(SeqCst)
    }
}

impl ViewModelBridge<TestRecord> for TestBridge {
    fn to_view_model(&self, record: &TestRecord) -> Result<Value, BridgeError> {
        self.to_view_calls.fetch_add(1, SeqCst);
        let mut map = record.fields.clone();
        map.insert(TYPE_TAG.to_string(), json!(record.type_name));
        Ok(Value::Object(map))
    }

    fn to_model(&self, value: Value) -> Result<TestRecord, BridgeError> {
        self.to_model_calls.fetch_add(1, SeqCst);
        let mut map = value
            .as_object()
            .cloned()
            .ok_or_else(|| BridgeError("view model is not an object".into()))?;
        let type_name = map
            .remove(TYPE_TAG)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| BridgeError("view model has no type tag".into()))?;
        Ok(TestRecord {
            type_name,
            fields: map,
            tags: HashMap::new(),
        })
    }
}

/// Bundle of untyped items plus tags, standing in for a host batch
/// submission.
#[derive(Debug, Clone, PartialEq)]
pub struct TestBundle {
    pub items: Vec<Value>,
    pub tags: HashMap<String, String>,
}

impl TestBundle {
    pub fn of(items: Vec<Value>) -> Self {
        Self {
            items,
            tags: HashMap::new(),
        }
    }
}

impl Record for TestBundle {
    fn type_name(&self) -> RecordType {
        RecordType::new("Bundle")
    }

    fn field(&self, _name: &str) -> Option<Value> {
        None
    }

    fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    fn copy_annotations_from(&mut self, original: &Self) {
        for (k, v) in &original.tags {
            self.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    fn describe(&self) -> String {
        format!("Bundle ({} items)", self.items.len())
    }
}

impl BatchRecord for TestBundle {
    fn item_values(&self) -> Vec<Value> {
        self.items.clone()
    }

    fn replace_items(&mut self, items: Vec<Value>) {
        self.items = items;
    }
}

/// What a fake script does when "executed": make registration calls.
pub type Program = Arc<dyn Fn(&mut dyn RuleRegistrar) -> Result<(), RuleError> + Send + Sync>;

/// Shared table mapping script source text to programs. Source text the
/// library does not know is inert; the literal source `boom` fails like
/// a script with a syntax error.
#[derive(Default)]
pub struct ScriptLibrary {
    programs: Mutex<HashMap<String, Program>>,
    pub executions: AtomicUsize,
}

impl ScriptLibrary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn define<F>(&self, source: &str, program: F)
    where
        F: Fn(&mut dyn RuleRegistrar) -> Result<(), RuleError> + Send + Sync + 'static,
    {
        self.programs
            .lock()
            .unwrap()
            .insert(source.to_string(), Arc::new(program));
    }

    fn lookup(&self, source: &str) -> Option<Program> {
        self.programs.lock().unwrap().get(source).cloned()
    }
}

pub struct FakeEngine {
    library: Arc<ScriptLibrary>,
}

impl ScriptEngine for FakeEngine {
    fn execute(
        &mut self,
        source: &str,
        registrar: &mut dyn RuleRegistrar,
    ) -> Result<(), ScriptError> {
        self.library.executions.fetch_add(1, SeqCst);
        if source == "boom" {
            return Err(ScriptError::at("unexpected token", 1, 1));
        }
        match self.library.lookup(source) {
            Some(program) => program(registrar).map_err(|e| ScriptError::new(e.to_string())),
            None => Ok(()),
        }
    }

    fn reset(&mut self) {}
}

pub struct FakeFactory {
    pub library: Arc<ScriptLibrary>,
}

impl EngineFactory for FakeFactory {
    fn create(&self, _debug_mode: bool) -> Box<dyn ScriptEngine> {
        Box::new(FakeEngine {
            library: self.library.clone(),
        })
    }
}

/// Binder that knows a fixed set of type names.
pub struct TestBinder(HashSet<String>);

impl TestBinder {
    pub fn of(names: &[&str]) -> Arc<Self> {
        Arc::new(Self(names.iter().map(|n| n.to_string()).collect()))
    }
}

impl TypeBinder for TestBinder {
    fn bind(&self, name: &str) -> Option<RecordType> {
        self.0.contains(name).then(|| RecordType::new(name))
    }
}

/// In-memory include resolver.
#[derive(Default)]
pub struct MapResolver(HashMap<String, Vec<u8>>);

impl MapResolver {
    pub fn with(mut self, path: &str, source: &str) -> Self {
        self.0.insert(path.to_string(), source.as_bytes().to_vec());
        self
    }
}

impl DataReferenceResolver for MapResolver {
    fn resolve(&self, path: &str) -> Option<Vec<u8>> {
        self.0.get(path).cloned()
    }
}

pub struct Harness {
    pub pool: Arc<ExecutorPool>,
    pub directory: Arc<ChainDirectory>,
    pub binder: Arc<TestBinder>,
    pub library: Arc<ScriptLibrary>,
}

pub struct HarnessBuilder {
    workers: usize,
    types: Vec<String>,
    library: Arc<ScriptLibrary>,
    includes: MapResolver,
    base_scripts: Vec<ScriptSource>,
}

impl HarnessBuilder {
    pub fn new(library: Arc<ScriptLibrary>) -> Self {
        Self {
            workers: 1,
            types: vec!["Patient".into(), "Act".into(), "Entity".into()],
            library,
            includes: MapResolver::default(),
            base_scripts: Vec::new(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn types(mut self, names: &[&str]) -> Self {
        self.types = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn include(mut self, path: &str, source: &str) -> Self {
        self.includes = self.includes.with(path, source);
        self
    }

    pub fn script(mut self, script_id: &str, source: &str) -> Self {
        self.base_scripts.push(ScriptSource::new(script_id, source));
        self
    }

    pub async fn build(self) -> Result<Harness, RuleError> {
        let config = EngineConfig {
            worker_instances: Some(self.workers),
            debug_mode: false,
        };
        let directory = ChainDirectory::new();
        let names: Vec<&str> = self.types.iter().map(String::as_str).collect();
        let binder = TestBinder::of(&names);
        let pool = ExecutorPool::new(
            &config,
            Arc::new(FakeFactory {
                library: self.library.clone(),
            }),
            binder.clone(),
            directory.clone(),
            Arc::new(self.includes),
            &self.base_scripts,
        )
        .await?;
        Ok(Harness {
            pool,
            directory,
            binder,
            library: self.library,
        })
    }
}

/// Shared trace of callback firings, for ordering assertions.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entry(log: &CallLog, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

pub fn log_entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}
