use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::ErrorPayload;
use crate::pipeline::task::TaskStatus;

/// The class of sensitive operation a tainted value reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkType {
    /// Code evaluation (`eval`, `Function`, `vm.*`).
    Eval,
    /// Command execution (`child_process.*`).
    Exec,
}

impl std::fmt::Display for SinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eval => write!(f, "eval"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

/// A callable surface of the package discovered by entry-point enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub function_name: String,
    pub num_arguments: u32,
    pub is_method: bool,
    pub is_constructor: bool,
    pub from_constructor: bool,
}

/// Output of the inference + constraint-solving stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// The SMT statement the solver was asked to satisfy.
    pub smt_statement: String,
    /// The model returned by the solver, if any.
    pub smt_solution: Value,
    /// Wall-clock solver time in seconds.
    pub solving_time_sec: f64,
    /// The inferred abstract attacker-controlled value.
    pub abstract_value: Value,
    /// Concretization of the abstract value, when one was derivable.
    pub concretized: Option<Value>,
}

/// A confirmed exploit: the entry point it fired through and the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploitResult {
    pub exploit_function: String,
    pub exploit_string: String,
}

/// Ledger entry for one executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    /// Elapsed wall-clock time in milliseconds.
    pub time: u64,
    /// Structured error payload, present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ErrorPayload>,
}

/// The accumulating subject of one analysis run.
///
/// Every fact starts unset and is written exactly once by the task that
/// discovers it. Reading a fact before its producing task has completed is a
/// programming error and panics; callers must sequence reads after the
/// producing task.
#[derive(Debug, Clone)]
pub struct PackageData {
    name: String,
    index: Option<u64>,
    version: Option<String>,
    download_count: Option<u64>,
    package_path: Option<PathBuf>,
    has_main: Option<bool>,
    browser_apis: Option<Vec<String>>,
    sinks: Option<Vec<String>>,
    sinks_hit: Option<Vec<String>>,
    entry_points: Option<Vec<EntryPoint>>,
    tree_metadata: Option<Value>,
    sink_type: Option<SinkType>,
    synthesis_result: Option<SynthesisResult>,
    candidate_exploit: Option<Value>,
    exploit_results: Option<Vec<ExploitResult>>,
    task_results: IndexMap<String, TaskOutcome>,
}

impl PackageData {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            version,
            download_count: None,
            package_path: None,
            has_main: None,
            browser_apis: None,
            sinks: None,
            sinks_hit: None,
            entry_points: None,
            tree_metadata: None,
            sink_type: None,
            synthesis_result: None,
            candidate_exploit: None,
            exploit_results: None,
            task_results: IndexMap::new(),
        }
    }

    /// `name@version`, with `*` standing in for an unknown version.
    pub fn identifier(&self) -> String {
        format!("{}@{}", self.name, self.version())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> String {
        self.version.clone().unwrap_or_else(|| "*".to_string())
    }

    pub fn path(&self) -> &Path {
        self.package_path
            .as_deref()
            .expect("attempted to access unset package path")
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        self.entry_points
            .as_deref()
            .expect("attempted to access unset entry points")
    }

    pub fn sink_type(&self) -> SinkType {
        self.sink_type
            .expect("attempted to access unset sink type")
    }

    pub fn candidate_exploit(&self) -> &Value {
        self.candidate_exploit
            .as_ref()
            .expect("attempted to access unset candidate exploit")
    }

    pub fn download_count(&self) -> Option<u64> {
        self.download_count
    }

    pub fn browser_apis(&self) -> Option<&[String]> {
        self.browser_apis.as_deref()
    }

    pub fn sinks(&self) -> Option<&[String]> {
        self.sinks.as_deref()
    }

    pub fn sinks_hit(&self) -> Option<&[String]> {
        self.sinks_hit.as_deref()
    }

    pub fn exploit_results(&self) -> Option<&[ExploitResult]> {
        self.exploit_results.as_deref()
    }

    pub fn set_index(&mut self, index: u64) {
        self.index = Some(index);
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = Some(version.into());
    }

    pub fn set_download_count(&mut self, count: u64) {
        self.download_count = Some(count);
    }

    pub fn set_package_path(&mut self, path: PathBuf) {
        self.package_path = Some(path);
    }

    pub fn set_has_main(&mut self, has_main: bool) {
        self.has_main = Some(has_main);
    }

    pub fn set_browser_apis(&mut self, apis: Vec<String>) {
        self.browser_apis = Some(apis);
    }

    pub fn set_sinks(&mut self, sinks: Vec<String>) {
        self.sinks = Some(sinks);
    }

    pub fn set_sinks_hit(&mut self, sinks_hit: Vec<String>) {
        self.sinks_hit = Some(sinks_hit);
    }

    pub fn set_entry_points(&mut self, entry_points: Vec<EntryPoint>) {
        self.entry_points = Some(entry_points);
    }

    pub fn set_tree_metadata(&mut self, metadata: Value) {
        self.tree_metadata = Some(metadata);
    }

    pub fn set_sink_type(&mut self, sink_type: SinkType) {
        self.sink_type = Some(sink_type);
    }

    pub fn set_synthesis_result(&mut self, result: SynthesisResult) {
        self.synthesis_result = Some(result);
    }

    pub fn set_candidate_exploit(&mut self, exploit: Value) {
        self.candidate_exploit = Some(exploit);
    }

    pub fn set_exploit_results(&mut self, results: Vec<ExploitResult>) {
        self.exploit_results = Some(results);
    }

    /// Append one ledger entry. Entries are keyed by task name, kept in
    /// execution order, and never overwritten.
    pub fn register_task_result(&mut self, task_name: impl Into<String>, outcome: TaskOutcome) {
        let task_name = task_name.into();
        debug_assert!(
            !self.task_results.contains_key(&task_name),
            "duplicate ledger entry for task {task_name}"
        );
        self.task_results.insert(task_name, outcome);
    }

    pub fn task_results(&self) -> &IndexMap<String, TaskOutcome> {
        &self.task_results
    }

    /// Flat record for storage. Unset facts serialize as an empty-string
    /// marker rather than being omitted; the name field travels as `id`; the
    /// ledger is a nested mapping keyed by task name in execution order.
    pub fn to_record(&self) -> Value {
        fn opt<T: Serialize>(value: &Option<T>) -> Value {
            match value {
                Some(v) => serde_json::to_value(v).unwrap_or(Value::Null),
                None => Value::String(String::new()),
            }
        }

        let mut record = Map::new();
        record.insert("id".into(), json!(self.name));
        record.insert("index".into(), opt(&self.index));
        record.insert("version".into(), opt(&self.version));
        record.insert("downloadCount".into(), opt(&self.download_count));
        record.insert(
            "packagePath".into(),
            match &self.package_path {
                Some(p) => json!(p.to_string_lossy()),
                None => Value::String(String::new()),
            },
        );
        record.insert("hasMain".into(), opt(&self.has_main));
        record.insert("browserAPIs".into(), opt(&self.browser_apis));
        record.insert("sinks".into(), opt(&self.sinks));
        record.insert("sinksHit".into(), opt(&self.sinks_hit));
        record.insert("entryPoints".into(), opt(&self.entry_points));
        record.insert("treeMetadata".into(), opt(&self.tree_metadata));
        record.insert("sinkType".into(), opt(&self.sink_type));
        record.insert("synthesisResult".into(), opt(&self.synthesis_result));
        record.insert("candidateExploit".into(), opt(&self.candidate_exploit));
        record.insert("exploitResults".into(), opt(&self.exploit_results));
        record.insert(
            "taskResults".into(),
            serde_json::to_value(&self.task_results).unwrap_or(Value::Null),
        );
        Value::Object(record)
    }

    /// Rebuild a record from its flat form. The empty-string marker and a
    /// missing key both read back as unset.
    pub fn from_record(record: &Value) -> Result<Self, crate::errors::HoundError> {
        fn field<'a>(record: &'a Value, key: &str) -> Option<&'a Value> {
            match record.get(key) {
                Some(Value::String(s)) if s.is_empty() => None,
                Some(v) => Some(v),
                None => None,
            }
        }

        let name = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                crate::errors::HoundError::Internal("package record has no id field".into())
            })?
            .to_string();

        let mut data = Self::new(name, None);
        if let Some(v) = field(record, "index").and_then(Value::as_u64) {
            data.set_index(v);
        }
        if let Some(v) = field(record, "version").and_then(Value::as_str) {
            data.set_version(v);
        }
        if let Some(v) = field(record, "downloadCount").and_then(Value::as_u64) {
            data.set_download_count(v);
        }
        if let Some(v) = field(record, "packagePath").and_then(Value::as_str) {
            data.set_package_path(PathBuf::from(v));
        }
        if let Some(v) = field(record, "hasMain").and_then(Value::as_bool) {
            data.set_has_main(v);
        }
        if let Some(v) = field(record, "browserAPIs") {
            data.set_browser_apis(serde_json::from_value(v.clone())?);
        }
        if let Some(v) = field(record, "sinks") {
            data.set_sinks(serde_json::from_value(v.clone())?);
        }
        if let Some(v) = field(record, "sinksHit") {
            data.set_sinks_hit(serde_json::from_value(v.clone())?);
        }
        if let Some(v) = field(record, "entryPoints") {
            data.set_entry_points(serde_json::from_value(v.clone())?);
        }
        if let Some(v) = field(record, "treeMetadata") {
            data.set_tree_metadata(v.clone());
        }
        if let Some(v) = field(record, "sinkType") {
            data.set_sink_type(serde_json::from_value(v.clone())?);
        }
        if let Some(v) = field(record, "synthesisResult") {
            data.set_synthesis_result(serde_json::from_value(v.clone())?);
        }
        if let Some(v) = field(record, "candidateExploit") {
            data.set_candidate_exploit(v.clone());
        }
        if let Some(v) = field(record, "exploitResults") {
            data.set_exploit_results(serde_json::from_value(v.clone())?);
        }
        if let Some(Value::Object(ledger)) = record.get("taskResults") {
            for (task_name, outcome) in ledger {
                data.register_task_result(
                    task_name.clone(),
                    serde_json::from_value(outcome.clone())?,
                );
            }
        }
        Ok(data)
    }
}
