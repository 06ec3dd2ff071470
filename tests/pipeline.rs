use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use sinkhound::collaborators::{
    Collaborators, DriverFlags, DriverHarness, ExploitConfirmation, ExploitSynthesis,
    PackageRegistry, StaticAnalysis, SynthesisFlags,
};
use sinkhound::config::{AnalysisConfig, Bound};
use sinkhound::errors::HoundError;
use sinkhound::models::{EntryPoint, ExploitResult, PackageData, SinkType, SynthesisResult};
use sinkhound::pipeline::tasks::{
    build_pipeline_with_order, CHECK_EXPLOIT, FILTER_BROWSER_APIS, GET_ENTRY_POINTS,
    RUN_INSTRUMENTED, SETUP_PACKAGE, SET_SINK_TYPE, SYNTHESIZE, TRIVIAL_EXPLOIT,
};
use sinkhound::pipeline::{build_pipeline, Context, RunOutcome, TaskStatus, TASK_ORDER};

/// One mock standing in for every external collaborator. Behavior is driven
/// by its fields; every call is appended to `calls` so tests can assert on
/// what actually ran.
struct Mock {
    calls: Arc<Mutex<Vec<&'static str>>>,
    download_count: Option<u64>,
    api_hits: Vec<String>,
    entry_points: Vec<EntryPoint>,
    sinks_hit: Option<Vec<String>>,
    sink_type: SinkType,
    synthesized: Option<String>,
    confirmed: Vec<ExploitResult>,
    fail_call: Option<&'static str>,
}

fn entry_point(name: &str) -> EntryPoint {
    EntryPoint {
        function_name: name.to_string(),
        num_arguments: 1,
        is_method: false,
        is_constructor: false,
        from_constructor: false,
    }
}

impl Default for Mock {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            download_count: Some(50_000),
            api_hits: vec!["eval".to_string()],
            entry_points: vec![entry_point("parse")],
            sinks_hit: Some(vec!["eval".to_string()]),
            sink_type: SinkType::Eval,
            synthesized: Some("__proto__[polluted]".to_string()),
            confirmed: vec![ExploitResult {
                exploit_function: "parse".to_string(),
                exploit_string: "__proto__[polluted]".to_string(),
            }],
            fail_call: None,
        }
    }
}

impl Mock {
    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PackageRegistry for Mock {
    async fn prepare_environment(
        &self,
        name: &str,
        _version: &str,
        cache_dir: &Path,
    ) -> Result<PathBuf, HoundError> {
        self.log("prepare_environment");
        if self.fail_call == Some("prepare_environment") {
            return Err(HoundError::Registry(format!(
                "npm install of {name} failed: E404 not found"
            )));
        }
        Ok(cache_dir.join(name))
    }

    async fn read_version(&self, _pkg_dir: &Path) -> Result<String, HoundError> {
        self.log("read_version");
        Ok("1.3.0".to_string())
    }

    async fn download_count(
        &self,
        package: &PackageData,
        target: u64,
        bound: Bound,
        _output_dir: &Path,
    ) -> Result<u64, HoundError> {
        self.log("download_count");
        match self.download_count {
            Some(count) => Ok(count),
            None => Err(HoundError::Policy(format!(
                "Package {} has 3 weekly downloads, outside {} bound of {}",
                package.name(),
                bound,
                target
            ))),
        }
    }
}

#[async_trait]
impl StaticAnalysis for Mock {
    async fn has_entry_file(&self, _pkg_dir: &Path) -> Result<(), HoundError> {
        self.log("has_entry_file");
        Ok(())
    }

    async fn used_apis(
        &self,
        _pkg_dir: &Path,
        api_list: &[String],
    ) -> Result<Vec<String>, HoundError> {
        self.log("used_apis");
        Ok(self
            .api_hits
            .iter()
            .filter(|hit| api_list.contains(hit))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DriverHarness for Mock {
    async fn install_dependencies(&self, _pkg_dir: &Path) -> Result<(), HoundError> {
        self.log("install_dependencies");
        Ok(())
    }

    async fn build_driver(
        &self,
        _package: &PackageData,
        _instrumented: bool,
        _baseline: bool,
        output_dir: &Path,
        _flags: DriverFlags,
    ) -> Result<PathBuf, HoundError> {
        self.log("build_driver");
        Ok(output_dir.join("driver.js"))
    }

    async fn run_uninstrumented(
        &self,
        _driver: &Path,
        _fail_on_output_error: bool,
        _fail_on_non_zero_exit: bool,
    ) -> Result<(), HoundError> {
        self.log("run_uninstrumented");
        Ok(())
    }

    async fn run_instrumented_driver(
        &self,
        _driver: &Path,
        _require_sink_hit: bool,
        _fail_on_output_error: bool,
        _fail_on_non_zero_exit: bool,
    ) -> Result<Option<Vec<String>>, HoundError> {
        self.log("run_instrumented_driver");
        Ok(self.sinks_hit.clone())
    }

    async fn run_taint_analysis(
        &self,
        driver: &Path,
        _policies: &str,
        _fail_on_output_error: bool,
        _fail_on_non_zero_exit: bool,
        _honey_objects: bool,
    ) -> Result<PathBuf, HoundError> {
        self.log("run_taint_analysis");
        Ok(driver.with_extension("taint.json"))
    }
}

#[async_trait]
impl ExploitSynthesis for Mock {
    async fn entry_points(
        &self,
        _package: &PackageData,
        _tmp_dir: &Path,
    ) -> Result<Vec<EntryPoint>, HoundError> {
        self.log("entry_points");
        Ok(self.entry_points.clone())
    }

    async fn annotate_tree(
        &self,
        _package: &PackageData,
        _min_num_deps: u64,
        _min_depth: u64,
    ) -> Result<Value, HoundError> {
        self.log("annotate_tree");
        Ok(json!({"numDependencies": 3, "maxDepth": 1, "noInstrument": false}))
    }

    async fn classify_sink(&self, _taint_report: &Path) -> Result<SinkType, HoundError> {
        self.log("classify_sink");
        Ok(self.sink_type)
    }

    fn trivial_exploit(&self, sink_type: SinkType) -> Result<String, HoundError> {
        self.log("trivial_exploit");
        match sink_type {
            SinkType::Exec => Ok("touch sinkhound-proof".to_string()),
            SinkType::Eval => Ok("require('fs').writeFileSync('sinkhound-proof', '1')".to_string()),
        }
    }

    async fn synthesize(
        &self,
        _taint_report: &Path,
        _flags: SynthesisFlags,
        _solving_time: u64,
    ) -> Result<SynthesisResult, HoundError> {
        self.log("synthesize");
        match &self.synthesized {
            Some(payload) => Ok(SynthesisResult {
                smt_statement: "(declare-const input String)\n(check-sat)\n".to_string(),
                smt_solution: json!({ "input": payload }),
                solving_time_sec: 0.42,
                abstract_value: json!({"tag": "string"}),
                concretized: Some(json!(payload)),
            }),
            None => Err(HoundError::Synthesis("solver found no model: unsat".into())),
        }
    }
}

#[async_trait]
impl ExploitConfirmation for Mock {
    async fn confirm(
        &self,
        _package: &PackageData,
        _fail_on_non_zero_exit: bool,
        _target_entry_point: Option<&str>,
        _input_seed: &[String],
        _output_dir: &Path,
    ) -> Result<Vec<ExploitResult>, HoundError> {
        self.log("confirm");
        Ok(self.confirmed.clone())
    }
}

fn collaborators(mock: &Arc<Mock>) -> Collaborators {
    Collaborators {
        registry: mock.clone(),
        statics: mock.clone(),
        harness: mock.clone(),
        synthesis: mock.clone(),
        confirmation: mock.clone(),
    }
}

fn context_with(config: AnalysisConfig) -> Context {
    Context::new(Arc::new(config), PackageData::new("left-pad", None))
}

#[tokio::test]
async fn full_run_halts_at_check_exploit() {
    let mock = Arc::new(Mock::default());
    let pipeline = build_pipeline(&collaborators(&mock));
    let config = AnalysisConfig {
        target_download_count: 1000,
        ..Default::default()
    };

    let (ctx, outcome) = pipeline.run(context_with(config)).await.unwrap();
    assert_eq!(outcome, RunOutcome::Halted { task: CHECK_EXPLOIT });

    let package = ctx.into_package();
    assert_eq!(package.download_count(), Some(50_000));
    assert_eq!(package.version(), "1.3.0");
    assert_eq!(package.sinks(), Some(&["eval".to_string()][..]));
    assert_eq!(package.sinks_hit(), Some(&["eval".to_string()][..]));
    assert_eq!(package.entry_points().len(), 1);
    assert_eq!(package.sink_type(), SinkType::Eval);
    assert_eq!(package.candidate_exploit(), &json!("__proto__[polluted]"));
    assert_eq!(package.exploit_results().map(|r| r.len()), Some(1));

    // Every declared task ran exactly once, in order, and only the last
    // entry is a halt.
    let ledger = package.task_results();
    assert_eq!(ledger.len(), TASK_ORDER.len());
    let names: Vec<&str> = ledger.keys().map(|k| k.as_str()).collect();
    assert_eq!(names, TASK_ORDER.to_vec());
    for (name, outcome) in ledger.iter() {
        let expected = if name == CHECK_EXPLOIT {
            TaskStatus::Halt
        } else {
            TaskStatus::Continue
        };
        assert_eq!(outcome.status, expected, "task {name}");
        assert!(outcome.result.is_none());
    }
}

#[tokio::test]
async fn zero_download_target_skips_registry_entirely() {
    let mock = Arc::new(Mock::default());
    let pipeline =
        build_pipeline_with_order(&collaborators(&mock), vec![sinkhound::pipeline::tasks::DOWNLOAD_COUNT]);

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let package = ctx.into_package();
    assert_eq!(package.download_count(), None);
    assert!(mock.calls.lock().unwrap().is_empty());
    assert_eq!(
        package.task_results()[sinkhound::pipeline::tasks::DOWNLOAD_COUNT].status,
        TaskStatus::Continue
    );
}

#[tokio::test]
async fn browser_api_usage_aborts_with_named_api() {
    let mock = Arc::new(Mock {
        api_hits: vec!["XMLHttpRequest".to_string()],
        ..Default::default()
    });
    let pipeline = build_pipeline(&collaborators(&mock));

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Aborted {
            task: FILTER_BROWSER_APIS
        }
    );
    assert!(outcome.is_failure());

    let package = ctx.into_package();
    // The fact is recorded even though the task aborted on it.
    assert_eq!(
        package.browser_apis(),
        Some(&["XMLHttpRequest".to_string()][..])
    );
    let entry = &package.task_results()[FILTER_BROWSER_APIS];
    assert_eq!(entry.status, TaskStatus::Abort);
    let payload = entry.result.as_ref().unwrap();
    assert_eq!(payload.kind, "policy");
    assert!(payload.message.contains("XMLHttpRequest"));
}

#[tokio::test]
async fn empty_entry_points_records_fact_then_aborts() {
    let mock = Arc::new(Mock {
        entry_points: Vec::new(),
        ..Default::default()
    });
    let pipeline = build_pipeline(&collaborators(&mock));

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Aborted {
            task: GET_ENTRY_POINTS
        }
    );

    let package = ctx.into_package();
    assert!(package.entry_points().is_empty());
    let payload = package.task_results()[GET_ENTRY_POINTS]
        .result
        .as_ref()
        .unwrap();
    assert!(payload.message.contains("no entry points"));
}

#[tokio::test]
async fn collaborator_failure_leaves_single_abort_entry() {
    let mock = Arc::new(Mock {
        fail_call: Some("prepare_environment"),
        ..Default::default()
    });
    let pipeline = build_pipeline(&collaborators(&mock));

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Aborted { task: SETUP_PACKAGE });

    let package = ctx.into_package();
    // download-count (skipped check) plus the aborted setup, nothing after.
    assert_eq!(package.task_results().len(), 2);
    let entry = &package.task_results()[SETUP_PACKAGE];
    assert_eq!(entry.status, TaskStatus::Abort);
    let payload = entry.result.as_ref().unwrap();
    assert_eq!(payload.kind, "registry");
    assert!(!payload.message.is_empty());
}

#[tokio::test]
async fn failed_synthesis_aborts_at_synthesize() {
    let mock = Arc::new(Mock {
        synthesized: None,
        ..Default::default()
    });
    let pipeline = build_pipeline(&collaborators(&mock));

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Aborted { task: SYNTHESIZE });

    let payload = ctx.into_package().task_results()[SYNTHESIZE]
        .result
        .as_ref()
        .unwrap()
        .clone();
    assert_eq!(payload.kind, "synthesis");
}

#[tokio::test]
async fn unconfirmed_synthesized_exploit_aborts() {
    let mock = Arc::new(Mock {
        confirmed: Vec::new(),
        ..Default::default()
    });
    let pipeline = build_pipeline(&collaborators(&mock));

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Aborted { task: CHECK_EXPLOIT });

    let package = ctx.into_package();
    assert_eq!(package.exploit_results().map(|r| r.len()), Some(0));
    let payload = package.task_results()[CHECK_EXPLOIT]
        .result
        .as_ref()
        .unwrap()
        .clone();
    assert!(payload.message.contains("no confirmed exploits"));
}

#[tokio::test]
async fn trivial_exploit_order_tolerates_unconfirmed_exploit() {
    // The canned-payload route flips abort-on-failure off, so an exploit
    // that never fires still lets the run complete.
    let mock = Arc::new(Mock {
        confirmed: Vec::new(),
        ..Default::default()
    });
    let order = vec![RUN_INSTRUMENTED, SET_SINK_TYPE, TRIVIAL_EXPLOIT, CHECK_EXPLOIT];
    let pipeline = build_pipeline_with_order(&collaborators(&mock), order.clone());

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let package = ctx.into_package();
    let names: Vec<&str> = package.task_results().keys().map(|k| k.as_str()).collect();
    assert_eq!(names, order);
    assert!(package
        .candidate_exploit()
        .as_str()
        .unwrap()
        .contains("sinkhound-proof"));
}

#[tokio::test]
async fn trivial_exploit_order_halts_on_confirmation() {
    let mock = Arc::new(Mock {
        sink_type: SinkType::Exec,
        confirmed: vec![ExploitResult {
            exploit_function: "run".to_string(),
            exploit_string: "touch sinkhound-proof".to_string(),
        }],
        ..Default::default()
    });
    let pipeline = build_pipeline_with_order(
        &collaborators(&mock),
        vec![RUN_INSTRUMENTED, SET_SINK_TYPE, TRIVIAL_EXPLOIT, CHECK_EXPLOIT],
    );

    let (ctx, outcome) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Halted { task: CHECK_EXPLOIT });
    assert_eq!(ctx.package().sink_type(), SinkType::Exec);
}

#[tokio::test]
async fn record_round_trips_after_aborted_run() {
    let mock = Arc::new(Mock {
        api_hits: vec!["XMLHttpRequest".to_string()],
        ..Default::default()
    });
    let pipeline = build_pipeline(&collaborators(&mock));
    let (ctx, _) = pipeline
        .run(context_with(AnalysisConfig::default()))
        .await
        .unwrap();

    let package = ctx.into_package();
    let record = package.to_record();
    let restored = PackageData::from_record(&record).unwrap();
    assert_eq!(restored.name(), package.name());
    assert_eq!(restored.task_results().len(), package.task_results().len());
    let names: Vec<&String> = restored.task_results().keys().collect();
    let expected: Vec<&String> = package.task_results().keys().collect();
    assert_eq!(names, expected);
}
