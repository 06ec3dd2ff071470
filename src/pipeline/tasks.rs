use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::context::Context;
use super::runner::Pipeline;
use super::task::{abort_with_error, complete, Task, TaskStatus, TaskTransition};
use crate::collaborators::{
    Collaborators, DriverFlags, DriverHarness, ExploitConfirmation, ExploitSynthesis,
    PackageRegistry, StaticAnalysis, SynthesisFlags,
};
use crate::errors::HoundError;

pub const DOWNLOAD_COUNT: &str = "download-count";
pub const SETUP_PACKAGE: &str = "setup-package";
pub const FILTER_BY_MAIN: &str = "filter-by-main";
pub const FILTER_BROWSER_APIS: &str = "filter-browser-apis";
pub const FILTER_SINKS: &str = "filter-sinks";
pub const TAINT_SMOKE_RUN: &str = "taint-smoke-run";
pub const SETUP_DEPENDENCIES: &str = "setup-dependencies";
pub const GET_ENTRY_POINTS: &str = "get-entry-points";
pub const RUN_NON_INSTRUMENTED: &str = "run-non-instrumented";
pub const ANNOTATE_NO_INSTRUMENT: &str = "annotate-no-instrument";
pub const RUN_INSTRUMENTED: &str = "run-instrumented";
pub const SET_SINK_TYPE: &str = "set-sink-type";
pub const TRIVIAL_EXPLOIT: &str = "trivial-exploit";
pub const SYNTHESIZE: &str = "synthesize";
pub const CHECK_EXPLOIT: &str = "check-exploit";

/// The declared execution order. `trivial-exploit` is registered but not
/// ordered: it is the no-solver alternative to `synthesize` and is only
/// reachable through a custom order.
pub const TASK_ORDER: [&str; 14] = [
    DOWNLOAD_COUNT,
    SETUP_PACKAGE,
    FILTER_BY_MAIN,
    FILTER_BROWSER_APIS,
    FILTER_SINKS,
    TAINT_SMOKE_RUN,
    SETUP_DEPENDENCIES,
    GET_ENTRY_POINTS,
    RUN_NON_INSTRUMENTED,
    ANNOTATE_NO_INSTRUMENT,
    RUN_INSTRUMENTED,
    SET_SINK_TYPE,
    SYNTHESIZE,
    CHECK_EXPLOIT,
];

/// Build the full pipeline with every task registered against the default
/// declared order.
pub fn build_pipeline(collaborators: &Collaborators) -> Pipeline {
    build_pipeline_with_order(collaborators, TASK_ORDER.to_vec())
}

pub fn build_pipeline_with_order(
    collaborators: &Collaborators,
    order: Vec<&'static str>,
) -> Pipeline {
    let mut pipeline = Pipeline::new(order);
    pipeline.register(Box::new(DownloadCountTask {
        registry: collaborators.registry.clone(),
    }));
    pipeline.register(Box::new(SetupPackageTask {
        registry: collaborators.registry.clone(),
    }));
    pipeline.register(Box::new(FilterByMainTask {
        statics: collaborators.statics.clone(),
    }));
    pipeline.register(Box::new(FilterBrowserApisTask {
        statics: collaborators.statics.clone(),
    }));
    pipeline.register(Box::new(FilterSinksTask {
        statics: collaborators.statics.clone(),
    }));
    pipeline.register(Box::new(TaintSmokeRunTask {
        harness: collaborators.harness.clone(),
    }));
    pipeline.register(Box::new(SetupDependenciesTask {
        harness: collaborators.harness.clone(),
    }));
    pipeline.register(Box::new(GetEntryPointsTask {
        synthesis: collaborators.synthesis.clone(),
    }));
    pipeline.register(Box::new(RunNonInstrumentedTask {
        harness: collaborators.harness.clone(),
    }));
    pipeline.register(Box::new(AnnotateNoInstrumentTask {
        synthesis: collaborators.synthesis.clone(),
    }));
    pipeline.register(Box::new(RunInstrumentedTask {
        harness: collaborators.harness.clone(),
    }));
    pipeline.register(Box::new(SetSinkTypeTask {
        synthesis: collaborators.synthesis.clone(),
    }));
    pipeline.register(Box::new(TrivialExploitTask {
        synthesis: collaborators.synthesis.clone(),
    }));
    pipeline.register(Box::new(SynthesizeTask {
        synthesis: collaborators.synthesis.clone(),
    }));
    pipeline.register(Box::new(CheckExploitTask {
        confirmation: collaborators.confirmation.clone(),
    }));
    pipeline
}

struct DownloadCountTask {
    registry: Arc<dyn PackageRegistry>,
}

#[async_trait]
impl Task for DownloadCountTask {
    fn name(&self) -> &'static str {
        DOWNLOAD_COUNT
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Check download count");
        let started = Instant::now();
        let target = context.config().target_download_count;
        if target > 0 {
            let bound = context.config().download_bound;
            let output_dir = context.config().output_dir.clone();
            let result = self
                .registry
                .download_count(context.package(), target, bound, &output_dir)
                .await;
            match result {
                Ok(count) => context.package_mut().set_download_count(count),
                Err(error) => return abort_with_error(context, self.name(), error, started),
            }
        } else {
            debug!(task = self.name(), "Skipping check because target is 0");
        }
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct SetupPackageTask {
    registry: Arc<dyn PackageRegistry>,
}

#[async_trait]
impl Task for SetupPackageTask {
    fn name(&self) -> &'static str {
        SETUP_PACKAGE
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Setup package environment");
        let started = Instant::now();
        let name = context.package().name().to_string();
        let version = context.package().version();
        let cache_dir = context.config().cache_dir.clone();

        let package_path = match self
            .registry
            .prepare_environment(&name, &version, &cache_dir)
            .await
        {
            Ok(path) => path,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        debug!(path = %package_path.display(), "Package path resolved");
        context.package_mut().set_package_path(package_path);

        debug!(task = self.name(), "Get and set package version");
        let version = match self.registry.read_version(context.package().path()).await {
            Ok(version) => version,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.package_mut().set_version(version);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct FilterByMainTask {
    statics: Arc<dyn StaticAnalysis>,
}

#[async_trait]
impl Task for FilterByMainTask {
    fn name(&self) -> &'static str {
        FILTER_BY_MAIN
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Check for entry file");
        let started = Instant::now();
        if let Err(error) = self.statics.has_entry_file(context.package().path()).await {
            return abort_with_error(context, self.name(), error, started);
        }
        context.package_mut().set_has_main(true);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct FilterBrowserApisTask {
    statics: Arc<dyn StaticAnalysis>,
}

#[async_trait]
impl Task for FilterBrowserApisTask {
    fn name(&self) -> &'static str {
        FILTER_BROWSER_APIS
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Ensure no browser APIs are used");
        let started = Instant::now();
        let browser_apis = context.config().browser_apis.clone();
        let used = match self
            .statics
            .used_apis(context.package().path(), &browser_apis)
            .await
        {
            Ok(used) => used,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.package_mut().set_browser_apis(used.clone());
        if !used.is_empty() {
            return abort_with_error(
                context,
                self.name(),
                HoundError::Policy(format!("Package uses browser APIs: {}", used.join(", "))),
                started,
            );
        }
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct FilterSinksTask {
    statics: Arc<dyn StaticAnalysis>,
}

#[async_trait]
impl Task for FilterSinksTask {
    fn name(&self) -> &'static str {
        FILTER_SINKS
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Check for presence of sinks");
        let started = Instant::now();
        let sinks = context.config().sinks.clone();
        let present = match self
            .statics
            .used_apis(context.package().path(), &sinks)
            .await
        {
            Ok(present) => present,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.package_mut().set_sinks(present.clone());
        if present.is_empty() {
            return abort_with_error(
                context,
                self.name(),
                HoundError::Policy("Package has no sinks".into()),
                started,
            );
        }
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct TaintSmokeRunTask {
    harness: Arc<dyn DriverHarness>,
}

#[async_trait]
impl Task for TaintSmokeRunTask {
    fn name(&self) -> &'static str {
        TAINT_SMOKE_RUN
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Run pre-built instrumented package driver");
        let started = Instant::now();
        let driver = context
            .package()
            .path()
            .join(format!("run-{}.js", context.package().name()));
        let config = context.config();
        let (require_sink_hit, fail_on_output_error, fail_on_non_zero_exit) = (
            config.require_sink_hit,
            config.fail_on_output_error,
            config.fail_on_non_zero_exit,
        );
        let sinks_hit = match self
            .harness
            .run_instrumented_driver(
                &driver,
                require_sink_hit,
                fail_on_output_error,
                fail_on_non_zero_exit,
            )
            .await
        {
            Ok(sinks_hit) => sinks_hit.unwrap_or_default(),
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        debug!(task = self.name(), sinks = ?sinks_hit, "Sinks hit");
        context.package_mut().set_sinks_hit(sinks_hit);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct SetupDependenciesTask {
    harness: Arc<dyn DriverHarness>,
}

#[async_trait]
impl Task for SetupDependenciesTask {
    fn name(&self) -> &'static str {
        SETUP_DEPENDENCIES
    }

    async fn run(&self, context: Context) -> TaskTransition {
        debug!(task = self.name(), "Setup package dependencies");
        let started = Instant::now();
        if let Err(error) = self
            .harness
            .install_dependencies(context.package().path())
            .await
        {
            return abort_with_error(context, self.name(), error, started);
        }
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct GetEntryPointsTask {
    synthesis: Arc<dyn ExploitSynthesis>,
}

#[async_trait]
impl Task for GetEntryPointsTask {
    fn name(&self) -> &'static str {
        GET_ENTRY_POINTS
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Get package entry points");
        let started = Instant::now();
        let tmp_dir = context.config().tmp_dir.clone();
        let entry_points = match self
            .synthesis
            .entry_points(context.package(), &tmp_dir)
            .await
        {
            Ok(entry_points) => entry_points,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        let empty = entry_points.is_empty();
        context.package_mut().set_entry_points(entry_points);
        if empty {
            return abort_with_error(
                context,
                self.name(),
                HoundError::Policy("Package has no entry points".into()),
                started,
            );
        }
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct RunNonInstrumentedTask {
    harness: Arc<dyn DriverHarness>,
}

#[async_trait]
impl Task for RunNonInstrumentedTask {
    fn name(&self) -> &'static str {
        RUN_NON_INSTRUMENTED
    }

    async fn run(&self, context: Context) -> TaskTransition {
        debug!(task = self.name(), "Setup non-instrumented package driver");
        let started = Instant::now();
        let config = context.config();
        let (baseline, output_dir) = (config.baseline, config.output_dir.clone());
        let (fail_on_output_error, fail_on_non_zero_exit) =
            (config.fail_on_output_error, config.fail_on_non_zero_exit);

        let driver = match self
            .harness
            .build_driver(
                context.package(),
                false,
                baseline,
                &output_dir,
                DriverFlags::default(),
            )
            .await
        {
            Ok(driver) => driver,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        debug!(task = self.name(), "Run non-instrumented package driver");
        if let Err(error) = self
            .harness
            .run_uninstrumented(&driver, fail_on_output_error, fail_on_non_zero_exit)
            .await
        {
            return abort_with_error(context, self.name(), error, started);
        }
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct AnnotateNoInstrumentTask {
    synthesis: Arc<dyn ExploitSynthesis>,
}

#[async_trait]
impl Task for AnnotateNoInstrumentTask {
    fn name(&self) -> &'static str {
        ANNOTATE_NO_INSTRUMENT
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Annotate no-instrument");
        let started = Instant::now();
        let (min_num_deps, min_depth) =
            (context.config().min_num_deps, context.config().min_depth);
        let metadata = match self
            .synthesis
            .annotate_tree(context.package(), min_num_deps, min_depth)
            .await
        {
            Ok(metadata) => metadata,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.package_mut().set_tree_metadata(metadata);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct RunInstrumentedTask {
    harness: Arc<dyn DriverHarness>,
}

#[async_trait]
impl Task for RunInstrumentedTask {
    fn name(&self) -> &'static str {
        RUN_INSTRUMENTED
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Setup instrumented package driver");
        let started = Instant::now();
        let config = context.config();
        let (baseline, output_dir) = (config.baseline, config.output_dir.clone());
        let policies = config.policies.clone();
        let (fail_on_output_error, fail_on_non_zero_exit, honey_objects) = (
            config.fail_on_output_error,
            config.fail_on_non_zero_exit,
            config.honey_objects,
        );
        let flags = DriverFlags {
            object_reconstruction: config.fuzz_object_reconstruction,
            strings_only: config.fuzz_strings_only,
            mix_fuzz: config.mix_fuzz,
            restarts: config.fuzz_restart,
        };

        let driver = match self
            .harness
            .build_driver(context.package(), true, baseline, &output_dir, flags)
            .await
        {
            Ok(driver) => driver,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        debug!(task = self.name(), "Run instrumented package driver");
        let report = match self
            .harness
            .run_taint_analysis(
                &driver,
                &policies,
                fail_on_output_error,
                fail_on_non_zero_exit,
                honey_objects,
            )
            .await
        {
            Ok(report) => report,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.set_taint_report(report);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct SetSinkTypeTask {
    synthesis: Arc<dyn ExploitSynthesis>,
}

#[async_trait]
impl Task for SetSinkTypeTask {
    fn name(&self) -> &'static str {
        SET_SINK_TYPE
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Checking taint output for vulnerable sinks");
        let started = Instant::now();
        let sink_type = match self.synthesis.classify_sink(context.taint_report()).await {
            Ok(sink_type) => sink_type,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.package_mut().set_sink_type(sink_type);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct TrivialExploitTask {
    synthesis: Arc<dyn ExploitSynthesis>,
}

#[async_trait]
impl Task for TrivialExploitTask {
    fn name(&self) -> &'static str {
        TRIVIAL_EXPLOIT
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Generating trivial exploit");
        let started = Instant::now();
        let sink_type = context.package().sink_type();
        let payload = match self.synthesis.trivial_exploit(sink_type) {
            Ok(payload) => payload,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.package_mut().set_candidate_exploit(json!(payload));
        // A canned payload is best-effort; a failed confirmation should not
        // fail the run.
        context.set_abort_on_exploit_failure(false);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct SynthesizeTask {
    synthesis: Arc<dyn ExploitSynthesis>,
}

#[async_trait]
impl Task for SynthesizeTask {
    fn name(&self) -> &'static str {
        SYNTHESIZE
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Running inference and synthesis to generate exploit");
        let started = Instant::now();
        let config = context.config();
        let flags = SynthesisFlags {
            honey_objects: config.honey_objects,
            inference: config.inference,
            enumerator: config.enumerator,
            enumerator_templates: config.enumerator_templates,
            polyglot_aci_payload: config.polyglot_aci_payload,
            polyglot_ace_payload: config.polyglot_ace_payload,
            string_only: config.string_only_synthesis,
        };
        let solving_time = config.solving_time;

        let result = match self
            .synthesis
            .synthesize(context.taint_report(), flags, solving_time)
            .await
        {
            Ok(result) => result,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        let candidate = result.concretized.clone().unwrap_or(Value::Null);
        context.package_mut().set_synthesis_result(result);
        context.package_mut().set_candidate_exploit(candidate);
        // A synthesized exploit is expected to confirm; treat failure to
        // confirm as a failed run.
        context.set_abort_on_exploit_failure(true);
        complete(context, self.name(), started, TaskStatus::Continue)
    }
}

struct CheckExploitTask {
    confirmation: Arc<dyn ExploitConfirmation>,
}

#[async_trait]
impl Task for CheckExploitTask {
    fn name(&self) -> &'static str {
        CHECK_EXPLOIT
    }

    async fn run(&self, mut context: Context) -> TaskTransition {
        debug!(task = self.name(), "Checking generated exploit to confirm vulnerability");
        let started = Instant::now();
        let config = context.config();
        let fail_on_non_zero_exit = config.fail_on_non_zero_exit;
        let target_entry_point = config.target_entry_point.clone();
        let input_seed = config.input_seed.clone();
        let output_dir = config.output_dir.clone();

        let confirmed = match self
            .confirmation
            .confirm(
                context.package(),
                fail_on_non_zero_exit,
                target_entry_point.as_deref(),
                &input_seed,
                &output_dir,
            )
            .await
        {
            Ok(confirmed) => confirmed,
            Err(error) => return abort_with_error(context, self.name(), error, started),
        };
        context.package_mut().set_exploit_results(confirmed.clone());

        if context.abort_on_exploit_failure() && confirmed.is_empty() {
            return abort_with_error(
                context,
                self.name(),
                HoundError::Policy("Package has no confirmed exploits".into()),
                started,
            );
        }
        let mut final_status = TaskStatus::Continue;
        if !confirmed.is_empty() {
            let functions: Vec<&str> = confirmed
                .iter()
                .map(|e| e.exploit_function.as_str())
                .collect();
            info!(functions = ?functions, "Exploit(s) found");
            final_status = TaskStatus::Halt;
        }
        complete(context, self.name(), started, final_status)
    }
}
