use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::exec::run_command;
use crate::errors::HoundError;
use crate::models::{EntryPoint, PackageData, SinkType, SynthesisResult};

/// Synthesis-stage toggles forwarded from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisFlags {
    pub honey_objects: bool,
    pub inference: bool,
    pub enumerator: bool,
    pub enumerator_templates: bool,
    pub polyglot_aci_payload: bool,
    pub polyglot_ace_payload: bool,
    pub string_only: bool,
}

/// Entry-point enumeration, sink classification and exploit synthesis.
#[async_trait]
pub trait ExploitSynthesis: Send + Sync {
    async fn entry_points(
        &self,
        package: &PackageData,
        tmp_dir: &Path,
    ) -> Result<Vec<EntryPoint>, HoundError>;

    /// Annotate the dependency tree, marking subtrees that exceed the
    /// thresholds as not-to-instrument; returns the tree metadata.
    async fn annotate_tree(
        &self,
        package: &PackageData,
        min_num_deps: u64,
        min_depth: u64,
    ) -> Result<Value, HoundError>;

    async fn classify_sink(&self, taint_report: &Path) -> Result<SinkType, HoundError>;

    /// Canned payload for a sink type, usable without solving.
    fn trivial_exploit(&self, sink_type: SinkType) -> Result<String, HoundError>;

    async fn synthesize(
        &self,
        taint_report: &Path,
        flags: SynthesisFlags,
        solving_time: u64,
    ) -> Result<SynthesisResult, HoundError>;
}

/// Proof that a payload reached its sink: both canned and synthesized
/// exploits drop this marker file next to the driver when they fire.
pub const PROOF_MARKER: &str = "sinkhound-proof";

const ENTRY_POINT_PROBE: &str = r#"// generated by sinkhound
const pkg = require(process.argv[2]);
const seen = [];
function describe(name, value, fromConstructor) {
  seen.push({
    functionName: name,
    numArguments: value.length,
    isMethod: false,
    isConstructor: /^[A-Z]/.test(name),
    fromConstructor,
  });
}
if (typeof pkg === 'function') describe(pkg.name || 'default', pkg, false);
for (const key of Object.keys(pkg)) {
  if (typeof pkg[key] === 'function') describe(key, pkg[key], false);
}
console.log(JSON.stringify(seen));
"#;

/// Solver-backed synthesis over a taint report.
pub struct SolverSynthesis {
    timeout_secs: u64,
}

impl SolverSynthesis {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn smt_statement(flow: &Value, flags: SynthesisFlags) -> String {
        let sink = flow
            .get("sink")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");
        let mut statement = String::from("(declare-const input String)\n");
        if let Some(constraints) = flow.get("constraints").and_then(|c| c.as_array()) {
            for c in constraints {
                if let Some(c) = c.as_str() {
                    statement.push_str(&format!("(assert {c})\n"));
                }
            }
        }
        if flags.string_only {
            statement.push_str("(assert (str.prefixof \"\" input))\n");
        }
        statement.push_str(&format!("; sink: {sink}\n(check-sat)\n(get-model)\n"));
        statement
    }

    fn parse_model(stdout: &str) -> Option<Value> {
        if !stdout.starts_with("sat") {
            return None;
        }
        // Pull string bindings out of the s-expression model; the concrete
        // payload is the binding named `input`.
        let re = regex::Regex::new(r#"define-fun\s+(\w+)\s+\(\)\s+String\s+"((?:[^"\\]|\\.)*)""#)
            .ok()?;
        let mut model = serde_json::Map::new();
        for cap in re.captures_iter(stdout) {
            model.insert(cap[1].to_string(), json!(cap[2].to_string()));
        }
        Some(Value::Object(model))
    }
}

#[async_trait]
impl ExploitSynthesis for SolverSynthesis {
    async fn entry_points(
        &self,
        package: &PackageData,
        tmp_dir: &Path,
    ) -> Result<Vec<EntryPoint>, HoundError> {
        tokio::fs::create_dir_all(tmp_dir).await?;
        let probe = tmp_dir.join("entry-point-probe.js");
        tokio::fs::write(&probe, ENTRY_POINT_PROBE).await?;

        let pkg_path = package.path().to_string_lossy().into_owned();
        let output = run_command(
            "node",
            &[&probe.to_string_lossy(), &pkg_path],
            Some(tmp_dir),
            self.timeout_secs,
        )
        .await?;
        if output.exit_code != 0 {
            return Err(HoundError::Analysis(format!(
                "entry point probe failed: {}",
                output.stderr.trim()
            )));
        }

        let line = output
            .stdout
            .lines()
            .rev()
            .find(|l| l.trim_start().starts_with('['))
            .ok_or_else(|| HoundError::Analysis("entry point probe produced no output".into()))?;
        let entry_points: Vec<EntryPoint> = serde_json::from_str(line)?;
        debug!(package = package.name(), count = entry_points.len(), "Entry points enumerated");
        Ok(entry_points)
    }

    async fn annotate_tree(
        &self,
        package: &PackageData,
        min_num_deps: u64,
        min_depth: u64,
    ) -> Result<Value, HoundError> {
        let output = run_command(
            "npm",
            &["ls", "--all", "--json"],
            Some(package.path()),
            self.timeout_secs,
        )
        .await?;
        // npm ls exits non-zero on peer-dep problems but still prints a tree.
        let tree: Value = serde_json::from_str(&output.stdout).map_err(|e| {
            HoundError::Analysis(format!("npm ls produced unparsable output: {e}"))
        })?;

        fn walk(node: &Value, depth: u64, count: &mut u64, max_depth: &mut u64) {
            *max_depth = (*max_depth).max(depth);
            if let Some(deps) = node.get("dependencies").and_then(|d| d.as_object()) {
                for child in deps.values() {
                    *count += 1;
                    walk(child, depth + 1, count, max_depth);
                }
            }
        }
        let mut num_deps = 0;
        let mut depth = 0;
        walk(&tree, 0, &mut num_deps, &mut depth);

        let no_instrument = num_deps >= min_num_deps || depth >= min_depth;
        info!(package = package.name(), num_deps, depth, no_instrument, "Dependency tree annotated");
        Ok(json!({
            "numDependencies": num_deps,
            "maxDepth": depth,
            "noInstrument": no_instrument,
        }))
    }

    async fn classify_sink(&self, taint_report: &Path) -> Result<SinkType, HoundError> {
        let report = tokio::fs::read_to_string(taint_report).await?;
        let report: Value = serde_json::from_str(&report)?;
        let flows = report
            .get("flows")
            .and_then(|f| f.as_array())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| HoundError::Analysis("taint report contains no flows".into()))?;

        let sink = flows[0]
            .get("sink")
            .and_then(|s| s.as_str())
            .unwrap_or_default();
        if sink.contains("exec") || sink.contains("spawn") {
            Ok(SinkType::Exec)
        } else {
            Ok(SinkType::Eval)
        }
    }

    fn trivial_exploit(&self, sink_type: SinkType) -> Result<String, HoundError> {
        match sink_type {
            SinkType::Exec => Ok(format!("touch {PROOF_MARKER}")),
            SinkType::Eval => Ok(format!(
                "require('fs').writeFileSync('{PROOF_MARKER}', '1')"
            )),
        }
    }

    async fn synthesize(
        &self,
        taint_report: &Path,
        flags: SynthesisFlags,
        solving_time: u64,
    ) -> Result<SynthesisResult, HoundError> {
        let report = tokio::fs::read_to_string(taint_report).await?;
        let report: Value = serde_json::from_str(&report)?;
        let flows = report
            .get("flows")
            .and_then(|f| f.as_array())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| HoundError::Synthesis("taint report contains no flows".into()))?;

        let abstract_value = flows[0]
            .get("taintedValue")
            .cloned()
            .unwrap_or_else(|| json!({"tag": "string"}));
        let statement = Self::smt_statement(&flows[0], flags);

        let smt_file = taint_report.with_extension("smt2");
        tokio::fs::write(&smt_file, &statement).await?;

        let started = std::time::Instant::now();
        let timeout_arg = format!("-T:{solving_time}");
        let output = run_command(
            "z3",
            &[&timeout_arg, &smt_file.to_string_lossy()],
            None,
            // The solver enforces its own budget; leave slack for startup.
            solving_time + 10,
        )
        .await?;
        let solving_time_sec = started.elapsed().as_secs_f64();

        let solution = Self::parse_model(&output.stdout).ok_or_else(|| {
            HoundError::Synthesis(format!(
                "solver found no model: {}",
                output.stdout.lines().next().unwrap_or("no output")
            ))
        })?;
        let concretized = solution.get("input").cloned();
        info!(solving_time_sec, "Synthesis solved");

        Ok(SynthesisResult {
            smt_statement: statement,
            smt_solution: solution,
            solving_time_sec,
            abstract_value,
            concretized,
        })
    }
}
