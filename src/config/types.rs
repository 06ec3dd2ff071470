use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Direction of the download-count eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    /// Package qualifies when weekly downloads >= target.
    #[default]
    Lower,
    /// Package qualifies when weekly downloads <= target.
    Upper,
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lower => write!(f, "lower"),
            Self::Upper => write!(f, "upper"),
        }
    }
}

/// Full configuration for one analysis run. Every flag a registered task
/// reads lives here; tasks receive it through the run `Context`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Weekly download threshold; 0 disables the download-count filter.
    pub target_download_count: u64,
    pub download_bound: Bound,

    /// Browser-only APIs that disqualify a package when present.
    pub browser_apis: Vec<String>,
    /// Taint sinks whose presence makes a package a candidate.
    pub sinks: Vec<String>,

    /// Taint policy set passed to the instrumented analysis run.
    pub policies: String,
    pub require_sink_hit: bool,
    pub fail_on_output_error: bool,
    pub fail_on_non_zero_exit: bool,
    pub baseline: bool,
    pub honey_objects: bool,

    // Synthesis flags
    pub inference: bool,
    pub enumerator: bool,
    pub enumerator_templates: bool,
    pub polyglot_aci_payload: bool,
    pub polyglot_ace_payload: bool,
    pub string_only_synthesis: bool,
    /// Solver wall-clock budget in seconds.
    pub solving_time: u64,

    // Fuzzer flags forwarded to driver construction
    pub fuzz_object_reconstruction: bool,
    pub fuzz_strings_only: bool,
    pub mix_fuzz: bool,
    pub fuzz_restart: bool,

    /// Dependency-tree annotation thresholds.
    pub min_num_deps: u64,
    pub min_depth: u64,

    /// Restrict exploit confirmation to a single entry point.
    pub target_entry_point: Option<String>,
    /// Seed inputs forwarded to exploit confirmation.
    pub input_seed: Vec<String>,

    pub output_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub cache_dir: PathBuf,

    /// Wall-clock bound for any single driver subprocess, in seconds.
    pub driver_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_download_count: 0,
            download_bound: Bound::Lower,
            browser_apis: vec![
                "document".to_string(),
                "window".to_string(),
                "XMLHttpRequest".to_string(),
                "fetch".to_string(),
                "navigator".to_string(),
                "localStorage".to_string(),
            ],
            sinks: vec![
                "eval".to_string(),
                "Function".to_string(),
                "child_process.exec".to_string(),
                "child_process.execSync".to_string(),
                "child_process.spawn".to_string(),
                "vm.runInContext".to_string(),
            ],
            policies: "string".to_string(),
            require_sink_hit: true,
            fail_on_output_error: false,
            fail_on_non_zero_exit: false,
            baseline: false,
            honey_objects: false,
            inference: true,
            enumerator: false,
            enumerator_templates: false,
            polyglot_aci_payload: false,
            polyglot_ace_payload: false,
            string_only_synthesis: false,
            solving_time: 600,
            fuzz_object_reconstruction: false,
            fuzz_strings_only: false,
            mix_fuzz: false,
            fuzz_restart: false,
            min_num_deps: 20,
            min_depth: 3,
            target_entry_point: None,
            input_seed: Vec::new(),
            output_dir: PathBuf::from("./results"),
            tmp_dir: std::env::temp_dir().join("sinkhound"),
            cache_dir: PathBuf::from("./cache"),
            driver_timeout_secs: 300,
        }
    }
}
