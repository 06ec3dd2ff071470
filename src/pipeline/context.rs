use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::models::PackageData;

/// Per-run state threaded through every task.
///
/// One `Context` is built per pipeline execution and never reused across
/// packages. Configuration is typed and immutable; the package record is the
/// mutable accumulator; the handful of intermediate artifacts tasks hand to
/// later tasks are typed fields with fail-loud accessors. Reading an artifact
/// its producing task has not set is a programming error, not a recoverable
/// condition.
#[derive(Debug, Clone)]
pub struct Context {
    config: Arc<AnalysisConfig>,
    package: PackageData,
    taint_report: Option<PathBuf>,
    abort_on_exploit_failure: bool,
    extra: HashMap<String, String>,
}

impl Context {
    pub fn new(config: Arc<AnalysisConfig>, package: PackageData) -> Self {
        Self {
            config,
            package,
            taint_report: None,
            abort_on_exploit_failure: false,
            extra: HashMap::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn package(&self) -> &PackageData {
        &self.package
    }

    pub fn package_mut(&mut self) -> &mut PackageData {
        &mut self.package
    }

    /// Consume the context, yielding the final package record.
    pub fn into_package(self) -> PackageData {
        self.package
    }

    pub fn set_taint_report(&mut self, path: PathBuf) {
        self.taint_report = Some(path);
    }

    /// Location of the taint report produced by the instrumented analysis
    /// run. Panics when read before that task has completed.
    pub fn taint_report(&self) -> &Path {
        self.taint_report
            .as_deref()
            .expect("attempted to access unset taint report path")
    }

    pub fn set_abort_on_exploit_failure(&mut self, abort: bool) {
        self.abort_on_exploit_failure = abort;
    }

    pub fn abort_on_exploit_failure(&self) -> bool {
        self.abort_on_exploit_failure
    }

    /// Ad hoc collaborator-specific artifacts. Writing replaces any prior
    /// value; keys are never removed.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Panics when the key was never set.
    pub fn extra(&self, key: &str) -> &str {
        self.extra
            .get(key)
            .unwrap_or_else(|| panic!("attempted to access unset context artifact: {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context::new(
            Arc::new(AnalysisConfig::default()),
            PackageData::new("left-pad", None),
        )
    }

    #[test]
    #[should_panic(expected = "unset taint report")]
    fn test_unset_taint_report_panics() {
        let ctx = context();
        let _ = ctx.taint_report();
    }

    #[test]
    #[should_panic(expected = "unset context artifact")]
    fn test_unset_extra_panics() {
        let ctx = context();
        let _ = ctx.extra("no-such-key");
    }

    #[test]
    fn test_extra_set_replaces() {
        let mut ctx = context();
        ctx.set_extra("driver", "/tmp/a.js");
        ctx.set_extra("driver", "/tmp/b.js");
        assert_eq!(ctx.extra("driver"), "/tmp/b.js");
    }
}
