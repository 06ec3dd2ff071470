use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::exec::{run_command, CommandOutput};
use crate::errors::HoundError;
use crate::models::PackageData;

/// Fuzzer behavior toggles forwarded into driver construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverFlags {
    pub object_reconstruction: bool,
    pub strings_only: bool,
    pub mix_fuzz: bool,
    pub restarts: bool,
}

/// Building and executing package drivers, instrumented or not.
#[async_trait]
pub trait DriverHarness: Send + Sync {
    async fn install_dependencies(&self, pkg_dir: &Path) -> Result<(), HoundError>;

    /// Generate the driver script for `package` and return its path.
    async fn build_driver(
        &self,
        package: &PackageData,
        instrumented: bool,
        baseline: bool,
        output_dir: &Path,
        flags: DriverFlags,
    ) -> Result<PathBuf, HoundError>;

    /// Run the non-instrumented driver as a sanity check.
    async fn run_uninstrumented(
        &self,
        driver: &Path,
        fail_on_output_error: bool,
        fail_on_non_zero_exit: bool,
    ) -> Result<(), HoundError>;

    /// Run the pre-built instrumented driver shipped in the package dir and
    /// report which sinks were actually hit, if any were reported at all.
    async fn run_instrumented_driver(
        &self,
        driver: &Path,
        require_sink_hit: bool,
        fail_on_output_error: bool,
        fail_on_non_zero_exit: bool,
    ) -> Result<Option<Vec<String>>, HoundError>;

    /// Run the full instrumented taint analysis and return the report path.
    async fn run_taint_analysis(
        &self,
        driver: &Path,
        policies: &str,
        fail_on_output_error: bool,
        fail_on_non_zero_exit: bool,
        honey_objects: bool,
    ) -> Result<PathBuf, HoundError>;
}

/// node/npm subprocess harness.
pub struct NodeHarness {
    timeout_secs: u64,
}

impl NodeHarness {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn check_run(
        &self,
        output: &CommandOutput,
        fail_on_output_error: bool,
        fail_on_non_zero_exit: bool,
    ) -> Result<(), HoundError> {
        if fail_on_non_zero_exit && output.exit_code != 0 {
            return Err(HoundError::Driver(format!(
                "driver exited with code {}: {}",
                output.exit_code,
                tail(&output.stderr)
            )));
        }
        if fail_on_output_error
            && (output.stderr.contains("Error") || output.stdout.contains("Error"))
        {
            return Err(HoundError::Driver(format!(
                "driver output reports an error: {}",
                tail(&output.combined())
            )));
        }
        Ok(())
    }

    fn driver_source(package: &PackageData, instrumented: bool, flags: DriverFlags) -> String {
        let mut calls = String::new();
        for ep in package.entry_points() {
            let args = (0..ep.num_arguments)
                .map(|_| "fuzz()".to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if ep.is_constructor {
                calls.push_str(&format!(
                    "try {{ new pkg.{}({}); }} catch (e) {{ report(e); }}\n",
                    ep.function_name, args
                ));
            } else {
                calls.push_str(&format!(
                    "try {{ pkg.{}({}); }} catch (e) {{ report(e); }}\n",
                    ep.function_name, args
                ));
            }
        }

        format!(
            "// generated by sinkhound\n\
             const OPTIONS = {{\n\
             \x20 instrumented: {instrumented},\n\
             \x20 objectReconstruction: {object_reconstruction},\n\
             \x20 stringsOnly: {strings_only},\n\
             \x20 mixFuzz: {mix_fuzz},\n\
             \x20 restarts: {restarts},\n\
             }};\n\
             const {{ fuzz, report, flush }} = require('sinkhound-driver-runtime')(OPTIONS);\n\
             const pkg = require('{name}');\n\
             {calls}\
             flush();\n",
            instrumented = instrumented,
            object_reconstruction = flags.object_reconstruction,
            strings_only = flags.strings_only,
            mix_fuzz = flags.mix_fuzz,
            restarts = flags.restarts,
            name = package.name(),
            calls = calls,
        )
    }
}

fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let mut start = trimmed.len().saturating_sub(400);
    // Driver output is arbitrary UTF-8; the cut must land on a char boundary.
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[async_trait]
impl DriverHarness for NodeHarness {
    async fn install_dependencies(&self, pkg_dir: &Path) -> Result<(), HoundError> {
        info!(dir = %pkg_dir.display(), "Installing package dependencies");
        let output = run_command(
            "npm",
            &["install", "--no-audit", "--no-fund", "--ignore-scripts"],
            Some(pkg_dir),
            self.timeout_secs,
        )
        .await?;
        if output.exit_code != 0 {
            return Err(HoundError::Environment(format!(
                "npm install failed: {}",
                tail(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn build_driver(
        &self,
        package: &PackageData,
        instrumented: bool,
        baseline: bool,
        output_dir: &Path,
        flags: DriverFlags,
    ) -> Result<PathBuf, HoundError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let flags = if baseline { DriverFlags::default() } else { flags };
        let suffix = if instrumented { "inst" } else { "noinst" };
        let driver = output_dir.join(format!(
            "driver-{}-{}.js",
            package.name().replace('/', "__"),
            suffix
        ));
        tokio::fs::write(&driver, Self::driver_source(package, instrumented, flags)).await?;
        debug!(driver = %driver.display(), instrumented, "Driver written");
        Ok(driver)
    }

    async fn run_uninstrumented(
        &self,
        driver: &Path,
        fail_on_output_error: bool,
        fail_on_non_zero_exit: bool,
    ) -> Result<(), HoundError> {
        let cwd = driver.parent();
        let output = run_command(
            "node",
            &[&driver.to_string_lossy()],
            cwd,
            self.timeout_secs,
        )
        .await?;
        self.check_run(&output, fail_on_output_error, fail_on_non_zero_exit)
    }

    async fn run_instrumented_driver(
        &self,
        driver: &Path,
        require_sink_hit: bool,
        fail_on_output_error: bool,
        fail_on_non_zero_exit: bool,
    ) -> Result<Option<Vec<String>>, HoundError> {
        if !driver.exists() {
            return Err(HoundError::Driver(format!(
                "instrumented driver not found: {}",
                driver.display()
            )));
        }
        let output = run_command(
            "node",
            &[&driver.to_string_lossy()],
            driver.parent(),
            self.timeout_secs,
        )
        .await?;
        self.check_run(&output, fail_on_output_error, fail_on_non_zero_exit)?;

        // The instrumentation reports each reached sink on its own line.
        let sinks: Vec<String> = output
            .stdout
            .lines()
            .filter_map(|line| line.strip_prefix("[sink-hit] "))
            .map(str::to_string)
            .collect();
        if sinks.is_empty() {
            if require_sink_hit {
                return Err(HoundError::Analysis(
                    "no sink was hit during the instrumented run".into(),
                ));
            }
            return Ok(None);
        }
        Ok(Some(sinks))
    }

    async fn run_taint_analysis(
        &self,
        driver: &Path,
        policies: &str,
        fail_on_output_error: bool,
        fail_on_non_zero_exit: bool,
        honey_objects: bool,
    ) -> Result<PathBuf, HoundError> {
        let report = driver.with_extension("taint.json");
        let driver_arg = driver.to_string_lossy().into_owned();
        let report_arg = report.to_string_lossy().into_owned();
        let mut args = vec![
            driver_arg.as_str(),
            "--policies",
            policies,
            "--taint-out",
            report_arg.as_str(),
        ];
        if honey_objects {
            args.push("--honey-objects");
        }

        let output = run_command("node", &args, driver.parent(), self.timeout_secs).await?;
        self.check_run(&output, fail_on_output_error, fail_on_non_zero_exit)?;

        if !report.exists() {
            return Err(HoundError::Analysis(format!(
                "instrumented run produced no taint report at {}",
                report.display()
            )));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryPoint;

    fn package_with_entry_points() -> PackageData {
        let mut pkg = PackageData::new("left-pad", Some("1.3.0".to_string()));
        pkg.set_entry_points(vec![
            EntryPoint {
                function_name: "leftPad".to_string(),
                num_arguments: 2,
                is_method: false,
                is_constructor: false,
                from_constructor: false,
            },
            EntryPoint {
                function_name: "Padder".to_string(),
                num_arguments: 1,
                is_method: false,
                is_constructor: true,
                from_constructor: false,
            },
        ]);
        pkg
    }

    #[tokio::test]
    async fn test_build_driver_writes_entry_point_calls() {
        let dir = tempfile::tempdir().unwrap();
        let harness = NodeHarness::new(30);
        let driver = harness
            .build_driver(
                &package_with_entry_points(),
                false,
                false,
                dir.path(),
                DriverFlags::default(),
            )
            .await
            .unwrap();

        let source = tokio::fs::read_to_string(&driver).await.unwrap();
        assert!(source.contains("pkg.leftPad(fuzz(), fuzz())"));
        assert!(source.contains("new pkg.Padder(fuzz())"));
        assert!(source.contains("instrumented: false"));
    }

    #[tokio::test]
    async fn test_build_driver_baseline_clears_fuzz_flags() {
        let dir = tempfile::tempdir().unwrap();
        let harness = NodeHarness::new(30);
        let flags = DriverFlags {
            strings_only: true,
            ..Default::default()
        };
        let driver = harness
            .build_driver(&package_with_entry_points(), true, true, dir.path(), flags)
            .await
            .unwrap();
        let source = tokio::fs::read_to_string(&driver).await.unwrap();
        assert!(source.contains("stringsOnly: false"));
        assert!(source.contains("instrumented: true"));
    }

    #[test]
    fn test_tail_truncates_long_output() {
        let long = "x".repeat(1000);
        assert_eq!(tail(&long).len(), 400);
        assert_eq!(tail("short"), "short");
    }

    #[test]
    fn test_tail_handles_multibyte_output() {
        // 300 three-byte chars put the 400-byte cut inside a character.
        let multibyte = "€".repeat(300);
        let tailed = tail(&multibyte);
        assert!(tailed.len() <= 400);
        assert!(tailed.chars().all(|c| c == '€'));
    }

    #[tokio::test]
    async fn test_run_instrumented_driver_missing_file() {
        let harness = NodeHarness::new(30);
        let result = harness
            .run_instrumented_driver(Path::new("/nonexistent/run-x.js"), false, false, false)
            .await;
        assert!(matches!(result, Err(HoundError::Driver(_))));
    }
}
