use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use super::exec::run_command;
use super::synthesis::PROOF_MARKER;
use crate::errors::HoundError;
use crate::models::{ExploitResult, PackageData};

/// Confirmation of candidate exploits against the real package.
#[async_trait]
pub trait ExploitConfirmation: Send + Sync {
    /// Run the candidate exploit through each entry point (or only
    /// `target_entry_point` when given) and return the confirmed exploits.
    async fn confirm(
        &self,
        package: &PackageData,
        fail_on_non_zero_exit: bool,
        target_entry_point: Option<&str>,
        input_seed: &[String],
        output_dir: &Path,
    ) -> Result<Vec<ExploitResult>, HoundError>;
}

/// Confirms exploits by running a per-entry-point node harness in a scratch
/// directory and checking for the proof marker the payload drops when its
/// sink fires.
pub struct DriverConfirmer {
    timeout_secs: u64,
}

impl DriverConfirmer {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn confirm_source(package: &PackageData, function: &str, payload: &str, seeds: &[String]) -> String {
        let seeds = serde_json::to_string(seeds).unwrap_or_else(|_| "[]".to_string());
        format!(
            "// generated by sinkhound\n\
             const pkg = require('{pkg}');\n\
             const payload = {payload:?};\n\
             const seeds = {seeds};\n\
             const target = pkg['{function}'] || pkg;\n\
             const args = seeds.length ? seeds : [payload];\n\
             try {{\n\
             \x20 if (/^[A-Z]/.test('{function}')) {{ new target(payload, ...args.slice(1)); }}\n\
             \x20 else {{ target(payload, ...args.slice(1)); }}\n\
             }} catch (e) {{ /* a crashing call can still have fired the sink */ }}\n",
            pkg = package.path().display(),
            payload = payload,
            seeds = seeds,
            function = function,
        )
    }
}

#[async_trait]
impl ExploitConfirmation for DriverConfirmer {
    async fn confirm(
        &self,
        package: &PackageData,
        fail_on_non_zero_exit: bool,
        target_entry_point: Option<&str>,
        input_seed: &[String],
        output_dir: &Path,
    ) -> Result<Vec<ExploitResult>, HoundError> {
        let payload = package
            .candidate_exploit()
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| package.candidate_exploit().to_string());

        let mut confirmed = Vec::new();
        for entry_point in package.entry_points() {
            if let Some(target) = target_entry_point {
                if entry_point.function_name != target {
                    continue;
                }
            }

            let scratch = output_dir
                .join("confirm")
                .join(entry_point.function_name.replace('/', "__"));
            tokio::fs::create_dir_all(&scratch).await?;
            let script = scratch.join("confirm.js");
            tokio::fs::write(
                &script,
                Self::confirm_source(package, &entry_point.function_name, &payload, input_seed),
            )
            .await?;

            let output = run_command(
                "node",
                &[&script.to_string_lossy()],
                Some(&scratch),
                self.timeout_secs,
            )
            .await?;
            if fail_on_non_zero_exit && output.exit_code != 0 {
                return Err(HoundError::Driver(format!(
                    "confirmation driver for {} exited with code {}",
                    entry_point.function_name, output.exit_code
                )));
            }

            let marker = scratch.join(PROOF_MARKER);
            if marker.exists() {
                info!(function = %entry_point.function_name, "Exploit confirmed");
                tokio::fs::remove_file(&marker).await?;
                confirmed.push(ExploitResult {
                    exploit_function: entry_point.function_name.clone(),
                    exploit_string: payload.clone(),
                });
            } else {
                debug!(function = %entry_point.function_name, "No proof marker; exploit did not fire");
            }
        }
        Ok(confirmed)
    }
}
