use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::exec::run_command;
use crate::config::Bound;
use crate::errors::HoundError;
use crate::models::PackageData;

/// Package acquisition and registry metadata.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Fetch and unpack `name@version` under `cache_dir`, returning the
    /// package root (the directory containing its package.json).
    async fn prepare_environment(
        &self,
        name: &str,
        version: &str,
        cache_dir: &Path,
    ) -> Result<PathBuf, HoundError>;

    /// Read the installed version from the prepared package directory.
    async fn read_version(&self, pkg_dir: &Path) -> Result<String, HoundError>;

    /// Check weekly downloads against `target`/`bound`; returns the observed
    /// count on success and fails when the package does not qualify.
    async fn download_count(
        &self,
        package: &PackageData,
        target: u64,
        bound: Bound,
        output_dir: &Path,
    ) -> Result<u64, HoundError>;
}

/// npm-backed registry: `npm install` for acquisition, the npmjs downloads
/// API for popularity counts.
pub struct NpmRegistry {
    http: reqwest::Client,
    timeout_secs: u64,
}

impl NpmRegistry {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl PackageRegistry for NpmRegistry {
    async fn prepare_environment(
        &self,
        name: &str,
        version: &str,
        cache_dir: &Path,
    ) -> Result<PathBuf, HoundError> {
        let prefix = cache_dir.join(name.replace('/', "__"));
        tokio::fs::create_dir_all(&prefix).await?;

        let spec = if version == "*" {
            name.to_string()
        } else {
            format!("{name}@{version}")
        };
        info!(package = %spec, cache = %prefix.display(), "Preparing package environment");

        let output = run_command(
            "npm",
            &[
                "install",
                &spec,
                "--prefix",
                &prefix.to_string_lossy(),
                "--no-audit",
                "--no-fund",
                "--ignore-scripts",
            ],
            None,
            self.timeout_secs,
        )
        .await?;
        if output.exit_code != 0 {
            return Err(HoundError::Registry(format!(
                "npm install of {} failed: {}",
                spec,
                output.stderr.trim()
            )));
        }

        let pkg_dir = prefix.join("node_modules").join(name);
        if !pkg_dir.join("package.json").exists() {
            return Err(HoundError::Registry(format!(
                "package {} unpacked without a package.json",
                spec
            )));
        }
        Ok(pkg_dir)
    }

    async fn read_version(&self, pkg_dir: &Path) -> Result<String, HoundError> {
        let manifest = tokio::fs::read_to_string(pkg_dir.join("package.json")).await?;
        let manifest: serde_json::Value = serde_json::from_str(&manifest)?;
        manifest
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                HoundError::Registry(format!(
                    "package.json in {} has no version field",
                    pkg_dir.display()
                ))
            })
    }

    async fn download_count(
        &self,
        package: &PackageData,
        target: u64,
        bound: Bound,
        output_dir: &Path,
    ) -> Result<u64, HoundError> {
        let url = format!(
            "https://api.npmjs.org/downloads/point/last-week/{}",
            package.name()
        );
        let response: serde_json::Value = self.http.get(&url).send().await?.json().await?;
        let count = response
            .get("downloads")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                HoundError::Registry(format!(
                    "downloads API returned no count for {}",
                    package.name()
                ))
            })?;
        debug!(package = package.name(), count, target, %bound, "Download count");

        let qualifies = match bound {
            Bound::Lower => count >= target,
            Bound::Upper => count <= target,
        };
        if !qualifies {
            return Err(HoundError::Policy(format!(
                "Package {} has {} weekly downloads, outside {} bound of {}",
                package.name(),
                count,
                bound,
                target
            )));
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let snapshot = output_dir.join(format!("downloads-{}.json", package.name().replace('/', "__")));
        tokio::fs::write(&snapshot, response.to_string()).await?;
        Ok(count)
    }
}
