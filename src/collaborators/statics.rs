use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::HoundError;

/// Static eligibility checks over the unpacked package source.
#[async_trait]
pub trait StaticAnalysis: Send + Sync {
    /// Succeeds iff the package declares a resolvable entry file.
    async fn has_entry_file(&self, pkg_dir: &Path) -> Result<(), HoundError>;

    /// Return the subset of `api_list` referenced anywhere in the package's
    /// own sources (dependencies excluded).
    async fn used_apis(&self, pkg_dir: &Path, api_list: &[String])
        -> Result<Vec<String>, HoundError>;
}

/// Grep-style scan over the package's JavaScript sources.
pub struct SourceScan;

impl SourceScan {
    pub fn new() -> Self {
        Self
    }

    async fn source_files(&self, pkg_dir: &Path) -> Result<Vec<std::path::PathBuf>, HoundError> {
        let pattern = format!("{}/**/*.js", pkg_dir.to_string_lossy());
        let paths = glob::glob(&pattern)
            .map_err(|e| HoundError::Analysis(format!("bad glob pattern: {e}")))?;

        let mut files = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| HoundError::Analysis(format!("glob error: {e}")))?;
            // Only the package's own code counts toward API usage.
            if path
                .components()
                .any(|c| c.as_os_str() == "node_modules" || c.as_os_str() == "test")
            {
                continue;
            }
            files.push(path);
        }
        Ok(files)
    }
}

impl Default for SourceScan {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StaticAnalysis for SourceScan {
    async fn has_entry_file(&self, pkg_dir: &Path) -> Result<(), HoundError> {
        let manifest = tokio::fs::read_to_string(pkg_dir.join("package.json")).await?;
        let manifest: serde_json::Value = serde_json::from_str(&manifest)?;

        let main = manifest
            .get("main")
            .and_then(|v| v.as_str())
            .unwrap_or("index.js");
        let mut entry = pkg_dir.join(main);
        if entry.extension().is_none() {
            entry.set_extension("js");
        }
        if entry.exists() || pkg_dir.join("index.js").exists() {
            Ok(())
        } else {
            Err(HoundError::Policy(format!(
                "Package has no entry file: {} does not resolve",
                main
            )))
        }
    }

    async fn used_apis(
        &self,
        pkg_dir: &Path,
        api_list: &[String],
    ) -> Result<Vec<String>, HoundError> {
        let matchers: Vec<(usize, regex::Regex)> = api_list
            .iter()
            .enumerate()
            .map(|(i, api)| {
                regex::Regex::new(&format!(r"\b{}\b", regex::escape(api)))
                    .map(|re| (i, re))
                    .map_err(|e| HoundError::Analysis(format!("bad API pattern {api}: {e}")))
            })
            .collect::<Result<_, _>>()?;

        let mut hit = vec![false; api_list.len()];
        for file in self.source_files(pkg_dir).await? {
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                // Binary or non-UTF8 files carry no API references we can match.
                continue;
            };
            for (i, re) in &matchers {
                if !hit[*i] && re.is_match(&content) {
                    debug!(api = %api_list[*i], file = %file.display(), "API reference found");
                    hit[*i] = true;
                }
            }
        }

        Ok(api_list
            .iter()
            .zip(hit)
            .filter_map(|(api, used)| used.then(|| api.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.unwrap();
            }
            tokio::fs::write(path, content).await.unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_has_entry_file_with_main() {
        let dir = fixture(&[
            ("package.json", r#"{"name": "x", "main": "lib/entry.js"}"#),
            ("lib/entry.js", "module.exports = {};"),
        ])
        .await;
        assert!(SourceScan::new().has_entry_file(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_has_entry_file_missing() {
        let dir = fixture(&[("package.json", r#"{"name": "x", "main": "gone.js"}"#)]).await;
        let result = SourceScan::new().has_entry_file(dir.path()).await;
        assert!(matches!(result, Err(HoundError::Policy(_))));
    }

    #[tokio::test]
    async fn test_used_apis_finds_word_boundary_matches() {
        let dir = fixture(&[
            ("package.json", r#"{"name": "x"}"#),
            (
                "index.js",
                "const xhr = new XMLHttpRequest();\nconst notEval = evaluate(1);\n",
            ),
        ])
        .await;
        let apis = vec!["XMLHttpRequest".to_string(), "eval".to_string()];
        let used = SourceScan::new().used_apis(dir.path(), &apis).await.unwrap();
        // `evaluate` must not match `eval` thanks to the word boundary.
        assert_eq!(used, vec!["XMLHttpRequest".to_string()]);
    }

    #[tokio::test]
    async fn test_used_apis_skips_node_modules() {
        let dir = fixture(&[
            ("package.json", r#"{"name": "x"}"#),
            ("index.js", "module.exports = 1;\n"),
            ("node_modules/dep/index.js", "eval('1');\n"),
        ])
        .await;
        let apis = vec!["eval".to_string()];
        let used = SourceScan::new().used_apis(dir.path(), &apis).await.unwrap();
        assert!(used.is_empty());
    }
}
