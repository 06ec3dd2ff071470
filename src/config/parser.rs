use std::path::Path;

use tracing::warn;

use super::types::AnalysisConfig;
use crate::errors::HoundError;

pub async fn parse_config(path: &Path) -> Result<AnalysisConfig, HoundError> {
    if !path.exists() {
        return Err(HoundError::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(HoundError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    let config: AnalysisConfig = serde_yaml::from_str(&content)?;

    validate(&config)?;
    Ok(config)
}

/// Detect semantic conflicts in the parsed configuration.
pub fn validate(config: &AnalysisConfig) -> Result<(), HoundError> {
    if config.solving_time == 0 {
        return Err(HoundError::Config(
            "solving_time must be greater than zero".into(),
        ));
    }

    if config.driver_timeout_secs == 0 {
        return Err(HoundError::Config(
            "driver_timeout_secs must be greater than zero".into(),
        ));
    }

    if config.fuzz_strings_only && config.mix_fuzz {
        return Err(HoundError::Config(
            "fuzz_strings_only and mix_fuzz are mutually exclusive".into(),
        ));
    }

    if config.sinks.is_empty() {
        return Err(HoundError::Config(
            "sink list is empty: every package would be filtered out".into(),
        ));
    }

    if let Some(entry) = &config.target_entry_point {
        if entry.is_empty() {
            return Err(HoundError::Config(
                "target_entry_point must not be an empty string".into(),
            ));
        }
    }

    if config.enumerator_templates && !config.enumerator {
        warn!("enumerator_templates set without enumerator; templates will be ignored");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate(&AnalysisConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_solving_time() {
        let config = AnalysisConfig {
            solving_time: 0,
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_fuzz_mode_conflict() {
        let config = AnalysisConfig {
            fuzz_strings_only: true,
            mix_fuzz: true,
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_sink_list() {
        let config = AnalysisConfig {
            sinks: vec![],
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_parse_config_missing_file() {
        let result = parse_config(Path::new("/nonexistent/sinkhound.yaml")).await;
        assert!(matches!(result, Err(HoundError::Config(_))));
    }

    #[tokio::test]
    async fn test_parse_config_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "target_download_count: 5000\nmin_depth: 4\n")
            .await
            .unwrap();

        let config = parse_config(&path).await.unwrap();
        assert_eq!(config.target_download_count, 5000);
        assert_eq!(config.min_depth, 4);
        // Unspecified fields fall back to defaults
        assert_eq!(config.solving_time, 600);
        assert!(config.sinks.contains(&"eval".to_string()));
    }
}
