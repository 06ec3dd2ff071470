use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HoundError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Package environment error: {0}")]
    Environment(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HoundError {
    /// Short machine-readable tag for the error variant, used as the
    /// `kind` field of ledger payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Registry(_) => "registry",
            Self::Environment(_) => "environment",
            Self::Driver(_) => "driver",
            Self::Analysis(_) => "analysis",
            Self::Synthesis(_) => "synthesis",
            Self::Policy(_) => "policy",
            Self::Timeout(_) => "timeout",
            Self::Process(_) => "process",
            Self::Network(_) => "network",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Yaml(_) => "yaml",
            Self::Http(_) => "http",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured form of an error as recorded on the package ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}
