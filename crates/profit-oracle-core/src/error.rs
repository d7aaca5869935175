use std::path::PathBuf;

use thiserror::Error;

/// Failures at the reasoning/tool-execution service boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service refused the request because its combined scope exceeded a processing ceiling.
    #[error("capacity rejection: {reason}")]
    CapacityExceeded { reason: String },
    #[error("service responded with HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode service response: {0}")]
    Decode(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ServiceError {
    pub fn is_capacity_rejection(&self) -> bool {
        matches!(self, ServiceError::CapacityExceeded { .. })
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ServiceError::Decode(error.to_string())
        } else {
            ServiceError::Transport(error.to_string())
        }
    }
}

/// Core error type for the consulting pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported dataset format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("failed to load dataset {}: {reason}", path.display())]
    DatasetLoad { path: PathBuf, reason: String },
    #[error("manager produced no usable task packages: {0}")]
    ManagerOutput(String),
    #[error(transparent)]
    CapacityRejection(ServiceError),
    #[error("research retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },
    #[error("prompt simplification failed: {0}")]
    Simplification(#[source] ServiceError),
    #[error("analytics run failed: {0}")]
    Analytics(#[source] ServiceError),
    #[error("chart artifact could not be resolved: {0}")]
    ArtifactResolution(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("graph execution failure: {0}")]
    Graph(String),
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn dataset_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DatasetLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable short label used for metrics and completion records.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat { .. } => "unsupported_format",
            PipelineError::DatasetLoad { .. } => "dataset_load",
            PipelineError::ManagerOutput(_) => "manager_output",
            PipelineError::CapacityRejection(_) => "capacity_rejection",
            PipelineError::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
            PipelineError::Simplification(_) => "simplification",
            PipelineError::Analytics(_) => "analytics",
            PipelineError::ArtifactResolution(_) => "artifact_resolution",
            PipelineError::Synthesis(_) => "synthesis",
            PipelineError::Graph(_) => "graph",
            PipelineError::InvalidConfiguration(_) => "invalid_configuration",
            PipelineError::MissingSecret(_) => "missing_secret",
            PipelineError::ConfigIo { .. } => "config_io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rejection_is_distinguished() {
        let rejected = ServiceError::CapacityExceeded {
            reason: "rate limit".into(),
        };
        let transport = ServiceError::Transport("connection reset".into());

        assert!(rejected.is_capacity_rejection());
        assert!(!transport.is_capacity_rejection());
    }

    #[test]
    fn exhausted_budget_reports_attempts() {
        let err = PipelineError::RetryBudgetExhausted {
            attempts: 3,
            last_error: "capacity rejection: too many tokens".into(),
        };
        assert_eq!(err.kind(), "retry_budget_exhausted");
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
