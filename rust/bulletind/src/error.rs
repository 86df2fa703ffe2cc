use crate::years::AccessMode;
use serde_json::json;
use thiserror::Error;

/// Everything the engine can refuse with. Every external failure is mapped
/// onto one of these before it reaches the aggregation code.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{action} refused: year {year} is in {mode} mode")]
    Policy {
        action: String,
        year: String,
        mode: AccessMode,
    },

    #[error("school api unreachable: {0}")]
    Connectivity(String),

    #[error("every load request failed: {}", .0.join("; "))]
    LoadFailed(Vec<String>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(vec![message.into()])
    }

    pub fn policy(action: &str, year: &str, mode: AccessMode) -> Self {
        EngineError::Policy {
            action: action.to_string(),
            year: year.to_string(),
            mode,
        }
    }

    pub fn storage(e: anyhow::Error) -> Self {
        EngineError::Storage(format!("{e:#}"))
    }

    /// Wire code used in sidecar error responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_failed",
            EngineError::Policy { .. } => "policy_refused",
            EngineError::Connectivity(_) => "offline",
            EngineError::LoadFailed(_) => "load_failed",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::Storage(_) => "storage_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::Validation(messages) => Some(json!({ "messages": messages })),
            EngineError::Policy { action, year, mode } => Some(json!({
                "action": action,
                "year": year,
                "mode": mode,
            })),
            EngineError::LoadFailed(branches) => Some(json!({ "failures": branches })),
            _ => None,
        }
    }
}
