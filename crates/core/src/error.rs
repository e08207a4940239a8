//! Error taxonomy for engine operations
//!
//! `EngineError` is what every public operation returns on failure.
//! `ErrorReport` is the serializable form handed to the transport layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of entity an error refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    SignalDetection,
    SignalDetectionHypothesis,
    FeatureMeasurement,
    Event,
    EventHypothesis,
    LocationSolution,
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::SignalDetection => "signal detection",
            EntityKind::SignalDetectionHypothesis => "signal detection hypothesis",
            EntityKind::FeatureMeasurement => "feature measurement",
            EntityKind::Event => "event",
            EntityKind::EventHypothesis => "event hypothesis",
            EntityKind::LocationSolution => "location solution",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidInput,
    RelocationFailed,
    StaleReference,
    ConfigInvalid,
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::RelocationFailed => "relocation_failed",
            ErrorCode::StaleReference => "stale_reference",
            ErrorCode::ConfigInvalid => "config_invalid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Relocation failed for event hypothesis {event_hypothesis_id}: {}", .reasons.join("; "))]
    RelocationFailed {
        event_hypothesis_id: String,
        reasons: Vec<String>,
    },

    /// The referenced hypothesis exists but has been superseded
    #[error("Stale reference to {kind} {id}")]
    StaleReference { kind: EntityKind, id: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn stale(kind: EntityKind, id: impl Into<String>) -> Self {
        EngineError::StaleReference {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidInput(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::NotFound { .. } => ErrorCode::NotFound,
            EngineError::InvalidInput(_) => ErrorCode::InvalidInput,
            EngineError::RelocationFailed { .. } => ErrorCode::RelocationFailed,
            EngineError::StaleReference { .. } => ErrorCode::StaleReference,
            EngineError::Config(_) => ErrorCode::ConfigInvalid,
        }
    }

    pub fn to_report(&self) -> ErrorReport {
        let entity_id = match self {
            EngineError::NotFound { id, .. } | EngineError::StaleReference { id, .. } => {
                Some(id.clone())
            }
            EngineError::RelocationFailed {
                event_hypothesis_id,
                ..
            } => Some(event_hypothesis_id.clone()),
            _ => None,
        };
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            entity_id,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_report() {
        let err = EngineError::not_found(EntityKind::Event, "ev-1");
        let report = err.to_report();
        assert_eq!(report.code, ErrorCode::NotFound);
        assert_eq!(report.entity_id.as_deref(), Some("ev-1"));
        assert_eq!(report.message, "event not found: ev-1");
    }

    #[test]
    fn test_relocation_failed_message_lists_reasons() {
        let err = EngineError::RelocationFailed {
            event_hypothesis_id: "eh-1".to_string(),
            reasons: vec!["timeout".to_string(), "unavailable".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Relocation failed for event hypothesis eh-1: timeout; unavailable"
        );
        assert_eq!(err.code().as_str(), "relocation_failed");
    }

    #[test]
    fn test_error_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::StaleReference).unwrap();
        assert_eq!(json, "\"stale_reference\"");
    }
}
