//! Error types for the planning pipeline.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::manifest::ManifestStatus;

/// Failures of an outbound notification (review webhook, driver link,
/// order-system propagation). Callers log these and carry on.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel rejected message: {0}")]
    Rejected(String),
}

/// Errors raised by a solving engine before or during a search.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("problem {0} is already being solved")]
    AlreadySolving(String),
    #[error("solver worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("version conflict on {entity} {id}: expected revision {expected}, found {actual}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("stored payload is unreadable: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ManifestStatus,
    pub to: ManifestStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("unknown token")]
    Unknown,
    #[error("token expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level error surfaced by the planner operations.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("a solve for the standing problem is already running")]
    SolveInProgress,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse classification used by transport adapters to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Conflict,
    Rejected,
    Internal,
}

impl PlannerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PlannerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlannerError::NotFound { .. } => ErrorKind::NotFound,
            PlannerError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            PlannerError::InvalidTransition(_) | PlannerError::InvalidState(_) => {
                ErrorKind::InvalidState
            }
            PlannerError::SolveInProgress
            | PlannerError::Store(StoreError::VersionConflict { .. }) => ErrorKind::Conflict,
            PlannerError::Token(_) => ErrorKind::Rejected,
            PlannerError::Store(StoreError::Serialization(_))
            | PlannerError::Engine(_)
            | PlannerError::Config(_) => ErrorKind::Internal,
        }
    }

    /// True for errors the caller caused (4xx); false for internal failures.
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }
}

pub type PlannerResult<T> = Result<T, PlannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_transition_errors_are_client_errors() {
        assert!(PlannerError::not_found("route", "r1").is_client_error());
        let err: PlannerError = TransitionError {
            from: ManifestStatus::Draft,
            to: ManifestStatus::InProgress,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            err.to_string(),
            "invalid status transition from DRAFT to IN_PROGRESS"
        );
    }

    #[test]
    fn unreadable_payload_is_internal() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: PlannerError = StoreError::from(parse).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_client_error());
    }

    #[test]
    fn version_conflict_is_conflict() {
        let err: PlannerError = StoreError::VersionConflict {
            entity: "planned route",
            id: "r1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
