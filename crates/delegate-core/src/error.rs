//! Stable error codes and their categories.
//!
//! Every failure that reaches a caller carries an [`ErrorCode`]; the
//! [`ErrorCategory`] is derived from the code, never chosen separately.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Policy,
    Runtime,
    Persistence,
    NotFound,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Policy => "policy",
            Self::Runtime => "runtime",
            Self::Persistence => "persistence",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // validation
    InvalidParams,
    UnknownOperation,
    UnknownSubagent,
    // policy
    FeatureDisabled,
    PermissionDenied,
    SubagentHidden,
    BackgroundNotSupported,
    // runtime
    BackendTimeout,
    BackendAborted,
    BackendExitNonzero,
    BackendSpawnFailed,
    BackendFailed,
    IllegalTaskStateTransition,
    DuplicateTaskId,
    TaskNotResumable,
    TaskOrphaned,
    // persistence
    PersistenceCorrupt,
    PersistenceReadFailed,
    PersistenceWriteFailed,
    // not_found
    TaskNotFound,
    TaskExpired,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 21] = [
        Self::InvalidParams,
        Self::UnknownOperation,
        Self::UnknownSubagent,
        Self::FeatureDisabled,
        Self::PermissionDenied,
        Self::SubagentHidden,
        Self::BackgroundNotSupported,
        Self::BackendTimeout,
        Self::BackendAborted,
        Self::BackendExitNonzero,
        Self::BackendSpawnFailed,
        Self::BackendFailed,
        Self::IllegalTaskStateTransition,
        Self::DuplicateTaskId,
        Self::TaskNotResumable,
        Self::TaskOrphaned,
        Self::PersistenceCorrupt,
        Self::PersistenceReadFailed,
        Self::PersistenceWriteFailed,
        Self::TaskNotFound,
        Self::TaskExpired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::UnknownOperation => "unknown_operation",
            Self::UnknownSubagent => "unknown_subagent",
            Self::FeatureDisabled => "feature_disabled",
            Self::PermissionDenied => "permission_denied",
            Self::SubagentHidden => "subagent_hidden",
            Self::BackgroundNotSupported => "background_not_supported",
            Self::BackendTimeout => "backend_timeout",
            Self::BackendAborted => "backend_aborted",
            Self::BackendExitNonzero => "backend_exit_nonzero",
            Self::BackendSpawnFailed => "backend_spawn_failed",
            Self::BackendFailed => "backend_failed",
            Self::IllegalTaskStateTransition => "illegal_task_state_transition",
            Self::DuplicateTaskId => "duplicate_task_id",
            Self::TaskNotResumable => "task_not_resumable",
            Self::TaskOrphaned => "task_orphaned",
            Self::PersistenceCorrupt => "persistence_corrupt",
            Self::PersistenceReadFailed => "persistence_read_failed",
            Self::PersistenceWriteFailed => "persistence_write_failed",
            Self::TaskNotFound => "task_not_found",
            Self::TaskExpired => "task_expired",
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            Self::InvalidParams | Self::UnknownOperation | Self::UnknownSubagent => {
                ErrorCategory::Validation
            }
            Self::FeatureDisabled
            | Self::PermissionDenied
            | Self::SubagentHidden
            | Self::BackgroundNotSupported => ErrorCategory::Policy,
            Self::BackendTimeout
            | Self::BackendAborted
            | Self::BackendExitNonzero
            | Self::BackendSpawnFailed
            | Self::BackendFailed
            | Self::IllegalTaskStateTransition
            | Self::DuplicateTaskId
            | Self::TaskNotResumable
            | Self::TaskOrphaned => ErrorCategory::Runtime,
            Self::PersistenceCorrupt | Self::PersistenceReadFailed | Self::PersistenceWriteFailed => {
                ErrorCategory::Persistence
            }
            Self::TaskNotFound | Self::TaskExpired => ErrorCategory::NotFound,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ErrorCodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| ErrorCodeParseError(s.to_owned()))
    }
}

/// Error returned when parsing an unknown [`ErrorCode`] string.
#[derive(Debug, Clone)]
pub struct ErrorCodeParseError(pub String);

impl fmt::Display for ErrorCodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error code: {:?}", self.0)
    }
}

impl std::error::Error for ErrorCodeParseError {}

/// A coded failure resolved at the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct OperationError {
    pub code: ErrorCode,
    pub message: String,
}

impl OperationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_strings() {
        for code in ErrorCode::ALL {
            let parsed: ErrorCode = code.as_str().parse().unwrap();
            assert_eq!(parsed, code);
        }
    }

    #[test]
    fn serde_matches_as_str() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, serde_json::Value::String(code.as_str().to_string()));
        }
    }

    #[test]
    fn categories_follow_the_taxonomy() {
        assert_eq!(ErrorCode::UnknownSubagent.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::BackgroundNotSupported.category(), ErrorCategory::Policy);
        assert_eq!(ErrorCode::DuplicateTaskId.category(), ErrorCategory::Runtime);
        assert_eq!(ErrorCode::PersistenceCorrupt.category(), ErrorCategory::Persistence);
        assert_eq!(ErrorCode::TaskExpired.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn operation_error_display() {
        let err = OperationError::new(ErrorCode::PermissionDenied, "finder is denied");
        assert_eq!(err.to_string(), "permission_denied: finder is denied");
        assert_eq!(err.category(), ErrorCategory::Policy);
    }

    #[test]
    fn unknown_code_does_not_parse() {
        assert!("task_permission_ask_required".parse::<ErrorCode>().is_err());
    }
}
