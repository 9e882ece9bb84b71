//! Error types for the pod composer
//!
//! Provides structured error types for every stage of the composed node
//! pipeline: template validation, allocation, assembly, disassembly and
//! power actions, plus the device capability layer underneath.

use crate::assembly::AssemblyStep;
use crate::domain::ports::DeviceError;
use crate::graph::EntityId;
use crate::node::NodeState;
use crate::template::{RequirementCategory, ValidationErrors};
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Template validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{kind} not found: {reference}")]
    EntityNotFound { kind: String, reference: String },

    #[error("Invalid state for {action} on node {node}: {state}")]
    InvalidState {
        node: EntityId,
        state: NodeState,
        action: String,
    },

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    // =========================================================================
    // Allocation Errors
    // =========================================================================
    #[error("Insufficient resources for {category}: {reason}")]
    Allocation {
        category: RequirementCategory,
        reason: String,
    },

    // =========================================================================
    // Assembly Errors
    // =========================================================================
    #[error("Assembly failed at {step}: {cause}")]
    Assembly { step: AssemblyStep, cause: String },

    #[error("Disassembly incomplete at {step}: {cause}")]
    Disassembly { step: AssemblyStep, cause: String },

    #[error("Device action failed: {0}")]
    Device(#[from] DeviceError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Resource graph inconsistency: {0}")]
    Consistency(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action a caller should take after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RetryWithBackoff,
    /// Retry after a specific duration
    RetryAfter(Duration),
    /// Don't retry, the request itself has to change
    NoRetry,
    /// Local state is settled, remote state needs out-of-band reconciliation
    Reconcile,
}

impl Error {
    /// Shorthand for [`Error::EntityNotFound`]
    pub fn not_found(kind: impl std::fmt::Display, reference: impl std::fmt::Display) -> Self {
        Error::EntityNotFound {
            kind: kind.to_string(),
            reference: reference.to_string(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient device trouble - retry with backoff
            Error::Device(e) if e.is_transient() => ErrorAction::RetryWithBackoff,
            Error::Assembly { .. } => ErrorAction::RetryWithBackoff,

            // Another operation holds the node - short wait
            Error::InvalidState {
                state: NodeState::Assembling,
                ..
            } => ErrorAction::RetryAfter(Duration::from_secs(5)),

            // Pool exhausted - wait for capacity to be released
            Error::Allocation { .. } => ErrorAction::RetryAfter(Duration::from_secs(60)),

            Error::Disassembly { .. } => ErrorAction::Reconcile,

            // Request/programming errors - don't retry automatically
            _ => ErrorAction::NoRetry,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.action(),
            ErrorAction::RetryWithBackoff | ErrorAction::RetryAfter(_)
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Device(e) if e.is_transient())
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::Allocation {
            category: RequirementCategory::Processor,
            reason: "requested 3, 2 available".into(),
        };
        assert_eq!(err.action(), ErrorAction::RetryAfter(Duration::from_secs(60)));

        let err = Error::InvalidState {
            node: EntityId(7),
            state: NodeState::Assembling,
            action: "assemble".into(),
        };
        assert_eq!(err.action(), ErrorAction::RetryAfter(Duration::from_secs(5)));

        let err = Error::Disassembly {
            step: AssemblyStep::Storage,
            cause: "unreachable".into(),
        };
        assert_eq!(err.action(), ErrorAction::Reconcile);

        let err = Error::Consistency("two containers".into());
        assert_eq!(err.action(), ErrorAction::NoRetry);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Device(DeviceError::Unreachable("bmc-1".into()));
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let rejected = Error::Device(DeviceError::Rejected("bad vlan".into()));
        assert!(!rejected.is_retryable());
        assert!(!rejected.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("ComposedNode", EntityId(42));
        assert_eq!(err.to_string(), "ComposedNode not found: 42");
    }
}
