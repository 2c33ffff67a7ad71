//! Error types for the streaming engine

use eieio_wire::CoreId;
use thiserror::Error;

use crate::transport::TransportError;

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur in the streaming engine
///
/// Failures are isolated per core: nothing here aborts streaming for
/// unrelated cores. Only the accounting variants
/// ([`StreamError::InsufficientSpace`], [`StreamError::OverRelease`])
/// indicate a programming invariant violation rather than a runtime
/// condition.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Wire codec error
    #[error("Codec error: {source}")]
    Codec {
        #[from]
        /// Source codec error
        source: eieio_wire::WireError,
    },

    /// Reservation would exceed the region capacity
    #[error("Insufficient space: requested {requested} bytes, {free} free of {capacity}")]
    InsufficientSpace {
        /// Bytes requested
        requested: u32,
        /// Bytes currently free
        free: u32,
        /// Region capacity
        capacity: u32,
    },

    /// Release would drive the used-byte count negative
    #[error("Over-release: releasing {released} bytes with only {used} in use")]
    OverRelease {
        /// Bytes being released
        released: u32,
        /// Bytes currently in use
        used: u32,
    },

    /// Core is not registered with the manager
    #[error("Core {core} is not registered")]
    UnknownCore {
        /// Core that was not found
        core: CoreId,
    },

    /// Operation not legal in the core's current state
    #[error("Core {core}: cannot {operation} while {state}")]
    InvalidTransition {
        /// Core the operation targeted
        core: CoreId,
        /// State the core was in
        state: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Core registration rejected
    #[error("Cannot register core {core}: {reason}")]
    Registration {
        /// Core being registered
        core: CoreId,
        /// Reason registration failed
        reason: String,
    },

    /// Transport retries exhausted for one core's stream
    #[error("Stream fault on core {core} after {attempts} attempts: {source}")]
    StreamFault {
        /// Affected core
        core: CoreId,
        /// Send attempts made
        attempts: u32,
        /// Final transport error
        source: TransportError,
    },

    /// Draining exceeded the configured bound
    #[error("Drain timeout on core {core}: {outstanding_bytes} bytes unacknowledged")]
    DrainTimeout {
        /// Affected core
        core: CoreId,
        /// On-chip bytes never acknowledged, reported lost
        outstanding_bytes: u32,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },
}

impl StreamError {
    /// Create an unknown core error
    pub fn unknown_core(core: CoreId) -> Self {
        Self::UnknownCore { core }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(core: CoreId, state: &'static str, operation: &'static str) -> Self {
        Self::InvalidTransition {
            core,
            state,
            operation,
        }
    }

    /// Create a registration error
    pub fn registration(core: CoreId, reason: impl Into<String>) -> Self {
        Self::Registration {
            core,
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// True for invariant violations that are fatal for the affected
    /// core's manager instance
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::InsufficientSpace { .. } | Self::OverRelease { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StreamError::unknown_core(CoreId::new(4));
        assert!(matches!(err, StreamError::UnknownCore { .. }));

        let err = StreamError::invalid_transition(CoreId::new(4), "Stopped", "start");
        assert!(matches!(err, StreamError::InvalidTransition { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = StreamError::DrainTimeout {
            core: CoreId::new(2),
            outstanding_bytes: 96,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("C2"));
        assert!(msg.contains("96"));
    }

    #[test]
    fn test_invariant_classification() {
        let err = StreamError::InsufficientSpace {
            requested: 10,
            free: 4,
            capacity: 16,
        };
        assert!(err.is_invariant_violation());
        assert!(!StreamError::unknown_core(CoreId::new(0)).is_invariant_violation());
    }
}
