//! Error types for the wire protocol layer

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors that can occur while encoding or decoding EIEIO packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Structurally invalid packet bytes
    #[error("Malformed packet: {reason}")]
    MalformedPacket {
        /// Reason the bytes could not be decoded
        reason: String,
    },

    /// Inconsistent variant/event combination at encode time
    #[error("Invalid variant: {reason}")]
    InvalidVariant {
        /// Reason the combination is rejected
        reason: String,
    },

    /// Event key or payload exceeds the declared key width
    #[error("Value {value:#x} exceeds {width_bits}-bit key width")]
    OversizedKey {
        /// Offending value
        value: u32,
        /// Declared key width in bits
        width_bits: u8,
    },

    /// Command id not in the recognized table (recoverable; caller may
    /// log and drop the packet)
    #[error("Unknown command id {id:#06x}")]
    UnknownCommand {
        /// Command id found on the wire
        id: u16,
    },
}

impl WireError {
    /// Create a malformed packet error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }

    /// Create an invalid variant error
    pub fn invalid_variant(reason: impl Into<String>) -> Self {
        Self::InvalidVariant {
            reason: reason.into(),
        }
    }

    /// Create an oversized key error
    pub fn oversized(value: u32, width_bits: u8) -> Self {
        Self::OversizedKey { value, width_bits }
    }

    /// True for errors the receive path may log and ignore
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand { .. } | Self::MalformedPacket { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = WireError::malformed("truncated header");
        assert!(matches!(err, WireError::MalformedPacket { .. }));

        let err = WireError::invalid_variant("empty body");
        assert!(matches!(err, WireError::InvalidVariant { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = WireError::oversized(0x1_0000, 16);
        let msg = format!("{}", err);
        assert!(msg.contains("16-bit"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(WireError::UnknownCommand { id: 0xbeef }.is_recoverable());
        assert!(WireError::malformed("x").is_recoverable());
        assert!(!WireError::oversized(1 << 20, 16).is_recoverable());
    }
}
