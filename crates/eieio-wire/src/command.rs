//! EIEIO command packets
//!
//! Commands are the flow-control half of the protocol: they gate when a
//! core announces buffer space and when the host stops feeding it. A
//! command body is a 16-bit id followed by up to two 16-bit argument
//! words, all little-endian.

use crate::{
    error::{Result, WireError},
    ids::CoreId,
};

/// Recognized command ids
pub mod ids {
    /// Stop processing events on the core
    pub const EVENT_STOP: u16 = 3;
    /// Core must stop announcing buffer space
    pub const STOP_SENDING_REQUESTS: u16 = 4;
    /// Core must begin announcing buffer space
    pub const START_SENDING_REQUESTS: u16 = 5;
    /// Space-available report: core id + free byte count
    pub const SPACE_AVAILABLE: u16 = 6;
}

/// A decoded EIEIO command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    /// Stop processing events on the core
    EventStop,
    /// Tell the core to stop announcing buffer space
    StopSendingRequests,
    /// Tell the core to start announcing buffer space
    StartSendingRequests,
    /// A core reporting how many free bytes remain in its buffer
    SpaceAvailable {
        /// Core making the report
        core: CoreId,
        /// Free bytes remaining in the core's buffer
        free_bytes: u16,
    },
}

impl Command {
    /// The wire id of this command
    pub fn id(&self) -> u16 {
        match self {
            Self::EventStop => ids::EVENT_STOP,
            Self::StopSendingRequests => ids::STOP_SENDING_REQUESTS,
            Self::StartSendingRequests => ids::START_SENDING_REQUESTS,
            Self::SpaceAvailable { .. } => ids::SPACE_AVAILABLE,
        }
    }

    /// Number of 16-bit argument words this command carries
    pub fn arg_words(&self) -> usize {
        match self {
            Self::EventStop | Self::StopSendingRequests | Self::StartSendingRequests => 0,
            Self::SpaceAvailable { .. } => 2,
        }
    }

    /// Append the command body (id + args, no header) to `out`
    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.id().to_le_bytes());
        if let Self::SpaceAvailable { core, free_bytes } = self {
            if !core.fits_wire() {
                return Err(WireError::invalid_variant(format!(
                    "core id {} does not fit a 16-bit argument word",
                    core
                )));
            }
            out.extend_from_slice(&(core.raw() as u16).to_le_bytes());
            out.extend_from_slice(&free_bytes.to_le_bytes());
        }
        Ok(())
    }

    /// Decode a command body (id + args, header already consumed)
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(WireError::malformed("command body shorter than its id"));
        }
        let id = u16::from_le_bytes([body[0], body[1]]);
        let args = &body[2..];

        let expect_args = |n: usize| -> Result<()> {
            if args.len() != n * 2 {
                return Err(WireError::malformed(format!(
                    "command {:#06x} expects {} argument words, got {} bytes",
                    id,
                    n,
                    args.len()
                )));
            }
            Ok(())
        };

        match id {
            ids::EVENT_STOP => {
                expect_args(0)?;
                Ok(Self::EventStop)
            }
            ids::STOP_SENDING_REQUESTS => {
                expect_args(0)?;
                Ok(Self::StopSendingRequests)
            }
            ids::START_SENDING_REQUESTS => {
                expect_args(0)?;
                Ok(Self::StartSendingRequests)
            }
            ids::SPACE_AVAILABLE => {
                expect_args(2)?;
                let core = u16::from_le_bytes([args[0], args[1]]);
                let free_bytes = u16::from_le_bytes([args[2], args[3]]);
                Ok(Self::SpaceAvailable {
                    core: CoreId::new(core as u32),
                    free_bytes,
                })
            }
            _ => Err(WireError::UnknownCommand { id }),
        }
    }
}
