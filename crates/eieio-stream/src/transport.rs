//! Transceiver adapter boundary
//!
//! The raw interconnect is an external collaborator; this module holds
//! only its contract and an in-memory loopback implementation for
//! tests and bring-up. Sending may block or be asynchronous on a real
//! transport; the buffer manager therefore computes each packet fully
//! before the send and applies accounting only after it returns.

use std::collections::{HashMap, VecDeque};

use eieio_wire::CoreId;
use thiserror::Error;

/// Errors surfaced by a transceiver implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A frame could not be delivered
    #[error("Send to core {core} failed: {reason}")]
    SendFailed {
        /// Destination core
        core: CoreId,
        /// Transport-specific reason
        reason: String,
    },

    /// A frame could not be received
    #[error("Receive from core {core} failed: {reason}")]
    ReceiveFailed {
        /// Source core
        core: CoreId,
        /// Transport-specific reason
        reason: String,
    },

    /// Core not known to the transport
    #[error("Core {core} is not registered with the transport")]
    NotRegistered {
        /// Unknown core
        core: CoreId,
    },
}

/// Raw frame transport to and from cores
pub trait Transceiver {
    /// Make a core reachable, announcing its buffer capacity
    fn register_core(&mut self, core: CoreId, capacity_bytes: u32) -> Result<(), TransportError>;

    /// Deliver one encoded frame to a core
    fn send(&mut self, core: CoreId, bytes: &[u8]) -> Result<(), TransportError>;

    /// Fetch the next frame a core has produced, if any
    fn receive(&mut self, core: CoreId) -> Result<Option<Vec<u8>>, TransportError>;
}

/// In-memory transceiver: records outbound frames per core and serves
/// inbound frames from a scriptable queue
///
/// `fail_next_sends` makes the next N sends fail, for exercising the
/// manager's retry and fault paths.
#[derive(Debug, Default)]
pub struct LoopbackTransceiver {
    capacities: HashMap<CoreId, u32>,
    sent: HashMap<CoreId, Vec<Vec<u8>>>,
    inbound: HashMap<CoreId, VecDeque<Vec<u8>>>,
    fail_next_sends: u32,
}

impl LoopbackTransceiver {
    /// Create an empty loopback transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent to a core so far, in order
    pub fn sent_frames(&self, core: CoreId) -> &[Vec<u8>] {
        self.sent.get(&core).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Queue a frame to be returned by the next `receive` for a core
    pub fn push_inbound(&mut self, core: CoreId, bytes: Vec<u8>) {
        self.inbound.entry(core).or_default().push_back(bytes);
    }

    /// Make the next `n` sends fail with `SendFailed`
    pub fn fail_next_sends(&mut self, n: u32) {
        self.fail_next_sends = n;
    }
}

impl Transceiver for LoopbackTransceiver {
    fn register_core(&mut self, core: CoreId, capacity_bytes: u32) -> Result<(), TransportError> {
        self.capacities.insert(core, capacity_bytes);
        self.sent.entry(core).or_default();
        Ok(())
    }

    fn send(&mut self, core: CoreId, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.capacities.contains_key(&core) {
            return Err(TransportError::NotRegistered { core });
        }
        if self.fail_next_sends > 0 {
            self.fail_next_sends -= 1;
            return Err(TransportError::SendFailed {
                core,
                reason: "scripted failure".to_string(),
            });
        }
        self.sent.entry(core).or_default().push(bytes.to_vec());
        Ok(())
    }

    fn receive(&mut self, core: CoreId) -> Result<Option<Vec<u8>>, TransportError> {
        if !self.capacities.contains_key(&core) {
            return Err(TransportError::NotRegistered { core });
        }
        Ok(self.inbound.get_mut(&core).and_then(VecDeque::pop_front))
    }
}
