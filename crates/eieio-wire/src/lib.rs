//! EIEIO wire protocol for neuromorphic event streaming
//!
//! This crate implements the bit-exact encoding of EIEIO ("Event-In,
//! Event-IO") packets: batches of keyed spike events moving between a
//! host and on-chip cores, plus the flow-control commands that gate
//! them. It has no opinion about buffering or transport; the streaming
//! engine lives in `eieio-stream`.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod command;
pub mod error;
pub mod ids;
pub mod packet;

// Re-export essential types
pub use command::Command;
pub use error::{Result, WireError};
pub use ids::{CoreId, RegionId};
pub use packet::{min_packet_len, Event, KeyWidth, Packet, PacketVariant, HEADER_LEN};

/// Wire protocol version for compatibility checking
pub const WIRE_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integration() {
        // All public types importable and composable
        let packet = Packet::data(PacketVariant::Keys16, vec![Event::key(7)]);
        let bytes = packet.encode().unwrap();
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);

        let cmd = Packet::Command(Command::SpaceAvailable {
            core: CoreId::new(1),
            free_bytes: 128,
        });
        assert!(cmd.encode().is_ok());
    }
}
