//! EIEIO packet variants and the bit-exact codec
//!
//! Wire layout (all multi-byte integers little-endian):
//!
//! ```text
//! byte 0: [7:6] type selector   00 = 16-bit key
//!                               01 = 32-bit key, no payload
//!                               10 = 32-bit key with payload
//!                               11 = command packet
//!         [5]   payload-present
//!         [4]   time-flag (prefix word is a shared timestamp)
//!         [3]   prefix-present
//!         [2:0] reserved, zero
//! byte 1: data: event count (0 = derive from remaining length)
//!         command: unused (0)
//! then:   optional prefix word (key width), then the event body
//! ```
//!
//! A packet is homogeneous: one key width, one payload mode and one
//! prefix mode for its entire body.

use crate::{
    command::Command,
    error::{Result, WireError},
};

/// Header bit masks for byte 0
mod bits {
    pub const SELECTOR_SHIFT: u8 = 6;
    pub const SELECTOR_K16: u8 = 0b00;
    pub const SELECTOR_K32: u8 = 0b01;
    pub const SELECTOR_K32_PAYLOAD: u8 = 0b10;
    pub const SELECTOR_COMMAND: u8 = 0b11;
    pub const PAYLOAD_PRESENT: u8 = 0x20;
    pub const TIME_FLAG: u8 = 0x10;
    pub const PREFIX_PRESENT: u8 = 0x08;
    pub const RESERVED: u8 = 0x07;
}

/// Size of the fixed packet header in bytes
pub const HEADER_LEN: usize = 2;

/// Key width of a data packet, fixed for the whole packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KeyWidth {
    /// 16-bit keys and payloads
    K16,
    /// 32-bit keys and payloads
    K32,
}

impl KeyWidth {
    /// Width in bytes
    pub const fn bytes(&self) -> usize {
        match self {
            Self::K16 => 2,
            Self::K32 => 4,
        }
    }

    /// Width in bits
    pub const fn bits(&self) -> u8 {
        match self {
            Self::K16 => 16,
            Self::K32 => 32,
        }
    }

    /// Largest value representable at this width
    pub const fn max_value(&self) -> u32 {
        match self {
            Self::K16 => u16::MAX as u32,
            Self::K32 => u32::MAX,
        }
    }

    /// True when `value` fits this width
    pub const fn fits(&self, value: u32) -> bool {
        value <= self.max_value()
    }
}

/// One event on the wire: a key and an optional payload
///
/// Timestamps are never per-event on the wire; a timed packet hoists
/// the shared timestamp into its header prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    /// Event source key (a "neuron fired" marker)
    pub key: u32,
    /// Optional payload, same width as the key
    pub payload: Option<u32>,
}

impl Event {
    /// Create a key-only event
    pub const fn key(key: u32) -> Self {
        Self { key, payload: None }
    }

    /// Create a (key, payload) event
    pub const fn with_payload(key: u32, payload: u32) -> Self {
        Self {
            key,
            payload: Some(payload),
        }
    }
}

/// The shape of a data packet
///
/// One tagged union covers every key-width/payload/prefix/time
/// combination, matched exhaustively by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacketVariant {
    /// 16-bit keys, no payload
    Keys16,
    /// 32-bit keys, no payload
    Keys32,
    /// 16-bit (key, payload) pairs
    KeysPayload16,
    /// 32-bit (key, payload) pairs
    KeysPayload32,
    /// A payload base hoisted into the header and applied to every event
    PayloadPrefixed {
        /// Key width of the packet
        width: KeyWidth,
        /// Whether events still carry their own payload word
        with_payload: bool,
        /// Payload base shared by every event
        prefix: u32,
    },
    /// A timestamp hoisted into the header and shared by every event
    TimedPayloadPrefixed {
        /// Key width of the packet
        width: KeyWidth,
        /// Whether events still carry their own payload word
        with_payload: bool,
        /// Timestamp shared by every event
        timestamp: u32,
    },
}

impl PacketVariant {
    /// Key width of this variant
    pub fn key_width(&self) -> KeyWidth {
        match self {
            Self::Keys16 | Self::KeysPayload16 => KeyWidth::K16,
            Self::Keys32 | Self::KeysPayload32 => KeyWidth::K32,
            Self::PayloadPrefixed { width, .. } | Self::TimedPayloadPrefixed { width, .. } => {
                *width
            }
        }
    }

    /// Whether events carry a per-event payload word
    pub fn with_payload(&self) -> bool {
        match self {
            Self::Keys16 | Self::Keys32 => false,
            Self::KeysPayload16 | Self::KeysPayload32 => true,
            Self::PayloadPrefixed { with_payload, .. }
            | Self::TimedPayloadPrefixed { with_payload, .. } => *with_payload,
        }
    }

    /// The hoisted header value, if any
    pub fn prefix(&self) -> Option<u32> {
        match self {
            Self::Keys16 | Self::Keys32 | Self::KeysPayload16 | Self::KeysPayload32 => None,
            Self::PayloadPrefixed { prefix, .. } => Some(*prefix),
            Self::TimedPayloadPrefixed { timestamp, .. } => Some(*timestamp),
        }
    }

    /// Whether the prefix is a shared timestamp
    pub fn is_timed(&self) -> bool {
        matches!(self, Self::TimedPayloadPrefixed { .. })
    }

    /// Encoded size of one event in this variant
    pub fn element_size(&self) -> usize {
        let w = self.key_width().bytes();
        if self.with_payload() {
            w * 2
        } else {
            w
        }
    }

    /// Minimum encoded length: the header plus the prefix word, with no
    /// body; callers use this to pre-size receive buffers
    pub fn min_len(&self) -> usize {
        min_packet_len(self.key_width(), self.prefix().is_some())
    }

    /// Encoded length of a packet with `n_events` events
    pub fn encoded_len(&self, n_events: usize) -> usize {
        self.min_len() + n_events * self.element_size()
    }

    fn header_byte(&self) -> u8 {
        let selector = match (self.key_width(), self.with_payload()) {
            (KeyWidth::K16, _) => bits::SELECTOR_K16,
            (KeyWidth::K32, false) => bits::SELECTOR_K32,
            (KeyWidth::K32, true) => bits::SELECTOR_K32_PAYLOAD,
        };
        let mut b = selector << bits::SELECTOR_SHIFT;
        if self.with_payload() {
            b |= bits::PAYLOAD_PRESENT;
        }
        if self.is_timed() {
            b |= bits::TIME_FLAG;
        }
        if self.prefix().is_some() {
            b |= bits::PREFIX_PRESENT;
        }
        b
    }
}

/// Minimum encoded packet length for a data shape, derivable from the
/// header alone
pub const fn min_packet_len(width: KeyWidth, prefixed: bool) -> usize {
    if prefixed {
        HEADER_LEN + width.bytes()
    } else {
        HEADER_LEN
    }
}

/// One decoded EIEIO packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Packet {
    /// A batch of events sharing one variant
    Data {
        /// Shape of the packet
        variant: PacketVariant,
        /// Events in arrival order
        events: Vec<Event>,
    },
    /// A flow-control command
    Command(Command),
}

impl Packet {
    /// Build a data packet
    pub fn data(variant: PacketVariant, events: Vec<Event>) -> Self {
        Self::Data { variant, events }
    }

    /// Encode this packet to wire bytes
    ///
    /// Fails with [`WireError::InvalidVariant`] on an empty data body,
    /// a payload-mode mismatch, or a prefix value wider than the key
    /// width; fails with [`WireError::OversizedKey`] when a key or
    /// payload exceeds the declared width.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Command(cmd) => {
                let mut out = vec![bits::SELECTOR_COMMAND << bits::SELECTOR_SHIFT, 0];
                cmd.encode_body(&mut out)?;
                Ok(out)
            }
            Self::Data { variant, events } => encode_data(*variant, events),
        }
    }

    /// Decode one packet from wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::malformed(format!(
                "packet of {} bytes is shorter than the {}-byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }
        let b0 = bytes[0];
        if b0 & bits::RESERVED != 0 {
            return Err(WireError::malformed("reserved header bits set"));
        }

        let selector = b0 >> bits::SELECTOR_SHIFT;
        if selector == bits::SELECTOR_COMMAND {
            if b0 & (bits::PAYLOAD_PRESENT | bits::TIME_FLAG | bits::PREFIX_PRESENT) != 0 {
                return Err(WireError::malformed("data flags set on a command header"));
            }
            return Command::decode_body(&bytes[HEADER_LEN..]).map(Self::Command);
        }

        decode_data(selector, b0, bytes)
    }
}

fn encode_data(variant: PacketVariant, events: &[Event]) -> Result<Vec<u8>> {
    if events.is_empty() {
        return Err(WireError::invalid_variant("data packet with no events"));
    }
    let width = variant.key_width();
    if let Some(prefix) = variant.prefix() {
        if !width.fits(prefix) {
            return Err(WireError::invalid_variant(format!(
                "prefix {:#x} exceeds {}-bit key width",
                prefix,
                width.bits()
            )));
        }
    }

    let count = if events.len() <= u8::MAX as usize {
        events.len() as u8
    } else {
        0 // derive from remaining length
    };
    let mut out = Vec::with_capacity(variant.encoded_len(events.len()));
    out.push(variant.header_byte());
    out.push(count);
    if let Some(prefix) = variant.prefix() {
        put_word(&mut out, prefix, width);
    }

    for event in events {
        if event.payload.is_some() != variant.with_payload() {
            return Err(WireError::invalid_variant(
                "payload mode differs between variant and event",
            ));
        }
        if !width.fits(event.key) {
            return Err(WireError::oversized(event.key, width.bits()));
        }
        put_word(&mut out, event.key, width);
        if let Some(payload) = event.payload {
            if !width.fits(payload) {
                return Err(WireError::oversized(payload, width.bits()));
            }
            put_word(&mut out, payload, width);
        }
    }
    Ok(out)
}

fn decode_data(selector: u8, b0: u8, bytes: &[u8]) -> Result<Packet> {
    let payload_bit = b0 & bits::PAYLOAD_PRESENT != 0;
    let timed = b0 & bits::TIME_FLAG != 0;
    let prefixed = b0 & bits::PREFIX_PRESENT != 0;

    let (width, with_payload) = match selector {
        bits::SELECTOR_K16 => (KeyWidth::K16, payload_bit),
        bits::SELECTOR_K32 => {
            if payload_bit {
                return Err(WireError::malformed(
                    "payload-present set on the 32-bit no-payload selector",
                ));
            }
            (KeyWidth::K32, false)
        }
        bits::SELECTOR_K32_PAYLOAD => {
            if !payload_bit {
                return Err(WireError::malformed(
                    "payload-present clear on the 32-bit payload selector",
                ));
            }
            (KeyWidth::K32, true)
        }
        _ => unreachable!("command selector handled by caller"),
    };
    if timed && !prefixed {
        return Err(WireError::malformed("time-flag set without a prefix word"));
    }

    let count = bytes[1];
    let mut rest = &bytes[HEADER_LEN..];

    let prefix = if prefixed {
        if rest.len() < width.bytes() {
            return Err(WireError::malformed("packet truncated inside prefix word"));
        }
        let value = get_word(rest, width);
        rest = &rest[width.bytes()..];
        Some(value)
    } else {
        None
    };

    let variant = match (prefix, timed) {
        (Some(timestamp), true) => PacketVariant::TimedPayloadPrefixed {
            width,
            with_payload,
            timestamp,
        },
        (Some(prefix), false) => PacketVariant::PayloadPrefixed {
            width,
            with_payload,
            prefix,
        },
        (None, _) => match (width, with_payload) {
            (KeyWidth::K16, false) => PacketVariant::Keys16,
            (KeyWidth::K16, true) => PacketVariant::KeysPayload16,
            (KeyWidth::K32, false) => PacketVariant::Keys32,
            (KeyWidth::K32, true) => PacketVariant::KeysPayload32,
        },
    };

    let elem = variant.element_size();
    if rest.len() % elem != 0 {
        return Err(WireError::malformed(format!(
            "body of {} bytes is not a multiple of the {}-byte element size",
            rest.len(),
            elem
        )));
    }
    let n_events = rest.len() / elem;
    if count != 0 && count as usize != n_events {
        return Err(WireError::malformed(format!(
            "count byte says {} events, body holds {}",
            count, n_events
        )));
    }

    let mut events = Vec::with_capacity(n_events);
    for chunk in rest.chunks_exact(elem) {
        let key = get_word(chunk, width);
        let payload = if with_payload {
            Some(get_word(&chunk[width.bytes()..], width))
        } else {
            None
        };
        events.push(Event { key, payload });
    }
    Ok(Packet::Data { variant, events })
}

fn put_word(out: &mut Vec<u8>, value: u32, width: KeyWidth) {
    match width {
        KeyWidth::K16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        KeyWidth::K32 => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn get_word(bytes: &[u8], width: KeyWidth) -> u32 {
    match width {
        KeyWidth::K16 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
        KeyWidth::K32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CoreId;
    use proptest::prelude::*;

    #[test]
    fn test_keys16_exact_bytes() {
        let packet = Packet::data(
            PacketVariant::Keys16,
            vec![Event::key(0x0001), Event::key(0x0002)],
        );
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes, vec![0x00, 0x02, 0x01, 0x00, 0x02, 0x00]);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_keys32_exact_bytes() {
        let packet = Packet::data(PacketVariant::Keys32, vec![Event::key(0x01020304)]);
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes, vec![0x40, 0x01, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_keys_payload32_exact_bytes() {
        let packet = Packet::data(
            PacketVariant::KeysPayload32,
            vec![Event::with_payload(0x01020304, 0x0a0b0c0d)],
        );
        let bytes = packet.encode().unwrap();
        assert_eq!(
            bytes,
            vec![0xa0, 0x01, 0x04, 0x03, 0x02, 0x01, 0x0d, 0x0c, 0x0b, 0x0a]
        );
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_payload_prefixed_exact_bytes() {
        let packet = Packet::data(
            PacketVariant::PayloadPrefixed {
                width: KeyWidth::K16,
                with_payload: false,
                prefix: 0x00f0,
            },
            vec![Event::key(0x0005)],
        );
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes, vec![0x08, 0x01, 0xf0, 0x00, 0x05, 0x00]);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_timed_prefixed_exact_bytes() {
        let packet = Packet::data(
            PacketVariant::TimedPayloadPrefixed {
                width: KeyWidth::K32,
                with_payload: false,
                timestamp: 0x11223344,
            },
            vec![Event::key(0x0000aabb)],
        );
        let bytes = packet.encode().unwrap();
        assert_eq!(
            bytes,
            vec![0x58, 0x01, 0x44, 0x33, 0x22, 0x11, 0xbb, 0xaa, 0x00, 0x00]
        );
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_command_exact_bytes() {
        let start = Packet::Command(Command::StartSendingRequests);
        assert_eq!(start.encode().unwrap(), vec![0xc0, 0x00, 0x05, 0x00]);

        let report = Packet::Command(Command::SpaceAvailable {
            core: CoreId::new(2),
            free_bytes: 100,
        });
        assert_eq!(
            report.encode().unwrap(),
            vec![0xc0, 0x00, 0x06, 0x00, 0x02, 0x00, 0x64, 0x00]
        );
        assert_eq!(
            Packet::decode(&report.encode().unwrap()).unwrap(),
            report
        );
    }

    #[test]
    fn test_min_packet_len() {
        assert_eq!(min_packet_len(KeyWidth::K16, false), 2);
        assert_eq!(min_packet_len(KeyWidth::K16, true), 4);
        assert_eq!(min_packet_len(KeyWidth::K32, true), 6);
        // Independent of body content
        let variant = PacketVariant::PayloadPrefixed {
            width: KeyWidth::K32,
            with_payload: true,
            prefix: 9,
        };
        assert_eq!(variant.min_len(), 6);
        assert_eq!(variant.encoded_len(3), 6 + 3 * 8);
    }

    #[test]
    fn test_empty_body_rejected() {
        let err = Packet::data(PacketVariant::Keys16, vec![]).encode().unwrap_err();
        assert!(matches!(err, WireError::InvalidVariant { .. }));
    }

    #[test]
    fn test_homogeneity_rejected() {
        // Payload event in a no-payload variant
        let err = Packet::data(
            PacketVariant::Keys16,
            vec![Event::key(1), Event::with_payload(2, 3)],
        )
        .encode()
        .unwrap_err();
        assert!(matches!(err, WireError::InvalidVariant { .. }));

        // Key-only event in a payload variant
        let err = Packet::data(
            PacketVariant::KeysPayload32,
            vec![Event::with_payload(1, 2), Event::key(3)],
        )
        .encode()
        .unwrap_err();
        assert!(matches!(err, WireError::InvalidVariant { .. }));
    }

    #[test]
    fn test_oversized_key_rejected() {
        let err = Packet::data(PacketVariant::Keys16, vec![Event::key(0x1_0000)])
            .encode()
            .unwrap_err();
        assert_eq!(err, WireError::oversized(0x1_0000, 16));

        let err = Packet::data(
            PacketVariant::KeysPayload16,
            vec![Event::with_payload(1, 0x1_0000)],
        )
        .encode()
        .unwrap_err();
        assert_eq!(err, WireError::oversized(0x1_0000, 16));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let err = Packet::data(
            PacketVariant::PayloadPrefixed {
                width: KeyWidth::K16,
                with_payload: false,
                prefix: 0x1_0000,
            },
            vec![Event::key(1)],
        )
        .encode()
        .unwrap_err();
        assert!(matches!(err, WireError::InvalidVariant { .. }));
    }

    #[test]
    fn test_malformed_packets() {
        // Short header
        assert!(Packet::decode(&[0x00]).is_err());
        // Reserved bits set
        assert!(Packet::decode(&[0x01, 0x00]).is_err());
        // Time-flag without prefix
        assert!(Packet::decode(&[0x10, 0x00, 0x01, 0x00]).is_err());
        // Body not a multiple of the element size
        assert!(Packet::decode(&[0x00, 0x00, 0x01]).is_err());
        // Count byte disagrees with body length
        assert!(Packet::decode(&[0x00, 0x03, 0x01, 0x00]).is_err());
        // Selector/payload-bit inconsistency, both directions
        assert!(Packet::decode(&[0x60, 0x00]).is_err());
        assert!(Packet::decode(&[0x80, 0x00]).is_err());
        // Data flags on a command header
        assert!(Packet::decode(&[0xe0, 0x00, 0x05, 0x00]).is_err());
    }

    #[test]
    fn test_header_only_data_decodes_empty() {
        let packet = Packet::decode(&[0x00, 0x00]).unwrap();
        assert_eq!(
            packet,
            Packet::Data {
                variant: PacketVariant::Keys16,
                events: vec![],
            }
        );
    }

    #[test]
    fn test_auto_count_over_255_events() {
        let events: Vec<Event> = (0u32..300).map(Event::key).collect();
        let packet = Packet::data(PacketVariant::Keys32, events);
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[1], 0, "count byte must be auto for >255 events");
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    proptest! {
        #[test]
        fn prop_keys16_roundtrip(keys in prop::collection::vec(0u32..=0xffff, 1..64)) {
            let events: Vec<Event> = keys.into_iter().map(Event::key).collect();
            let packet = Packet::data(PacketVariant::Keys16, events);
            let bytes = packet.encode().unwrap();
            prop_assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }

        #[test]
        fn prop_keys_payload32_roundtrip(
            pairs in prop::collection::vec((any::<u32>(), any::<u32>()), 1..64)
        ) {
            let events: Vec<Event> = pairs
                .into_iter()
                .map(|(k, p)| Event::with_payload(k, p))
                .collect();
            let packet = Packet::data(PacketVariant::KeysPayload32, events);
            let bytes = packet.encode().unwrap();
            prop_assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }

        #[test]
        fn prop_timed_prefixed_roundtrip(
            keys in prop::collection::vec(0u32..=0xffff, 1..64),
            timestamp in 0u32..=0xffff,
        ) {
            let events: Vec<Event> = keys.into_iter().map(Event::key).collect();
            let packet = Packet::data(
                PacketVariant::TimedPayloadPrefixed {
                    width: KeyWidth::K16,
                    with_payload: false,
                    timestamp,
                },
                events,
            );
            let bytes = packet.encode().unwrap();
            prop_assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }
    }
}
