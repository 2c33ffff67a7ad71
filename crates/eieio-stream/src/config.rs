//! Per-core stream configuration and manager tuning parameters

use std::time::Duration;

use eieio_wire::{Event, KeyWidth, WireError};

use crate::{
    error::{Result, StreamError},
    queue::PendingEvent,
};

/// Negotiated wire shape for one core's stream
///
/// Fixed at registration; every packet sent to the core is homogeneous
/// in this shape. Events that do not fit it are dropped and counted,
/// never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamConfig {
    /// Key (and payload) width on the wire
    pub key_width: KeyWidth,
    /// Whether events carry a payload word
    pub with_payload: bool,
    /// Whether events are timestamped (shared per-packet timestamp)
    pub timed: bool,
}

impl StreamConfig {
    /// Untimed keys with no payload
    pub const fn keys_only(key_width: KeyWidth) -> Self {
        Self {
            key_width,
            with_payload: false,
            timed: false,
        }
    }

    /// Untimed (key, payload) pairs
    pub const fn with_payload(key_width: KeyWidth) -> Self {
        Self {
            key_width,
            with_payload: true,
            timed: false,
        }
    }

    /// Timestamped keys, one shared timestamp per packet
    pub const fn timed(key_width: KeyWidth) -> Self {
        Self {
            key_width,
            with_payload: false,
            timed: true,
        }
    }

    /// Worst-case encoded size of one event under this config
    ///
    /// Payload hoisting can shrink the actual size; callers use this
    /// conservative figure when budgeting a packet.
    pub fn bytes_per_event(&self) -> usize {
        let w = self.key_width.bytes();
        if self.with_payload {
            w * 2
        } else {
            w
        }
    }

    /// Header plus prefix bytes a packet under this config can need
    pub fn max_header_len(&self) -> usize {
        eieio_wire::min_packet_len(self.key_width, self.timed || self.with_payload)
    }

    /// Check one pending event against this config and convert it to
    /// its wire form
    ///
    /// Rejects oversized keys, payloads and timestamps, a missing or
    /// stray payload, and a missing timestamp on a timed stream.
    pub fn wire_event(&self, ev: &PendingEvent) -> std::result::Result<Event, WireError> {
        if !self.key_width.fits(ev.key) {
            return Err(WireError::oversized(ev.key, self.key_width.bits()));
        }
        if self.timed {
            match ev.timestamp {
                Some(ts) if self.key_width.fits(ts) => {}
                Some(ts) => return Err(WireError::oversized(ts, self.key_width.bits())),
                None => {
                    return Err(WireError::invalid_variant(
                        "event without timestamp on a timed stream",
                    ))
                }
            }
        }
        match (self.with_payload, ev.payload) {
            (true, Some(p)) if self.key_width.fits(p) => Ok(Event::with_payload(ev.key, p)),
            (true, Some(p)) => Err(WireError::oversized(p, self.key_width.bits())),
            (true, None) => Err(WireError::invalid_variant(
                "event without payload on a payload stream",
            )),
            (false, None) => Ok(Event::key(ev.key)),
            (false, Some(_)) => Err(WireError::invalid_variant(
                "payload-carrying event on a payload-free stream",
            )),
        }
    }
}

/// Manager tuning parameters
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Maximum encoded packet size (protocol/transport MTU)
    pub mtu: usize,
    /// Send retries before a core is declared faulted
    pub max_send_retries: u32,
    /// Bound on the Draining state; the only configurable
    /// cancellation timeout
    pub drain_timeout: Duration,
    /// Free-byte level below which sending pauses until the next
    /// space report
    pub low_watermark: u32,
}

/// Smallest MTU that still fits a prefixed 32-bit header and one event
pub const MIN_MTU: usize = 16;

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            mtu: 256,
            max_send_retries: 3,
            drain_timeout: Duration::from_secs(5),
            low_watermark: 32,
        }
    }
}

impl StreamParams {
    /// Create new parameters with validation
    pub fn new(mtu: usize, drain_timeout: Duration) -> Result<Self> {
        let params = Self {
            mtu,
            drain_timeout,
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// Set the packet size ceiling
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the send retry bound
    pub fn with_max_send_retries(mut self, retries: u32) -> Self {
        self.max_send_retries = retries;
        self
    }

    /// Set the drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the low watermark on free space
    pub fn with_low_watermark(mut self, bytes: u32) -> Self {
        self.low_watermark = bytes;
        self
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if self.mtu < MIN_MTU {
            return Err(StreamError::invalid_parameter(
                "mtu",
                self.mtu.to_string(),
                format!(">= {}", MIN_MTU),
            ));
        }
        if self.drain_timeout.is_zero() {
            return Err(StreamError::invalid_parameter(
                "drain_timeout",
                "0".to_string(),
                "> 0",
            ));
        }
        Ok(())
    }
}
