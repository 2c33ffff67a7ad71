//! Per-core buffer manager and flow-control state machine
//!
//! For each registered core the manager tracks an on-chip
//! [`BufferRegion`], a FIFO of pending events, and a lifecycle state
//! machine `Idle -> Streaming -> Draining -> Stopped`. Outbound flow
//! is driven by `SPACE_AVAILABLE` reports from the core: each report
//! re-synchronizes the region accounting, then the manager greedily
//! drains the queue into packets no larger than the reported free
//! space or the MTU.
//!
//! Operations for one core are strictly serialized: a space report is
//! fully applied (packets built and handed to the transceiver) before
//! the next one is processed. The transceiver boundary is the only
//! suspension point; a packet is computed first, sent, and only then
//! is its accounting delta applied. Failure isolation is per core:
//! a fault on one core never disturbs another.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use eieio_wire::{Command, CoreId, Event, KeyWidth, Packet, PacketVariant, RegionId};

use crate::{
    config::{StreamConfig, StreamParams},
    error::{Result, StreamError},
    queue::{HostEventQueue, PendingEvent},
    region::BufferRegion,
    transport::{Transceiver, TransportError},
};

/// Lifecycle state of one core's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoreStatus {
    /// Registered, nothing sent yet
    Idle,
    /// Data may flow, gated by space reports
    Streaming,
    /// No new data accepted; on-chip data still executes
    Draining,
    /// Terminal; the buffer region has been released
    Stopped,
}

impl CoreStatus {
    /// Human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Streaming => "Streaming",
            Self::Draining => "Draining",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for CoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-core streaming statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreCounters {
    /// Data packets handed to the transceiver
    pub packets_sent: u64,
    /// Events encoded into sent packets
    pub events_sent: u64,
    /// Encoded bytes handed to the transceiver
    pub bytes_sent: u64,
    /// Events dropped because they did not fit the negotiated config
    pub events_dropped: u64,
    /// Queued or in-flight events discarded at stop, cancellation or
    /// a stream fault
    pub events_discarded: u64,
    /// Send attempts beyond the first
    pub send_retries: u64,
    /// On-chip bytes never acknowledged before a drain timeout
    pub bytes_lost: u64,
}

#[derive(Debug)]
struct CoreStream {
    config: StreamConfig,
    status: CoreStatus,
    /// Flow-control pause under the low watermark; not a state change
    paused: bool,
    region: Option<BufferRegion>,
    counters: CoreCounters,
    drain_deadline: Option<Instant>,
}

/// The orchestrator: owns every core's region, queue and state machine
pub struct BufferManager<T: Transceiver> {
    params: StreamParams,
    transceiver: T,
    queue: HostEventQueue,
    cores: HashMap<CoreId, CoreStream>,
    recorded: HashMap<CoreId, Vec<PendingEvent>>,
}

impl<T: Transceiver> BufferManager<T> {
    /// Create a manager over a transceiver
    pub fn new(transceiver: T, params: StreamParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            transceiver,
            queue: HostEventQueue::new(),
            cores: HashMap::new(),
            recorded: HashMap::new(),
        })
    }

    /// Register a core for streaming, creating its buffer region
    ///
    /// The region starts fully reserved: no space is known until the
    /// core's first `SPACE_AVAILABLE` report.
    pub fn register_core(
        &mut self,
        core: CoreId,
        region_id: RegionId,
        base_address: u32,
        capacity_bytes: u32,
        config: StreamConfig,
    ) -> Result<()> {
        if !core.fits_wire() {
            return Err(StreamError::registration(
                core,
                "id does not fit a 16-bit wire word",
            ));
        }
        if self.cores.contains_key(&core) {
            return Err(StreamError::registration(core, "already registered"));
        }
        if capacity_bytes == 0 {
            return Err(StreamError::registration(core, "zero-capacity buffer region"));
        }
        // Space reports carry free bytes as one 16-bit wire word, so a
        // larger region could never acknowledge an empty buffer.
        if capacity_bytes > u16::MAX as u32 {
            return Err(StreamError::registration(
                core,
                "capacity does not fit a 16-bit space report",
            ));
        }
        self.transceiver
            .register_core(core, capacity_bytes)
            .map_err(|e| StreamError::registration(core, e.to_string()))?;

        let mut region = BufferRegion::new(
            region_id,
            base_address,
            capacity_bytes,
            self.params.low_watermark,
        );
        region.reserve(capacity_bytes)?;
        self.cores.insert(
            core,
            CoreStream {
                config,
                status: CoreStatus::Idle,
                paused: false,
                region: Some(region),
                counters: CoreCounters::default(),
                drain_deadline: None,
            },
        );
        self.queue.register(core, config);
        log::info!(
            "core {}: registered ({}-byte region {} at {:#x})",
            core,
            capacity_bytes,
            region_id,
            base_address
        );
        Ok(())
    }

    /// Begin streaming: tell the core to start announcing buffer space
    pub fn start_core(&mut self, core: CoreId) -> Result<()> {
        let status = self.status_of(core)?;
        if status != CoreStatus::Idle {
            return Err(StreamError::invalid_transition(core, status.as_str(), "start"));
        }
        let bytes = Packet::Command(Command::StartSendingRequests).encode()?;
        if let Err((attempts, err)) =
            send_with_retries(&mut self.transceiver, &self.params, core, &bytes)
        {
            return Err(self.fault_core(core, attempts, err));
        }
        if let Some(stream) = self.cores.get_mut(&core) {
            stream.status = CoreStatus::Streaming;
        }
        log::info!("core {}: streaming", core);
        Ok(())
    }

    /// Queue a batch of outbound events for a core
    ///
    /// Legal in `Idle` and `Streaming` only; a draining or stopped
    /// core accepts no new data.
    pub fn push_events(
        &mut self,
        core: CoreId,
        events: impl IntoIterator<Item = PendingEvent>,
    ) -> Result<usize> {
        let status = self.status_of(core)?;
        match status {
            CoreStatus::Idle | CoreStatus::Streaming => {}
            other => {
                return Err(StreamError::invalid_transition(
                    core,
                    other.as_str(),
                    "accept events",
                ))
            }
        }
        let pushed = self.queue.push_batch(core, events)?;
        let paused = self.cores.get(&core).map(|s| s.paused).unwrap_or(true);
        if status == CoreStatus::Streaming && !paused {
            self.pump(core)?;
        }
        Ok(pushed)
    }

    /// Process one frame received from a core
    ///
    /// Malformed frames and unknown commands are logged and dropped;
    /// the stream continues. Data frames are recorded events and are
    /// appended to the core's inbound sink.
    pub fn handle_inbound(&mut self, origin: CoreId, bytes: &[u8]) -> Result<()> {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) if e.is_recoverable() => {
                log::warn!("core {}: dropping inbound frame: {}", origin, e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        match packet {
            Packet::Command(Command::SpaceAvailable { core, free_bytes }) => {
                if core != origin {
                    log::warn!("space report from {} names core {}", origin, core);
                }
                if !self.cores.contains_key(&core) {
                    log::warn!("space report for unregistered core {}", core);
                    return Ok(());
                }
                self.apply_space_report(core, free_bytes as u32)
            }
            Packet::Command(cmd) => {
                log::debug!("core {}: ignoring inbound command {:?}", origin, cmd);
                Ok(())
            }
            Packet::Data { variant, events } => {
                let recorded = recorded_events(variant, events);
                log::debug!("core {}: recorded {} inbound events", origin, recorded.len());
                self.recorded.entry(origin).or_default().extend(recorded);
                Ok(())
            }
        }
    }

    /// Stop feeding a core: `Streaming -> Draining`
    ///
    /// Pending queued events are dropped and counted; on-chip data
    /// still executes until the core acknowledges an empty buffer or
    /// the drain timeout elapses.
    pub fn stop_core(&mut self, core: CoreId, now: Instant) -> Result<()> {
        let status = self.status_of(core)?;
        if status != CoreStatus::Streaming {
            return Err(StreamError::invalid_transition(core, status.as_str(), "stop"));
        }
        let bytes = Packet::Command(Command::StopSendingRequests).encode()?;
        if let Err((attempts, err)) =
            send_with_retries(&mut self.transceiver, &self.params, core, &bytes)
        {
            return Err(self.fault_core(core, attempts, err));
        }

        let discarded = self.queue.clear(core);
        if let Some(stream) = self.cores.get_mut(&core) {
            stream.counters.events_discarded += discarded as u64;
            stream.status = CoreStatus::Draining;
            stream.drain_deadline = Some(now + self.params.drain_timeout);
        }
        if discarded > 0 {
            log::warn!("core {}: discarded {} queued events at stop", core, discarded);
        }
        log::info!("core {}: draining", core);
        Ok(())
    }

    /// Check a draining core against its deadline
    ///
    /// Returns the current status; after the drain timeout the core is
    /// forced to `Stopped`, its unacknowledged on-chip bytes are
    /// counted lost, and [`StreamError::DrainTimeout`] is returned.
    pub fn poll_drain(&mut self, core: CoreId, now: Instant) -> Result<CoreStatus> {
        let stream = self
            .cores
            .get_mut(&core)
            .ok_or(StreamError::UnknownCore { core })?;
        if stream.status != CoreStatus::Draining {
            return Ok(stream.status);
        }
        let due = stream.drain_deadline.map(|d| now >= d).unwrap_or(false);
        if !due {
            return Ok(CoreStatus::Draining);
        }
        let outstanding = stream.region.as_ref().map(|r| r.used_bytes()).unwrap_or(0);
        stream.counters.bytes_lost += outstanding as u64;
        stream.status = CoreStatus::Stopped;
        stream.region = None;
        stream.drain_deadline = None;
        log::warn!(
            "core {}: drain timed out, {} bytes unacknowledged and reported lost",
            core,
            outstanding
        );
        Err(StreamError::DrainTimeout {
            core,
            outstanding_bytes: outstanding,
        })
    }

    /// Simulation stop: move every active core toward shutdown
    ///
    /// Streaming cores are sent `EVENT_STOP` and go to `Draining` with
    /// their queued events dropped and counted; idle cores go straight
    /// to `Stopped`. Nothing is discarded silently.
    pub fn cancel_all(&mut self, now: Instant) {
        let ids: Vec<CoreId> = self.cores.keys().copied().collect();
        for core in ids {
            let Some(stream) = self.cores.get_mut(&core) else {
                continue;
            };
            match stream.status {
                CoreStatus::Idle => {
                    let discarded = self.queue.clear(core);
                    stream.counters.events_discarded += discarded as u64;
                    stream.status = CoreStatus::Stopped;
                    stream.region = None;
                    log::debug!("core {}: cancelled while idle", core);
                }
                CoreStatus::Streaming => {
                    let discarded = self.queue.clear(core);
                    stream.counters.events_discarded += discarded as u64;
                    stream.status = CoreStatus::Draining;
                    stream.drain_deadline = Some(now + self.params.drain_timeout);
                    // Cancellation ends the run outright, so the core is
                    // told to stop processing events, not merely to stop
                    // announcing space. Best effort; cancellation itself
                    // never faults a core.
                    if let Ok(bytes) = Packet::Command(Command::EventStop).encode() {
                        if let Err(e) = self.transceiver.send(core, &bytes) {
                            log::warn!("core {}: stop command lost at cancel: {}", core, e);
                        }
                    }
                    log::info!(
                        "core {}: cancelled, {} queued events discarded",
                        core,
                        discarded
                    );
                }
                CoreStatus::Draining | CoreStatus::Stopped => {}
            }
        }
    }

    /// Remove a stopped core's bookkeeping, returning its counters
    pub fn deregister_core(&mut self, core: CoreId) -> Result<CoreCounters> {
        let status = self.status_of(core)?;
        if status != CoreStatus::Stopped {
            return Err(StreamError::invalid_transition(
                core,
                status.as_str(),
                "deregister",
            ));
        }
        self.queue.deregister(core);
        self.recorded.remove(&core);
        let stream = self
            .cores
            .remove(&core)
            .ok_or(StreamError::UnknownCore { core })?;
        Ok(stream.counters)
    }

    /// Current lifecycle state of a core
    pub fn status(&self, core: CoreId) -> Option<CoreStatus> {
        self.cores.get(&core).map(|s| s.status)
    }

    /// Streaming statistics of a core
    pub fn counters(&self, core: CoreId) -> Option<&CoreCounters> {
        self.cores.get(&core).map(|s| &s.counters)
    }

    /// Free bytes currently believed available on a core
    pub fn free_bytes(&self, core: CoreId) -> Option<u32> {
        self.cores
            .get(&core)
            .and_then(|s| s.region.as_ref())
            .map(|r| r.free_bytes())
    }

    /// Events still queued for a core
    pub fn queued_events(&self, core: CoreId) -> usize {
        self.queue.len(core)
    }

    /// Take the recorded events decoded from a core's data frames
    pub fn take_recorded(&mut self, core: CoreId) -> Vec<PendingEvent> {
        self.recorded.remove(&core).unwrap_or_default()
    }

    /// Manager parameters
    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Reference to the underlying transceiver
    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    /// Mutable reference to the underlying transceiver
    pub fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }

    fn status_of(&self, core: CoreId) -> Result<CoreStatus> {
        self.cores
            .get(&core)
            .map(|s| s.status)
            .ok_or(StreamError::UnknownCore { core })
    }

    /// Apply a space report, then drive the core's flow loop
    fn apply_space_report(&mut self, core: CoreId, free_bytes: u32) -> Result<()> {
        let (status, paused, free, capacity) = {
            let stream = self
                .cores
                .get_mut(&core)
                .ok_or(StreamError::UnknownCore { core })?;
            let Some(region) = stream.region.as_mut() else {
                log::debug!("core {}: space report after region release", core);
                return Ok(());
            };
            let capacity = region.capacity_bytes();
            let free = if free_bytes > capacity {
                log::warn!(
                    "core {}: report of {} free bytes exceeds capacity {}, clamping",
                    core,
                    free_bytes,
                    capacity
                );
                capacity
            } else {
                free_bytes
            };

            // The report is authoritative; re-synchronize through the
            // two invariant-checked mutators only.
            let target_used = capacity - free;
            let used = region.used_bytes();
            if target_used < used {
                region.release(used - target_used)?;
            } else if target_used > used {
                region.reserve(target_used - used)?;
            }

            stream.paused = region.below_low_watermark();
            if stream.paused {
                log::debug!("core {}: paused, {} free bytes under watermark", core, free);
            }
            (stream.status, stream.paused, free, capacity)
        };

        match status {
            CoreStatus::Streaming if !paused => self.pump(core),
            CoreStatus::Draining if free == capacity => {
                self.finish_drain(core);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The outbound flow loop: greedily pack and send until space,
    /// MTU, or the queue runs out
    fn pump(&mut self, core: CoreId) -> Result<()> {
        loop {
            let (cfg, free) = {
                let stream = self
                    .cores
                    .get(&core)
                    .ok_or(StreamError::UnknownCore { core })?;
                if stream.status != CoreStatus::Streaming || stream.paused {
                    return Ok(());
                }
                let Some(region) = stream.region.as_ref() else {
                    return Ok(());
                };
                (stream.config, region.free_bytes() as usize)
            };

            let budget = free.min(self.params.mtu);
            let overhead = cfg.max_header_len();
            if budget <= overhead {
                return Ok(());
            }
            let max_body = budget - overhead;
            if max_body < cfg.bytes_per_event() {
                return Ok(());
            }

            // Timed packets carry one shared timestamp, so only the
            // leading equal-timestamp run may be taken.
            let pending = if cfg.timed {
                self.queue.pop_run_up_to(core, max_body)
            } else {
                self.queue.pop_up_to(core, max_body)
            };
            if pending.is_empty() {
                return Ok(());
            }
            let run_timestamp = pending[0].timestamp;

            let mut wire_events = Vec::with_capacity(pending.len());
            let mut dropped = 0u64;
            for ev in &pending {
                match cfg.wire_event(ev) {
                    Ok(wire_event) => wire_events.push(wire_event),
                    Err(e) => {
                        dropped += 1;
                        log::warn!(
                            "core {}: dropping unencodable event key {:#x}: {}",
                            core,
                            ev.key,
                            e
                        );
                    }
                }
            }
            if dropped > 0 {
                if let Some(stream) = self.cores.get_mut(&core) {
                    stream.counters.events_dropped += dropped;
                }
            }
            if wire_events.is_empty() {
                continue;
            }

            let n_events = wire_events.len() as u64;
            let (variant, events) = choose_variant(cfg, wire_events, run_timestamp);
            let bytes = Packet::data(variant, events).encode()?;

            match send_with_retries(&mut self.transceiver, &self.params, core, &bytes) {
                Ok(retries) => {
                    let stream = self
                        .cores
                        .get_mut(&core)
                        .ok_or(StreamError::UnknownCore { core })?;
                    if let Some(region) = stream.region.as_mut() {
                        region.reserve(bytes.len() as u32)?;
                    }
                    stream.counters.packets_sent += 1;
                    stream.counters.events_sent += n_events;
                    stream.counters.bytes_sent += bytes.len() as u64;
                    stream.counters.send_retries += retries as u64;
                    log::debug!(
                        "core {}: sent {} events in {} bytes",
                        core,
                        n_events,
                        bytes.len()
                    );
                }
                Err((attempts, err)) => {
                    // The popped batch never reached the wire; count it
                    // with whatever the fault sweep finds still queued.
                    if let Some(stream) = self.cores.get_mut(&core) {
                        stream.counters.events_discarded += n_events;
                    }
                    return Err(self.fault_core(core, attempts, err));
                }
            }
        }
    }

    fn finish_drain(&mut self, core: CoreId) {
        if let Some(stream) = self.cores.get_mut(&core) {
            stream.status = CoreStatus::Stopped;
            stream.region = None;
            stream.drain_deadline = None;
            log::info!("core {}: drained and stopped", core);
        }
    }

    /// Transport retries exhausted: fault this core only
    fn fault_core(&mut self, core: CoreId, attempts: u32, source: TransportError) -> StreamError {
        let discarded = self.queue.clear(core);
        if let Some(stream) = self.cores.get_mut(&core) {
            stream.counters.events_discarded += discarded as u64;
            stream.counters.send_retries += attempts.saturating_sub(1) as u64;
            stream.status = CoreStatus::Stopped;
            stream.region = None;
            stream.drain_deadline = None;
        }
        log::error!(
            "core {}: stream fault after {} attempts: {}",
            core,
            attempts,
            source
        );
        StreamError::StreamFault {
            core,
            attempts,
            source,
        }
    }
}

/// Pick the cheapest homogeneous encoding for one packet
///
/// Greedy, deterministic: the shared-timestamp prefix for timed
/// streams, the payload prefix whenever every event in the packet
/// carries the same payload, otherwise the flat per-event form.
fn choose_variant(
    cfg: StreamConfig,
    events: Vec<Event>,
    run_timestamp: Option<u32>,
) -> (PacketVariant, Vec<Event>) {
    if cfg.timed {
        // pop_run_up_to and wire_event guarantee a shared timestamp
        let timestamp = run_timestamp.unwrap_or(0);
        return (
            PacketVariant::TimedPayloadPrefixed {
                width: cfg.key_width,
                with_payload: cfg.with_payload,
                timestamp,
            },
            events,
        );
    }
    if cfg.with_payload {
        let first = events.first().and_then(|e| e.payload);
        if let Some(prefix) = first {
            if events.iter().all(|e| e.payload == Some(prefix)) {
                let stripped = events.iter().map(|e| Event::key(e.key)).collect();
                return (
                    PacketVariant::PayloadPrefixed {
                        width: cfg.key_width,
                        with_payload: false,
                        prefix,
                    },
                    stripped,
                );
            }
        }
        let variant = match cfg.key_width {
            KeyWidth::K16 => PacketVariant::KeysPayload16,
            KeyWidth::K32 => PacketVariant::KeysPayload32,
        };
        return (variant, events);
    }
    let variant = match cfg.key_width {
        KeyWidth::K16 => PacketVariant::Keys16,
        KeyWidth::K32 => PacketVariant::Keys32,
    };
    (variant, events)
}

/// Materialize recorded events from a decoded data packet, merging
/// the payload prefix into each event's payload
fn recorded_events(variant: PacketVariant, events: Vec<Event>) -> Vec<PendingEvent> {
    let timestamp = if variant.is_timed() {
        variant.prefix()
    } else {
        None
    };
    let payload_base = if variant.is_timed() {
        None
    } else {
        variant.prefix()
    };
    events
        .into_iter()
        .map(|e| {
            let payload = match (e.payload, payload_base) {
                (Some(p), Some(base)) => Some(p | base),
                (Some(p), None) => Some(p),
                (None, Some(base)) => Some(base),
                (None, None) => None,
            };
            PendingEvent {
                key: e.key,
                payload,
                timestamp,
            }
        })
        .collect()
}

fn send_with_retries<T: Transceiver>(
    transceiver: &mut T,
    params: &StreamParams,
    core: CoreId,
    bytes: &[u8],
) -> std::result::Result<u32, (u32, TransportError)> {
    let attempts = params.max_send_retries + 1;
    let mut last_err = None;
    for attempt in 1..=attempts {
        match transceiver.send(core, bytes) {
            Ok(()) => return Ok(attempt - 1),
            Err(e) => {
                log::warn!(
                    "core {}: send attempt {}/{} failed: {}",
                    core,
                    attempt,
                    attempts,
                    e
                );
                last_err = Some(e);
            }
        }
    }
    let err = last_err.unwrap_or(TransportError::SendFailed {
        core,
        reason: "no send attempts made".to_string(),
    });
    Err((attempts, err))
}
