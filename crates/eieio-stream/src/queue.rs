//! Host-side event queue adapter
//!
//! One FIFO of pending events per registered core, decoupled from the
//! transport. Ordering is guaranteed per core only; cores execute
//! independently and no cross-core ordering exists or is needed.

use std::collections::{HashMap, VecDeque};

use eieio_wire::CoreId;

use crate::{
    config::StreamConfig,
    error::{Result, StreamError},
};

/// One queued outbound event: key, optional payload, optional timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PendingEvent {
    /// Event source key
    pub key: u32,
    /// Optional payload word
    pub payload: Option<u32>,
    /// Optional timestamp; packets group events sharing one
    pub timestamp: Option<u32>,
}

impl PendingEvent {
    /// Key-only event
    pub const fn key(key: u32) -> Self {
        Self {
            key,
            payload: None,
            timestamp: None,
        }
    }

    /// (key, payload) event
    pub const fn with_payload(key: u32, payload: u32) -> Self {
        Self {
            key,
            payload: Some(payload),
            timestamp: None,
        }
    }

    /// Timestamped key-only event
    pub const fn timed(key: u32, timestamp: u32) -> Self {
        Self {
            key,
            payload: None,
            timestamp: Some(timestamp),
        }
    }

    /// Timestamped (key, payload) event
    pub const fn timed_with_payload(key: u32, payload: u32, timestamp: u32) -> Self {
        Self {
            key,
            payload: Some(payload),
            timestamp: Some(timestamp),
        }
    }
}

/// Per-core FIFO queues of pending outbound events
#[derive(Debug, Default)]
pub struct HostEventQueue {
    queues: HashMap<CoreId, CoreQueue>,
}

#[derive(Debug)]
struct CoreQueue {
    config: StreamConfig,
    events: VecDeque<PendingEvent>,
}

impl HostEventQueue {
    /// Create an empty queue set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a core with its negotiated stream config
    pub fn register(&mut self, core: CoreId, config: StreamConfig) {
        self.queues.insert(
            core,
            CoreQueue {
                config,
                events: VecDeque::new(),
            },
        );
    }

    /// Remove a core's queue, returning any still-pending events
    pub fn deregister(&mut self, core: CoreId) -> Vec<PendingEvent> {
        self.queues
            .remove(&core)
            .map(|q| q.events.into_iter().collect())
            .unwrap_or_default()
    }

    /// Stream config a core was registered with
    pub fn config(&self, core: CoreId) -> Option<StreamConfig> {
        self.queues.get(&core).map(|q| q.config)
    }

    /// Append a batch of events to a core's FIFO
    pub fn push_batch(
        &mut self,
        core: CoreId,
        events: impl IntoIterator<Item = PendingEvent>,
    ) -> Result<usize> {
        let queue = self
            .queues
            .get_mut(&core)
            .ok_or(StreamError::UnknownCore { core })?;
        let before = queue.events.len();
        queue.events.extend(events);
        Ok(queue.events.len() - before)
    }

    /// Pop events in FIFO order until the next one would exceed
    /// `max_bytes` at the core's worst-case per-event size
    pub fn pop_up_to(&mut self, core: CoreId, max_bytes: usize) -> Vec<PendingEvent> {
        self.pop_while(core, max_bytes, |_, _| true)
    }

    /// Pop the leading run of events sharing the first event's
    /// timestamp, bounded by `max_bytes`
    ///
    /// Timed packets carry exactly one shared timestamp, so a packet
    /// can never span a timestamp change.
    pub fn pop_run_up_to(&mut self, core: CoreId, max_bytes: usize) -> Vec<PendingEvent> {
        self.pop_while(core, max_bytes, |first, ev| ev.timestamp == first.timestamp)
    }

    fn pop_while(
        &mut self,
        core: CoreId,
        max_bytes: usize,
        keep: impl Fn(&PendingEvent, &PendingEvent) -> bool,
    ) -> Vec<PendingEvent> {
        let Some(queue) = self.queues.get_mut(&core) else {
            return Vec::new();
        };
        let per_event = queue.config.bytes_per_event();
        let max_events = max_bytes / per_event;

        let mut popped = Vec::new();
        while popped.len() < max_events {
            let Some(front) = queue.events.front() else {
                break;
            };
            if let Some(first) = popped.first() {
                if !keep(first, front) {
                    break;
                }
            }
            // front() just succeeded
            if let Some(ev) = queue.events.pop_front() {
                popped.push(ev);
            }
        }
        popped
    }

    /// Number of events pending for a core
    pub fn len(&self, core: CoreId) -> usize {
        self.queues.get(&core).map(|q| q.events.len()).unwrap_or(0)
    }

    /// True when nothing is pending for a core
    pub fn is_empty(&self, core: CoreId) -> bool {
        self.len(core) == 0
    }

    /// Drop everything pending for a core, returning the count
    pub fn clear(&mut self, core: CoreId) -> usize {
        self.queues
            .get_mut(&core)
            .map(|q| {
                let n = q.events.len();
                q.events.clear();
                n
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eieio_wire::KeyWidth;
    use proptest::prelude::*;

    fn queue_16() -> (HostEventQueue, CoreId) {
        let mut queue = HostEventQueue::new();
        let core = CoreId::new(0);
        queue.register(core, StreamConfig::keys_only(KeyWidth::K16));
        (queue, core)
    }

    #[test]
    fn test_fifo_across_batches() {
        let (mut queue, core) = queue_16();
        queue
            .push_batch(core, (0u32..5).map(PendingEvent::key))
            .unwrap();
        queue
            .push_batch(core, (5u32..10).map(PendingEvent::key))
            .unwrap();

        // Pop in two arbitrary chunks; relative order must survive
        let mut keys: Vec<u32> = queue
            .pop_up_to(core, 6)
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.extend(queue.pop_up_to(core, 100).into_iter().map(|e| e.key));
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty(core));
    }

    #[test]
    fn test_pop_respects_byte_budget() {
        let (mut queue, core) = queue_16();
        queue
            .push_batch(core, (0u32..300).map(PendingEvent::key))
            .unwrap();

        // 2 bytes per 16-bit key
        let popped = queue.pop_up_to(core, 100);
        assert_eq!(popped.len(), 50);
        assert_eq!(queue.len(core), 250);

        // Budget smaller than one event pops nothing
        assert!(queue.pop_up_to(core, 1).is_empty());
    }

    #[test]
    fn test_pop_run_stops_at_timestamp_change() {
        let mut queue = HostEventQueue::new();
        let core = CoreId::new(1);
        queue.register(core, StreamConfig::timed(KeyWidth::K16));
        queue
            .push_batch(
                core,
                vec![
                    PendingEvent::timed(1, 10),
                    PendingEvent::timed(2, 10),
                    PendingEvent::timed(3, 20),
                    PendingEvent::timed(4, 10),
                ],
            )
            .unwrap();

        let run: Vec<u32> = queue
            .pop_run_up_to(core, 100)
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(run, vec![1, 2]);

        // Next run is the single event at t=20, not the later t=10 one
        let run: Vec<u32> = queue
            .pop_run_up_to(core, 100)
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(run, vec![3]);
        assert_eq!(queue.len(core), 1);
    }

    #[test]
    fn test_unknown_core() {
        let mut queue = HostEventQueue::new();
        let err = queue
            .push_batch(CoreId::new(9), vec![PendingEvent::key(1)])
            .unwrap_err();
        assert!(matches!(err, StreamError::UnknownCore { .. }));
        assert!(queue.pop_up_to(CoreId::new(9), 100).is_empty());
    }

    #[test]
    fn test_clear_and_deregister() {
        let (mut queue, core) = queue_16();
        queue
            .push_batch(core, (0u32..4).map(PendingEvent::key))
            .unwrap();
        assert_eq!(queue.clear(core), 4);
        assert!(queue.is_empty(core));

        queue
            .push_batch(core, vec![PendingEvent::key(1)])
            .unwrap();
        assert_eq!(queue.deregister(core).len(), 1);
        assert!(queue.config(core).is_none());
    }

    proptest! {
        #[test]
        fn prop_fifo_under_arbitrary_budgets(
            n_events in 1usize..200,
            budgets in prop::collection::vec(0usize..64, 1..100),
        ) {
            let (mut queue, core) = queue_16();
            queue
                .push_batch(core, (0..n_events as u32).map(PendingEvent::key))
                .unwrap();

            let mut keys = Vec::new();
            for budget in budgets {
                keys.extend(queue.pop_up_to(core, budget).into_iter().map(|e| e.key));
            }
            keys.extend(queue.pop_up_to(core, usize::MAX).into_iter().map(|e| e.key));
            prop_assert_eq!(keys, (0..n_events as u32).collect::<Vec<_>>());
        }
    }
}
