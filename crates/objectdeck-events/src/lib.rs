//! In-process event bus
//!
//! A single broker assigns a process-lifetime monotonic sequence number to
//! every published event and fans events out to subscribers over unbounded
//! per-subscriber channels, so publishing never blocks a request handler.
//! A bounded ring keeps recent events for replay after a reconnect.

use chrono::{DateTime, Utc};
use objectdeck_common::JobId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Replay ring capacity. When the ring evicts an event the sequence keeps
/// advancing; late subscribers get a `events.missed` marker instead.
pub const RING_CAPACITY: usize = 1024;

/// Event type tags emitted by the core.
pub mod event_type {
    pub const JOB_CREATED: &str = "job.created";
    pub const JOB_PROGRESS: &str = "job.progress";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOBS_DELETED: &str = "jobs.deleted";
    /// Synthesized for subscribers whose replay cursor precedes the ring.
    pub const EVENTS_MISSED: &str = "events.missed";
}

/// One published event. The wire shape is `{seq, type, jobId?, payload, ts}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub payload: Map<String, Value>,
    pub ts: DateTime<Utc>,
}

struct Shared {
    ring: VecDeque<Event>,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
}

/// The process-wide event broker. Cheap to clone; clones share the ring
/// and subscriber list.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    seq: AtomicU64,
    shared: Mutex<Shared>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                seq: AtomicU64::new(0),
                shared: Mutex::new(Shared {
                    ring: VecDeque::with_capacity(RING_CAPACITY),
                    subscribers: Vec::new(),
                }),
            }),
        })
    }

    /// Publish an event. Assigns the next sequence number, appends to the
    /// ring, and fans out to live subscribers. Never blocks; subscribers
    /// whose channel has closed are dropped here.
    pub fn publish(
        &self,
        event_type: &str,
        job_id: Option<JobId>,
        payload: Map<String, Value>,
    ) -> u64 {
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            seq,
            event_type: event_type.to_string(),
            job_id,
            payload,
            ts: Utc::now(),
        };

        let mut shared = self.inner.shared.lock();
        if shared.ring.len() == RING_CAPACITY {
            shared.ring.pop_front();
        }
        shared.ring.push_back(event.clone());
        shared
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        seq
    }

    /// The sequence number of the most recently published event.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.inner.seq.load(Ordering::SeqCst)
    }

    /// Register a subscriber. Events published after this call arrive on the
    /// returned handle's channel in sequence order.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.shared.lock().subscribers.push(tx);
        Subscription {
            bus: self.clone(),
            rx,
        }
    }

    /// Buffered events with `seq > after_seq`, oldest first. When the cursor
    /// precedes the ring's oldest entry, the result starts with a synthesized
    /// `events.missed` marker carrying the first sequence still held.
    #[must_use]
    pub fn replay_after(&self, after_seq: u64) -> Vec<Event> {
        let shared = self.inner.shared.lock();
        let oldest = match shared.ring.front() {
            Some(e) => e.seq,
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        if after_seq + 1 < oldest {
            let mut payload = Map::new();
            payload.insert("afterSeq".into(), Value::from(after_seq));
            payload.insert("oldestAvailable".into(), Value::from(oldest));
            out.push(Event {
                // Marker carries the caller's cursor, not a real sequence.
                seq: after_seq,
                event_type: event_type::EVENTS_MISSED.to_string(),
                job_id: None,
                payload,
                ts: Utc::now(),
            });
        }
        out.extend(shared.ring.iter().filter(|e| e.seq > after_seq).cloned());
        out
    }
}

/// A live subscription handle.
pub struct Subscription {
    bus: EventBus,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Receive the next live event. `None` when the bus has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Replay buffered events with `seq > after_seq`.
    #[must_use]
    pub fn replay_after(&self, after_seq: u64) -> Vec<Event> {
        self.bus.replay_after(after_seq)
    }

    /// Consume the subscription as a stream of live events.
    pub fn into_stream(self) -> impl futures::Stream<Item = Event> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

/// Payload helper for job lifecycle events.
#[must_use]
pub fn job_payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut payload = Map::new();
    for (k, v) in pairs {
        payload.insert((*k).to_string(), v.clone());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(status: &str) -> Map<String, Value> {
        job_payload(&[("status", Value::from(status))])
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let bus = EventBus::new();
        let a = bus.publish(event_type::JOB_CREATED, Some(JobId::new()), payload("queued"));
        let b = bus.publish(event_type::JOB_PROGRESS, Some(JobId::new()), payload("running"));
        assert!(b > a);
        assert_eq!(bus.last_seq(), b);
    }

    #[tokio::test]
    async fn test_subscriber_sees_live_events_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        for _ in 0..5 {
            bus.publish(event_type::JOB_PROGRESS, None, payload("running"));
        }
        let mut last = 0;
        for _ in 0..5 {
            let e = sub.recv().await.unwrap();
            assert!(e.seq > last);
            last = e.seq;
        }
    }

    #[tokio::test]
    async fn test_replay_after_cursor() {
        let bus = EventBus::new();
        for _ in 0..12 {
            bus.publish(event_type::JOB_PROGRESS, None, payload("running"));
        }
        let replayed = bus.replay_after(10);
        let seqs: Vec<u64> = replayed.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![11, 12]);
    }

    #[tokio::test]
    async fn test_replay_before_ring_yields_missed_marker() {
        let bus = EventBus::new();
        for _ in 0..(RING_CAPACITY + 50) {
            bus.publish(event_type::JOB_PROGRESS, None, payload("running"));
        }
        let replayed = bus.replay_after(3);
        assert_eq!(replayed[0].event_type, event_type::EVENTS_MISSED);
        // Everything after the marker is what the ring still holds, in order.
        let oldest = replayed[1].seq;
        assert_eq!(oldest as usize, 51);
        assert!(replayed.windows(2).skip(1).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_publish() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        // Publish after the receiver is gone; the dead sender is pruned.
        bus.publish(event_type::JOB_COMPLETED, None, payload("succeeded"));
        assert_eq!(bus.inner.shared.lock().subscribers.len(), 0);
    }

    #[test]
    fn test_event_wire_shape() {
        let mut p = Map::new();
        p.insert("status".into(), Value::from("queued"));
        let event = Event {
            seq: 7,
            event_type: event_type::JOB_CREATED.into(),
            job_id: Some(JobId::new()),
            payload: p,
            ts: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "job.created");
        assert!(json["jobId"].is_string());
        assert_eq!(json["payload"]["status"], "queued");
    }
}
