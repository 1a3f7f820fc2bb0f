//! Append-only, bounded log of interception events.
//!
//! Consumers poll a tail window; nothing is pushed to them. When the buffer
//! is full the oldest entry is evicted, so a slow reader can miss events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use sysmon_common::{InterceptionEvent, OperationKind, Outcome, ProcessId};

use crate::ChannelError;

pub const DEFAULT_CAPACITY: usize = 1024;

/// Tail window searched by default, the same 20 lines the operator tooling
/// has always looked at.
pub const DEFAULT_WINDOW: usize = 20;

/// Observation boundary: the sequence number the next appended event gets.
/// Events before an epoch are never matched by a query made from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencedEvent {
    pub sequence: u64,
    pub event: InterceptionEvent,
}

/// Serialisable predicate for consumers on the other side of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    pub operation: OperationKind,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub since: Epoch,
    pub window: usize,
    /// Events caused by this process never match.
    #[serde(default)]
    pub exclude_process: Option<ProcessId>,
}

impl EventQuery {
    pub fn observed(operation: OperationKind, since: Epoch, window: usize) -> Self {
        Self {
            operation,
            outcome: Some(Outcome::Observed),
            since,
            window,
            exclude_process: None,
        }
    }

    pub fn excluding(self, process: ProcessId) -> Self {
        Self {
            exclude_process: Some(process),
            ..self
        }
    }

    pub fn matches(&self, event: &InterceptionEvent) -> bool {
        event.operation == self.operation
            && self.outcome.map_or(true, |o| o == event.outcome)
            && self.exclude_process != Some(event.process_id)
    }
}

struct SinkBuffer {
    events: VecDeque<SequencedEvent>,
    next_sequence: u64,
    evicted: u64,
}

pub struct EventSink {
    buffer: Mutex<SinkBuffer>,
    capacity: usize,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(SinkBuffer {
                events: VecDeque::with_capacity(capacity),
                next_sequence: 0,
                evicted: 0,
            }),
            capacity,
        }
    }

    /// Record `event`, emit its log line, and return its sequence number.
    pub fn append(&self, event: InterceptionEvent) -> u64 {
        info!(target: "sysmon::event", "{}", event);
        let mut buffer = self.lock();
        if buffer.events.len() == self.capacity {
            buffer.events.pop_front();
            buffer.evicted += 1;
        }
        let sequence = buffer.next_sequence;
        buffer.next_sequence += 1;
        buffer.events.push_back(SequencedEvent { sequence, event });
        sequence
    }

    pub fn epoch(&self) -> Epoch {
        Epoch(self.lock().next_sequence)
    }

    /// Does any of the last `window` events satisfy `predicate`?
    pub fn find_recent<P>(&self, predicate: P, window: usize) -> bool
    where
        P: Fn(&InterceptionEvent) -> bool,
    {
        self.find_since(Epoch::default(), window, predicate)
    }

    /// Like [`find_recent`](Self::find_recent), ignoring anything appended
    /// before `since`.
    pub fn find_since<P>(&self, since: Epoch, window: usize, predicate: P) -> bool
    where
        P: Fn(&InterceptionEvent) -> bool,
    {
        self.lock()
            .events
            .iter()
            .rev()
            .take(window)
            .take_while(|entry| entry.sequence >= since.0)
            .any(|entry| predicate(&entry.event))
    }

    pub fn find(&self, query: &EventQuery) -> bool {
        self.find_since(query.since, query.window, |event| query.matches(event))
    }

    /// The last `window` events, oldest first.
    pub fn recent(&self, window: usize) -> Vec<SequencedEvent> {
        let buffer = self.lock();
        let skip = buffer.events.len().saturating_sub(window);
        buffer.events.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events lost to eviction since creation.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic elsewhere must not take the sink down with it.
    fn lock(&self) -> MutexGuard<'_, SinkBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where the orchestrator looks for evidence.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn epoch(&self) -> Result<Epoch, ChannelError>;

    async fn find(&self, query: &EventQuery) -> Result<bool, ChannelError>;
}

#[async_trait]
impl EventSource for EventSink {
    async fn epoch(&self) -> Result<Epoch, ChannelError> {
        Ok(EventSink::epoch(self))
    }

    async fn find(&self, query: &EventQuery) -> Result<bool, ChannelError> {
        Ok(EventSink::find(self, query))
    }
}

#[async_trait]
impl<T: EventSource + ?Sized> EventSource for Arc<T> {
    async fn epoch(&self) -> Result<Epoch, ChannelError> {
        (**self).epoch().await
    }

    async fn find(&self, query: &EventQuery) -> Result<bool, ChannelError> {
        (**self).find(query).await
    }
}
