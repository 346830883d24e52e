//! Etching event bus
//!
//! Every state transition of an etching process is published to subscribers
//! as an [`EtchingEvent`]. Subscribers receive events over an unbounded
//! `crossbeam-channel` receiver; a subscriber that drops its receiver is
//! removed on the next publish.
//!
//! ## Security Considerations
//!
//! - Events carry identifiers, states and txids only, never signatures or
//!   request payloads
//! - Publishing never blocks the engine

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::process::ProcessState;
use crate::types::ProcessId;

/// Events emitted by the etching engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EtchingEvent {
    /// A new process was accepted
    Submitted {
        process_id: ProcessId,
        at: DateTime<Utc>,
    },
    /// A process moved between states
    Transition {
        process_id: ProcessId,
        from: ProcessState,
        to: ProcessState,
        at: DateTime<Utc>,
    },
    /// A failed process will be rebuilt
    RetryScheduled {
        process_id: ProcessId,
        attempt: u32,
        fee_rate: u64,
        at: DateTime<Utc>,
    },
    /// A confirmed transaction fell out of the best chain
    ReorgDetected {
        process_id: ProcessId,
        txid: String,
        at: DateTime<Utc>,
    },
}

impl EtchingEvent {
    pub fn process_id(&self) -> &ProcessId {
        match self {
            EtchingEvent::Submitted { process_id, .. }
            | EtchingEvent::Transition { process_id, .. }
            | EtchingEvent::RetryScheduled { process_id, .. }
            | EtchingEvent::ReorgDetected { process_id, .. } => process_id,
        }
    }
}

/// Fan-out publisher for [`EtchingEvent`]s.
#[derive(Default)]
pub struct EtchingEventBus {
    subscribers: Mutex<Vec<Sender<EtchingEvent>>>,
}

impl EtchingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; it sees events published from now on.
    pub fn subscribe(&self) -> Receiver<EtchingEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: EtchingEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        log::trace!(
            "Published {:?} event to {} subscribers",
            event.process_id(),
            subscribers.len()
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
