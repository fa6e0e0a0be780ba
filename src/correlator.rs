//! FIFO matching of replies to the commands that caused them.
//!
//! The switch answers commands strictly in the order it received them, so the
//! reply at hand always belongs to the oldest outstanding command. A caller
//! that stops waiting leaves its slot in place as a tombstone; the reply that
//! eventually lands there is discarded instead of being handed to the next
//! caller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::{
    error::{EslError, EslResult},
    response::RawResponse,
};

type ReplySender = oneshot::Sender<EslResult<RawResponse>>;

struct Slot {
    id: u64,
    /// `None` once tombstoned.
    tx: Option<ReplySender>,
}

#[derive(Default)]
struct Queue {
    slots: VecDeque<Slot>,
    next_id: u64,
    closed: bool,
}

/// Queue of outstanding commands on one connection.
#[derive(Default)]
pub struct Correlator {
    queue: Mutex<Queue>,
}

impl Correlator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Critical sections never panic midway, so a poisoned queue is still consistent.
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a slot at the tail. Fails once the correlator is closed.
    ///
    /// Call this while holding the writer lock so FIFO order equals write order.
    pub fn push(self: &Arc<Self>) -> EslResult<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let mut queue = self.lock();
        if queue.closed {
            return Err(EslError::ConnectionClosed);
        }
        let id = queue.next_id;
        queue.next_id += 1;
        queue
            .slots
            .push_back(Slot { id, tx: Some(tx) });
        trace!("pending call {} queued, depth {}", id, queue.slots.len());
        Ok(PendingCall {
            id,
            rx,
            correlator: Arc::clone(self),
            resolved: false,
        })
    }

    /// Hand a reply to the oldest outstanding command.
    pub fn fulfill(&self, response: RawResponse) {
        let slot = self
            .lock()
            .slots
            .pop_front();
        match slot {
            Some(Slot { id, tx: Some(tx) }) => {
                trace!("reply matched pending call {}", id);
                if tx
                    .send(Ok(response))
                    .is_err()
                {
                    debug!("caller of pending call {} went away before its reply", id);
                }
            }
            Some(Slot { id, tx: None }) => {
                debug!("discarding reply for abandoned call {}", id);
            }
            None => {
                warn!(
                    "Received reply with no command pending: {:?}",
                    response.reply_text()
                );
            }
        }
    }

    /// Keep the slot's position but drop whatever reply lands in it.
    pub fn tombstone(&self, id: u64) {
        let mut queue = self.lock();
        if let Some(slot) = queue
            .slots
            .iter_mut()
            .find(|s| s.id == id)
        {
            slot.tx = None;
            trace!("pending call {} tombstoned", id);
        }
    }

    /// Remove a slot whose command never made it onto the wire.
    pub fn retract(&self, id: u64) -> bool {
        let mut queue = self.lock();
        let before = queue
            .slots
            .len();
        queue
            .slots
            .retain(|s| s.id != id);
        before != queue
            .slots
            .len()
    }

    /// Fail every outstanding command with `ConnectionClosed`, oldest first,
    /// and refuse new ones.
    pub fn close(&self) {
        let drained: Vec<Slot> = {
            let mut queue = self.lock();
            queue.closed = true;
            queue
                .slots
                .drain(..)
                .collect()
        };
        if !drained.is_empty() {
            debug!("failing {} pending calls on close", drained.len());
        }
        for slot in drained {
            if let Some(tx) = slot.tx {
                let _ = tx.send(Err(EslError::ConnectionClosed));
            }
        }
    }

    /// Number of slots, tombstones included.
    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .len()
    }
}

/// One in-flight command waiting for its reply.
///
/// Dropping it before the reply arrives tombstones the slot.
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<EslResult<RawResponse>>,
    correlator: Arc<Correlator>,
    resolved: bool,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply. Cancel-safe: dropping the future loses nothing.
    pub async fn wait(&mut self) -> EslResult<RawResponse> {
        let result = match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(EslError::ConnectionClosed),
        };
        self.resolved = true;
        result
    }

    /// Take the slot out of the queue entirely (the write failed).
    pub fn retract(mut self) {
        self.correlator
            .retract(self.id);
        self.resolved = true;
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.resolved {
            self.correlator
                .tombstone(self.id);
        }
    }
}
