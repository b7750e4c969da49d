//! Cancellable one-shot timers that deliver an event into an owner's queue
//!
//! Every scheduled timer gets a sequence number. The owner hands that number
//! back through `fire()` when the event arrives; a timer that was cancelled
//! or replaced after its event was already queued fails the check, so a
//! stale firing can never act.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Pause after playback before capture is re-armed
    Settle,
    /// Delayed restart after a failed recovery
    Retry,
}

#[derive(Default)]
pub struct Timers {
    next_seq: u64,
    active: HashMap<TimerKind, (u64, JoinHandle<()>)>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind`, replacing any pending timer of the same kind
    pub fn schedule<E, F>(
        &mut self,
        kind: TimerKind,
        delay: Duration,
        tx: mpsc::UnboundedSender<E>,
        make_event: F,
    ) -> u64
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E,
    {
        self.cancel(kind);

        self.next_seq += 1;
        let seq = self.next_seq;
        let event = make_event(seq);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });

        debug!("Scheduled {:?} timer #{} in {:?}", kind, seq, delay);
        self.active.insert(kind, (seq, handle));
        seq
    }

    /// Claim a firing; false if the timer was cancelled or replaced meanwhile
    pub fn fire(&mut self, kind: TimerKind, seq: u64) -> bool {
        match self.active.get(&kind) {
            Some((current, _)) if *current == seq => {
                self.active.remove(&kind);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.active.remove(&kind) {
            Some((seq, handle)) => {
                handle.abort();
                debug!("Cancelled {:?} timer #{}", kind, seq);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.active.contains_key(&kind)
    }

    /// Number of timers that are scheduled and not yet claimed
    pub fn pending(&self) -> usize {
        self.active.len()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.clear();
    }
}
