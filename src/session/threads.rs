//! Thread state tracking across poll ticks.
//!
//! The remote API has no push channel: halts are only observable by
//! fetching the thread list and diffing it against what was seen before.
//! A step/resume call does not reliably change the status the server
//! reports right away, so the operation is recorded as *pending* and its
//! stop reason is only emitted once a later tick shows the thread halted.

use crate::sdapi::types::ScriptThread;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Step,
    Breakpoint,
    Exception,
    Pause,
    Entry,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Step => "step",
            StopReason::Breakpoint => "breakpoint",
            StopReason::Exception => "exception",
            StopReason::Pause => "pause",
            StopReason::Entry => "entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEvent {
    Started(u64),
    Stopped { id: u64, reason: StopReason },
    Exited(u64),
}

#[derive(Debug, Default)]
pub struct ThreadTracker {
    known: HashSet<u64>,
    pending: HashMap<u64, StopReason>,
}

impl ThreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an execution-control call was issued for `id` and which
    /// stop reason to report when the thread is next seen halted.
    pub fn mark_pending(&mut self, id: u64, reason: StopReason) {
        self.pending.insert(id, reason);
    }

    /// Forget a pending operation whose remote call failed: the thread
    /// never actually moved, so its next halted sighting is not news.
    pub fn clear_pending(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    /// Diff a freshly fetched thread list against tracked state and return
    /// the protocol events to emit, in order.
    pub fn observe(&mut self, threads: &[ScriptThread]) -> Vec<ThreadEvent> {
        let mut events = Vec::new();

        for thread in threads.iter().filter(|t| t.is_halted()) {
            if !self.known.contains(&thread.id) {
                // First sighting: the only way a fresh thread halts is a
                // breakpoint hit.
                self.known.insert(thread.id);
                self.pending.remove(&thread.id);
                events.push(ThreadEvent::Started(thread.id));
                events.push(ThreadEvent::Stopped {
                    id: thread.id,
                    reason: StopReason::Breakpoint,
                });
            } else if let Some(reason) = self.pending.remove(&thread.id) {
                events.push(ThreadEvent::Stopped { id: thread.id, reason });
            }
            // Known, not pending: already reported halted. No event.
        }

        let live: HashSet<u64> = threads.iter().map(|t| t.id).collect();
        let gone: Vec<u64> = self.known.iter().filter(|id| !live.contains(id)).copied().collect();
        for id in gone {
            self.known.remove(&id);
            self.pending.remove(&id);
            events.push(ThreadEvent::Exited(id));
        }

        events
    }
}
