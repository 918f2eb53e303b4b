//! Event scheduler with an explicit simulation clock.
//!
//! Events live in a `BTreeMap` keyed by [`EventKey`], so the earliest event is
//! always first and cancellation is a real removal. A handle outlives its
//! event; cancelling it after the event ran (or after an earlier cancel) finds
//! nothing and does nothing.

use std::collections::BTreeMap;

use wormroute::{Duration, Timestamp};

use crate::event::{EventHandle, EventKey, SequenceNumber};

/// Why [`Scheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing left to execute.
    QueueExhausted,
    /// The next event lies beyond the stop time.
    StopTimeReached,
}

/// Time-ordered queue of pending events plus the current time.
#[derive(Debug)]
pub struct Scheduler<E> {
    now: Timestamp,
    queue: BTreeMap<EventKey, E>,
    next_seq: u64,
    executed: u64,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: Timestamp::ZERO,
            queue: BTreeMap::new(),
            next_seq: 0,
            executed: 0,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Number of events still queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of events executed so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Time of the earliest pending event.
    pub fn peek_time(&self) -> Option<Timestamp> {
        self.queue.keys().next().map(|k| k.time)
    }

    /// Schedule `event` to run `delay` from now.
    pub fn schedule(&mut self, delay: Duration, event: E) -> EventHandle {
        self.schedule_at(self.now + delay, event)
    }

    /// Schedule `event` at an absolute time.
    ///
    /// # Panics
    ///
    /// If `time` is earlier than the current time.
    pub fn schedule_at(&mut self, time: Timestamp, event: E) -> EventHandle {
        assert!(
            time >= self.now,
            "event scheduled in the past: {time} < {}",
            self.now
        );
        let key = EventKey {
            time,
            seq: SequenceNumber::new(self.next_seq),
        };
        self.next_seq += 1;
        self.queue.insert(key, event);
        EventHandle(key)
    }

    /// Cancel a pending event. Returns whether anything was removed.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.queue.remove(&handle.0).is_some()
    }

    /// Whether the event behind `handle` is still waiting to run.
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.queue.contains_key(&handle.0)
    }

    /// Remove the earliest event if it is due no later than `stop`, advancing
    /// the clock to its time.
    pub fn pop_next(&mut self, stop: Timestamp) -> Option<(Timestamp, E)> {
        let entry = self.queue.first_entry()?;
        if entry.key().time > stop {
            return None;
        }
        let (key, event) = entry.remove_entry();
        self.now = key.time;
        self.executed += 1;
        Some((key.time, event))
    }

    /// Move the clock forward without running anything.
    pub fn advance_to(&mut self, time: Timestamp) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Run events up to and including `stop`, then set the clock to `stop`.
    ///
    /// The handler may schedule or cancel further events.
    pub fn run<F>(&mut self, stop: Timestamp, mut handler: F) -> RunOutcome
    where
        F: FnMut(&mut Self, E),
    {
        while let Some((_, event)) = self.pop_next(stop) {
            handler(self, event);
        }
        self.advance_to(stop);
        if self.queue.is_empty() {
            RunOutcome::QueueExhausted
        } else {
            RunOutcome::StopTimeReached
        }
    }
}
