//! Debounce-with-ceiling coalescing of high-frequency cumulative output.
//!
//! A *series* starts with the first chunk after a flush. The pending chunk is
//! released when either no new chunk arrived for `idle`, or `max_wait` has
//! passed since the series started, whichever comes first. Only the newest
//! chunk is kept; chunks are cumulative, so nothing is merged.
//!
//! Time is always supplied by the caller, which keeps the policy
//! deterministic under test.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoalescePolicy {
    pub idle: Duration,
    pub max_wait: Duration,
}

impl Default for CoalescePolicy {
    fn default() -> Self {
        Self {
            idle: Duration::from_millis(250),
            max_wait: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
pub struct Coalescer<T> {
    policy: CoalescePolicy,
    pending: Option<T>,
    last_push: Option<Instant>,
    series_start: Option<Instant>,
}

impl<T> Coalescer<T> {
    pub fn new(policy: CoalescePolicy) -> Self {
        debug_assert!(policy.idle <= policy.max_wait, "idle window exceeds ceiling");
        Self {
            policy,
            pending: None,
            last_push: None,
            series_start: None,
        }
    }

    pub fn policy(&self) -> CoalescePolicy {
        self.policy
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Records `chunk` as the newest pending value. Returns it right away if
    /// the series has already been open for `max_wait`.
    pub fn push(&mut self, chunk: T, now: Instant) -> Option<T> {
        let start = *self.series_start.get_or_insert(now);
        if self.pending.is_some() {
            log::trace!(target: "drift.coalesce", "superseded pending chunk");
        }
        self.pending = Some(chunk);
        self.last_push = Some(now);
        let open_for = now.saturating_duration_since(start);
        if open_for >= self.policy.max_wait {
            log::debug!(target: "drift.coalesce", "ceiling flush after {open_for:?}");
            return self.take();
        }
        None
    }

    /// Releases the pending chunk if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        log::debug!(target: "drift.coalesce", "deadline flush");
        self.take()
    }

    /// When the pending chunk is due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        let idle_due = self.last_push? + self.policy.idle;
        let ceiling_due = self.series_start? + self.policy.max_wait;
        Some(idle_due.min(ceiling_due))
    }

    /// Releases the pending chunk regardless of timing (end of stream).
    pub fn flush_now(&mut self) -> Option<T> {
        self.take()
    }

    /// Drops any pending chunk. Returns whether one was dropped.
    pub fn cancel(&mut self) -> bool {
        let dropped = self.take().is_some();
        if dropped {
            log::debug!(target: "drift.coalesce", "pending flush cancelled");
        }
        dropped
    }

    fn take(&mut self) -> Option<T> {
        self.series_start = None;
        self.last_push = None;
        self.pending.take()
    }
}
