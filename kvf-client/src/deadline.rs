//! Caller-supplied deadline carried by every blocking call.

use std::time::{Duration, Instant};

/// Absolute point in time after which a call must give up with `Timeout`.
///
/// `Deadline::none()` blocks until the transport answers (bounded only by
/// the client's socket IO timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No caller deadline.
    pub const fn none() -> Self {
        Deadline(None)
    }

    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    /// Deadline at an absolute instant.
    pub const fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Remaining time, `Some(ZERO)` once elapsed, `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// Remaining time capped at `ceiling`; the result is never zero so it can
    /// be handed to `set_read_timeout`.
    pub(crate) fn socket_timeout(&self, ceiling: Duration) -> Duration {
        let budget = match self.remaining() {
            Some(left) => left.min(ceiling),
            None => ceiling,
        };
        budget.max(Duration::from_millis(1))
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) | (None, Some(a)) => Deadline(Some(a)),
            (None, None) => Deadline(None),
        }
    }
}
