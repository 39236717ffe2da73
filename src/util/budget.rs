//! Soft time budget shared by the linker and the async loader.

use std::time::{Duration, Instant};

/// Per-tick time budget.
///
/// Work is done in minimal units; after each unit the caller reports it with
/// [`TimeBudget::consume_unit`], which answers whether the slice is spent. The
/// clock is only queried on every `granularity`-th unit (the first unit of the
/// tick always queries it), so at least one unit always completes per tick.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    start: Instant,
    limit: Option<Duration>,
    granularity: u32,
    units: u64,
    exceeded: bool,
}

impl TimeBudget {
    /// Budget that never runs out.
    pub fn unlimited() -> Self {
        Self::new(None, 1)
    }

    /// Budget with an optional limit, checking the clock every `granularity` units.
    pub fn new(limit: Option<Duration>, granularity: u32) -> Self {
        Self {
            start: Instant::now(),
            limit,
            granularity: granularity.max(1),
            units: 0,
            exceeded: false,
        }
    }

    /// Budget expiring `limit` after now.
    pub fn with_limit(limit: Duration) -> Self {
        Self::new(Some(limit), 1)
    }

    /// Record a finished unit of work. Returns `true` when the caller must stop.
    pub fn consume_unit(&mut self) -> bool {
        self.units += 1;
        if self.exceeded {
            return true;
        }
        let Some(limit) = self.limit else {
            return false;
        };
        if (self.units - 1) % self.granularity as u64 == 0 && self.start.elapsed() >= limit {
            self.exceeded = true;
        }
        self.exceeded
    }

    /// Stop at the next check regardless of elapsed time.
    pub fn give_up(&mut self) {
        if self.limit.is_some() {
            self.exceeded = true;
        }
    }

    /// Whether the slice has been marked spent.
    #[inline]
    pub fn exceeded(&self) -> bool {
        self.exceeded
    }

    /// Whether this budget has no limit.
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.limit.is_none()
    }

    /// Units of work recorded during this tick.
    #[inline]
    pub fn units(&self) -> u64 {
        self.units
    }

    /// Time since the budget was created.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
