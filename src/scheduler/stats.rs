//! Per-CPU scheduler statistics
//!
//! Counters are bumped with relaxed atomics so they can be read from any
//! core without taking the scheduler lock. Readings are snapshots.

use core::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one core
pub struct SchedStats {
    /// Switches to a different unit
    pub context_switches: AtomicU64,
    /// Switches requested by the running unit (deactivate, yield)
    pub voluntary_switches: AtomicU64,
    /// Switches forced by a pending preemption
    pub preemptions: AtomicU64,
    /// Ticks accounted
    pub ticks: AtomicU64,
    /// Ticks skipped because the clock stepped back
    pub skipped_ticks: AtomicU64,
    /// Units moved onto this core
    pub migrations_in: AtomicU64,
    /// Units moved away from this core
    pub migrations_out: AtomicU64,
    /// Units taken from another core's queue at reschedule
    pub steals: AtomicU64,
    /// Switches to the idle unit
    pub idle_switches: AtomicU64,
    /// Reschedule IPIs sent by this core
    pub ipis_sent: AtomicU64,
}

/// Point-in-time copy of [`SchedStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedStatsSnapshot {
    pub context_switches: u64,
    pub voluntary_switches: u64,
    pub preemptions: u64,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub migrations_in: u64,
    pub migrations_out: u64,
    pub steals: u64,
    pub idle_switches: u64,
    pub ipis_sent: u64,
}

impl SchedStats {
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU64::new(0),
            voluntary_switches: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            migrations_in: AtomicU64::new(0),
            migrations_out: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            idle_switches: AtomicU64::new(0),
            ipis_sent: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_context_switch(&self, to_idle: bool) {
        Self::bump(&self.context_switches);
        if to_idle {
            Self::bump(&self.idle_switches);
        }
    }

    pub fn snapshot(&self) -> SchedStatsSnapshot {
        SchedStatsSnapshot {
            context_switches: self.context_switches.load(Ordering::Relaxed),
            voluntary_switches: self.voluntary_switches.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            migrations_in: self.migrations_in.load(Ordering::Relaxed),
            migrations_out: self.migrations_out.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            idle_switches: self.idle_switches.load(Ordering::Relaxed),
            ipis_sent: self.ipis_sent.load(Ordering::Relaxed),
        }
    }
}

impl Default for SchedStats {
    fn default() -> Self {
        Self::new()
    }
}
