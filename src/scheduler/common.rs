//! Per-core data shared by every discipline instance on that core

use alloc::sync::Arc;

use crate::config::SchedConfig;

use super::platform::SchedThread;
use super::types::{SchedTime, SchedWeight};

pub struct SchedCommonData<T: SchedThread> {
    /// Last clock reading, exactly as the platform reported it
    pub now: SchedTime,
    /// Virtual clock of the core. Never decreases.
    pub timeline: SchedTime,
    /// Clock reading when the current entity was last charged
    pub current_started_time: SchedTime,
    /// Weight of every runnable entity assigned to this core, running one included
    pub weight_sum: SchedWeight,
    /// Sum of requested time slices of those entities (placement load metric)
    pub total_expected_runtime: SchedTime,
    /// Number of runnable entities assigned to this core, running one included
    pub nr_runnable: usize,
    scheduling_period: SchedTime,
    minimal_granularity: SchedTime,
    time_slice: SchedTime,
    pub current: Arc<T>,
    pub previous: Option<Arc<T>>,
    idle: Arc<T>,
}

impl<T: SchedThread> SchedCommonData<T> {
    pub fn new(config: &SchedConfig, idle: Arc<T>, now: SchedTime) -> Self {
        Self {
            now,
            timeline: 0,
            current_started_time: now,
            weight_sum: 0,
            total_expected_runtime: 0,
            nr_runnable: 0,
            scheduling_period: config.scheduling_period(),
            minimal_granularity: config.minimal_granularity,
            time_slice: config.default_time_slice,
            current: idle.clone(),
            previous: None,
            idle,
        }
    }

    #[inline]
    pub fn scheduling_period(&self) -> SchedTime {
        self.scheduling_period
    }

    #[inline]
    pub fn minimal_granularity(&self) -> SchedTime {
        self.minimal_granularity
    }

    /// Slice given to entities that are initialized on this core
    #[inline]
    pub fn default_time_slice(&self) -> SchedTime {
        self.time_slice
    }

    #[inline]
    pub fn idle(&self) -> &Arc<T> {
        &self.idle
    }

    #[inline]
    pub fn is_idle(&self, thread: &Arc<T>) -> bool {
        Arc::ptr_eq(thread, &self.idle)
    }

    #[inline]
    pub fn current_is_idle(&self) -> bool {
        Arc::ptr_eq(&self.current, &self.idle)
    }

    /// Record a clock reading. The raw value is kept for delta computation.
    #[inline]
    pub fn update_clock(&mut self, now: SchedTime) {
        self.now = now;
    }

    /// Move the virtual timeline forward to `vtime` if it is ahead
    #[inline]
    pub fn advance_timeline(&mut self, vtime: SchedTime) {
        if vtime > self.timeline {
            self.timeline = vtime;
        }
    }

    /// Account a runnable entity being assigned to this core
    pub fn attach(&mut self, weight: SchedWeight, time_slice: SchedTime) {
        self.weight_sum = self.weight_sum.saturating_add(weight);
        self.total_expected_runtime = self.total_expected_runtime.saturating_add(time_slice);
        self.nr_runnable += 1;
    }

    /// Undo `attach`
    pub fn detach(&mut self, weight: SchedWeight, time_slice: SchedTime) {
        self.weight_sum = self.weight_sum.saturating_sub(weight);
        self.total_expected_runtime = self.total_expected_runtime.saturating_sub(time_slice).max(0);
        self.nr_runnable = self.nr_runnable.saturating_sub(1);
    }
}
