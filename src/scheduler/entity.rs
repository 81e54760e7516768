//! Scheduling entity and preemption state
//!
//! Every schedulable unit embeds one [`SchedObject`]: the mutable
//! [`SchedEntity`] behind a spinlock, and a lock-free [`PreemptionState`]
//! that other cores may poke without taking any scheduler lock.
//!
//! ## Lock Hierarchy
//!
//! 1. Core run-state mutex (`MainScheduler`), lower core number first
//! 2. Entity mutex (held only for field reads/writes, never across calls
//!    that may lock another entity)

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use spin::{Mutex, MutexGuard};

use super::cpumask::{AtomicCpuMask, CpuMask};
use super::fair::RunQueueKey;
use super::types::{
    cast_to_virtual, BaseProfile, CpuNum, SchedDiscipline, SchedTime, SchedWeight,
};

// ============================================================================
// SchedEntity
// ============================================================================

/// Per-unit scheduling state
#[derive(Clone, Debug)]
pub struct SchedEntity {
    profile: BaseProfile,
    /// Discipline that owns the entity; `None` until `init_thread` (idle stays `None`)
    pub discipline: Option<SchedDiscipline>,
    /// Queue handle while a member of a run queue
    pub(crate) rq_key: Option<RunQueueKey>,
    /// Core the entity last ran on
    pub recent_cpu: Option<CpuNum>,
    /// Core that currently owns the entity (queued or running there)
    pub current_cpu: Option<CpuNum>,
    pub affinity: CpuMask,
    /// Physical time consumed (ns)
    pub runtime: SchedTime,
    /// Requested physical quantum (ns)
    pub time_slice: SchedTime,
    /// When the entity was last picked to run
    pub start_time: SchedTime,
    /// Virtual deadline
    pub deadline: SchedTime,
    /// Virtual time consumed
    pub vruntime: SchedTime,
}

impl SchedEntity {
    pub fn new(profile: BaseProfile, time_slice: SchedTime) -> Self {
        Self {
            profile,
            discipline: None,
            rq_key: None,
            recent_cpu: None,
            current_cpu: None,
            affinity: CpuMask::all(),
            runtime: 0,
            time_slice,
            start_time: 0,
            deadline: cast_to_virtual(time_slice, profile.weight),
            vruntime: 0,
        }
    }

    #[inline]
    pub fn weight(&self) -> SchedWeight {
        self.profile.weight
    }

    #[inline]
    pub fn profile(&self) -> BaseProfile {
        self.profile
    }

    /// Distance to the deadline; negative once the entity over-consumed
    #[inline]
    pub fn vlag(&self) -> SchedTime {
        self.deadline.saturating_sub(self.vruntime)
    }

    /// Charge `delta` virtual time. Returns true once the slice is exhausted.
    #[inline]
    pub fn update(&mut self, delta: SchedTime) -> bool {
        self.vruntime = self.vruntime.saturating_add(delta);
        self.vruntime >= self.deadline
    }

    #[inline]
    pub fn is_on_queue(&self) -> bool {
        self.rq_key.is_some()
    }

    /// Affinity restricted to `mask`
    #[inline]
    pub fn get_available_mask(&self, mask: &CpuMask) -> CpuMask {
        self.affinity.intersection(mask)
    }

    /// Replace the profile and restart the virtual promise from the current vruntime
    pub(crate) fn reset_profile(&mut self, profile: BaseProfile, time_slice: SchedTime) {
        self.profile = profile;
        self.discipline = Some(profile.discipline);
        self.time_slice = time_slice;
        self.deadline = self
            .vruntime
            .saturating_add(cast_to_virtual(time_slice, profile.weight));
    }
}

// ============================================================================
// PreemptionState
// ============================================================================

/// Preemption counters and pending-preemption requests
///
/// Preemption is permitted only while both counters are zero. Pending bits
/// name the cores that asked for this unit to be preempted; the core that
/// performs the switch clears them.
pub struct PreemptionState {
    disable_count: AtomicU16,
    eager_disable_count: AtomicU16,
    pending: AtomicCpuMask,
}

impl PreemptionState {
    pub const fn new() -> Self {
        Self {
            disable_count: AtomicU16::new(0),
            eager_disable_count: AtomicU16::new(0),
            pending: AtomicCpuMask::new(),
        }
    }

    #[inline]
    pub fn disable_preemption(&self) {
        self.disable_count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn enable_preemption(&self) {
        Self::release(&self.disable_count, "preemption");
    }

    #[inline]
    pub fn disable_eager_preemption(&self) {
        self.eager_disable_count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn enable_eager_preemption(&self) {
        Self::release(&self.eager_disable_count, "eager preemption");
    }

    fn release(counter: &AtomicU16, what: &str) {
        let result = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if result.is_err() {
            crate::kwarn!("unbalanced enable of {}", what);
        }
    }

    #[inline]
    pub fn is_preemptible(&self) -> bool {
        self.disable_count.load(Ordering::Acquire) == 0
            && self.eager_disable_count.load(Ordering::Acquire) == 0
    }

    /// Record a preemption request from the cores in `mask`
    #[inline]
    pub fn set_pending(&self, mask: &CpuMask) {
        self.pending.fetch_or(mask);
    }

    /// Forget every request; only the switching core may call this
    #[inline]
    pub fn clear_pending(&self) {
        self.pending.clear_all();
    }

    #[inline]
    pub fn pending(&self) -> CpuMask {
        self.pending.load()
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        !self.pending.load().is_empty()
    }

    pub fn disable_count(&self) -> u16 {
        self.disable_count.load(Ordering::Acquire)
    }

    pub fn eager_disable_count(&self) -> u16 {
        self.eager_disable_count.load(Ordering::Acquire)
    }
}

impl Default for PreemptionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Disables preemption for its lifetime
#[must_use = "preemption is re-enabled as soon as the guard is dropped"]
pub struct PreemptionGuard<'a> {
    state: &'a PreemptionState,
}

impl<'a> PreemptionGuard<'a> {
    pub fn new(state: &'a PreemptionState) -> Self {
        state.disable_preemption();
        Self { state }
    }
}

impl Drop for PreemptionGuard<'_> {
    fn drop(&mut self) {
        self.state.enable_preemption();
    }
}

// ============================================================================
// SchedObject
// ============================================================================

/// Scheduler state embedded in a schedulable unit
pub struct SchedObject {
    entity: Mutex<SchedEntity>,
    preemption: PreemptionState,
    /// Some core is executing on the unit's stack. Set when a core picks the
    /// unit, cleared by that core only once it has switched away.
    on_cpu: AtomicBool,
}

impl SchedObject {
    pub fn new(profile: BaseProfile, time_slice: SchedTime) -> Self {
        Self {
            entity: Mutex::new(SchedEntity::new(profile, time_slice)),
            preemption: PreemptionState::new(),
            on_cpu: AtomicBool::new(false),
        }
    }

    /// Lock the entity. Callers must not hold another entity's guard.
    #[inline]
    pub fn entity(&self) -> MutexGuard<'_, SchedEntity> {
        self.entity.lock()
    }

    #[inline]
    pub fn preemption(&self) -> &PreemptionState {
        &self.preemption
    }

    #[inline]
    pub fn is_on_cpu(&self) -> bool {
        self.on_cpu.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_on_cpu(&self, on_cpu: bool) {
        self.on_cpu.store(on_cpu, Ordering::Release);
    }
}

impl Default for SchedObject {
    fn default() -> Self {
        Self::new(BaseProfile::default(), crate::config::DEFAULT_MINIMAL_GRANULARITY)
    }
}
