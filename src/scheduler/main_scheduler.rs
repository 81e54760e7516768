//! Per-CPU main scheduler
//!
//! One `MainScheduler` per core orchestrates its disciplines: activation of
//! units (placement, migration, wakeup preemption), deactivation, tick
//! accounting and the reschedule path that picks the next unit and switches
//! to it.
//!
//! ## Locking
//!
//! All run queue and `SchedCommonData` mutation happens under the core's own
//! `state` mutex, always taken with local interrupts disabled so the tick
//! handler can never spin on a lock its own core holds. Activation takes the
//! *target* core's mutex. A migration holds both cores' mutexes, the lower
//! core number first. Work stealing only `try_lock`s the victim while holding
//! the local mutex. The mutex is released before the context switch.
//!
//! A unit stays `on_cpu` from the moment a core picks it until that core has
//! switched away from it (`finish_switch`). Such a unit is never stolen or
//! migrated, and a wakeup waits for the flag to drop before placing it.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use spin::{Mutex, MutexGuard};

use crate::error::SchedError;

use super::common::SchedCommonData;
use super::cpumask::CpuMask;
use super::discipline::Discipline;
use super::entity::PreemptionGuard;
use super::fair::{FairScheduler, TickResult};
use super::percpu::SchedTable;
use super::platform::{IpiReason, IrqGuard, Platform, SchedThread};
use super::stats::{SchedStats, SchedStatsSnapshot};
use super::types::{
    BaseProfile, CpuNum, SchedDiscipline, SchedTime, SchedWeight, ThreadState, INFINITE_TIME,
};

/// Shared handle to a platform thread
pub type ThreadRef<P> = Arc<<P as Platform>::Thread>;

/// Lock-protected part of a core's scheduler
struct RunState<T: SchedThread> {
    common: SchedCommonData<T>,
    disciplines: Vec<Discipline<T>>,
    /// Armed one-shot preemption deadline
    preemption_deadline: SchedTime,
    /// Unit this core is switching away from, until `finish_switch`
    switching_from: Option<Arc<T>>,
}

impl<T: SchedThread> RunState<T> {
    #[inline]
    fn split(&mut self, kind: SchedDiscipline) -> (&mut Discipline<T>, &mut SchedCommonData<T>) {
        (&mut self.disciplines[kind.index()], &mut self.common)
    }

    fn virtual_baseline(&self) -> SchedTime {
        self.disciplines
            .iter()
            .map(|d| d.min_vruntime())
            .max()
            .unwrap_or(0)
    }

    fn nr_queued(&self) -> usize {
        self.disciplines.iter().map(|d| d.nr_queued()).sum()
    }
}

/// A core's `RunState`, locked with local interrupts disabled. The mutex is
/// released before the interrupt state is restored.
struct LockedRunState<'a, P: Platform> {
    guard: MutexGuard<'a, RunState<P::Thread>>,
    _irq: IrqGuard<'a, P>,
}

impl<P: Platform> Deref for LockedRunState<'_, P> {
    type Target = RunState<P::Thread>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<P: Platform> DerefMut for LockedRunState<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Where an activation left the unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    /// Inserted into this core's run queue
    Queued(CpuNum),
    /// Already owned by this core (queued or running); nothing inserted
    Resident(CpuNum),
    /// The target went away; pick another
    Retry,
}

pub struct MainScheduler<P: Platform> {
    cpu: CpuNum,
    table: &'static SchedTable<P>,
    state: Mutex<RunState<P::Thread>>,
    /// Lock-free load snapshots for placement and stealing
    expected_runtime: AtomicI64,
    nr_running: AtomicUsize,
    nr_queued: AtomicUsize,
    stats: SchedStats,
}

impl<P: Platform> MainScheduler<P> {
    pub(crate) fn new(
        table: &'static SchedTable<P>,
        cpu: CpuNum,
        idle: ThreadRef<P>,
    ) -> Result<Self, SchedError> {
        let mut disciplines = Vec::new();
        disciplines
            .try_reserve_exact(SchedDiscipline::ALL.len())
            .map_err(|_| SchedError::DisciplineTableAlloc { cpu })?;
        for kind in SchedDiscipline::ALL {
            disciplines.push(Discipline::new(kind, cpu));
        }

        {
            let mut se = idle.sched_object().entity();
            se.discipline = None;
            se.current_cpu = Some(cpu);
            se.recent_cpu = Some(cpu);
            se.affinity = CpuMask::of(cpu);
        }
        idle.set_state(ThreadState::Running);
        idle.sched_object().set_on_cpu(true);

        let now = table.platform().now();
        Ok(Self {
            cpu,
            table,
            state: Mutex::new(RunState {
                common: SchedCommonData::new(table.config(), idle, now),
                disciplines,
                preemption_deadline: INFINITE_TIME,
                switching_from: None,
            }),
            expected_runtime: AtomicI64::new(0),
            nr_running: AtomicUsize::new(0),
            nr_queued: AtomicUsize::new(0),
            stats: SchedStats::new(),
        })
    }

    #[inline]
    pub fn cpu(&self) -> CpuNum {
        self.cpu
    }

    fn lock(&self) -> LockedRunState<'_, P> {
        let irq = IrqGuard::new(self.table.platform());
        LockedRunState {
            guard: self.state.lock(),
            _irq: irq,
        }
    }

    #[cfg(feature = "smp")]
    fn try_lock(&self) -> Option<LockedRunState<'_, P>> {
        let irq = IrqGuard::new(self.table.platform());
        let guard = self.state.try_lock()?;
        Some(LockedRunState { guard, _irq: irq })
    }

    pub fn is_active(&self) -> bool {
        self.table.is_active(self.cpu)
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Sum of time slices of runnable units on this core (may be stale)
    #[inline]
    pub fn expected_runtime(&self) -> SchedTime {
        self.expected_runtime.load(Ordering::Relaxed)
    }

    /// Runnable units owned by this core, running one included (may be stale)
    #[inline]
    pub fn nr_running(&self) -> usize {
        self.nr_running.load(Ordering::Relaxed)
    }

    /// Units waiting in this core's run queues (may be stale)
    #[inline]
    pub fn nr_queued(&self) -> usize {
        self.nr_queued.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SchedStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn current(&self) -> ThreadRef<P> {
        self.lock().common.current.clone()
    }

    pub fn previous(&self) -> Option<ThreadRef<P>> {
        self.lock().common.previous.clone()
    }

    pub fn idle(&self) -> ThreadRef<P> {
        self.lock().common.idle().clone()
    }

    pub fn timeline(&self) -> SchedTime {
        self.lock().common.timeline
    }

    pub fn weight_sum(&self) -> SchedWeight {
        self.lock().common.weight_sum
    }

    pub fn preemption_deadline(&self) -> SchedTime {
        self.lock().preemption_deadline
    }

    /// Inspect the fair run queue under the core lock.
    ///
    /// `f` must not call back into this scheduler.
    pub fn with_fair<R>(
        &self,
        f: impl FnOnce(&FairScheduler<P::Thread>, &SchedCommonData<P::Thread>) -> R,
    ) -> R {
        let rs = self.lock();
        match &rs.disciplines[SchedDiscipline::Fair.index()] {
            Discipline::Fair(fair) => f(fair, &rs.common),
        }
    }

    fn publish_load(&self, rs: &RunState<P::Thread>) {
        self.expected_runtime
            .store(rs.common.total_expected_runtime, Ordering::Relaxed);
        self.nr_running.store(rs.common.nr_runnable, Ordering::Relaxed);
        self.nr_queued.store(rs.nr_queued(), Ordering::Relaxed);
    }

    fn update_timeline(&self, rs: &mut RunState<P::Thread>, now: SchedTime) {
        rs.common.update_clock(now);
        let baseline = rs.virtual_baseline();
        rs.common.advance_timeline(baseline);
    }

    fn reset_preemption(&self, rs: &mut RunState<P::Thread>, deadline: SchedTime) {
        rs.preemption_deadline = deadline;
        self.table.platform().arm_preemption_timer(self.cpu, deadline);
    }

    // ------------------------------------------------------------------------
    // Run queue membership
    // ------------------------------------------------------------------------

    pub fn init_thread(&self, thread: &ThreadRef<P>, profile: BaseProfile) {
        self.table.init_thread(thread, profile);
    }

    fn enqueue_thread(&self, rs: &mut RunState<P::Thread>, thread: &ThreadRef<P>) {
        let (kind, weight, slice) = {
            let mut se = thread.sched_object().entity();
            se.current_cpu = Some(self.cpu);
            (se.discipline, se.weight(), se.time_slice)
        };
        let Some(kind) = kind else {
            return;
        };

        rs.common.attach(weight, slice);
        let (discipline, common) = rs.split(kind);
        discipline.place(thread);
        discipline.enqueue(common, thread);
        thread.set_state(ThreadState::Ready);
        self.publish_load(rs);
    }

    fn dequeue_thread(&self, rs: &mut RunState<P::Thread>, thread: &ThreadRef<P>) {
        let Some(kind) = thread.sched_object().entity().discipline else {
            return;
        };
        self.retire(rs, kind, thread);
    }

    /// Drop `thread` from this core: out of the queue and out of the load sums
    fn retire(&self, rs: &mut RunState<P::Thread>, kind: SchedDiscipline, thread: &ThreadRef<P>) {
        let (discipline, common) = rs.split(kind);
        discipline.dequeue(common, thread);
        let (weight, slice) = {
            let mut se = thread.sched_object().entity();
            se.current_cpu = None;
            (se.weight(), se.time_slice)
        };
        rs.common.detach(weight, slice);
        self.publish_load(rs);
    }

    /// A unit owned by this core was activated again. If it is the running
    /// unit and was on its way to block, the wakeup wins.
    fn wake_resident(common: &SchedCommonData<P::Thread>, thread: &ThreadRef<P>) {
        if !Arc::ptr_eq(&common.current, thread) {
            return;
        }
        if matches!(thread.state(), ThreadState::Blocking | ThreadState::Sleeping) {
            thread.set_state(ThreadState::Running);
        }
    }

    // ------------------------------------------------------------------------
    // Activation and migration
    // ------------------------------------------------------------------------

    /// Make `thread` runnable. Must be called on the local core's scheduler.
    ///
    /// Panics if no active core is in the unit's affinity or if the unit was
    /// never given a profile.
    pub fn activate(&self, thread: &ThreadRef<P>) {
        if thread.sched_object().entity().discipline.is_none() {
            crate::kfatal!(
                "cpu {}: activating {} without a scheduling profile",
                self.cpu,
                thread.name()
            );
            panic!("activate: {} has no scheduling profile", thread.name());
        }
        if thread.state() == ThreadState::Terminated {
            crate::kwarn!("cpu {}: ignoring activation of terminated {}", self.cpu, thread.name());
            return;
        }

        // Retired by a core that has not switched away from it yet
        while thread.sched_object().is_on_cpu()
            && thread.sched_object().entity().current_cpu.is_none()
        {
            core::hint::spin_loop();
        }

        let placement = loop {
            let target = self.table.assign_target_cpu(thread);
            let Some(sched) = self.table.get(target) else {
                continue;
            };
            match sched.accept(thread) {
                Placement::Retry => continue,
                placed => break placed,
            }
        };

        if let Placement::Queued(target) = placement {
            crate::kdebug!("cpu {}: {} queued on cpu {}", self.cpu, thread.name(), target);
            self.kick(target);
        }
    }

    /// Take ownership of `thread` on this core, running under this core's lock
    fn accept(&self, thread: &ThreadRef<P>) -> Placement {
        let owner = thread.sched_object().entity().current_cpu;
        if let Some(owner) = owner {
            if owner != self.cpu {
                return self.migrate_from(owner, thread);
            }
        }

        let now = self.table.platform().now();
        let mut rs = self.lock();
        if !self.is_active() {
            return Placement::Retry;
        }

        let owner = thread.sched_object().entity().current_cpu;
        match owner {
            Some(owner) if owner != self.cpu => {
                drop(rs);
                self.migrate_from(owner, thread)
            }
            Some(_) => {
                Self::wake_resident(&rs.common, thread);
                Placement::Resident(self.cpu)
            }
            None => {
                self.update_timeline(&mut rs, now);
                self.enqueue_thread(&mut rs, thread);
                Placement::Queued(self.cpu)
            }
        }
    }

    /// Move `thread` from core `src` to this core.
    ///
    /// Both locks are held, lower core first, so the unit leaves the source
    /// queue and enters this one atomically. A unit that is running on `src`
    /// stays there.
    fn migrate_from(&self, src: CpuNum, thread: &ThreadRef<P>) -> Placement {
        let Some(from) = self.table.get(src) else {
            crate::kerror!("cpu {}: {} owned by offline cpu {}", self.cpu, thread.name(), src);
            return Placement::Resident(src);
        };

        let now = self.table.platform().now();
        let _irq = IrqGuard::new(self.table.platform());
        let (mut first, mut second) = if src < self.cpu {
            (from.state.lock(), self.state.lock())
        } else {
            (self.state.lock(), from.state.lock())
        };
        let (src_rs, dst_rs) = if src < self.cpu {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        let (owner, queued, kind) = {
            let se = thread.sched_object().entity();
            (se.current_cpu, se.is_on_queue(), se.discipline)
        };
        match owner {
            None => {
                self.update_timeline(dst_rs, now);
                self.enqueue_thread(dst_rs, thread);
                Placement::Queued(self.cpu)
            }
            Some(owner) if owner == self.cpu => Placement::Resident(self.cpu),
            Some(owner) if owner != src => Placement::Resident(owner),
            Some(_) if Arc::ptr_eq(&src_rs.common.current, thread) => {
                Self::wake_resident(&src_rs.common, thread);
                Placement::Resident(src)
            }
            // Put back on src's queue but src is still on its stack
            Some(_) if thread.sched_object().is_on_cpu() => Placement::Resident(src),
            Some(_) if queued => {
                let Some(kind) = kind else {
                    return Placement::Resident(src);
                };
                from.update_timeline(src_rs, now);
                from.dequeue_thread(src_rs, thread);
                dst_rs.disciplines[kind.index()]
                    .rebase_from(&src_rs.disciplines[kind.index()], thread);
                self.update_timeline(dst_rs, now);
                self.enqueue_thread(dst_rs, thread);

                SchedStats::bump(&from.stats.migrations_out);
                SchedStats::bump(&self.stats.migrations_in);
                crate::kdebug!("{} migrated cpu {} -> cpu {}", thread.name(), src, self.cpu);
                Placement::Queued(self.cpu)
            }
            // Owned by src but neither queued nor running: mid-switch there
            Some(_) => Placement::Resident(src),
        }
    }

    /// Tell `target` about new work: reschedule here, or IPI a remote core
    fn kick(&self, target: CpuNum) {
        let requester = CpuMask::of(self.cpu);
        if target == self.cpu {
            self.current()
                .sched_object()
                .preemption()
                .set_pending(&requester);
            self.preempt();
        } else if let Some(remote) = self.table.get(target) {
            remote
                .current()
                .sched_object()
                .preemption()
                .set_pending(&requester);
            self.table
                .platform()
                .send_ipi(CpuMask::of(target), IpiReason::Reschedule);
            SchedStats::bump(&self.stats.ipis_sent);
        }
    }

    // ------------------------------------------------------------------------
    // Deactivation, preemption and reschedule
    // ------------------------------------------------------------------------

    /// The running unit gives up the core (it has already marked itself
    /// blocking, sleeping or terminated). Returns once another unit has run.
    pub fn deactivate(&self, thread: &ThreadRef<P>) {
        if !Arc::ptr_eq(&self.current(), thread) {
            crate::kwarn!(
                "cpu {}: deactivate of {} which is not running here",
                self.cpu,
                thread.name()
            );
            return;
        }
        SchedStats::bump(&self.stats.voluntary_switches);
        self.reschedule();
    }

    /// Honor a pending preemption of the running unit if it allows it
    pub fn preempt(&self) -> bool {
        let current = self.current();
        let state = current.sched_object().preemption();
        if !state.is_pending() || !state.is_preemptible() {
            return false;
        }
        SchedStats::bump(&self.stats.preemptions);
        self.reschedule();
        true
    }

    /// The running unit offers the core to an equally deserving peer
    pub fn yield_current(&self) {
        {
            let mut rs = self.lock();
            if !rs.common.current_is_idle() {
                let kind = rs.common.current.sched_object().entity().discipline;
                if let Some(kind) = kind {
                    let (discipline, common) = rs.split(kind);
                    discipline.yield_current(common);
                }
            }
        }
        SchedStats::bump(&self.stats.voluntary_switches);
        self.reschedule();
    }

    /// Pick the next unit and switch to it if it differs from the running one
    pub fn reschedule(&self) {
        let platform = self.table.platform();
        debug_assert_eq!(platform.current_cpu(), self.cpu, "remote reschedule");
        let _irq = IrqGuard::new(platform);
        let now = platform.now();

        let switch = {
            let mut rs = self.lock();
            self.update_timeline(&mut rs, now);
            let prev = rs.common.current.clone();
            let next = self.pick_next_thread(&mut rs, &prev);
            // Consumed even when prev keeps the core, so later ticks do not
            // report the same request again
            prev.sched_object().preemption().clear_pending();

            if Arc::ptr_eq(&prev, &next) {
                None
            } else {
                rs.common.previous = Some(prev.clone());
                rs.switching_from = Some(prev.clone());

                let to_idle = rs.common.is_idle(&next);
                let deadline = if to_idle {
                    INFINITE_TIME
                } else {
                    now.saturating_add(next.sched_object().entity().time_slice)
                };
                self.reset_preemption(&mut rs, deadline);
                self.stats.record_context_switch(to_idle);
                Some((prev, next))
            }
        };

        if let Some((prev, next)) = switch {
            crate::ktrace!("cpu {}: switch {} -> {}", self.cpu, prev.name(), next.name());
            let (prev_as, next_as) = (prev.aspace(), next.aspace());
            if prev_as != next_as {
                platform.switch_aspace(prev_as, next_as);
            }
            platform.switch_context(&prev, &next);
            // prev may have resumed on another core
            self.table.finish_switch();
        }
    }

    /// Release the unit this core just switched away from so other cores
    /// may run it. Runs on the stack of the unit switched to: `reschedule`
    /// calls it when `switch_context` returns, and a thread entering for the
    /// first time must call it before anything else.
    pub fn finish_switch(&self) {
        let prev = self.lock().switching_from.take();
        if let Some(prev) = prev {
            prev.sched_object().set_on_cpu(false);
        }
    }

    fn pick_next_thread(
        &self,
        rs: &mut RunState<P::Thread>,
        prev: &ThreadRef<P>,
    ) -> ThreadRef<P> {
        for kind in SchedDiscipline::ALL {
            let candidate = rs.disciplines[kind.index()].pick_next(&rs.common);
            if let Some(next) = candidate {
                self.put_prev_and_set_next(rs, prev, &next);
                return next;
            }
        }

        if let Some(next) = self.steal_work(rs) {
            self.put_prev_and_set_next(rs, prev, &next);
            return next;
        }

        if prev.state().is_runnable() {
            return prev.clone();
        }

        let idle = rs.common.idle().clone();
        self.put_prev_and_set_next(rs, prev, &idle);
        idle
    }

    fn put_prev_and_set_next(
        &self,
        rs: &mut RunState<P::Thread>,
        prev: &ThreadRef<P>,
        next: &ThreadRef<P>,
    ) {
        if Arc::ptr_eq(prev, next) {
            let kind = next.sched_object().entity().discipline;
            if let Some(kind) = kind {
                let (discipline, common) = rs.split(kind);
                discipline.set_next(common, next);
            }
            return;
        }

        if !rs.common.is_idle(prev) {
            let kind = prev.sched_object().entity().discipline;
            if let Some(kind) = kind {
                if prev.state().is_runnable() {
                    let (discipline, common) = rs.split(kind);
                    discipline.put_prev(common, prev);
                    prev.set_state(ThreadState::Ready);
                } else {
                    self.retire(rs, kind, prev);
                }
            }
        }

        if !rs.common.is_idle(next) {
            let kind = next.sched_object().entity().discipline;
            if let Some(kind) = kind {
                let (discipline, common) = rs.split(kind);
                discipline.set_next(common, next);
            }
        }
        {
            let mut se = next.sched_object().entity();
            se.current_cpu = Some(self.cpu);
            se.recent_cpu = Some(self.cpu);
        }
        next.sched_object().set_on_cpu(true);
        next.set_state(ThreadState::Running);
        rs.common.current = next.clone();
        rs.common.current_started_time = rs.common.now;
        self.publish_load(rs);
    }

    /// Take a runnable unit from the busiest other core. Best effort: a
    /// contended victim is skipped rather than waited for.
    #[cfg(feature = "smp")]
    fn steal_work(&self, rs: &mut RunState<P::Thread>) -> Option<ThreadRef<P>> {
        let victim = self
            .table
            .active_mask()
            .iter_set()
            .filter(|cpu| *cpu != self.cpu)
            .filter_map(|cpu| self.table.get(cpu))
            .filter(|sched| sched.nr_queued() > 0)
            .max_by_key(|sched| sched.nr_queued())?;

        let mut remote = victim.try_lock()?;
        let (kind, thread) = remote
            .disciplines
            .iter()
            .find_map(|d| d.steal_candidate(self.cpu).map(|t| (d.kind(), t)))?;

        victim.dequeue_thread(&mut remote, &thread);
        rs.disciplines[kind.index()].rebase_from(&remote.disciplines[kind.index()], &thread);
        drop(remote);

        let (weight, slice) = {
            let mut se = thread.sched_object().entity();
            se.current_cpu = Some(self.cpu);
            (se.weight(), se.time_slice)
        };
        rs.common.attach(weight, slice);

        SchedStats::bump(&victim.stats.migrations_out);
        SchedStats::bump(&self.stats.migrations_in);
        SchedStats::bump(&self.stats.steals);
        crate::kdebug!(
            "cpu {}: stole {} from cpu {}",
            self.cpu,
            thread.name(),
            victim.cpu
        );
        Some(thread)
    }

    #[cfg(not(feature = "smp"))]
    fn steal_work(&self, _rs: &mut RunState<P::Thread>) -> Option<ThreadRef<P>> {
        None
    }

    // ------------------------------------------------------------------------
    // Tick and preemption timer
    // ------------------------------------------------------------------------

    /// Account the running unit. Returns whether it now has a pending
    /// preemption; the caller decides when to `preempt`.
    pub fn on_tick(&self) -> bool {
        let now = self.table.platform().now();
        let mut rs = self.lock();
        let current = rs.common.current.clone();
        let _no_preempt = PreemptionGuard::new(current.sched_object().preemption());

        self.update_timeline(&mut rs, now);
        SchedStats::bump(&self.stats.ticks);

        let kind = if rs.common.current_is_idle() {
            None
        } else {
            current.sched_object().entity().discipline
        };
        let result = match kind {
            Some(kind) => {
                let (discipline, common) = rs.split(kind);
                discipline.on_tick(common)
            }
            None => TickResult::Idle,
        };

        match result {
            TickResult::ClockSkew => SchedStats::bump(&self.stats.skipped_ticks),
            TickResult::SliceExhausted => {
                crate::ktrace!("cpu {}: {} exhausted its slice", self.cpu, current.name())
            }
            TickResult::Idle | TickResult::Charged => {}
        }

        let baseline = rs.virtual_baseline();
        rs.common.advance_timeline(baseline);
        if result != TickResult::Idle {
            let slice = current.sched_object().entity().time_slice;
            self.reset_preemption(&mut rs, now.saturating_add(slice));
        }

        current.sched_object().preemption().is_pending()
    }

    /// Preemption timer callback. Runs the tick only once the armed
    /// deadline has passed.
    pub fn timer_expired(&self, now: SchedTime) -> bool {
        let expired = {
            let mut rs = self.lock();
            if now >= rs.preemption_deadline {
                rs.preemption_deadline = INFINITE_TIME;
                true
            } else {
                false
            }
        };
        expired && self.on_tick()
    }
}
