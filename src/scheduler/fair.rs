//! EEVDF fair discipline
//!
//! The run queue is a `BTreeMap` ordered by `(deadline, seq)`. `seq` is a
//! per-queue insertion counter, so equal deadlines keep insertion order. An
//! entity only holds its `RunQueueKey` while queued; the queue owns the
//! `Arc` of the unit.
//!
//! ## Eligibility
//!
//! `weighted_vruntime_sum` is kept relative to `min_vruntime`: every member
//! contributes `(vruntime - min_vruntime) * weight`. An entity `e` is eligible
//! when
//!
//! ```text
//! weighted_vruntime_sum >= (vruntime(e) - min_vruntime) * weight_sum
//! ```
//!
//! with the running entity and `e` itself folded into both sums. Raising
//! `min_vruntime` by `d` subtracts `d * weight_sum` so the sums stay valid
//! without touching the members.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use super::common::SchedCommonData;
use super::cpumask::CpuMask;
use super::platform::SchedThread;
use super::types::{
    cast_to_virtual, clamp_time, CpuNum, SchedDiscipline, SchedTime, SchedWeight, ThreadState,
};

/// Position of an entity in a fair run queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunQueueKey {
    deadline: SchedTime,
    seq: u64,
}

impl RunQueueKey {
    #[inline]
    pub fn deadline(&self) -> SchedTime {
        self.deadline
    }
}

/// Queue member. Weight and vruntime are captured at insertion so removal
/// subtracts exactly what insertion added.
struct QueueNode<T: SchedThread> {
    thread: Arc<T>,
    vruntime: SchedTime,
    weight: SchedWeight,
}

/// Outcome of charging the running entity on a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickResult {
    /// The idle entity was running; nothing to charge
    Idle,
    /// The clock stepped backwards; accounting skipped
    ClockSkew,
    /// Charged, slice not yet exhausted
    Charged,
    /// Charged, slice exhausted and a preemption marked pending
    SliceExhausted,
}

/// Fair run queue of one core
pub struct FairScheduler<T: SchedThread> {
    cpu: CpuNum,
    queue: BTreeMap<RunQueueKey, QueueNode<T>>,
    next_seq: u64,
    min_vruntime: SchedTime,
    weighted_vruntime_sum: i128,
    weight_sum: SchedWeight,
}

impl<T: SchedThread> FairScheduler<T> {
    pub fn new(cpu: CpuNum) -> Self {
        Self {
            cpu,
            queue: BTreeMap::new(),
            next_seq: 0,
            min_vruntime: 0,
            weighted_vruntime_sum: 0,
            weight_sum: 0,
        }
    }

    #[inline]
    pub fn min_vruntime(&self) -> SchedTime {
        self.min_vruntime
    }

    /// Sum of `(vruntime - min_vruntime) * weight` over queued entities
    #[inline]
    pub fn weighted_vruntime_sum(&self) -> i128 {
        self.weighted_vruntime_sum
    }

    /// Weight of queued entities only
    #[inline]
    pub fn weight_sum(&self) -> SchedWeight {
        self.weight_sum
    }

    #[inline]
    pub fn nr_queued(&self) -> usize {
        self.queue.len()
    }

    pub fn contains(&self, thread: &Arc<T>) -> bool {
        self.queue.values().any(|node| Arc::ptr_eq(&node.thread, thread))
    }

    /// Queued units in deadline order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.queue.values().map(|node| &node.thread)
    }

    /// Queued weight plus the running entity's, if it is a fair entity
    /// outside the queue
    pub fn total_weight(&self, common: &SchedCommonData<T>) -> SchedWeight {
        match self.running_contribution(common, None) {
            Some((_, weight)) => self.weight_sum + weight,
            None => self.weight_sum,
        }
    }

    /// Vruntime and weight of the running entity when it counts towards the
    /// queue average: a runnable fair entity that is not idle, not queued and
    /// not `skip`. A unit on its way to block is leaving the core and must not
    /// hold the average down.
    fn running_contribution(
        &self,
        common: &SchedCommonData<T>,
        skip: Option<&Arc<T>>,
    ) -> Option<(SchedTime, SchedWeight)> {
        if common.current_is_idle() || !common.current.state().is_runnable() {
            return None;
        }
        if let Some(skip) = skip {
            if Arc::ptr_eq(skip, &common.current) {
                return None;
            }
        }
        let se = common.current.sched_object().entity();
        if se.discipline != Some(SchedDiscipline::Fair) || se.is_on_queue() {
            return None;
        }
        Some((se.vruntime, se.weight()))
    }

    #[inline]
    fn relative(&self, vruntime: SchedTime, weight: SchedWeight) -> i128 {
        (vruntime as i128 - self.min_vruntime as i128) * weight as i128
    }

    // ------------------------------------------------------------------------
    // Queue primitives
    // ------------------------------------------------------------------------

    fn enqueue_object(&mut self, thread: &Arc<T>) -> bool {
        let mut se = thread.sched_object().entity();
        if se.rq_key.is_some() {
            crate::kwarn!("fair[{}]: {} is already queued", self.cpu, thread.name());
            return false;
        }

        let key = RunQueueKey {
            deadline: se.deadline,
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        se.rq_key = Some(key);
        let (vruntime, weight) = (se.vruntime, se.weight());
        drop(se);

        self.weighted_vruntime_sum += self.relative(vruntime, weight);
        self.weight_sum += weight;
        self.queue.insert(
            key,
            QueueNode {
                thread: thread.clone(),
                vruntime,
                weight,
            },
        );
        true
    }

    /// Remove `thread` if this queue holds it. Returns whether it was queued here.
    fn dequeue_object(&mut self, thread: &Arc<T>) -> bool {
        let mut se = thread.sched_object().entity();
        let Some(key) = se.rq_key else {
            return false;
        };
        // Keys are only unique per queue
        match self.queue.get(&key) {
            Some(node) if Arc::ptr_eq(&node.thread, thread) => {}
            _ => return false,
        }
        se.rq_key = None;
        drop(se);

        if let Some(node) = self.queue.remove(&key) {
            self.weighted_vruntime_sum -= self.relative(node.vruntime, node.weight);
            self.weight_sum -= node.weight;
        }
        true
    }

    // ------------------------------------------------------------------------
    // Discipline operations
    // ------------------------------------------------------------------------

    /// Insert `thread`. The running entity is first rebased by its lag so it
    /// does not re-enter with a stale promise.
    pub fn enqueue(&mut self, common: &mut SchedCommonData<T>, thread: &Arc<T>) {
        if Arc::ptr_eq(thread, &common.current) && !common.current_is_idle() {
            let total = self.total_weight(common) as i128;
            let mut se = thread.sched_object().entity();
            let lag = se.vlag();
            if lag != 0 {
                let weight = se.weight();
                let shift = lag as i128 * (weight as i128 + total);
                se.vruntime = clamp_time(se.vruntime as i128 - shift);
                se.deadline = se
                    .vruntime
                    .saturating_add(cast_to_virtual(se.time_slice, weight));
            }
        }

        self.update_runtime(common);
        self.enqueue_object(thread);
    }

    pub fn dequeue(&mut self, common: &mut SchedCommonData<T>, thread: &Arc<T>) {
        self.update_runtime(common);
        self.dequeue_object(thread);
    }

    /// Whether `thread` has not run ahead of the weighted queue average
    pub fn is_eligible(&self, common: &SchedCommonData<T>, thread: &Arc<T>) -> bool {
        let (vruntime, weight, queued) = {
            let se = thread.sched_object().entity();
            (se.vruntime, se.weight(), se.is_on_queue())
        };

        let mut sum = self.weighted_vruntime_sum;
        let mut load = self.weight_sum as i128;
        if let Some((v, w)) = self.running_contribution(common, Some(thread)) {
            sum += self.relative(v, w);
            load += w as i128;
        }
        if !queued {
            sum += self.relative(vruntime, weight);
            load += weight as i128;
        }

        sum >= (vruntime as i128 - self.min_vruntime as i128) * load
    }

    /// First eligible entity in deadline order
    pub fn pick_next(&self, common: &SchedCommonData<T>) -> Option<Arc<T>> {
        let mut sum = self.weighted_vruntime_sum;
        let mut load = self.weight_sum as i128;
        if let Some((v, w)) = self.running_contribution(common, None) {
            sum += self.relative(v, w);
            load += w as i128;
        }

        self.queue
            .values()
            .find(|node| sum >= (node.vruntime as i128 - self.min_vruntime as i128) * load)
            .map(|node| node.thread.clone())
    }

    /// Give the core back: reinsert `prev` unless it terminated or is queued
    pub fn put_prev(&mut self, common: &mut SchedCommonData<T>, prev: &Arc<T>) {
        if prev.state() == ThreadState::Terminated {
            return;
        }
        if prev.sched_object().entity().is_on_queue() {
            return;
        }
        self.update_runtime(common);
        self.enqueue_object(prev);
    }

    /// Take `next` out of the queue and give it a fresh promise
    pub fn set_next(&mut self, common: &mut SchedCommonData<T>, next: &Arc<T>) {
        self.dequeue_object(next);
        let mut se = next.sched_object().entity();
        se.start_time = common.now;
        se.deadline = common.timeline.saturating_add(common.minimal_granularity());
    }

    /// Tick accounting for the running entity
    pub fn update_current(&mut self, common: &mut SchedCommonData<T>) -> TickResult {
        if common.current_is_idle() {
            return TickResult::Idle;
        }
        let delta = common.now.saturating_sub(common.current_started_time);
        if delta < 0 {
            crate::ktrace!(
                "fair[{}]: clock stepped back by {}ns, skipping tick",
                self.cpu,
                -delta
            );
            return TickResult::ClockSkew;
        }
        let current = common.current.clone();
        if current.sched_object().entity().discipline != Some(SchedDiscipline::Fair) {
            return TickResult::Idle;
        }
        common.current_started_time = common.now;

        let requeue = self.dequeue_object(&current);
        let exhausted = {
            let mut se = current.sched_object().entity();
            se.runtime = se.runtime.saturating_add(delta);
            let weight = se.weight();
            if se.update(cast_to_virtual(common.scheduling_period(), weight)) {
                se.deadline = se
                    .vruntime
                    .saturating_add(cast_to_virtual(se.time_slice, weight));
                true
            } else {
                false
            }
        };
        if exhausted {
            current
                .sched_object()
                .preemption()
                .set_pending(&CpuMask::of(self.cpu));
        }
        if requeue {
            self.enqueue_object(&current);
        }

        self.update_min_vruntime(common);
        if exhausted {
            TickResult::SliceExhausted
        } else {
            TickResult::Charged
        }
    }

    /// Charge elapsed physical time to the running entity without a tick
    fn update_runtime(&mut self, common: &mut SchedCommonData<T>) {
        if common.current_is_idle() {
            return;
        }
        let delta = common.now.saturating_sub(common.current_started_time);
        if delta > 0 {
            common.current_started_time = common.now;
            let mut se = common.current.sched_object().entity();
            se.runtime = se.runtime.saturating_add(delta);
        }
        self.update_min_vruntime(common);
    }

    /// Raise `min_vruntime` to the running entity's vruntime
    pub fn update_min_vruntime(&mut self, common: &SchedCommonData<T>) {
        if common.current_is_idle() {
            return;
        }
        let vruntime = {
            let se = common.current.sched_object().entity();
            if se.discipline != Some(SchedDiscipline::Fair) {
                return;
            }
            se.vruntime
        };
        if vruntime > self.min_vruntime {
            let delta = vruntime as i128 - self.min_vruntime as i128;
            self.weighted_vruntime_sum -= delta * self.weight_sum as i128;
            self.min_vruntime = vruntime;
        }
    }

    /// Push the running entity's deadline one slice out and ask for a switch
    pub fn yield_current(&mut self, common: &mut SchedCommonData<T>) {
        if common.current_is_idle() {
            return;
        }
        let current = common.current.clone();
        let requeue = self.dequeue_object(&current);
        {
            let mut se = current.sched_object().entity();
            let slice = cast_to_virtual(se.time_slice, se.weight());
            se.deadline = se.deadline.saturating_add(slice);
        }
        current
            .sched_object()
            .preemption()
            .set_pending(&CpuMask::of(self.cpu));
        if requeue {
            self.enqueue_object(&current);
        }
    }

    /// Clamp a unit that was away (new or woken) so it starts no earlier
    /// than the queue baseline
    pub fn place(&self, thread: &Arc<T>) {
        let mut se = thread.sched_object().entity();
        if se.vruntime < self.min_vruntime {
            se.vruntime = self.min_vruntime;
            let slice = cast_to_virtual(se.time_slice, se.weight());
            se.deadline = se.vruntime.saturating_add(slice);
        }
    }

    /// Move a unit's virtual clock from `from`'s baseline to this queue's
    pub fn rebase_from(&self, from_min_vruntime: SchedTime, thread: &Arc<T>) {
        let shift = self.min_vruntime as i128 - from_min_vruntime as i128;
        let mut se = thread.sched_object().entity();
        se.vruntime = clamp_time(se.vruntime as i128 + shift);
        se.deadline = clamp_time(se.deadline as i128 + shift);
    }

    /// Least urgent queued unit allowed to run on `cpu`. Units whose stack
    /// this core has not yet switched away from stay put.
    pub fn steal_candidate(&self, cpu: CpuNum) -> Option<Arc<T>> {
        self.queue
            .values()
            .rev()
            .filter(|node| !node.thread.sched_object().is_on_cpu())
            .find(|node| node.thread.sched_object().entity().affinity.is_set(cpu))
            .map(|node| node.thread.clone())
    }
}
