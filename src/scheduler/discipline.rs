//! Scheduling disciplines
//!
//! The set of disciplines is fixed at build time, so a core's discipline
//! table holds a closed enum and dispatch is a `match`.

use alloc::sync::Arc;

use super::common::SchedCommonData;
use super::fair::{FairScheduler, TickResult};
use super::platform::SchedThread;
use super::types::{CpuNum, SchedDiscipline, SchedTime};

pub enum Discipline<T: SchedThread> {
    Fair(FairScheduler<T>),
}

impl<T: SchedThread> Discipline<T> {
    pub fn new(kind: SchedDiscipline, cpu: CpuNum) -> Self {
        match kind {
            SchedDiscipline::Fair => Discipline::Fair(FairScheduler::new(cpu)),
        }
    }

    pub fn kind(&self) -> SchedDiscipline {
        match self {
            Discipline::Fair(_) => SchedDiscipline::Fair,
        }
    }

    pub fn enqueue(&mut self, common: &mut SchedCommonData<T>, thread: &Arc<T>) {
        match self {
            Discipline::Fair(fair) => fair.enqueue(common, thread),
        }
    }

    pub fn dequeue(&mut self, common: &mut SchedCommonData<T>, thread: &Arc<T>) {
        match self {
            Discipline::Fair(fair) => fair.dequeue(common, thread),
        }
    }

    pub fn pick_next(&self, common: &SchedCommonData<T>) -> Option<Arc<T>> {
        match self {
            Discipline::Fair(fair) => fair.pick_next(common),
        }
    }

    pub fn put_prev(&mut self, common: &mut SchedCommonData<T>, prev: &Arc<T>) {
        match self {
            Discipline::Fair(fair) => fair.put_prev(common, prev),
        }
    }

    pub fn set_next(&mut self, common: &mut SchedCommonData<T>, next: &Arc<T>) {
        match self {
            Discipline::Fair(fair) => fair.set_next(common, next),
        }
    }

    pub fn on_tick(&mut self, common: &mut SchedCommonData<T>) -> TickResult {
        match self {
            Discipline::Fair(fair) => fair.update_current(common),
        }
    }

    pub fn yield_current(&mut self, common: &mut SchedCommonData<T>) {
        match self {
            Discipline::Fair(fair) => fair.yield_current(common),
        }
    }

    /// Prepare a unit arriving from outside this core's queues
    pub fn place(&self, thread: &Arc<T>) {
        match self {
            Discipline::Fair(fair) => fair.place(thread),
        }
    }

    /// Carry a migrating unit's virtual clock over from another core
    pub fn rebase_from(&self, from: &Discipline<T>, thread: &Arc<T>) {
        match (self, from) {
            (Discipline::Fair(to), Discipline::Fair(from)) => {
                to.rebase_from(from.min_vruntime(), thread)
            }
        }
    }

    pub fn steal_candidate(&self, cpu: CpuNum) -> Option<Arc<T>> {
        match self {
            Discipline::Fair(fair) => fair.steal_candidate(cpu),
        }
    }

    pub fn nr_queued(&self) -> usize {
        match self {
            Discipline::Fair(fair) => fair.nr_queued(),
        }
    }

    /// Virtual time baseline used to advance the core timeline
    pub fn min_vruntime(&self) -> SchedTime {
        match self {
            Discipline::Fair(fair) => fair.min_vruntime(),
        }
    }
}
