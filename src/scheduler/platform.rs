//! Collaborator interfaces
//!
//! The scheduler does not own threads, timers or interrupt delivery. The
//! kernel provides them through two traits:
//!
//! - [`SchedThread`]: a schedulable unit (embedded state, lifecycle status,
//!   address space identity)
//! - [`Platform`]: per-core hardware (clock, interrupt flag, IPIs, one-shot
//!   timer, address space and register context switch)

use alloc::sync::Arc;

use super::cpumask::CpuMask;
use super::entity::SchedObject;
use super::types::{AspaceId, CpuNum, SchedTime, ThreadState};

/// A unit of execution the scheduler can queue and run
pub trait SchedThread: Send + Sync + 'static {
    fn sched_object(&self) -> &SchedObject;

    fn state(&self) -> ThreadState;

    fn set_state(&self, state: ThreadState);

    /// Address space the unit runs in
    fn aspace(&self) -> AspaceId;

    fn name(&self) -> &str {
        "<unnamed>"
    }
}

/// Why a reschedule IPI was sent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpiReason {
    /// A unit was placed on the target core's run queue
    Reschedule,
}

/// Hardware and per-core services the scheduler consumes
pub trait Platform: Send + Sync + 'static {
    type Thread: SchedThread;

    /// Core executing the caller
    fn current_cpu(&self) -> CpuNum;

    /// Monotonic clock in nanoseconds. May step backwards across a clock
    /// readjustment; the scheduler tolerates that.
    fn now(&self) -> SchedTime;

    /// Disable local interrupts, returning whether they were enabled
    fn irq_save(&self) -> bool;

    /// Restore the state returned by `irq_save`
    fn irq_restore(&self, was_enabled: bool);

    /// Ask every core in `targets` to run its reschedule path
    fn send_ipi(&self, targets: CpuMask, reason: IpiReason);

    /// Arm `cpu`'s one-shot preemption timer. `INFINITE_TIME` disarms it.
    fn arm_preemption_timer(&self, cpu: CpuNum, deadline: SchedTime);

    /// Switch address spaces. Only called when `prev != next`.
    fn switch_aspace(&self, prev: AspaceId, next: AspaceId);

    /// Transfer the register and stack context from `prev` to `next`.
    ///
    /// Called without any scheduler lock held and with local interrupts
    /// disabled; returns when `prev` is scheduled again.
    fn switch_context(&self, prev: &Arc<Self::Thread>, next: &Arc<Self::Thread>);
}

/// Keeps local interrupts disabled for its lifetime
pub struct IrqGuard<'a, P: Platform> {
    platform: &'a P,
    was_enabled: bool,
}

impl<'a, P: Platform> IrqGuard<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        let was_enabled = platform.irq_save();
        Self { platform, was_enabled }
    }
}

impl<P: Platform> Drop for IrqGuard<'_, P> {
    fn drop(&mut self) {
        self.platform.irq_restore(self.was_enabled);
    }
}
