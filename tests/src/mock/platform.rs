//! Mock per-core hardware
//!
//! One `MockPlatform` stands in for every core. The "executing" core is a
//! plain variable the test sets before calling into the scheduler.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::thread::MockThread;
use crate::scheduler::{AspaceId, CpuMask, CpuNum, IpiReason, Platform, SchedThread, SchedTime};

/// A recorded context switch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchRecord {
    pub cpu: CpuNum,
    pub prev: String,
    pub next: String,
    /// Whether local interrupts were enabled during the switch
    pub irqs_enabled: bool,
}

pub struct MockPlatform {
    cpu: AtomicUsize,
    now: AtomicI64,
    irqs_enabled: AtomicBool,
    ipis: Mutex<Vec<(CpuMask, IpiReason)>>,
    timers: Mutex<Vec<(CpuNum, SchedTime)>>,
    /// Interrupt flag at each timer arm; arming happens under the core lock
    timer_irqs: Mutex<Vec<bool>>,
    switches: Mutex<Vec<SwitchRecord>>,
    aspace_switches: Mutex<Vec<(AspaceId, AspaceId)>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            cpu: AtomicUsize::new(0),
            now: AtomicI64::new(0),
            irqs_enabled: AtomicBool::new(true),
            ipis: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
            timer_irqs: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
            aspace_switches: Mutex::new(Vec::new()),
        }
    }

    /// Pretend the caller now executes on `cpu`
    pub fn set_cpu(&self, cpu: CpuNum) {
        self.cpu.store(cpu, Ordering::SeqCst);
    }

    pub fn set_now(&self, now: SchedTime) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: SchedTime) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn irqs_enabled(&self) -> bool {
        self.irqs_enabled.load(Ordering::SeqCst)
    }

    pub fn ipis(&self) -> Vec<(CpuMask, IpiReason)> {
        self.ipis.lock().unwrap().clone()
    }

    pub fn timers(&self) -> Vec<(CpuNum, SchedTime)> {
        self.timers.lock().unwrap().clone()
    }

    /// Last deadline programmed for `cpu`
    pub fn armed_timer(&self, cpu: CpuNum) -> Option<SchedTime> {
        self.timers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| *c == cpu)
            .map(|(_, deadline)| *deadline)
    }

    /// Timer arms that happened with local interrupts enabled
    pub fn timer_arms_with_irqs_enabled(&self) -> usize {
        self.timer_irqs.lock().unwrap().iter().filter(|on| **on).count()
    }

    pub fn switches(&self) -> Vec<SwitchRecord> {
        self.switches.lock().unwrap().clone()
    }

    pub fn aspace_switches(&self) -> Vec<(AspaceId, AspaceId)> {
        self.aspace_switches.lock().unwrap().clone()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    type Thread = MockThread;

    fn current_cpu(&self) -> CpuNum {
        self.cpu.load(Ordering::SeqCst)
    }

    fn now(&self) -> SchedTime {
        self.now.load(Ordering::SeqCst)
    }

    fn irq_save(&self) -> bool {
        self.irqs_enabled.swap(false, Ordering::SeqCst)
    }

    fn irq_restore(&self, was_enabled: bool) {
        self.irqs_enabled.store(was_enabled, Ordering::SeqCst);
    }

    fn send_ipi(&self, targets: CpuMask, reason: IpiReason) {
        self.ipis.lock().unwrap().push((targets, reason));
    }

    fn arm_preemption_timer(&self, cpu: CpuNum, deadline: SchedTime) {
        self.timers.lock().unwrap().push((cpu, deadline));
        self.timer_irqs.lock().unwrap().push(self.irqs_enabled());
    }

    fn switch_aspace(&self, prev: AspaceId, next: AspaceId) {
        self.aspace_switches.lock().unwrap().push((prev, next));
    }

    fn switch_context(&self, prev: &Arc<MockThread>, next: &Arc<MockThread>) {
        self.switches.lock().unwrap().push(SwitchRecord {
            cpu: self.current_cpu(),
            prev: prev.name().to_string(),
            next: next.name().to_string(),
            irqs_enabled: self.irqs_enabled(),
        });
    }
}
