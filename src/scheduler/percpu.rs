//! Per-CPU scheduler table
//!
//! The kernel creates one `SchedTable` at boot and keeps it in static
//! storage. Each CPU then brings up its own `MainScheduler` entry.
//!
//! ## Bring-up order
//!
//! 1. `SchedTable::new` on the boot CPU (no entry is valid yet)
//! 2. `bring_up(cpu, idle)` on each CPU, exactly once; the entry becomes
//!    reachable through `get` and the CPU joins the active mask last
//! 3. Only then may units be placed on that CPU

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Once;

use crate::config::SchedConfig;
use crate::error::SchedError;

use super::cpumask::{AtomicCpuMask, CpuMask};
use super::main_scheduler::{MainScheduler, ThreadRef};
use super::platform::{Platform, SchedThread};
use super::stats::SchedStatsSnapshot;
use super::types::{BaseProfile, CpuNum, SchedTime, MAX_CPUS};

pub struct SchedTable<P: Platform> {
    platform: P,
    config: SchedConfig,
    cores: Box<[Once<MainScheduler<P>>]>,
    active: AtomicCpuMask,
}

impl<P: Platform> SchedTable<P> {
    pub fn new(platform: P, config: SchedConfig, nr_cpus: usize) -> Result<Self, SchedError> {
        config.validate()?;
        if nr_cpus == 0 || nr_cpus > MAX_CPUS {
            return Err(SchedError::TooManyCpus(nr_cpus));
        }

        let cores: Vec<Once<MainScheduler<P>>> = (0..nr_cpus).map(|_| Once::new()).collect();
        Ok(Self {
            platform,
            config,
            cores: cores.into_boxed_slice(),
            active: AtomicCpuMask::new(),
        })
    }

    /// Bring up `cpu`'s scheduler with `idle` as its fallback unit.
    ///
    /// Fails without marking the CPU active if the discipline table cannot
    /// be allocated.
    pub fn bring_up(
        &'static self,
        cpu: CpuNum,
        idle: ThreadRef<P>,
    ) -> Result<&'static MainScheduler<P>, SchedError> {
        let slot = self.cores.get(cpu).ok_or(SchedError::CpuOutOfRange {
            cpu,
            nr_cpus: self.cores.len(),
        })?;
        if slot.is_completed() {
            return Err(SchedError::AlreadyBroughtUp(cpu));
        }

        let sched = match MainScheduler::new(self, cpu, idle) {
            Ok(sched) => sched,
            Err(err) => {
                crate::kfatal!("sched: cpu {} bring-up failed: {}", cpu, err);
                return Err(err);
            }
        };
        let sched = slot.call_once(|| sched);
        self.active.set(cpu);

        crate::kinfo!(
            "sched: cpu {} online (granularity={}ns, period={}ns)",
            cpu,
            self.config.minimal_granularity,
            self.config.scheduling_period()
        );
        Ok(sched)
    }

    #[inline]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[inline]
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    #[inline]
    pub fn nr_cpus(&self) -> usize {
        self.cores.len()
    }

    /// Scheduler of `cpu`, once that CPU is up
    #[inline]
    pub fn get(&self, cpu: CpuNum) -> Option<&MainScheduler<P>> {
        self.cores.get(cpu)?.get()
    }

    /// Scheduler of the executing CPU
    #[inline]
    pub fn current(&self) -> Option<&MainScheduler<P>> {
        self.get(self.platform.current_cpu())
    }

    #[inline]
    pub fn is_active(&self, cpu: CpuNum) -> bool {
        self.active.is_set(cpu)
    }

    #[inline]
    pub fn active_mask(&self) -> CpuMask {
        self.active.load()
    }

    fn local(&self) -> &MainScheduler<P> {
        match self.current() {
            Some(sched) => sched,
            None => {
                let cpu = self.platform.current_cpu();
                crate::kfatal!("sched: cpu {} used before bring-up", cpu);
                panic!("scheduler entry on cpu {} before bring-up", cpu);
            }
        }
    }

    /// Choose the CPU that should run `thread`: its recent CPU if that is
    /// still allowed and active, else the allowed CPU with the least
    /// expected runtime. The loads are snapshots and may be stale.
    ///
    /// Panics when no active CPU is in the unit's affinity.
    pub fn assign_target_cpu(&self, thread: &ThreadRef<P>) -> CpuNum {
        let (recent, affinity) = {
            let se = thread.sched_object().entity();
            (se.recent_cpu, se.affinity)
        };
        let available = affinity.intersection(&self.active_mask());

        if let Some(recent) = recent {
            if available.is_set(recent) {
                return recent;
            }
        }

        let local = self.platform.current_cpu();
        let target = available
            .iter_set()
            .filter_map(|cpu| self.get(cpu).map(|sched| (cpu, sched.expected_runtime())))
            .min_by_key(|&(cpu, load)| (load, cpu != local, cpu))
            .map(|(cpu, _)| cpu);

        match target {
            Some(cpu) => cpu,
            None => {
                crate::kfatal!(
                    "sched: no active cpu in affinity {:?} of {}",
                    affinity,
                    thread.name()
                );
                panic!("no eligible cpu for {}", thread.name());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Kernel entry points (executing CPU)
    // ------------------------------------------------------------------------

    /// Give `thread` its scheduling profile. Ignored while it is queued or
    /// running somewhere.
    pub fn init_thread(&self, thread: &ThreadRef<P>, profile: BaseProfile) {
        let mut se = thread.sched_object().entity();
        if se.is_on_queue() || se.current_cpu.is_some() {
            drop(se);
            crate::kwarn!("sched: init_thread on live unit {}", thread.name());
            return;
        }
        se.reset_profile(profile, self.config.default_time_slice);
        crate::ktrace!("sched: {} weight={}", thread.name(), profile.weight);
    }

    pub fn activate(&self, thread: &ThreadRef<P>) {
        self.local().activate(thread);
    }

    pub fn deactivate(&self, thread: &ThreadRef<P>) {
        self.local().deactivate(thread);
    }

    pub fn on_tick(&self) -> bool {
        self.local().on_tick()
    }

    pub fn timer_expired(&self, now: SchedTime) -> bool {
        self.local().timer_expired(now)
    }

    pub fn preempt(&self) -> bool {
        self.local().preempt()
    }

    pub fn yield_current(&self) {
        self.local().yield_current();
    }

    /// Complete the switch the executing CPU just made. New threads call this
    /// first thing on their own stack.
    pub fn finish_switch(&self) {
        self.local().finish_switch();
    }

    /// Statistics of every CPU that is up
    pub fn stats(&self) -> Vec<(CpuNum, SchedStatsSnapshot)> {
        (0..self.cores.len())
            .filter_map(|cpu| self.get(cpu).map(|sched| (cpu, sched.stats())))
            .collect()
    }

    /// Unit currently running on `cpu`
    pub fn running_on(&self, cpu: CpuNum) -> Option<Arc<P::Thread>> {
        self.get(cpu).map(|sched| sched.current())
    }

    /// Whether `thread` is queued or running on some CPU
    pub fn is_placed(&self, thread: &ThreadRef<P>) -> bool {
        thread.sched_object().entity().current_cpu.is_some()
    }
}
