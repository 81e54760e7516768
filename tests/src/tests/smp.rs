//! SMP Scheduler Tests
//!
//! Placement across cores, reschedule IPIs, cross-core migration, work
//! stealing and the per-core bring-up protocol.

use std::sync::Arc;

use crate::config::SchedConfig;
use crate::error::SchedError;
use crate::mock::{self, MockPlatform, MockThread};
use crate::scheduler::{CpuMask, IpiReason, SchedTable, SchedThread, ThreadState, MAX_CPUS};

fn runs_on(table: &SchedTable<MockPlatform>, cpu: usize, thread: &Arc<MockThread>) -> bool {
    Arc::ptr_eq(&table.running_on(cpu).unwrap(), thread)
}

fn queued_on(table: &SchedTable<MockPlatform>, cpu: usize, thread: &Arc<MockThread>) -> bool {
    table.get(cpu).unwrap().with_fair(|fair, _| fair.contains(thread))
}

// ============================================================================
// Placement and IPIs
// ============================================================================

#[test]
fn test_remote_activation_sends_ipi() {
    let table = mock::boot(2);
    let t = mock::spawn(table, "t", 20);
    t.set_affinity(CpuMask::of(1));
    table.activate(&t);

    assert_eq!(t.owner(), Some(1));
    assert!(queued_on(table, 1, &t));
    assert_eq!(table.platform().ipis(), vec![(CpuMask::of(1), IpiReason::Reschedule)]);
    assert_eq!(table.get(0).unwrap().stats().ipis_sent, 1);
    assert_eq!(table.get(1).unwrap().nr_queued(), 1);

    // The remote core's running unit carries the request from cpu 0
    let idle1 = table.get(1).unwrap().idle();
    assert_eq!(idle1.sched_object().preemption().pending(), CpuMask::of(0));

    // Core 1 takes the IPI
    table.platform().set_cpu(1);
    assert!(table.preempt());
    assert!(runs_on(table, 1, &t));
    assert!(table.platform().switches().iter().all(|s| s.cpu == 1));
}

#[test]
fn test_placement_prefers_local_core_on_tie() {
    let table = mock::boot(2);
    table.platform().set_cpu(1);
    let t = mock::spawn(table, "t", 20);
    table.activate(&t);

    assert!(runs_on(table, 1, &t));
    assert!(table.platform().ipis().is_empty());
}

#[test]
fn test_placement_prefers_recent_cpu() {
    let table = mock::boot(2);
    table.platform().set_cpu(1);
    let t = mock::spawn(table, "t", 20);
    table.activate(&t);
    t.set_state(ThreadState::Blocking);
    table.deactivate(&t);
    assert_eq!(t.owner(), None);

    // Woken from core 0, but core 1 is where it last ran
    table.platform().set_cpu(0);
    table.activate(&t);
    assert_eq!(t.owner(), Some(1));
    assert!(queued_on(table, 1, &t));
    assert_eq!(table.platform().ipis().len(), 1);
}

#[test]
fn test_placement_picks_least_loaded_core() {
    let table = mock::boot(2);
    let busy = mock::spawn(table, "busy", 20);
    table.activate(&busy);
    assert!(runs_on(table, 0, &busy));

    let fresh = mock::spawn(table, "fresh", 20);
    assert_eq!(table.assign_target_cpu(&fresh), 1);
    table.activate(&fresh);
    assert_eq!(fresh.owner(), Some(1));
    assert!(runs_on(table, 0, &busy));
}

#[test]
fn test_placement_skips_offline_cores() {
    let table = mock::table(4);
    mock::bring_up(table, 0);
    mock::bring_up(table, 2);
    let t = mock::spawn(table, "t", 20);
    t.set_affinity(CpuMask::first_n(2));

    assert_eq!(table.active_mask().iter_set().collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(table.assign_target_cpu(&t), 0);
}

#[test]
#[should_panic(expected = "no eligible cpu")]
fn test_affinity_without_active_cpu_is_fatal() {
    let table = mock::table(2);
    mock::bring_up(table, 0);
    let t = mock::spawn(table, "pinned", 20);
    t.set_affinity(CpuMask::of(1));
    table.activate(&t);
}

// ============================================================================
// Migration
// ============================================================================

#[test]
fn test_migration_moves_queued_thread_once() {
    let table = mock::boot(2);
    let t = mock::spawn(table, "t", 20);
    t.set_affinity(CpuMask::of(1));
    table.activate(&t);
    assert!(queued_on(table, 1, &t));

    t.set_affinity(CpuMask::of(0));
    table.activate(&t);

    assert!(runs_on(table, 0, &t));
    assert_eq!(t.owner(), Some(0));
    assert!(!queued_on(table, 1, &t));
    assert!(!queued_on(table, 0, &t));

    let (src, dst) = (table.get(1).unwrap(), table.get(0).unwrap());
    assert_eq!(src.nr_queued(), 0);
    assert_eq!(src.weight_sum(), 0);
    assert_eq!(src.nr_running(), 0);
    assert_eq!(dst.nr_running(), 1);
    assert_eq!(src.stats().migrations_out, 1);
    assert_eq!(dst.stats().migrations_in, 1);
    assert!(table.platform().irqs_enabled());
    assert_eq!(table.platform().timer_arms_with_irqs_enabled(), 0);
}

#[test]
fn test_unit_still_on_cpu_is_not_migrated() {
    let table = mock::boot(2);
    let t = mock::spawn(table, "t", 20);
    t.set_affinity(CpuMask::of(1));
    table.activate(&t);
    assert!(queued_on(table, 1, &t));

    // Core 1 put t back on its queue but has not switched away yet
    t.sched_object().set_on_cpu(true);
    t.set_affinity(CpuMask::of(0));
    table.activate(&t);
    assert!(queued_on(table, 1, &t));
    assert_eq!(t.owner(), Some(1));
    assert_eq!(table.get(0).unwrap().stats().migrations_in, 0);

    t.sched_object().set_on_cpu(false);
    table.activate(&t);
    assert!(runs_on(table, 0, &t));
    assert_eq!(table.get(0).unwrap().stats().migrations_in, 1);
}

#[test]
fn test_repeated_activation_of_queued_thread_is_idempotent() {
    let table = mock::boot(2);
    let t = mock::spawn(table, "t", 20);
    t.set_affinity(CpuMask::of(1));
    table.activate(&t);
    table.activate(&t);

    let sched = table.get(1).unwrap();
    assert_eq!(sched.nr_queued(), 1);
    assert_eq!(sched.nr_running(), 1);
    assert_eq!(table.platform().ipis().len(), 1);
}

#[test]
fn test_running_thread_is_not_migrated() {
    let table = mock::boot(2);
    table.platform().set_cpu(1);
    let t = mock::spawn(table, "t", 20);
    table.activate(&t);
    assert!(runs_on(table, 1, &t));

    // Core 0 wakes it while it is on its way to block on core 1
    table.platform().set_cpu(0);
    t.set_state(ThreadState::Blocking);
    t.set_affinity(CpuMask::of(0));
    table.activate(&t);

    assert!(runs_on(table, 1, &t));
    assert_eq!(t.state(), ThreadState::Running);
    assert_eq!(t.owner(), Some(1));
    assert_eq!(table.get(0).unwrap().nr_queued(), 0);
    assert_eq!(table.get(0).unwrap().stats().migrations_in, 0);
}

#[test]
fn test_migration_rebases_virtual_clock() {
    let table = mock::boot(2);

    // Advance core 0's min_vruntime with a busy thread
    let busy = mock::spawn(table, "busy", 20);
    busy.set_affinity(CpuMask::of(0));
    table.activate(&busy);
    for i in 1..=3 {
        table.platform().set_now(i * 1_000_000);
        table.on_tick();
    }
    let dst_min = table.get(0).unwrap().with_fair(|fair, _| fair.min_vruntime());
    assert!(dst_min > 0);

    let t = mock::spawn(table, "t", 20);
    t.set_affinity(CpuMask::of(1));
    table.activate(&t);
    let (v, d) = (t.vruntime(), t.deadline());
    let src_min = table.get(1).unwrap().with_fair(|fair, _| fair.min_vruntime());

    // Keep busy on the core so t stays queued after arriving
    busy.sched_object().preemption().disable_preemption();
    t.set_affinity(CpuMask::of(0));
    table.activate(&t);
    assert!(queued_on(table, 0, &t));
    assert_eq!(t.vruntime(), v + dst_min - src_min);
    assert_eq!(t.deadline(), d + dst_min - src_min);
}

// ============================================================================
// Work stealing
// ============================================================================

#[cfg(feature = "smp")]
#[test]
fn test_idle_core_steals_queued_work() {
    let table = mock::boot(2);
    let a = mock::spawn(table, "a", 20);
    let b = mock::spawn(table, "b", 20);
    for t in [&a, &b] {
        t.set_affinity(CpuMask::of(1));
        table.activate(t);
    }
    assert_eq!(table.get(1).unwrap().nr_queued(), 2);

    for t in [&a, &b] {
        t.set_affinity(CpuMask::all());
    }
    table.get(0).unwrap().reschedule();

    // Least urgent goes first; ties keep queue order, so the later arrival
    assert!(runs_on(table, 0, &b));
    assert_eq!(b.owner(), Some(0));
    assert!(queued_on(table, 1, &a));

    let (thief, victim) = (table.get(0).unwrap(), table.get(1).unwrap());
    assert_eq!(thief.stats().steals, 1);
    assert_eq!(thief.stats().migrations_in, 1);
    assert_eq!(victim.stats().migrations_out, 1);
    assert_eq!(victim.nr_queued(), 1);
    assert_eq!(victim.weight_sum(), a.sched_object().entity().weight());
    assert_eq!(thief.weight_sum(), b.sched_object().entity().weight());
}

#[cfg(feature = "smp")]
#[test]
fn test_steal_respects_affinity() {
    let table = mock::boot(2);
    let pinned = mock::spawn(table, "pinned", 20);
    pinned.set_affinity(CpuMask::of(1));
    table.activate(&pinned);

    table.get(0).unwrap().reschedule();

    let thief = table.get(0).unwrap();
    assert!(Arc::ptr_eq(&thief.current(), &thief.idle()));
    assert_eq!(thief.stats().steals, 0);
    assert!(queued_on(table, 1, &pinned));
}

#[cfg(feature = "smp")]
#[test]
fn test_steal_skips_unit_still_on_cpu() {
    let table = mock::boot(2);
    let a = mock::spawn(table, "a", 20);
    a.set_affinity(CpuMask::of(1));
    table.activate(&a);
    a.set_affinity(CpuMask::all());
    a.sched_object().set_on_cpu(true);

    let thief = table.get(0).unwrap();
    thief.reschedule();
    assert!(Arc::ptr_eq(&thief.current(), &thief.idle()));
    assert_eq!(thief.stats().steals, 0);
    assert!(queued_on(table, 1, &a));

    // Core 1 finished switching away; now it can move
    a.sched_object().set_on_cpu(false);
    thief.reschedule();
    assert!(runs_on(table, 0, &a));
    assert_eq!(thief.stats().steals, 1);
}

// ============================================================================
// Bring-up
// ============================================================================

#[test]
fn test_bring_up_errors() {
    let table = mock::table(2);
    assert!(table.get(0).is_none());
    assert!(!table.is_active(0));

    let err = table.bring_up(2, MockThread::idle(2)).err();
    assert_eq!(err, Some(SchedError::CpuOutOfRange { cpu: 2, nr_cpus: 2 }));

    mock::bring_up(table, 0);
    let err = table.bring_up(0, MockThread::idle(0)).err();
    assert_eq!(err, Some(SchedError::AlreadyBroughtUp(0)));

    assert!(table.is_active(0));
    assert!(!table.is_active(1));
    assert_eq!(table.nr_cpus(), 2);
    assert_eq!(table.stats().len(), 1);
}

#[test]
fn test_table_size_limits() {
    let config = SchedConfig::default();
    let err = SchedTable::new(MockPlatform::new(), config, 0).err();
    assert_eq!(err, Some(SchedError::TooManyCpus(0)));

    let err = SchedTable::new(MockPlatform::new(), config, MAX_CPUS + 1).err();
    assert_eq!(err, Some(SchedError::TooManyCpus(MAX_CPUS + 1)));

    assert!(SchedTable::new(MockPlatform::new(), config, MAX_CPUS).is_ok());
}

#[test]
fn test_table_rejects_invalid_config() {
    let mut config = SchedConfig::default();
    config.minimal_granularity = 0;
    let err = SchedTable::new(MockPlatform::new(), config, 1).err();
    assert!(matches!(err, Some(SchedError::InvalidConfig(_))));
}

#[test]
#[should_panic(expected = "before bring-up")]
fn test_entry_before_bring_up_panics() {
    let table = mock::table(2);
    mock::bring_up(table, 0);
    table.platform().set_cpu(1);
    table.on_tick();
}

#[test]
fn test_custom_config_reaches_cores() {
    let config = SchedConfig::default().parse_cmdline("sched.timeslice_us=3000");
    let table = mock::table_with_config(1, config);
    mock::bring_up(table, 0);
    let t = mock::spawn(table, "t", 20);
    table.activate(&t);

    assert_eq!(t.sched_object().entity().time_slice, 3_000_000);
    assert_eq!(table.get(0).unwrap().expected_runtime(), 3_000_000);
    assert_eq!(table.platform().armed_timer(0), Some(3_000_000));
}
