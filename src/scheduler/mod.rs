//! Scheduler subsystem
//!
//! Per-core EEVDF (Earliest Eligible Virtual Deadline First) scheduling.
//!
//! ## EEVDF Key Features:
//! - **Virtual Runtime (vruntime)**: Per-entity clock flowing inversely to weight
//! - **Virtual Deadline**: vruntime plus the requested slice in virtual time
//! - **Lag**: deadline - vruntime; negative once an entity over-consumed
//! - **Eligibility**: Only entities at or behind the weighted average may be picked
//!
//! ## Per-CPU Architecture
//!
//! Every CPU owns a `MainScheduler` with its own lock, its own run queue and
//! its own virtual timeline. There is no global scheduler lock:
//! - Units are placed on their recent CPU, or the least loaded allowed one
//! - Placement on a remote CPU is announced with a reschedule IPI
//! - An idle CPU may steal queued work from the busiest CPU (feature `smp`)
//!
//! ## Module Organization
//!
//! - `types`: Scalar types, weight table, virtual time conversion
//! - `cpumask`: CPU bitmaps (plain and atomic)
//! - `entity`: SchedEntity, PreemptionState, SchedObject
//! - `common`: Per-core data shared by the disciplines
//! - `fair`: EEVDF run queue
//! - `discipline`: Closed set of disciplines and their dispatch
//! - `main_scheduler`: Per-core orchestration (activate, tick, reschedule)
//! - `percpu`: Table of per-core schedulers and bring-up
//! - `platform`: Thread and hardware interfaces the kernel implements
//! - `stats`: Per-core counters

mod common;
mod cpumask;
mod discipline;
mod entity;
mod fair;
mod main_scheduler;
mod percpu;
pub mod platform;
mod stats;
mod types;

pub use common::SchedCommonData;
pub use cpumask::{AtomicCpuMask, CpuMask};
pub use discipline::Discipline;
pub use entity::{PreemptionGuard, PreemptionState, SchedEntity, SchedObject};
pub use fair::{FairScheduler, RunQueueKey, TickResult};
pub use main_scheduler::{MainScheduler, ThreadRef};
pub use percpu::SchedTable;
pub use platform::{IpiReason, IrqGuard, Platform, SchedThread};
pub use stats::{SchedStats, SchedStatsSnapshot};
pub use types::{
    cast_to_virtual, weight_for_priority, AspaceId, BaseProfile, CpuNum, SchedDiscipline,
    SchedTime, SchedWeight, ThreadState, INFINITE_TIME, MAX_CPUS, MIN_WEIGHT, NUM_PRIORITIES,
    PRIORITY_TO_WEIGHT,
};
