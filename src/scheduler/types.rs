//! Scheduler type definitions
//!
//! This module contains the scalar types, the priority-to-weight table and
//! the virtual time conversion shared by every scheduler component.

/// Processor core index
pub type CpuNum = usize;

/// Maximum number of cores a `CpuMask` can describe
pub const MAX_CPUS: usize = 256;

/// Time in nanoseconds. Signed so that clock skew shows up as a negative delta.
pub type SchedTime = i64;

/// A deadline that is never reached
pub const INFINITE_TIME: SchedTime = SchedTime::MAX;

/// Fixed-point fairness share
pub type SchedWeight = u64;

/// Identity of an address space, compared to decide whether a switch is needed
pub type AspaceId = usize;

/// Number of scheduling priorities
pub const NUM_PRIORITIES: usize = 32;

/// Priority to weight mapping. Each step is roughly a 1.22x increase in share.
pub const PRIORITY_TO_WEIGHT: [SchedWeight; NUM_PRIORITIES] = [
    121, 149, 182, 223, 273, 335, 410, 503, // 0 - 7
    616, 754, 924, 1132, 1386, 1698, 2080, 2549, // 8 - 15
    3122, 3825, 4685, 5739, 7030, 8612, 10550, 12924, // 16 - 23
    15832, 19394, 23757, 29103, 35651, 43672, 53499, 65536, // 24 - 31
];

/// Smallest weight in the table (priority 0)
pub const MIN_WEIGHT: SchedWeight = PRIORITY_TO_WEIGHT[0];

/// Weight for a priority, clamped to the table
#[inline]
pub const fn weight_for_priority(prio: usize) -> SchedWeight {
    let idx = if prio >= NUM_PRIORITIES { NUM_PRIORITIES - 1 } else { prio };
    PRIORITY_TO_WEIGHT[idx]
}

/// Convert a physical duration into virtual time for an entity of `weight`.
///
/// Virtual time flows inversely to weight and `MIN_WEIGHT` is the unit rate:
/// `virtual = duration * MIN_WEIGHT / weight`. Integer only; the result is
/// floored and saturates at the `SchedTime` range.
#[inline]
pub fn cast_to_virtual(duration: SchedTime, weight: SchedWeight) -> SchedTime {
    if weight == MIN_WEIGHT || weight == 0 {
        return duration;
    }
    let scaled = (duration as i128 * MIN_WEIGHT as i128).div_euclid(weight as i128);
    clamp_time(scaled)
}

#[inline]
pub(crate) fn clamp_time(value: i128) -> SchedTime {
    if value > SchedTime::MAX as i128 {
        SchedTime::MAX
    } else if value < SchedTime::MIN as i128 {
        SchedTime::MIN
    } else {
        value as SchedTime
    }
}

/// Which discipline owns an entity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedDiscipline {
    /// EEVDF fair scheduling
    Fair,
}

impl SchedDiscipline {
    /// Every discipline, in the order the main scheduler consults them
    pub const ALL: [SchedDiscipline; 1] = [SchedDiscipline::Fair];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            SchedDiscipline::Fair => 0,
        }
    }
}

/// Scheduling profile handed to `init_thread`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BaseProfile {
    pub weight: SchedWeight,
    pub discipline: SchedDiscipline,
}

impl BaseProfile {
    /// Fair profile at `prio` (clamped to the weight table)
    pub const fn from_priority(prio: usize) -> Self {
        Self {
            weight: weight_for_priority(prio),
            discipline: SchedDiscipline::Fair,
        }
    }

    /// Fair profile with an explicit weight; zero is raised to one
    pub const fn with_weight(weight: SchedWeight) -> Self {
        Self {
            weight: if weight == 0 { 1 } else { weight },
            discipline: SchedDiscipline::Fair,
        }
    }
}

impl Default for BaseProfile {
    fn default() -> Self {
        Self::from_priority(crate::config::DEFAULT_PRIORITY)
    }
}

/// Lifecycle state of a schedulable unit as far as the scheduler cares
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Created, never activated
    Initial,
    /// Runnable, waiting in a run queue
    Ready,
    /// Executing on a core
    Running,
    /// Waiting on an event
    Blocking,
    /// Waiting on a timeout
    Sleeping,
    /// Finished; never scheduled again
    Terminated,
}

impl ThreadState {
    /// Whether a thread in this state may keep its core at reschedule
    #[inline]
    pub const fn is_runnable(self) -> bool {
        !matches!(
            self,
            ThreadState::Blocking | ThreadState::Sleeping | ThreadState::Terminated
        )
    }
}
