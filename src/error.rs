//! Scheduler bring-up errors
//!
//! Only bring-up can fail recoverably from the caller's point of view. Hot
//! paths either absorb the condition (idle fallback, clock skew) or treat it
//! as a fatal invariant violation.

use core::fmt;

use crate::scheduler::CpuNum;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedError {
    /// The per-core discipline table could not be allocated
    DisciplineTableAlloc { cpu: CpuNum },
    /// A core number beyond the table was passed in
    CpuOutOfRange { cpu: CpuNum, nr_cpus: usize },
    /// `bring_up` was called twice for the same core
    AlreadyBroughtUp(CpuNum),
    /// The table was sized for more cores than a `CpuMask` can describe
    TooManyCpus(usize),
    /// The configuration has a zero granularity or period
    InvalidConfig(&'static str),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::DisciplineTableAlloc { cpu } => {
                write!(f, "cpu {}: failed to allocate discipline table", cpu)
            }
            SchedError::CpuOutOfRange { cpu, nr_cpus } => {
                write!(f, "cpu {} out of range (nr_cpus={})", cpu, nr_cpus)
            }
            SchedError::AlreadyBroughtUp(cpu) => write!(f, "cpu {}: scheduler already up", cpu),
            SchedError::TooManyCpus(n) => write!(f, "{} cpus exceeds the cpu mask capacity", n),
            SchedError::InvalidConfig(why) => write!(f, "invalid scheduler config: {}", why),
        }
    }
}
