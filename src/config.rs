//! Scheduler tunables
//!
//! Defaults match the values the kernel has always shipped with; the boot
//! cmdline can override them with `sched.*=` tokens.

use crate::error::SchedError;
use crate::scheduler::SchedTime;

pub const NSEC_PER_USEC: SchedTime = 1_000;
pub const NSEC_PER_MSEC: SchedTime = 1_000_000;

/// Default minimal granularity: 1 ms
pub const DEFAULT_MINIMAL_GRANULARITY: SchedTime = NSEC_PER_MSEC;
/// Default targeted latency: 8 ms
pub const DEFAULT_TARGETED_LATENCY: SchedTime = 8 * NSEC_PER_MSEC;
/// Scheduling period expressed in minimal granularities
pub const DEFAULT_SCHEDULING_PERIOD_GRANS: u32 =
    (DEFAULT_TARGETED_LATENCY / DEFAULT_MINIMAL_GRANULARITY) as u32;
/// Priority handed out when a profile does not name one
pub const DEFAULT_PRIORITY: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedConfig {
    /// Smallest slice a runnable entity is promised (ns)
    pub minimal_granularity: SchedTime,
    /// Latency target for the whole run queue (ns); sets the period length
    pub targeted_latency: SchedTime,
    /// scheduling_period = scheduling_period_grans * minimal_granularity.
    /// Defaults to `targeted_latency / minimal_granularity`.
    pub scheduling_period_grans: u32,
    /// Physical slice requested by newly initialized entities (ns)
    pub default_time_slice: SchedTime,
    /// Priority used by `BaseProfile::default()`
    pub default_priority: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedConfig {
    pub const fn new() -> Self {
        Self {
            minimal_granularity: DEFAULT_MINIMAL_GRANULARITY,
            targeted_latency: DEFAULT_TARGETED_LATENCY,
            scheduling_period_grans: DEFAULT_SCHEDULING_PERIOD_GRANS,
            default_time_slice: DEFAULT_MINIMAL_GRANULARITY,
            default_priority: DEFAULT_PRIORITY,
        }
    }

    #[inline]
    pub const fn scheduling_period(&self) -> SchedTime {
        self.minimal_granularity * self.scheduling_period_grans as SchedTime
    }

    /// Whole granularities that fit in the targeted latency, at least one
    pub fn latency_grans(&self) -> u32 {
        if self.minimal_granularity <= 0 {
            return 1;
        }
        (self.targeted_latency / self.minimal_granularity).clamp(1, u32::MAX as SchedTime) as u32
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        if self.minimal_granularity <= 0 {
            return Err(SchedError::InvalidConfig("minimal granularity must be positive"));
        }
        if self.targeted_latency < self.minimal_granularity {
            return Err(SchedError::InvalidConfig("targeted latency below minimal granularity"));
        }
        if self.scheduling_period_grans == 0 {
            return Err(SchedError::InvalidConfig("scheduling period must span a granularity"));
        }
        if self.default_time_slice <= 0 {
            return Err(SchedError::InvalidConfig("default time slice must be positive"));
        }
        Ok(())
    }

    /// Apply `sched.*` overrides from a kernel command line.
    ///
    /// Unknown `sched.` keys and unparsable values are reported and skipped.
    /// Zero values are raised to one unit. Changing the latency or the
    /// granularity re-derives the period from them unless `period_grans` is
    /// given too.
    pub fn parse_cmdline(mut self, cmdline: &str) -> Self {
        let mut rederive = false;
        let mut explicit_grans = false;
        for arg in cmdline.split_whitespace() {
            let Some(rest) = arg.strip_prefix("sched.") else {
                continue;
            };
            let Some((key, value)) = rest.split_once('=') else {
                crate::kwarn!("sched config: ignoring '{}' (no value)", arg);
                continue;
            };
            let Ok(number) = value.parse::<u64>() else {
                crate::kwarn!("sched config: ignoring '{}' (not a number)", arg);
                continue;
            };
            let number = number.max(1);

            match key {
                "granularity_us" => {
                    self.minimal_granularity = usecs(number);
                    rederive = true;
                    crate::kinfo!("sched config: granularity={}ns", self.minimal_granularity);
                }
                "latency_us" => {
                    self.targeted_latency = usecs(number);
                    rederive = true;
                    crate::kinfo!("sched config: latency={}ns", self.targeted_latency);
                }
                "period_grans" => {
                    self.scheduling_period_grans = number.min(u32::MAX as u64) as u32;
                    explicit_grans = true;
                    crate::kinfo!("sched config: period_grans={}", self.scheduling_period_grans);
                }
                "timeslice_us" => {
                    self.default_time_slice = usecs(number);
                    crate::kinfo!("sched config: timeslice={}ns", self.default_time_slice);
                }
                _ => crate::kwarn!("sched config: unknown key '{}'", key),
            }
        }

        if self.targeted_latency < self.minimal_granularity {
            crate::kwarn!(
                "sched config: latency {}ns below granularity, raised",
                self.targeted_latency
            );
            self.targeted_latency = self.minimal_granularity;
        }
        if rederive && !explicit_grans {
            self.scheduling_period_grans = self.latency_grans();
            crate::kinfo!("sched config: period_grans={}", self.scheduling_period_grans);
        }
        self
    }
}

#[inline]
fn usecs(us: u64) -> SchedTime {
    (us.min((SchedTime::MAX / NSEC_PER_USEC) as u64) as SchedTime) * NSEC_PER_USEC
}
