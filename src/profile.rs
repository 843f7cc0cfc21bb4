//! CPU time accounting for `--profile`.

use nix::sys::resource::{UsageWho, getrusage};
use nix::sys::time::TimeVal;
use std::fmt;
use std::time::Duration;

/// User and system CPU time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: Duration,
    pub system: Duration,
}

impl CpuTimes {
    /// CPU time consumed so far by the control process itself.
    pub fn of_self() -> Self {
        Self::of(UsageWho::RUSAGE_SELF)
    }

    /// CPU time of every child reaped so far.
    pub fn of_children() -> Self {
        Self::of(UsageWho::RUSAGE_CHILDREN)
    }

    fn of(who: UsageWho) -> Self {
        // getrusage only fails for an invalid `who`
        match getrusage(who) {
            Ok(usage) => Self {
                user: to_duration(usage.user_time()),
                system: to_duration(usage.system_time()),
            },
            Err(_) => Self::default(),
        }
    }

    /// Time spent between `earlier` and `self`.
    pub fn since(&self, earlier: &CpuTimes) -> CpuTimes {
        CpuTimes {
            user: self.user.saturating_sub(earlier.user),
            system: self.system.saturating_sub(earlier.system),
        }
    }

    pub fn total(&self) -> Duration {
        self.user + self.system
    }

    /// Format as a report line under `label`.
    pub fn report<'a>(&'a self, label: &'a str) -> Report<'a> {
        Report { label, times: self }
    }
}

fn to_duration(tv: TimeVal) -> Duration {
    let secs = u64::try_from(tv.tv_sec()).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec()).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(micros.into())
}

/// `<label>   user: <f> sys: <f> total: <f>`
pub struct Report<'a> {
    label: &'a str,
    times: &'a CpuTimes,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}   user: {:.6} sys: {:.6} total: {:.6}",
            self.label,
            self.times.user.as_secs_f64(),
            self.times.system.as_secs_f64(),
            self.times.total().as_secs_f64()
        )
    }
}
