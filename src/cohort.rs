use crate::launcher::{ChildRecord, Invocation};
use nix::errno::Errno;
use nix::libc;
use nix::unistd::Pid;
use std::ffi::c_int;
use std::fmt;
use tracing::{debug, warn};

/// How a child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exited(i32),
    Signaled(i32),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Exited(code) => write!(f, "exit {code}"),
            Outcome::Signaled(signo) => write!(f, "signal {signo}"),
        }
    }
}

/// A reaped child: what was run and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub invocation: Invocation,
    pub outcome: Outcome,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.outcome, self.invocation)
    }
}

/// Children launched since the last drain.
#[derive(Debug, Default)]
pub struct Cohort {
    members: Vec<ChildRecord>,
}

impl Cohort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ChildRecord) {
        self.members.push(record);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Block until every member has terminated, then clear the cohort.
    ///
    /// `on_termination` is called once per member, in the order the children
    /// terminate. A failing wait (e.g. no children left) ends the drain early.
    pub fn drain(&mut self, mut on_termination: impl FnMut(&Termination)) -> Vec<Termination> {
        let mut reaped = Vec::with_capacity(self.members.len());
        while reaped.len() < self.members.len() {
            let (pid, outcome) = match wait_any() {
                Ok((pid, Some(outcome))) => (pid, outcome),
                Ok((pid, None)) => {
                    debug!(pid = pid.as_raw(), "ignoring non-terminal wait status");
                    continue;
                }
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    warn!(%errno, remaining = self.members.len() - reaped.len(), "wait failed");
                    break;
                }
            };
            let Some(record) = self.members.iter().find(|r| r.pid == pid) else {
                warn!(pid = pid.as_raw(), "reaped a child that is not in the cohort");
                continue;
            };
            debug!(pid = pid.as_raw(), ?outcome, "reaped");
            let termination = Termination {
                invocation: record.invocation.clone(),
                outcome,
            };
            on_termination(&termination);
            reaped.push(termination);
        }
        self.members.clear();
        reaped
    }
}

/// Wait for any child and decode its status.
///
/// The status is read by raw number: `nix`'s `WaitStatus` cannot represent
/// deaths by realtime signals.
fn wait_any() -> nix::Result<(Pid, Option<Outcome>)> {
    let mut status: c_int = 0;
    // SAFETY: `status` is a valid location for the kernel to write into.
    let pid = Errno::result(unsafe { libc::wait(&mut status) })?;
    let outcome = if libc::WIFEXITED(status) {
        Some(Outcome::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Some(Outcome::Signaled(libc::WTERMSIG(status)))
    } else {
        None
    };
    Ok((Pid::from_raw(pid), outcome))
}
