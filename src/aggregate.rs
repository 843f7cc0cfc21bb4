use crate::cohort::Outcome;

/// How the control process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Die by this signal.
    Signal(i32),
    /// Exit with this status.
    Code(i32),
}

impl Exit {
    /// Leave the process accordingly.
    pub fn terminate(self) -> ! {
        match self {
            Exit::Signal(signo) => crate::signal::die_by(signo),
            Exit::Code(code) => std::process::exit(code),
        }
    }
}

/// Run-wide reduction of child outcomes and directive failures.
///
/// Both maxima only ever grow. The highest signal wins over the highest exit
/// code, which wins over the error flag.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Aggregate {
    max_signal: i32,
    max_exit: i32,
    failed: bool,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Exited(code) => self.max_exit = self.max_exit.max(code),
            Outcome::Signaled(signo) => self.max_signal = self.max_signal.max(signo),
        }
    }

    /// Note that a directive failed.
    pub fn flag_error(&mut self) {
        self.failed = true;
    }

    pub fn max_signal(&self) -> i32 {
        self.max_signal
    }

    pub fn max_exit(&self) -> i32 {
        self.max_exit
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn exit(&self) -> Exit {
        if self.max_signal != 0 {
            Exit::Signal(self.max_signal)
        } else if self.max_exit != 0 {
            Exit::Code(self.max_exit)
        } else {
            Exit::Code(i32::from(self.failed))
        }
    }
}
