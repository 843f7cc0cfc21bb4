//! Signal dispositions of the control process.
//!
//! Dispositions are plain data ([`Disposition`]) recorded in a
//! [`SignalPolicy`] and applied through one dispatch point,
//! [`SignalPolicy::install`]. "Catch" is not arbitrary user code: it always
//! reports the signal number on standard error and exits with that number.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd;
use std::collections::BTreeMap;
use std::ffi::c_int;
use tracing::debug;

/// Reaction of the control process to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Catch,
    Ignore,
    Default,
}

impl Disposition {
    /// Option name that installs this disposition.
    pub fn option(self) -> &'static str {
        match self {
            Disposition::Catch => "catch",
            Disposition::Ignore => "ignore",
            Disposition::Default => "default",
        }
    }

    fn handler(self) -> SigHandler {
        match self {
            Disposition::Catch => SigHandler::Handler(report_and_exit),
            Disposition::Ignore => SigHandler::SigIgn,
            Disposition::Default => SigHandler::SigDfl,
        }
    }

    fn raw_handler(self) -> libc::sighandler_t {
        match self {
            Disposition::Catch => report_and_exit as extern "C" fn(c_int) as libc::sighandler_t,
            Disposition::Ignore => libc::SIG_IGN,
            Disposition::Default => libc::SIG_DFL,
        }
    }
}

/// Dispositions installed so far, by signal number.
#[derive(Debug, Default)]
pub struct SignalPolicy {
    installed: BTreeMap<i32, Disposition>,
}

impl SignalPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put SIGPIPE and SIGSEGV back to the OS defaults.
    ///
    /// The Rust runtime ignores SIGPIPE and hooks SIGSEGV before `main`.
    /// Children would inherit the ignored SIGPIPE across exec, and a raised
    /// SIGSEGV would be swallowed by the stack-overflow hook.
    pub fn restore_runtime_defaults() -> Result<()> {
        for signal in [Signal::SIGPIPE, Signal::SIGSEGV] {
            apply(signal as i32, Disposition::Default, "default")?;
        }
        Ok(())
    }

    /// Install `disposition` for signal number `signo`.
    pub fn install(&mut self, signo: i32, disposition: Disposition) -> Result<()> {
        apply(signo, disposition, disposition.option())?;
        debug!(signo, ?disposition, "signal disposition installed");
        self.installed.insert(signo, disposition);
        Ok(())
    }

    /// Disposition installed for `signo` by this policy, if any.
    pub fn disposition(&self, signo: i32) -> Option<Disposition> {
        self.installed.get(&signo).copied()
    }
}

fn apply(signo: i32, disposition: Disposition, option: &'static str) -> Result<()> {
    let Ok(signal) = Signal::try_from(signo) else {
        // realtime signals have no `Signal` variant
        return apply_raw(signo, disposition, option);
    };
    let action = SigAction::new(disposition.handler(), SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: the only handler ever installed is `report_and_exit`, which
    // restricts itself to async-signal-safe calls.
    unsafe { signal::sigaction(signal, &action) }
        .map(drop)
        .map_err(|source| Error::SignalAction {
            option,
            signo,
            source,
        })
}

fn apply_raw(signo: i32, disposition: Disposition, option: &'static str) -> Result<()> {
    // SAFETY: an all-zero `sigaction` is a valid value; the handler is the
    // same async-signal-safe `report_and_exit` as above.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = disposition.raw_handler();
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signo, &action, std::ptr::null_mut())
    };
    match Errno::result(rc) {
        Ok(_) => Ok(()),
        Err(Errno::EINVAL) => Err(Error::InvalidSignal { option, signo }),
        Err(source) => Err(Error::SignalAction {
            option,
            signo,
            source,
        }),
    }
}

/// Raise SIGSEGV on the calling process.
pub fn abort() {
    debug!("raising SIGSEGV on self");
    let _ = signal::raise(Signal::SIGSEGV);
}

/// Suspend the calling process until a signal is delivered.
pub fn pause() {
    debug!("pausing until a signal arrives");
    unistd::pause();
}

/// Terminate the calling process with signal `signo`, using its default
/// action. Any signal number the kernel knows works, realtime ones included.
///
/// Falls back to exiting with `128 + signo` if the signal does not end the
/// process (e.g. its default action is to ignore it).
pub fn die_by(signo: i32) -> ! {
    let _ = apply(signo, Disposition::Default, "default");
    // SAFETY: raise has no memory-safety preconditions.
    unsafe { libc::raise(signo) };
    std::process::exit(128 + signo)
}

extern "C" fn report_and_exit(signum: c_int) {
    let mut buf = [0u8; 32];
    let len = format_caught(signum, &mut buf);
    let _ = unistd::write(std::io::stderr(), &buf[..len]);
    // SAFETY: _exit is async-signal-safe and skips Rust destructors and
    // atexit handlers, which must not run inside a signal handler.
    unsafe { libc::_exit(signum) }
}

/// Render `"<signum> caught\n"` into `buf` without allocating.
fn format_caught(signum: c_int, buf: &mut [u8; 32]) -> usize {
    let mut digits = [0u8; 12];
    let mut n = signum.unsigned_abs();
    let mut count = 0;
    loop {
        digits[count] = b'0' + (n % 10) as u8;
        count += 1;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    let mut len = 0;
    if signum < 0 {
        buf[len] = b'-';
        len += 1;
    }
    for &d in digits[..count].iter().rev() {
        buf[len] = d;
        len += 1;
    }
    for &b in b" caught\n" {
        buf[len] = b;
        len += 1;
    }
    len
}
