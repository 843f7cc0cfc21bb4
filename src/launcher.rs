use crate::descriptor::DescriptorTable;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, fcntl};
use nix::libc;
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::fmt;
use std::os::fd::RawFd;
use tracing::debug;

/// Exit status of a child whose program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit status of a child whose program was found but could not be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Program name plus its arguments, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A validated `--command`: three open descriptor indices plus an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub stdio: [usize; 3],
    pub invocation: Invocation,
}

impl LaunchRequest {
    /// Validate raw `--command` tokens against the current table.
    ///
    /// Only the three descriptor tokens are bounds-checked. Every problem is
    /// returned, so that each one can be reported.
    pub fn validate(tokens: &[String], table: &DescriptorTable) -> std::result::Result<Self, Vec<Error>> {
        let mut errors = Vec::new();
        let mut stdio = [0usize; 3];
        for (slot, token) in stdio.iter_mut().zip(tokens) {
            match token.parse::<usize>() {
                Err(_) => errors.push(Error::NotAnIndex {
                    token: token.clone(),
                }),
                Ok(index) if index >= table.len() => errors.push(Error::OutOfRange {
                    option: "command",
                    index,
                    count: table.len(),
                }),
                Ok(index) if !table.is_open(index) => {
                    errors.push(Error::DescriptorClosed { index })
                }
                Ok(index) => *slot = index,
            }
        }
        if tokens.len() < 4 {
            errors.push(Error::TooFewArguments);
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self {
            stdio,
            invocation: Invocation {
                program: tokens[3].clone(),
                args: tokens[4..].to_vec(),
            },
        })
    }
}

/// A child that has been forked and not yet reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRecord {
    pub pid: Pid,
    pub invocation: Invocation,
}

/// Everything the child needs, prepared before fork so that the child
/// performs no allocation.
struct ChildPlan {
    stdio: [RawFd; 3],
    close: Vec<RawFd>,
    program: CString,
    argv: Vec<CString>,
    failure_prefix: Vec<u8>,
}

impl ChildPlan {
    fn new(request: &LaunchRequest, table: &DescriptorTable) -> Result<Self> {
        let mut stdio = [0; 3];
        for (raw, &index) in stdio.iter_mut().zip(&request.stdio) {
            *raw = table.raw(index).ok_or(Error::DescriptorClosed { index })?;
        }
        let inv = &request.invocation;
        let argv = std::iter::once(&inv.program)
            .chain(&inv.args)
            .map(|arg| c_string(arg))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            stdio,
            close: table.open_raw_fds(),
            program: c_string(&inv.program)?,
            argv,
            failure_prefix: format!("--command unable to run {}: ", inv.program).into_bytes(),
        })
    }

    /// Runs in the child. Never returns.
    fn exec(&self) -> ! {
        // a bound descriptor at 0..=2 would be clobbered by an earlier dup2
        let mut bound = self.stdio;
        for fd in bound.iter_mut().filter(|fd| **fd <= 2) {
            match fcntl(*fd, FcntlArg::F_DUPFD(3)) {
                Ok(moved) => *fd = moved,
                Err(errno) => self.fail(errno),
            }
        }
        for (target, &fd) in bound.iter().enumerate() {
            if let Err(errno) = unistd::dup2(fd, target as RawFd) {
                self.fail(errno);
            }
        }
        // 0, 1 and 2 were all rebound above
        for &fd in self.close.iter().chain(&bound).filter(|&&fd| fd > 2) {
            let _ = unistd::close(fd);
        }
        let errno = match unistd::execvp(&self.program, &self.argv) {
            Err(errno) => errno,
            Ok(never) => match never {},
        };
        self.fail(errno)
    }

    /// Report `errno` on the child's standard error and exit.
    fn fail(&self, errno: Errno) -> ! {
        let stderr = std::io::stderr();
        let _ = unistd::write(&stderr, &self.failure_prefix);
        let _ = unistd::write(&stderr, errno.desc().as_bytes());
        let _ = unistd::write(&stderr, b"\n");
        let code = match errno {
            Errno::ENOENT => EXIT_NOT_FOUND,
            _ => EXIT_NOT_EXECUTABLE,
        };
        // SAFETY: _exit is async-signal-safe and skips the parent's atexit
        // handlers and buffered output, which the forked child must not run.
        unsafe { libc::_exit(code) }
    }
}

fn c_string(arg: &str) -> Result<CString> {
    CString::new(arg).map_err(|_| Error::NulByte {
        token: arg.to_string(),
    })
}

/// Fork a child bound to the requested descriptors and exec the program in it.
///
/// In the child the three descriptors become 0, 1 and 2 and every other
/// descriptor in the table is closed. A child that fails to exec reports on
/// its own standard error and exits with [`EXIT_NOT_FOUND`] or
/// [`EXIT_NOT_EXECUTABLE`].
pub fn launch(request: LaunchRequest, table: &DescriptorTable) -> Result<ChildRecord> {
    let plan = ChildPlan::new(&request, table)?;
    // SAFETY: the child only calls fcntl, dup2, close, execvp, write and _exit on
    // data prepared above, all of which are async-signal-safe.
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => plan.exec(),
        Ok(ForkResult::Parent { child }) => {
            debug!(pid = child.as_raw(), invocation = %request.invocation, "launched");
            Ok(ChildRecord {
                pid: child,
                invocation: request.invocation,
            })
        }
        Err(errno) => Err(Error::Fork(errno)),
    }
}
