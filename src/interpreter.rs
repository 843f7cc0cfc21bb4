use crate::aggregate::{Aggregate, Exit};
use crate::cohort::Cohort;
use crate::descriptor::DescriptorTable;
use crate::directive::Directive;
use crate::error::{Error, Result};
use crate::launcher::{self, LaunchRequest};
use crate::profile::CpuTimes;
use crate::signal::{self, SignalPolicy};
use std::fmt;
use std::io::{self, Write};
use tracing::trace;

/// Switches turned on by `--verbose` and `--profile`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Echo each directive before running it.
    pub verbose: bool,
    /// Report CPU time per directive and per wait.
    pub profile: bool,
}

/// Executes a directive stream.
///
/// The interpreter owns all run state: the descriptor table, the current
/// cohort, the aggregate of child outcomes and the signal policy. Outcome,
/// echo and profile lines go to `out`; diagnostics go to `err`.
///
/// Example
/// ```no_run
/// use cohort::{Interpreter, parser};
/// let mut sh = Interpreter::new();
/// sh.run(parser::parse(["--rdonly", "/dev/null", "--command", "0", "0", "0", "true", "--wait"]));
/// sh.exit().terminate();
/// ```
pub struct Interpreter<O = io::Stdout, E = io::Stderr> {
    table: DescriptorTable,
    cohort: Cohort,
    aggregate: Aggregate,
    signals: SignalPolicy,
    options: Options,
    out: O,
    err: E,
}

impl Interpreter {
    /// Interpreter writing to the process's standard output and error.
    pub fn new() -> Self {
        Self::with_output(io::stdout(), io::stderr())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Write, E: Write> Interpreter<O, E> {
    pub fn with_output(out: O, err: E) -> Self {
        Self {
            table: DescriptorTable::new(),
            cohort: Cohort::new(),
            aggregate: Aggregate::new(),
            signals: SignalPolicy::new(),
            options: Options::default(),
            out,
            err,
        }
    }

    /// Execute every directive in order.
    ///
    /// Failures are reported on `err` and recorded, never returned. A failed
    /// write to `out` is one of them: the remaining directives still run.
    pub fn run<I>(&mut self, directives: I)
    where
        I: IntoIterator<Item = Result<Directive>>,
    {
        for directive in directives {
            self.execute(directive);
        }
    }

    pub fn execute(&mut self, directive: Result<Directive>) {
        let directive = match directive {
            Ok(directive) => directive,
            Err(e) => return self.report(e),
        };
        trace!(%directive, "executing");
        if self.options.verbose && directive != Directive::Verbose {
            self.emit(&directive);
        }
        let name = directive.name();
        let started = (self.options.profile && directive != Directive::Profile)
            .then(CpuTimes::of_self);

        self.dispatch(directive);

        if let Some(started) = started {
            let label = format!("--{name}");
            self.emit(CpuTimes::of_self().since(&started).report(&label));
        }
    }

    fn dispatch(&mut self, directive: Directive) {
        let result = match directive {
            Directive::Open { access, path } => self.table.open(&path, access).map(drop),
            Directive::Modifier(modifier) => {
                self.table.add_modifier(modifier);
                Ok(())
            }
            Directive::Pipe => self.table.pipe().map(drop),
            Directive::Close { index } => self.table.close(index),
            Directive::Command { tokens } => return self.command(&tokens),
            Directive::Wait => return self.wait(),
            Directive::Signal { disposition, signo } => self.signals.install(signo, disposition),
            Directive::Abort => {
                self.flush();
                signal::abort();
                Ok(())
            }
            Directive::Pause => {
                self.flush();
                signal::pause();
                Ok(())
            }
            Directive::Verbose => {
                self.options.verbose = true;
                Ok(())
            }
            Directive::Profile => {
                self.options.profile = true;
                Ok(())
            }
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    fn command(&mut self, tokens: &[String]) {
        let request = match LaunchRequest::validate(tokens, &self.table) {
            Ok(request) => request,
            Err(errors) => return errors.into_iter().for_each(|e| self.report(e)),
        };
        // buffered output would otherwise be duplicated into the child
        self.flush();
        match launcher::launch(request, &self.table) {
            Ok(record) => self.cohort.push(record),
            Err(e) => self.report(e),
        }
    }

    fn wait(&mut self) {
        let Self {
            cohort,
            aggregate,
            out,
            ..
        } = self;
        let mut written = Ok(());
        cohort.drain(|termination| {
            aggregate.record(termination.outcome);
            if written.is_ok() {
                written = writeln!(out, "{termination}").and_then(|()| out.flush());
            }
        });
        if let Err(e) = written {
            self.report(Error::Output(e));
        }
        if self.options.profile {
            self.emit(CpuTimes::of_children().report("children"));
        }
    }

    /// Write one line to `out`. A failed write is reported like a failed
    /// directive.
    fn emit(&mut self, line: impl fmt::Display) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            self.report(Error::Output(e));
        }
    }

    fn report(&mut self, error: Error) {
        trace!(?error, "directive failed");
        self.aggregate.flag_error();
        // a broken diagnostics stream leaves nowhere to report to
        let _ = writeln!(self.err, "{error}").and_then(|()| self.err.flush());
    }

    fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            self.report(Error::Output(e));
        }
        let _ = self.err.flush();
    }

    /// How the process should end, given everything run so far.
    pub fn exit(&self) -> Exit {
        self.aggregate.exit()
    }

    pub fn table(&self) -> &DescriptorTable {
        &self.table
    }

    pub fn cohort(&self) -> &Cohort {
        &self.cohort
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn signals(&self) -> &SignalPolicy {
        &self.signals
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn output(&self) -> &O {
        &self.out
    }

    pub fn diagnostics(&self) -> &E {
        &self.err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::tests::lock_children;
    use crate::parser::parse;
    use std::fs;

    type TestInterpreter = Interpreter<Vec<u8>, Vec<u8>>;

    fn run(args: &[&str]) -> TestInterpreter {
        let mut sh = Interpreter::with_output(Vec::new(), Vec::new());
        sh.run(parse(args.iter().copied()));
        sh
    }

    /// A sink whose every write fails, like a closed pipe.
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn stdout_of(sh: &TestInterpreter) -> String {
        String::from_utf8(sh.output().clone()).unwrap()
    }

    fn stderr_of(sh: &TestInterpreter) -> String {
        String::from_utf8(sh.diagnostics().clone()).unwrap()
    }

    #[test]
    fn test_cat_file_to_file() {
        let _lock = lock_children();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "hello\n").unwrap();

        let sh = run(&[
            "--rdonly",
            input.to_str().unwrap(),
            "--creat",
            "--trunc",
            "--wronly",
            output.to_str().unwrap(),
            "--command",
            "0",
            "1",
            "1",
            "cat",
            "--wait",
        ]);

        assert_eq!(stdout_of(&sh), "exit 0 cat\n");
        assert_eq!(stderr_of(&sh), "");
        assert_eq!(sh.exit(), Exit::Code(0));
        assert_eq!(fs::read_to_string(&output).unwrap(), "hello\n");
    }

    #[test]
    fn test_pipeline_through_pipe() {
        let _lock = lock_children();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "b\na\nc\n").unwrap();

        let sh = run(&[
            "--rdonly",
            input.to_str().unwrap(),
            "--pipe",
            "--creat",
            "--wronly",
            output.to_str().unwrap(),
            "--command",
            "0",
            "2",
            "3",
            "cat",
            "--command",
            "1",
            "3",
            "3",
            "sort",
            "--close",
            "1",
            "--close",
            "2",
            "--wait",
        ]);

        let mut lines: Vec<_> = stdout_of(&sh).lines().map(str::to_string).collect();
        lines.sort();
        assert_eq!(lines, vec!["exit 0 cat", "exit 0 sort"]);
        assert_eq!(fs::read_to_string(&output).unwrap(), "a\nb\nc\n");
        assert!(!sh.table().is_open(1) && !sh.table().is_open(2));
        assert_eq!(sh.exit(), Exit::Code(0));
    }

    #[test]
    fn test_missing_program_sets_exit_code() {
        let _lock = lock_children();
        let sh = run(&[
            "--rdwr",
            "/dev/null",
            "--command",
            "0",
            "0",
            "0",
            "no-such-program-for-cohort",
            "--wait",
        ]);
        assert_eq!(stdout_of(&sh), "exit 127 no-such-program-for-cohort\n");
        assert_eq!(sh.exit(), Exit::Code(127));
    }

    #[test]
    fn test_signal_death_wins() {
        let _lock = lock_children();
        let sh = run(&[
            "--rdwr",
            "/dev/null",
            "--command",
            "0",
            "0",
            "0",
            "sh",
            "-c",
            "exit 5",
            "--command",
            "0",
            "0",
            "0",
            "sh",
            "-c",
            "kill -KILL $$",
            "--wait",
        ]);
        assert_eq!(sh.aggregate().max_exit(), 5);
        assert_eq!(sh.exit(), Exit::Signal(9));
    }

    #[test]
    fn test_invalid_command_does_not_fork() {
        let sh = run(&["--rdonly", "/dev/null", "--command", "0", "1", "--wait"]);
        assert!(sh.cohort().is_empty());
        assert_eq!(stdout_of(&sh), "");
        let errors = stderr_of(&sh);
        assert!(errors.contains("--command file descriptor 1 must be less than 1"), "{errors}");
        assert!(errors.contains("--command must have at least 4 arguments"), "{errors}");
        assert_eq!(sh.exit(), Exit::Code(1));
    }

    #[test]
    fn test_closed_descriptor_is_rejected() {
        let sh = run(&["--rdonly", "/dev/null", "--close", "0", "--command", "0", "0", "0", "true"]);
        assert!(sh.cohort().is_empty());
        assert!(stderr_of(&sh).contains("--command file descriptor 0 is closed"));
        assert!(sh.aggregate().has_failed());
    }

    #[test]
    fn test_failed_open_keeps_index() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let sh = run(&["--rdonly", missing.to_str().unwrap(), "--rdonly", "/dev/null"]);
        assert_eq!(sh.table().len(), 2);
        assert!(!sh.table().is_open(0));
        assert!(sh.table().is_open(1));
        assert!(stderr_of(&sh).starts_with("--rdonly unable to open file "));
        assert_eq!(sh.exit(), Exit::Code(1));
    }

    #[test]
    fn test_double_close_is_benign() {
        let sh = run(&["--rdonly", "/dev/null", "--close", "0", "--close", "0"]);
        assert_eq!(
            stderr_of(&sh),
            "--close file descriptor 0 is already closed\n"
        );
        assert_eq!(sh.exit(), Exit::Code(1));
    }

    #[test]
    fn test_verbose_echoes_following_directives() {
        let sh = run(&["--pipe", "--verbose", "--rdonly", "/dev/null", "--close=0", "--wait"]);
        assert_eq!(stdout_of(&sh), "--rdonly /dev/null\n--close 0\n--wait\n");
        assert!(sh.options().verbose);
    }

    #[test]
    fn test_profile_reports_each_directive() {
        let sh = run(&["--profile", "--rdonly", "/dev/null", "--wait"]);
        let out = stdout_of(&sh);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3, "{out}");
        assert!(lines[0].starts_with("--rdonly   user: "));
        assert!(lines[1].starts_with("children   user: "));
        assert!(lines[2].starts_with("--wait   user: "));
        assert!(lines.iter().all(|l| l.contains(" sys: ") && l.contains(" total: ")));
    }

    #[test]
    fn test_decode_errors_are_reported_in_order() {
        let sh = run(&["--bogus", "--close", "x"]);
        let errors = stderr_of(&sh);
        let lines: Vec<&str> = errors.lines().collect();
        assert_eq!(lines.len(), 2, "{errors}");
        assert_eq!(lines[0], "invalid option: --bogus");
        assert!(lines[1].starts_with("--close: "));
        assert_eq!(sh.exit(), Exit::Code(1));
    }

    #[test]
    fn test_ignore_installs_policy() {
        let sh = run(&["--ignore", "12"]);
        assert_eq!(sh.signals().disposition(12), Some(crate::signal::Disposition::Ignore));
        assert!(!sh.aggregate().has_failed());
    }

    #[test]
    fn test_output_failure_does_not_stop_the_run() {
        let _lock = lock_children();
        let mut sh = Interpreter::with_output(Broken, Vec::new());
        sh.run(parse([
            "--verbose",
            "--rdwr",
            "/dev/null",
            "--command",
            "0",
            "0",
            "0",
            "sh",
            "-c",
            "exit 6",
            "--wait",
            "--close",
            "0",
        ]));

        assert!(sh.cohort().is_empty());
        assert!(!sh.table().is_open(0));
        assert_eq!(sh.aggregate().max_exit(), 6);
        assert!(sh.aggregate().has_failed());
        let errors = String::from_utf8(sh.diagnostics().clone()).unwrap();
        assert!(errors.starts_with("unable to write output: "), "{errors}");
        assert_eq!(sh.exit(), Exit::Code(6));
    }
}
