//! Diagnostics produced by directives.
//!
//! Every variant renders as the one-line message printed on standard error
//! when the directive that produced it fails. None of them stop the run: the
//! interpreter reports the error, raises the error flag and moves on.

use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A non-fatal failure of a single directive.
#[derive(Debug, Error)]
pub enum Error {
    #[error("--{option} unable to open file {}: {source}", .path.display())]
    Open {
        option: &'static str,
        path: PathBuf,
        #[source]
        source: Errno,
    },

    #[error("--pipe unable to create pipe: {0}")]
    Pipe(#[source] Errno),

    #[error("--close unable to close file descriptor {index}: {source}")]
    Close {
        index: usize,
        #[source]
        source: Errno,
    },

    #[error("--close file descriptor {index} is already closed")]
    AlreadyClosed { index: usize },

    #[error("--{option} file descriptor {index} must be less than {count}")]
    OutOfRange {
        option: &'static str,
        index: usize,
        count: usize,
    },

    #[error("--command invalid file descriptor index {token:?}")]
    NotAnIndex { token: String },

    #[error("--command file descriptor {index} is closed")]
    DescriptorClosed { index: usize },

    #[error("--command argument {token:?} contains a NUL byte")]
    NulByte { token: String },

    #[error("--command must have at least 4 arguments")]
    TooFewArguments,

    #[error("--command unable to fork: {0}")]
    Fork(#[source] Errno),

    #[error("--{option} invalid signal number {signo}")]
    InvalidSignal { option: &'static str, signo: i32 },

    #[error("--{option} unable to change disposition of signal {signo}: {source}")]
    SignalAction {
        option: &'static str,
        signo: i32,
        #[source]
        source: Errno,
    },

    #[error("--{option}: {message}")]
    Usage { option: String, message: String },

    #[error("invalid option: {0}")]
    UnknownOption(String),

    #[error("unexpected argument before any option: {0}")]
    StrayArgument(String),

    #[error("--{option} argument {token:?} is not valid UTF-8")]
    NotUnicode { option: String, token: String },

    #[error("unable to write output: {0}")]
    Output(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_names_option_path_and_cause() {
        let err = Error::Open {
            option: "rdonly",
            path: PathBuf::from("/no/such/file"),
            source: Errno::ENOENT,
        };
        let text = err.to_string();
        assert!(text.starts_with("--rdonly unable to open file /no/such/file: "));
        assert!(text.contains("No such file or directory"), "got {text}");
    }

    #[test]
    fn test_validation_messages_are_single_line() {
        let errors = [
            Error::TooFewArguments,
            Error::DescriptorClosed { index: 3 },
            Error::OutOfRange {
                option: "command",
                index: 7,
                count: 2,
            },
            Error::UnknownOption("--bogus".into()),
            Error::Output(io::ErrorKind::BrokenPipe.into()),
        ];
        for err in errors {
            assert!(!err.to_string().contains('\n'), "{err:?}");
        }
        assert_eq!(
            Error::OutOfRange {
                option: "command",
                index: 7,
                count: 2
            }
            .to_string(),
            "--command file descriptor 7 must be less than 2"
        );
    }
}
