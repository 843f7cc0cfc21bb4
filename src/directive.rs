use crate::descriptor::{AccessMode, Modifier};
use crate::error::{Error, Result};
use crate::signal::Disposition;
use argh::{EarlyExit, FromArgs};
use std::fmt;
use std::path::PathBuf;

/// One step of the directive stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Open a file and append it to the descriptor table.
    Open { access: AccessMode, path: PathBuf },
    /// Enable a flag for the next open.
    Modifier(Modifier),
    /// Create a pipe: two new entries, read end first.
    Pipe,
    Close { index: usize },
    /// Launch a child. Tokens are validated when the directive runs, since
    /// validity depends on the descriptor table at that moment.
    Command { tokens: Vec<String> },
    /// Wait for every child launched since the previous wait.
    Wait,
    Signal { disposition: Disposition, signo: i32 },
    Abort,
    Pause,
    Verbose,
    Profile,
}

impl Directive {
    /// Option name of this directive, without the leading dashes.
    pub fn name(&self) -> &'static str {
        match self {
            Directive::Open { access, .. } => access.option(),
            Directive::Modifier(m) => m.option(),
            Directive::Pipe => "pipe",
            Directive::Close { .. } => "close",
            Directive::Command { .. } => "command",
            Directive::Wait => "wait",
            Directive::Signal { disposition, .. } => disposition.option(),
            Directive::Abort => "abort",
            Directive::Pause => "pause",
            Directive::Verbose => "verbose",
            Directive::Profile => "profile",
        }
    }

    /// Decode the directive named `name` from its argument tokens.
    pub fn decode(name: &str, args: &[&str]) -> Result<Self> {
        if let Some(modifier) = Modifier::from_option(name) {
            parse_args::<NoArgs>(modifier.option(), args)?;
            return Ok(Directive::Modifier(modifier));
        }
        let directive = match name {
            "rdonly" => Self::open(AccessMode::ReadOnly, args)?,
            "wronly" => Self::open(AccessMode::WriteOnly, args)?,
            "rdwr" => Self::open(AccessMode::ReadWrite, args)?,
            "close" => Directive::Close {
                index: parse_args::<IndexArg>("close", args)?.index,
            },
            "command" => Directive::Command {
                tokens: args.iter().map(|s| s.to_string()).collect(),
            },
            "catch" => Self::signal(Disposition::Catch, args)?,
            "ignore" => Self::signal(Disposition::Ignore, args)?,
            "default" => Self::signal(Disposition::Default, args)?,
            "pipe" | "wait" | "abort" | "pause" | "verbose" | "profile" => {
                parse_args::<NoArgs>(name, args)?;
                match name {
                    "pipe" => Directive::Pipe,
                    "wait" => Directive::Wait,
                    "abort" => Directive::Abort,
                    "pause" => Directive::Pause,
                    "verbose" => Directive::Verbose,
                    _ => Directive::Profile,
                }
            }
            _ => return Err(Error::UnknownOption(format!("--{name}"))),
        };
        Ok(directive)
    }

    fn open(access: AccessMode, args: &[&str]) -> Result<Self> {
        let PathArg { path } = parse_args(access.option(), args)?;
        Ok(Directive::Open { access, path })
    }

    fn signal(disposition: Disposition, args: &[&str]) -> Result<Self> {
        let SignalArg { signo } = parse_args(disposition.option(), args)?;
        Ok(Directive::Signal { disposition, signo })
    }
}

impl fmt::Display for Directive {
    /// Canonical command-line form, as echoed by `--verbose`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--{}", self.name())?;
        match self {
            Directive::Open { path, .. } => write!(f, " {}", path.display()),
            Directive::Close { index } => write!(f, " {index}"),
            Directive::Command { tokens } => tokens.iter().try_for_each(|t| write!(f, " {t}")),
            Directive::Signal { signo, .. } => write!(f, " {signo}"),
            _ => Ok(()),
        }
    }
}

/// Decode the arguments of one directive into its argh shape.
///
/// Arguments are passed after `--`, so a file called `help` or `-out` is a
/// path and not an argh switch.
fn parse_args<T: FromArgs>(name: &str, args: &[&str]) -> Result<T> {
    let positional: Vec<&str> = std::iter::once("--").chain(args.iter().copied()).collect();
    T::from_args(&[name], &positional).map_err(|EarlyExit { output, .. }| Error::Usage {
        option: name.to_string(),
        message: output.lines().next().unwrap_or_default().trim().to_string(),
    })
}

#[derive(FromArgs)]
/// Open a file.
struct PathArg {
    #[argh(positional)]
    /// path of the file to open.
    path: PathBuf,
}

#[derive(FromArgs)]
/// Close a descriptor.
struct IndexArg {
    #[argh(positional)]
    /// index of the descriptor in the table.
    index: usize,
}

#[derive(FromArgs)]
/// Change how a signal is handled.
struct SignalArg {
    #[argh(positional)]
    /// signal number.
    signo: i32,
}

#[derive(FromArgs)]
/// A directive without arguments.
struct NoArgs {}
