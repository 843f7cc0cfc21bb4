//! A small process-orchestration engine.
//!
//! A run is a sequence of directives: open files and pipes into a descriptor
//! table, launch children with three of those descriptors bound to their
//! standard input, output and error, wait for the batch of children launched
//! so far, and tune how the control process reacts to signals. The outcomes
//! of all waited children are reduced into the way the control process
//! itself ends: the highest signal any child died from, else the highest
//! exit code, else 1 if any directive failed, else 0.
//!
//! The main entry point is [`Interpreter`], which owns all run state and
//! executes [`Directive`]s in order. [`parser::parse`] turns a command line
//! such as `--rdonly in --pipe --command 0 2 2 cat --wait` into that stream.

pub mod aggregate;
pub mod cohort;
pub mod descriptor;
pub mod directive;
pub mod error;
pub mod interpreter;
pub mod launcher;
pub mod parser;
pub mod profile;
pub mod signal;

pub use directive::Directive;
pub use error::Error;
/// Just a convenient re-export of the directive runner.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;
