use anyhow::{Context, Result};
use cohort::Interpreter;
use cohort::parser;
use cohort::signal::SignalPolicy;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .compact()
        .init();

    SignalPolicy::restore_runtime_defaults().context("restoring default signal handlers")?;

    let mut interpreter = Interpreter::new();
    interpreter.run(parser::parse(std::env::args_os().skip(1)));

    let exit = interpreter.exit();
    // release every descriptor still open before leaving
    drop(interpreter);
    exit.terminate()
}
