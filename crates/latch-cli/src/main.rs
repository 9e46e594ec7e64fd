//! `latch` - run a command while holding a distributed lock.
//!
//! Exit status is the command's own status when the lock was acquired,
//! 2 when it could not be acquired within the wait budget and 130 when
//! acquisition was interrupted.
//!
//! The binary installs no metrics recorder, so lock counters are not
//! exported from the command line; applications embedding `latch-core`
//! install their own.

mod cli;
mod logging;
mod runner;

use std::process::ExitCode;

use clap::Parser;
use latch_core::Configuration;

use crate::cli::Cli;
use crate::logging::{LoggingConfig, init_logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match try_main(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("latch: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: &Cli) -> anyhow::Result<ExitCode> {
    let configuration = Configuration::load(cli.config.as_deref())?;
    let _logging_guard = init_logging(&LoggingConfig::from_configuration(&configuration))?;

    let factory = runner::build_factory(cli, &configuration)?;
    runner::run(cli, &factory).await
}
