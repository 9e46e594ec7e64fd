//! Acquire, run, release

use std::process::ExitCode;

use anyhow::Context;
use latch_core::{
    CancellationToken, Configuration, LockError, LockFactory, LockHandle, StoreConfig,
};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::cli::Cli;

/// Exit status when the lock could not be acquired within the wait budget
pub const EXIT_NOT_ACQUIRED: u8 = 2;
/// Exit status when acquisition was interrupted
pub const EXIT_CANCELLED: u8 = 130;

/// Build the lock factory from configuration with command-line overrides
pub fn build_factory(cli: &Cli, configuration: &Configuration) -> anyhow::Result<LockFactory> {
    let mut store_config = configuration.store_config();
    if !cli.endpoints.is_empty() {
        store_config = StoreConfig::with_endpoints(cli.endpoints.clone())
            .with_connect_timeout(store_config.connect_timeout);
    }
    if store_config.endpoints.is_empty() {
        anyhow::bail!("no store endpoints configured");
    }

    let mut settings = configuration.lock_settings()?;
    if let Some(name) = &cli.instance_name {
        settings = settings.with_instance_name(name.clone());
    }

    Ok(LockFactory::redis(store_config, settings))
}

/// Exit status for a failed acquisition, or `None` when the error should be
/// reported as a general failure
pub fn exit_code_for(err: &LockError) -> Option<u8> {
    match err {
        LockError::Cancelled { .. } => Some(EXIT_CANCELLED),
        LockError::AcquisitionFailed { .. } => Some(EXIT_NOT_ACQUIRED),
        _ => None,
    }
}

/// Acquire the lock, run the command while holding it, then release it.
///
/// Ctrl-C during acquisition cancels it. Once the command is running, the
/// signal is left to the child.
pub async fn run(cli: &Cli, factory: &LockFactory) -> anyhow::Result<ExitCode> {
    let cancellation = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancellation.clone()));

    let acquired = factory
        .create_lock(
            &cli.resource,
            cli.acquire_options().with_cancellation(cancellation),
        )
        .await;
    watcher.abort();

    let handle = match acquired {
        Ok(handle) => handle,
        Err(err) => {
            return match exit_code_for(&err) {
                Some(code) => {
                    warn!(resource = %cli.resource, error = %err, "Lock not acquired");
                    Ok(ExitCode::from(code))
                }
                None => Err(err.into()),
            };
        }
    };

    let status = run_command(&cli.command, &handle).await;
    release(factory, &handle).await;

    let status = status?;
    Ok(ExitCode::from(
        status
            .code()
            .and_then(|code| u8::try_from(code).ok())
            .unwrap_or(1),
    ))
}

async fn run_command(
    command: &[String],
    handle: &LockHandle,
) -> anyhow::Result<std::process::ExitStatus> {
    let (program, args) = command
        .split_first()
        .context("no command given")?;

    info!(
        resource = %handle.resource(),
        validity_ms = handle.validity().as_millis() as u64,
        command = %program,
        "Running command under lock"
    );

    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to run {}", program))?;

    if !handle.is_valid() {
        warn!(
            resource = %handle.resource(),
            "Command outlived the lock validity; exclusivity was not guaranteed for its whole run"
        );
    }
    Ok(status)
}

async fn release(factory: &LockFactory, handle: &LockHandle) {
    if !factory.release(handle).await {
        error!(resource = %handle.resource(), "Lock handle was already released");
    }
}

async fn cancel_on_ctrl_c(cancellation: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Interrupted, cancelling lock acquisition");
            cancellation.cancel();
        }
        Err(e) => warn!(error = %e, "Unable to listen for Ctrl-C"),
    }
}
