//! Command-line arguments

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use latch_core::AcquireOptions;

/// Run a command while holding a distributed lock
#[derive(Debug, Parser)]
#[command(name = "latch", version, about)]
pub struct Cli {
    /// Configuration file (YAML or TOML); defaults to conf/latch.* when present
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Store endpoint, repeatable; replaces the configured endpoint list
    #[arg(short = 'e', long = "endpoint", value_name = "URL")]
    pub endpoints: Vec<String>,

    /// Prefix applied to every resource key
    #[arg(long = "instance-name")]
    pub instance_name: Option<String>,

    /// Resource to lock
    #[arg(short = 'r', long = "resource")]
    pub resource: String,

    /// Lock expiry in milliseconds
    #[arg(long = "expiry-ms")]
    pub expiry_ms: Option<u64>,

    /// Total time to keep retrying, in milliseconds
    #[arg(long = "wait-ms")]
    pub wait_ms: Option<u64>,

    /// Pause between attempts, in milliseconds
    #[arg(long = "retry-ms")]
    pub retry_ms: Option<u64>,

    /// Command to run while the lock is held
    #[arg(last = true, required = true, num_args = 1.., value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Acquisition options from the timing flags; unset flags fall back to
    /// the configured defaults
    pub fn acquire_options(&self) -> AcquireOptions {
        let mut options = AcquireOptions::new();
        if let Some(ms) = self.expiry_ms {
            options = options.with_expiry(Duration::from_millis(ms));
        }
        if let Some(ms) = self.wait_ms {
            options = options.with_wait(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retry_ms {
            options = options.with_retry(Duration::from_millis(ms));
        }
        options
    }
}
