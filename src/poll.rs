//! Periodic `zpool iostat` invocation, feeding the [`MetricRegistry`]
//!
//! The first pass registers every series (fail-fast at startup). Subsequent passes only update
//! known series, and a failed pass keeps the previous values until the next interval.

use crate::{
    iostat::{self, PoolSnapshot},
    registry::MetricRegistry,
};
use anyhow::Context as _;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::{
    path::PathBuf,
    process::Command,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

const ARG_IOSTAT: &str = "iostat";

/// External `zpool` executable
#[derive(Clone, Debug)]
pub struct ZpoolCommand {
    path: PathBuf,
}
impl ZpoolCommand {
    /// Constructs the command for the executable at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
    /// Runs `zpool iostat` to completion (no timeout), returning its output
    ///
    /// # Errors
    /// Returns an error if the command cannot be spawned, exits unsuccessfully, or prints
    /// non-UTF-8 output
    pub fn iostat(&self) -> anyhow::Result<String> {
        let Self { path } = self;
        let output = Command::new(path)
            .arg(ARG_IOSTAT)
            .output()
            .with_context(|| format!("failed to spawn {path:?}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "command {path:?} (args [{ARG_IOSTAT:?}]) failed with {status}, stderr: {stderr:?}",
                status = output.status,
            );
        }
        String::from_utf8(output.stdout).context("non-UTF8 output from zpool")
    }
}

/// Runs poll cycles against a shared registry
pub struct Poller {
    command: ZpoolCommand,
    hostname: String,
    registry: Arc<MetricRegistry>,
}
impl Poller {
    /// Constructs a poller labeling all series with `hostname`
    pub fn new(
        command: ZpoolCommand,
        hostname: impl Into<String>,
        registry: Arc<MetricRegistry>,
    ) -> Self {
        Self {
            command,
            hostname: hostname.into(),
            registry,
        }
    }
    fn poll(&self) -> anyhow::Result<Vec<PoolSnapshot>> {
        let output = self
            .command
            .iostat()
            .context("failed to execute zpool command")?;
        let pools =
            iostat::parse(&output, &self.hostname).context("failed to parse zpool iostat")?;
        if pools.is_empty() {
            tracing::debug!("no pools detected");
        }
        Ok(pools)
    }
    /// Polls once, registering every series found
    ///
    /// Returns the number of pools detected.
    ///
    /// # Errors
    /// Returns an error if the command or parsing fails, or a gauge is rejected
    pub fn register_initial(&self) -> anyhow::Result<usize> {
        let pools = self.poll()?;
        if pools.is_empty() {
            tracing::warn!("no pools detected, nothing to export");
        }
        for pool in &pools {
            self.registry.register(pool)?;
        }
        tracing::info!(
            pools = pools.len(),
            series = self.registry.series_count(),
            "registered initial metrics"
        );
        Ok(pools.len())
    }
    /// Polls once, updating the series registered by [`Self::register_initial`]
    ///
    /// Pools with every series known are updated, even if other pools are unknown.
    ///
    /// # Errors
    /// Returns an error if the command or parsing fails (nothing is updated), or if any pool was
    /// not registered
    pub fn update_cycle(&self) -> anyhow::Result<()> {
        let pools = self.poll()?;
        let unknown: Vec<_> = pools
            .iter()
            .filter_map(|pool| {
                self.registry
                    .update(pool)
                    .err()
                    .map(|err| (pool.name.as_str(), err))
            })
            .collect();
        if let Some((pool, err)) = unknown.first() {
            anyhow::bail!(
                "{count} of {total} pools not registered at startup, first {pool:?}: {err}",
                count = unknown.len(),
                total = pools.len(),
            );
        }
        Ok(())
    }
    /// Spawns the background thread, updating every `interval` until `shutdown` disconnects
    ///
    /// The shutdown signal is checked between cycles, a running `zpool` command is not
    /// interrupted.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned
    pub fn spawn(
        self,
        shutdown: Receiver<()>,
        interval: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("zpool-poll".to_string())
            .spawn(move || self.run(&shutdown, interval))
    }
    fn run(&self, shutdown: &Receiver<()>, interval: Duration) {
        loop {
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if let Err(err) = self.update_cycle() {
                tracing::warn!("poll cycle failed, keeping previous values: {err:#}");
            }
        }
        tracing::debug!("poll thread stopped");
    }
}
