//! Drives refresh cycles once or on a fixed delay

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RefreshConfig;
use crate::engine::RefreshEngine;

/// Something that can run one complete refresh cycle
#[async_trait]
pub trait CycleRunner: Send {
    async fn run_cycle(&mut self);

    /// True once a cycle failed in a way later cycles cannot recover from
    fn is_halted(&self) -> bool {
        false
    }
}

#[async_trait]
impl CycleRunner for RefreshEngine {
    async fn run_cycle(&mut self) {
        RefreshEngine::run_cycle(self).await
    }

    fn is_halted(&self) -> bool {
        RefreshEngine::is_halted(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Run exactly one cycle
    Foreground,
    /// Run a cycle, then sleep `interval` after it completes, forever
    Daemon { interval: Duration },
}

impl From<&RefreshConfig> for ScheduleMode {
    fn from(refresh: &RefreshConfig) -> Self {
        if refresh.daemonize {
            ScheduleMode::Daemon {
                interval: Duration::from_secs(refresh.interval_secs),
            }
        } else {
            ScheduleMode::Foreground
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    mode: ScheduleMode,
}

impl Scheduler {
    pub fn new(mode: ScheduleMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Run cycles until the mode is exhausted, the runner halts or `shutdown` is cancelled
    ///
    /// Cycles never overlap and a running cycle is never interrupted; the
    /// token is only observed between cycles. Returns the number of cycles
    /// that ran.
    pub async fn run<R>(&self, runner: &mut R, shutdown: CancellationToken) -> u64
    where
        R: CycleRunner + ?Sized,
    {
        let mut cycles = 0u64;

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, not starting another refresh cycle");
                break;
            }

            runner.run_cycle().await;
            cycles += 1;

            if runner.is_halted() {
                warn!("Refresh halted by an unrecoverable error, stopping scheduler");
                break;
            }

            let interval = match self.mode {
                ScheduleMode::Foreground => break,
                ScheduleMode::Daemon { interval } => interval,
            };

            debug!("Next refresh in {}s", interval.as_secs());
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        cycles
    }
}
