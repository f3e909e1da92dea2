//! Fixed-cadence poll loop.
//!
//! One [`PollScheduler`] runs per device on its own task and is the only
//! writer of the value snapshot and the connection state. Each cycle reads
//! once, publishes on success and then sleeps for what is left of the
//! target period. There is no catch-up: after an overrun the next cycle
//! starts immediately.

use crate::config::PollConfig;
use crate::detector::UpdatePublisher;
use crate::reader::RegisterReader;
use crate::transport::ModbusTransport;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Lifecycle of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Fatal loop errors. Read failures are never reported here.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll cycle panicked: {0}")]
    Panicked(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Running counters of the poll loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Completed cycles.
    pub cycles: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
    /// Cycles that emitted an update.
    pub publishes: u64,
    /// Cycles that took at least the whole target period.
    pub overruns: u64,
    /// Duration of the last completed cycle, sleep excluded.
    pub last_cycle: Duration,
}

/// The poll loop for one device.
pub struct PollScheduler<T> {
    name: String,
    poll: PollConfig,
    reader: RegisterReader<T>,
    publisher: UpdatePublisher,
    connected: Arc<watch::Sender<bool>>,
    state: watch::Sender<SchedulerState>,
    stats: watch::Sender<PollStats>,
}

impl<T: ModbusTransport> PollScheduler<T> {
    pub fn new(
        name: impl Into<String>,
        poll: PollConfig,
        reader: RegisterReader<T>,
        publisher: UpdatePublisher,
        connected: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            name: name.into(),
            poll,
            reader,
            publisher,
            connected,
            state: watch::Sender::new(SchedulerState::Stopped),
            stats: watch::Sender::new(PollStats::default()),
        }
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    pub fn reader(&self) -> &RegisterReader<T> {
        &self.reader
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn watch_stats(&self) -> watch::Receiver<PollStats> {
        self.stats.subscribe()
    }

    /// Connect ahead of the first cycle and record the outcome as the
    /// connection state.
    pub async fn connect(&mut self) -> bool {
        let connected = self.reader.connect().await;
        self.set_connected(connected);
        connected
    }

    /// Run until `stop` turns true or a cycle fails fatally.
    ///
    /// A stop request also cancels an in-flight read or sleep. On a clean
    /// stop the connection state is cleared; after a fatal error it is left
    /// as it was. The transport is closed either way.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<PollStats, PollError> {
        let period = self.poll.target_period();
        self.state.send_replace(SchedulerState::Running);
        info!(
            device = %self.name,
            register_type = %self.poll.register_kind,
            start_address = self.poll.start_address,
            count = self.poll.count,
            period_ms = period.as_millis() as u64,
            "Poll loop started"
        );

        let outcome = loop {
            if *stop.borrow_and_update() {
                break Ok(());
            }

            let started = Instant::now();
            let cycle = tokio::select! {
                _ = stop_requested(&mut stop) => break Ok(()),
                result = AssertUnwindSafe(self.cycle()).catch_unwind() => result,
            };

            match cycle {
                Ok(Ok(())) => {}
                Ok(Err(e)) => break Err(e),
                Err(payload) => break Err(PollError::Panicked(panic_message(payload.as_ref()))),
            }

            let elapsed = started.elapsed();
            let sleep_for = period.saturating_sub(elapsed);
            self.record_cycle(elapsed, sleep_for.is_zero());

            if sleep_for.is_zero() {
                debug!(device = %self.name, elapsed_ms = elapsed.as_millis() as u64, "Cycle overran period");
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = stop_requested(&mut stop) => break Ok(()),
                _ = tokio::time::sleep(sleep_for) => {}
            }
        };

        match &outcome {
            Ok(()) => {
                self.state.send_replace(SchedulerState::Stopping);
                self.set_connected(false);
                self.reader.close().await;
                info!(device = %self.name, "Poll loop stopped");
            }
            Err(e) => {
                error!(device = %self.name, error = %e, "Poll loop terminated");
                self.reader.close().await;
            }
        }

        self.state.send_replace(SchedulerState::Stopped);
        outcome.map(|()| *self.stats.borrow())
    }

    async fn cycle(&mut self) -> Result<(), PollError> {
        let PollConfig {
            register_kind,
            start_address,
            count,
            ..
        } = self.poll;

        let Some(values) = self
            .reader
            .read_booleans(register_kind, start_address, count)
            .await
        else {
            self.set_connected(false);
            self.stats.send_modify(|stats| stats.reads_failed += 1);
            return Ok(());
        };

        if values.len() != usize::from(count) {
            return Err(PollError::Invariant(format!(
                "read returned {} values, expected {}",
                values.len(),
                count
            )));
        }

        self.set_connected(true);
        let published = self.publisher.publish(&values);
        self.stats.send_modify(|stats| {
            stats.reads_ok += 1;
            if published {
                stats.publishes += 1;
            }
        });
        Ok(())
    }

    fn record_cycle(&self, elapsed: Duration, overrun: bool) {
        self.stats.send_modify(|stats| {
            stats.cycles += 1;
            stats.last_cycle = elapsed;
            if overrun {
                stats.overruns += 1;
            }
        });
    }

    fn set_connected(&self, connected: bool) {
        let changed = self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        if changed {
            debug!(device = %self.name, connected, "Connection state changed");
        }
    }
}

/// Resolves once the stop flag is set or its sender is gone.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
