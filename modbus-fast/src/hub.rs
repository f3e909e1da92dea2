//! Per-device hub: owns the poll task and exposes its results.

use crate::config::{DeviceConfig, DeviceEndpoint, PollConfig};
use crate::detector::{ChangeDetector, HubUpdate, UpdatePublisher, ValueVector};
use crate::reader::RegisterReader;
use crate::scheduler::{PollError, PollScheduler, PollStats, SchedulerState};
use crate::transport::{ModbusTransport, TcpTransport, TransportAdapter};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Buffered update events per subscriber before it starts lagging.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub already started")]
    AlreadyStarted,
    #[error("hub has been stopped")]
    Stopped,
}

/// One polled device.
///
/// Snapshot reads never block: values and connection state are published
/// by the poll task through watch channels and replaced whole. Update events
/// fan out over a broadcast channel; a subscriber that lags must resync from
/// [`Hub::current_values`].
pub struct Hub<T> {
    name: String,
    endpoint: DeviceEndpoint,
    poll: PollConfig,
    scheduler: Option<PollScheduler<T>>,
    values: watch::Receiver<ValueVector>,
    connected: Arc<watch::Sender<bool>>,
    state: watch::Receiver<SchedulerState>,
    stats: watch::Receiver<PollStats>,
    updates: broadcast::Sender<HubUpdate>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<Result<PollStats, PollError>>>,
    stopped: bool,
}

impl Hub<TcpTransport> {
    /// Hub polling the device described by `config` over Modbus TCP.
    pub fn tcp(config: &DeviceConfig) -> Self {
        let endpoint = config.endpoint();
        let adapter = TransportAdapter::new(TcpTransport::new(endpoint.clone()), endpoint)
            .with_connect_timeout(config.connect_timeout());
        Hub::new(config.name.clone(), config.poll_config(), adapter)
    }
}

impl<T: ModbusTransport + 'static> Hub<T> {
    pub fn new(name: impl Into<String>, poll: PollConfig, adapter: TransportAdapter<T>) -> Self {
        let name = name.into();
        let endpoint = adapter.endpoint().clone();
        let count = usize::from(poll.count);

        let (values_tx, values) = watch::channel::<ValueVector>(vec![None; count].into());
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let connected = Arc::new(watch::Sender::new(false));

        let publisher = UpdatePublisher::new(
            ChangeDetector::new(count, poll.change_only),
            values_tx,
            updates.clone(),
        );
        let scheduler = PollScheduler::new(
            name.clone(),
            poll,
            RegisterReader::new(adapter),
            publisher,
            connected.clone(),
        );

        Self {
            name,
            endpoint,
            poll,
            state: scheduler.watch_state(),
            stats: scheduler.watch_stats(),
            scheduler: Some(scheduler),
            values,
            connected,
            updates,
            stop: watch::Sender::new(false),
            task: None,
            stopped: false,
        }
    }

    /// Connect and spawn the poll task.
    ///
    /// A failed initial connect is only a warning: the loop keeps retrying
    /// on every cycle.
    pub async fn start(&mut self) -> Result<(), HubError> {
        if self.stopped {
            return Err(HubError::Stopped);
        }
        let Some(mut scheduler) = self.scheduler.take() else {
            return Err(HubError::AlreadyStarted);
        };

        if !scheduler.connect().await {
            warn!(
                device = %self.name,
                endpoint = %self.endpoint,
                "Initial connect failed, will retry while polling"
            );
        }

        self.task = Some(tokio::spawn(scheduler.run(self.stop.subscribe())));
        info!(device = %self.name, endpoint = %self.endpoint, "Hub started");
        Ok(())
    }

    /// Stop polling and wait for the poll task to finish.
    ///
    /// Safe to call more than once, and before [`Hub::start`]. Leaves the
    /// connection state false.
    pub async fn stop(&mut self) {
        self.stopped = true;
        self.stop.send_replace(true);
        self.scheduler = None;

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(stats)) => {
                    info!(
                        device = %self.name,
                        cycles = stats.cycles,
                        publishes = stats.publishes,
                        "Hub stopped"
                    );
                }
                Ok(Err(e)) => debug!(device = %self.name, error = %e, "Poll task had already failed"),
                Err(e) => error!(device = %self.name, error = %e, "Poll task aborted"),
            }
        }

        self.connected.send_if_modified(|connected| std::mem::replace(connected, false));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Latest value vector.
    pub fn current_values(&self) -> ValueVector {
        self.values.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> PollStats {
        *self.stats.borrow()
    }

    /// Receive every update event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HubUpdate> {
        self.updates.subscribe()
    }

    pub fn watch_connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn watch_values(&self) -> watch::Receiver<ValueVector> {
        self.values.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }
}

impl<T> Drop for Hub<T> {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}
