//! Republishes hub updates to Zenoh, one sample per point.

use crate::detector::{ChangeSignal, HubUpdate, ValueVector};
use crate::hub::Hub;
use crate::points::PointMap;
use crate::scheduler::stop_requested;
use crate::transport::ModbusTransport;
use modbus_fast_common::{Format, KeyExprBuilder, PointSample, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] modbus_fast_common::Error),

    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },
}

/// Payload of the availability key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
}

/// Receivers the bridge needs from a hub.
pub struct HubFeeds {
    pub updates: broadcast::Receiver<HubUpdate>,
    pub connection: watch::Receiver<bool>,
    pub values: watch::Receiver<ValueVector>,
}

impl HubFeeds {
    pub fn from_hub<T: ModbusTransport + 'static>(hub: &Hub<T>) -> Self {
        Self {
            updates: hub.subscribe(),
            connection: hub.watch_connection(),
            values: hub.watch_values(),
        }
    }
}

/// Build the samples to publish for one update.
///
/// `FullRefresh` covers every point, `Changed` only the listed indices.
/// Points that have never been read are skipped.
pub fn samples_for(
    keys: &KeyExprBuilder,
    points: &PointMap,
    signal: &ChangeSignal,
    values: &[Option<bool>],
    timestamp: i64,
) -> Vec<(String, PointSample)> {
    let register_type = points.register_kind().as_str();
    values
        .iter()
        .enumerate()
        .filter(|(index, _)| signal.affects(*index))
        .filter_map(|(index, value)| {
            let value = (*value)?;
            let point = points.get(index)?;
            let sample = PointSample::new(keys.device(), point.metric.as_str(), value)
                .at(timestamp)
                .with_label("address", point.address.to_string())
                .with_label("register_type", register_type)
                .with_label("unique_id", point.unique_id.as_str())
                .with_label("name", point.name.as_str());
            Some((keys.point(register_type, &point.metric), sample))
        })
        .collect()
}

/// Publishes a hub's points and availability to a Zenoh session.
pub struct UpdateBridge {
    session: zenoh::Session,
    keys: KeyExprBuilder,
    points: PointMap,
    format: Format,
}

impl UpdateBridge {
    pub fn new(
        session: zenoh::Session,
        keys: KeyExprBuilder,
        points: PointMap,
        format: Format,
    ) -> Self {
        Self {
            session,
            keys,
            points,
            format,
        }
    }

    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    /// Forward updates until `shutdown` turns true or the hub goes away.
    ///
    /// Returns the number of samples published.
    pub async fn run(self, mut feeds: HubFeeds, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut published = 0;
        let mut connection_open = true;

        let available = *feeds.connection.borrow_and_update();
        self.publish_availability(available).await;

        // Points read before the bridge subscribed
        let snapshot = feeds.values.borrow().clone();
        published += self.publish_update(&ChangeSignal::FullRefresh, &snapshot).await;

        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                update = feeds.updates.recv() => match update {
                    Ok(update) => {
                        published += self.publish_update(&update.signal, &update.values).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            device = %self.keys.device(),
                            skipped,
                            "Bridge lagged behind hub updates, republishing snapshot"
                        );
                        // Whatever is still buffered is older than the snapshot
                        feeds.updates = feeds.updates.resubscribe();
                        let snapshot = feeds.values.borrow().clone();
                        published += self.publish_update(&ChangeSignal::FullRefresh, &snapshot).await;
                    }
                    Err(RecvError::Closed) => {
                        debug!(device = %self.keys.device(), "Hub update channel closed");
                        break;
                    }
                },
                changed = feeds.connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let available = *feeds.connection.borrow_and_update();
                        self.publish_availability(available).await;
                    }
                    Err(_) => connection_open = false,
                },
            }
        }

        info!(device = %self.keys.device(), published, "Bridge stopped");
        published
    }

    async fn publish_update(&self, signal: &ChangeSignal, values: &[Option<bool>]) -> u64 {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let samples = samples_for(&self.keys, &self.points, signal, values, timestamp);

        let mut published = 0;
        for (key, sample) in &samples {
            match self.put(key, sample).await {
                Ok(()) => published += 1,
                Err(e) => warn!(error = %e, "Failed to publish point"),
            }
        }
        published
    }

    async fn publish_availability(&self, available: bool) {
        let key = self.keys.availability();
        match self.put(&key, &Availability { available }).await {
            Ok(()) => info!(device = %self.keys.device(), available, "Published availability"),
            Err(e) => warn!(error = %e, "Failed to publish availability"),
        }
    }

    async fn put<S: Serialize>(&self, key: &str, value: &S) -> Result<(), BridgeError> {
        let payload = encode(value, self.format)?;
        self.session
            .put(key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceEndpoint, PollConfig, RegisterKind};

    fn fixture() -> (KeyExprBuilder, PointMap) {
        let poll = PollConfig {
            register_kind: RegisterKind::Coil,
            start_address: 10,
            count: 4,
            sample_period_ms: 5,
            change_only: true,
        };
        let endpoint = DeviceEndpoint::new("10.0.0.7", 502, 2);
        (
            KeyExprBuilder::with_prefix("plant", "Boiler Room"),
            PointMap::new("Boiler Room", &endpoint, &poll),
        )
    }

    #[test]
    fn test_full_refresh_publishes_every_read_point() {
        let (keys, points) = fixture();
        let values = [Some(true), Some(false), None, Some(true)];

        let samples = samples_for(&keys, &points, &ChangeSignal::FullRefresh, &values, 42);

        let keys: Vec<&str> = samples.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "plant/Boiler_Room/coil/C10",
                "plant/Boiler_Room/coil/C11",
                "plant/Boiler_Room/coil/C13",
            ]
        );

        let (_, first) = &samples[0];
        assert!(first.value);
        assert_eq!(first.timestamp, 42);
        assert_eq!(first.source, "Boiler_Room");
        assert_eq!(first.labels.get("address").map(String::as_str), Some("10"));
        assert_eq!(first.labels.get("register_type").map(String::as_str), Some("coil"));
        assert_eq!(
            first.labels.get("unique_id").map(String::as_str),
            Some("modbus_fast_10.0.0.7_502_2_10")
        );
        assert_eq!(
            first.labels.get("name").map(String::as_str),
            Some("Boiler Room C10")
        );
    }

    #[test]
    fn test_changed_publishes_listed_indices_only() {
        let (keys, points) = fixture();
        let values = [Some(true), Some(true), Some(false), Some(true)];

        let samples = samples_for(&keys, &points, &ChangeSignal::Changed(vec![1]), &values, 0);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0, "plant/Boiler_Room/coil/C11");
        assert!(samples[0].1.value);
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let (keys, points) = fixture();
        let values = [Some(true); 4];

        let samples = samples_for(&keys, &points, &ChangeSignal::Changed(vec![3, 9]), &values, 0);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1.metric, "C13");
    }

    #[test]
    fn test_availability_payload() {
        let json = serde_json::to_string(&Availability { available: false }).unwrap();
        assert_eq!(json, r#"{"available":false}"#);
    }
}
