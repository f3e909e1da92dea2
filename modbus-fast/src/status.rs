//! Daemon status reporting.

use crate::config::DeviceConfig;
use crate::points::PointMap;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Daemon status as published on `{prefix}/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub bridge: String,
    pub version: String,
    /// "running" or "offline".
    pub status: String,
    /// Device details, flattened into the top-level object.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    pub fn running() -> Self {
        Self::with_status("running")
    }

    pub fn offline() -> Self {
        Self::with_status("offline")
    }

    fn with_status(status: &str) -> Self {
        Self {
            bridge: "modbus-fast".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: status.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish as JSON. Failures are logged, not returned.
    pub async fn publish(&self, session: &zenoh::Session, key: &str) {
        let payload = match serde_json::to_vec(self) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode bridge status");
                return;
            }
        };

        if let Err(e) = session.put(key, payload).await {
            error!(key = %key, error = %e, "Failed to publish bridge status");
        }
    }
}

/// Status metadata describing the polled device.
pub fn device_metadata(config: &DeviceConfig, points: &PointMap) -> serde_json::Value {
    serde_json::json!({
        "device": config.name,
        "device_id": points.device_id(),
        "model": points.model(),
        "register_type": config.register_type.as_str(),
        "start_address": config.start_address,
        "count": config.count,
        "sample_period_ms": config.sample_period_ms,
        "only_on_change": config.only_on_change,
    })
}
