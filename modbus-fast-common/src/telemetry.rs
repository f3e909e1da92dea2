use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// One bit value as published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSample {
    /// Unix epoch milliseconds when the value was read.
    pub timestamp: i64,

    /// Device name (e.g., "plc01").
    pub source: String,

    /// Point identifier within the device (e.g., "C12", "H40").
    pub metric: String,

    /// The bit value.
    pub value: bool,

    /// Additional context labels (address, register type, unique id).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl PointSample {
    /// Create a new sample stamped with the current time.
    pub fn new(source: impl Into<String>, metric: impl Into<String>, value: bool) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source: source.into(),
            metric: metric.into(),
            value,
            labels: HashMap::new(),
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a label to this sample.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
