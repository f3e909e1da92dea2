//! One published point per index of the value vector.

use crate::config::{DeviceEndpoint, PollConfig, RegisterKind};

/// Host-side identity of one bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    /// Index into the value vector.
    pub index: usize,
    pub address: u16,
    /// Display name, e.g. "Boiler C12".
    pub name: String,
    /// Short id used as the last key segment, e.g. "C12".
    pub metric: String,
    /// Stable across restarts for the same endpoint and address.
    pub unique_id: String,
}

/// Points for one hub, index-aligned with its value vector.
#[derive(Debug, Clone)]
pub struct PointMap {
    kind: RegisterKind,
    device_id: String,
    model: String,
    points: Vec<Point>,
}

impl PointMap {
    pub fn new(name: &str, endpoint: &DeviceEndpoint, poll: &PollConfig) -> Self {
        let letter = poll.register_kind.letter();
        let points = (0..poll.count)
            .map(|offset| {
                let address = poll.start_address.wrapping_add(offset);
                Point {
                    index: usize::from(offset),
                    address,
                    name: format!("{} {}{}", name, letter, address),
                    metric: format!("{}{}", letter, address),
                    unique_id: format!(
                        "modbus_fast_{}_{}_{}_{}",
                        endpoint.host, endpoint.port, endpoint.unit_id, address
                    ),
                }
            })
            .collect();

        Self {
            kind: poll.register_kind,
            device_id: endpoint.identifier(),
            model: format!("{}@{}+{}", poll.register_kind, poll.start_address, poll.count),
            points,
        }
    }

    pub fn register_kind(&self) -> RegisterKind {
        self.kind
    }

    /// `"{host}:{port}:{unit}"`.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `"{kind}@{start}+{count}"`.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn get(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
