//! High-rate Modbus TCP bit poller.
//!
//! Polls one contiguous range of coils or registers from a single device on
//! a fixed millisecond cadence, reduces every point to a boolean and emits
//! updates only when something changed.
//!
//! The pieces, from the wire up:
//!
//! - [`transport`] - tokio-modbus connection plus the unit keyword shim
//! - [`reader`] - one read normalized to exactly `count` booleans
//! - [`detector`] - change detection and update fan-out
//! - [`scheduler`] - the fixed-cadence poll loop
//! - [`hub`] - per-device owner of the poll task and its snapshots
//! - [`bridge`], [`points`], [`status`] - republishing to Zenoh
//!
//! # Key Expressions
//!
//! ```text
//! modbus_fast/<device>/<register_type>/<point>
//! modbus_fast/<device>/@/availability
//! modbus_fast/@/status
//! ```
//!
//! `<point>` is the register letter and address, e.g. `C12` or `H40`.

pub mod bridge;
pub mod config;
pub mod detector;
pub mod hub;
pub mod points;
pub mod reader;
pub mod scheduler;
pub mod status;
pub mod transport;

pub use config::{DeviceConfig, DeviceEndpoint, ModbusFastConfig, PollConfig, RegisterKind};
pub use detector::{ChangeSignal, HubUpdate, ValueVector};
pub use hub::{Hub, HubError};
pub use scheduler::{PollStats, SchedulerState};
pub use transport::{ModbusTransport, TcpTransport, TransportAdapter};
