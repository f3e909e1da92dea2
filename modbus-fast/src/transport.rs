//! Connection to one Modbus device.
//!
//! [`ModbusTransport`] is the seam to the protocol library; [`TcpTransport`]
//! drives tokio-modbus over TCP. [`TransportAdapter`] adds the connection
//! policy on top: lazy reconnect before reads and the unit keyword shim.

use crate::config::{DeviceEndpoint, RegisterKind};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::debug;

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("read() got an unexpected keyword argument '{0}'")]
    UnexpectedKeyword(UnitKeyword),
    #[error("Read failed: {0}")]
    Read(String),
}

impl TransportError {
    /// Whether the transport refused the spelling of the device identifier.
    ///
    /// Transports that only report free-form errors are matched on the
    /// "unexpected keyword" wording.
    pub fn is_keyword_mismatch(&self) -> bool {
        match self {
            TransportError::UnexpectedKeyword(_) => true,
            TransportError::Connection(msg) | TransportError::Read(msg) => {
                msg.to_ascii_lowercase().contains("unexpected keyword")
            }
            TransportError::NotConnected | TransportError::Timeout(_) => false,
        }
    }
}

/// The two spellings a transport may accept for the device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKeyword {
    /// `unit`, tried first when the transport cannot tell.
    Unit,
    /// `slave`, the alternate spelling.
    Slave,
}

impl UnitKeyword {
    pub const PRIMARY: UnitKeyword = UnitKeyword::Unit;
    pub const ALTERNATE: UnitKeyword = UnitKeyword::Slave;

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKeyword::Unit => "unit",
            UnitKeyword::Slave => "slave",
        }
    }

    /// The other spelling.
    pub fn flipped(self) -> Self {
        match self {
            UnitKeyword::Unit => UnitKeyword::Slave,
            UnitKeyword::Slave => UnitKeyword::Unit,
        }
    }
}

impl fmt::Display for UnitKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device identifier as passed to a transport read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitArg {
    pub keyword: UnitKeyword,
    pub id: u8,
}

/// One read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub kind: RegisterKind,
    pub address: u16,
    pub count: u16,
    pub unit: UnitArg,
}

/// What the device answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawReadResult {
    /// Coil states.
    Bits(Vec<bool>),
    /// 16-bit register words.
    Registers(Vec<u16>),
    /// Exception response from the device.
    Exception(String),
}

impl RawReadResult {
    /// Whether the device reported an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RawReadResult::Exception(_))
    }
}

/// A stream connection to one device.
#[async_trait]
pub trait ModbusTransport: Send {
    /// Open the connection, giving up after `timeout`.
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Whether the transport believes it is connected.
    fn is_connected(&self) -> bool;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// The device identifier spellings `read` accepts, or `None` when the
    /// transport cannot say.
    fn accepted_unit_keywords(&self) -> Option<Vec<UnitKeyword>>;

    /// Issue one read.
    async fn read(&mut self, request: ReadRequest) -> Result<RawReadResult, TransportError>;
}

/// Modbus TCP transport backed by tokio-modbus.
///
/// tokio-modbus addresses devices by slave id, so this transport only
/// accepts [`UnitKeyword::Slave`]. The connect timeout also bounds every
/// request.
pub struct TcpTransport {
    endpoint: DeviceEndpoint,
    timeout: Duration,
    ctx: Option<Context>,
}

impl TcpTransport {
    pub fn new(endpoint: DeviceEndpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            ctx: None,
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.timeout = timeout;

        let addr = tokio::net::lookup_host((self.endpoint.host.as_str(), self.endpoint.port))
            .await
            .map_err(|e| TransportError::Connection(format!("Invalid address: {}", e)))?
            .next()
            .ok_or_else(|| {
                TransportError::Connection(format!("No address for {}", self.endpoint.host))
            })?;

        let slave = Slave(self.endpoint.unit_id);
        let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        self.ctx = Some(ctx);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.disconnect()
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
        }
        Ok(())
    }

    fn accepted_unit_keywords(&self) -> Option<Vec<UnitKeyword>> {
        Some(vec![UnitKeyword::Slave])
    }

    async fn read(&mut self, request: ReadRequest) -> Result<RawReadResult, TransportError> {
        if request.unit.keyword != UnitKeyword::Slave {
            return Err(TransportError::UnexpectedKeyword(request.unit.keyword));
        }

        let timeout = self.timeout;
        let ctx = self.ctx.as_mut().ok_or(TransportError::NotConnected)?;
        ctx.set_slave(Slave(request.unit.id));

        let (address, count) = (request.address, request.count);
        let response = match request.kind {
            RegisterKind::Coil => tokio::time::timeout(timeout, ctx.read_coils(address, count))
                .await
                .map(|res| res.map(|inner| inner.map(RawReadResult::Bits))),
            RegisterKind::Input => {
                tokio::time::timeout(timeout, ctx.read_input_registers(address, count))
                    .await
                    .map(|res| res.map(|inner| inner.map(RawReadResult::Registers)))
            }
            RegisterKind::Holding => {
                tokio::time::timeout(timeout, ctx.read_holding_registers(address, count))
                    .await
                    .map(|res| res.map(|inner| inner.map(RawReadResult::Registers)))
            }
        };

        match response {
            Err(_) => {
                // The connection is in an unknown state after a stalled request.
                self.ctx = None;
                Err(TransportError::Timeout(timeout))
            }
            Ok(Err(e)) => {
                self.ctx = None;
                Err(TransportError::Read(e.to_string()))
            }
            Ok(Ok(Err(exception))) => Ok(RawReadResult::Exception(format!("{:?}", exception))),
            Ok(Ok(Ok(result))) => Ok(result),
        }
    }
}

/// Connection policy around a [`ModbusTransport`].
pub struct TransportAdapter<T> {
    transport: T,
    endpoint: DeviceEndpoint,
    connect_timeout: Duration,
    unit_keyword: Option<UnitKeyword>,
}

impl<T: ModbusTransport> TransportAdapter<T> {
    pub fn new(transport: T, endpoint: DeviceEndpoint) -> Self {
        Self {
            transport,
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            unit_keyword: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// The cached unit keyword, once the first read has resolved it.
    pub fn unit_keyword(&self) -> Option<UnitKeyword> {
        self.unit_keyword
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Connect if not already connected. Never fails; returns whether the
    /// transport is connected afterwards.
    pub async fn connect(&mut self) -> bool {
        if self.transport.is_connected() {
            return true;
        }

        match self.transport.connect(self.connect_timeout).await {
            Ok(()) => {
                debug!(endpoint = %self.endpoint, "Connected");
                true
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Connect failed");
                false
            }
        }
    }

    /// Release the transport. Safe to call repeatedly; errors are only logged.
    pub async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!(endpoint = %self.endpoint, error = %e, "Error while closing transport");
        }
    }

    /// Read `count` items of `kind` at `address` from the endpoint's unit.
    ///
    /// Reconnects first when disconnected. A rejected unit keyword flips the
    /// cached spelling and retries exactly once.
    pub async fn read(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<RawReadResult, TransportError> {
        if !self.connect().await {
            return Err(TransportError::NotConnected);
        }

        let keyword = self.resolve_unit_keyword();
        match self.call(kind, address, count, keyword).await {
            Err(e) if e.is_keyword_mismatch() => {
                let alternate = keyword.flipped();
                debug!(
                    rejected = %keyword,
                    retry_with = %alternate,
                    error = %e,
                    "Transport rejected unit keyword, retrying once"
                );
                self.unit_keyword = Some(alternate);
                self.call(kind, address, count, alternate).await
            }
            result => result,
        }
    }

    fn resolve_unit_keyword(&mut self) -> UnitKeyword {
        if let Some(keyword) = self.unit_keyword {
            return keyword;
        }

        let keyword = match self.transport.accepted_unit_keywords() {
            Some(accepted) if accepted.contains(&UnitKeyword::Unit) => UnitKeyword::Unit,
            Some(accepted) if accepted.contains(&UnitKeyword::Slave) => UnitKeyword::Slave,
            _ => UnitKeyword::PRIMARY,
        };

        debug!(keyword = %keyword, "Using '{}' keyword for unit id", keyword);
        self.unit_keyword = Some(keyword);
        keyword
    }

    async fn call(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
        keyword: UnitKeyword,
    ) -> Result<RawReadResult, TransportError> {
        let request = ReadRequest {
            kind,
            address,
            count,
            unit: UnitArg {
                keyword,
                id: self.endpoint.unit_id,
            },
        };
        self.transport.read(request).await
    }
}
