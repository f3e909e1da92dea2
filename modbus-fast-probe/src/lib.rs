//! One-shot Modbus read.
//!
//! Connects over TCP or RTU, issues a single read, reports the result as
//! one JSON object and closes. No polling and no retries.

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::debug;

/// Read values from a Modbus device.
#[derive(Parser, Debug, Clone)]
#[command(name = "modbus-fast-probe")]
#[command(about = "Read values from a Modbus device once")]
#[command(version)]
pub struct ProbeArgs {
    /// Connection mode
    #[arg(long, value_enum, default_value_t = Mode::Tcp)]
    pub mode: Mode,

    /// Modbus TCP host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Modbus TCP port
    #[arg(long, default_value_t = 502)]
    pub port: u16,

    /// Serial port for RTU, e.g. /dev/ttyUSB0 or COM3
    #[arg(long)]
    pub serial: Option<String>,

    /// Baud rate for RTU
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,

    /// Parity for RTU
    #[arg(long, value_enum, default_value_t = Parity::N)]
    pub parity: Parity,

    /// Stop bits for RTU
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub stopbits: u8,

    /// Byte size for RTU
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(7..=8))]
    pub bytesize: u8,

    /// What to read
    #[arg(long = "type", value_enum, default_value_t = ReadType::Holding)]
    pub read_type: ReadType,

    /// Start address
    #[arg(long, default_value_t = 0)]
    pub address: u16,

    /// Number of items to read
    #[arg(long, default_value_t = 1)]
    pub count: u16,

    /// Modbus unit/device id
    #[arg(long, default_value_t = 1)]
    pub unit: u8,

    /// Socket/serial timeout in seconds
    #[arg(long, default_value = "3.0", value_parser = parse_timeout)]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Tcp,
    Rtu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadType {
    Holding,
    Input,
    Coils,
    Discrete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Parity {
    #[value(name = "N")]
    N,
    #[value(name = "E")]
    E,
    #[value(name = "O")]
    O,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::N => tokio_serial::Parity::None,
            Parity::E => tokio_serial::Parity::Even,
            Parity::O => tokio_serial::Parity::Odd,
        }
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("invalid timeout '{}': {}", value, e))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid timeout '{}': {}", value, e))
}

/// Probe failures, each with its own exit code.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("--serial is required for RTU mode")]
    MissingSerialPort,

    #[error("Failed to connect to Modbus device: {0}")]
    Connect(String),

    #[error("Modbus error: {0}")]
    Exception(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("No data returned")]
    Empty,
}

impl ProbeError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ProbeError::MissingSerialPort => 2,
            ProbeError::Connect(_) => 3,
            ProbeError::Exception(_) | ProbeError::Read(_) => 4,
            ProbeError::Empty => 5,
        }
    }
}

/// Raw values as read: register words or bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Values {
    Registers(Vec<u16>),
    Bits(Vec<bool>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::Registers(words) => words.len(),
            Values::Bits(bits) => bits.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The line printed on success.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub mode: Mode,
    #[serde(rename = "type")]
    pub read_type: ReadType,
    pub unit: u8,
    pub address: u16,
    pub end_address: u32,
    pub count: usize,
    pub values: Values,
}

impl ProbeReport {
    pub fn new(args: &ProbeArgs, values: Values) -> Result<Self, ProbeError> {
        if values.is_empty() {
            return Err(ProbeError::Empty);
        }

        let count = values.len();
        Ok(Self {
            mode: args.mode,
            read_type: args.read_type,
            unit: args.unit,
            address: args.address,
            end_address: u32::from(args.address) + count as u32 - 1,
            count,
            values,
        })
    }
}

/// Connect, read once, close.
pub async fn run(args: &ProbeArgs) -> Result<ProbeReport, ProbeError> {
    let mut ctx = connect(args).await?;
    let result = read(&mut ctx, args).await;

    if let Err(e) = ctx.disconnect().await {
        debug!(error = %e, "Error while closing connection");
    }

    ProbeReport::new(args, result?)
}

async fn connect(args: &ProbeArgs) -> Result<Context, ProbeError> {
    let slave = Slave(args.unit);

    match args.mode {
        Mode::Tcp => {
            let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
                .await
                .map_err(|e| ProbeError::Connect(format!("Invalid address: {}", e)))?
                .next()
                .ok_or_else(|| ProbeError::Connect(format!("No address for {}", args.host)))?;

            debug!(%addr, unit = args.unit, "Connecting over TCP");
            tokio::time::timeout(args.timeout, tcp::connect_slave(addr, slave))
                .await
                .map_err(|_| ProbeError::Connect("Connection timeout".to_string()))?
                .map_err(|e| ProbeError::Connect(e.to_string()))
        }
        Mode::Rtu => {
            let port = args.serial.as_deref().ok_or(ProbeError::MissingSerialPort)?;

            let stop_bits = match args.stopbits {
                2 => tokio_serial::StopBits::Two,
                _ => tokio_serial::StopBits::One,
            };
            let data_bits = match args.bytesize {
                7 => tokio_serial::DataBits::Seven,
                _ => tokio_serial::DataBits::Eight,
            };

            let builder = tokio_serial::new(port, args.baud)
                .parity(args.parity.into())
                .stop_bits(stop_bits)
                .data_bits(data_bits)
                .timeout(args.timeout);

            debug!(port, baud = args.baud, unit = args.unit, "Opening serial port");
            let serial = tokio_serial::SerialStream::open(&builder)
                .map_err(|e| ProbeError::Connect(format!("Serial open failed: {}", e)))?;

            Ok(rtu::attach_slave(serial, slave))
        }
    }
}

async fn read(ctx: &mut Context, args: &ProbeArgs) -> Result<Values, ProbeError> {
    let (address, count) = (args.address, args.count);

    let response = match args.read_type {
        ReadType::Holding => tokio::time::timeout(args.timeout, ctx.read_holding_registers(address, count))
            .await
            .map(|res| res.map(|inner| inner.map(Values::Registers))),
        ReadType::Input => tokio::time::timeout(args.timeout, ctx.read_input_registers(address, count))
            .await
            .map(|res| res.map(|inner| inner.map(Values::Registers))),
        ReadType::Coils => tokio::time::timeout(args.timeout, ctx.read_coils(address, count))
            .await
            .map(|res| res.map(|inner| inner.map(Values::Bits))),
        ReadType::Discrete => tokio::time::timeout(args.timeout, ctx.read_discrete_inputs(address, count))
            .await
            .map(|res| res.map(|inner| inner.map(Values::Bits))),
    };

    match response {
        Err(_) => Err(ProbeError::Read(format!("Request timed out after {:?}", args.timeout))),
        Ok(Err(e)) => Err(ProbeError::Read(e.to_string())),
        Ok(Ok(Err(exception))) => Err(ProbeError::Exception(format!("{:?}", exception))),
        Ok(Ok(Ok(values))) => Ok(values),
    }
}
