//! modbus-fast-probe: read a Modbus device once and print the result.
//!
//! ```text
//! modbus-fast-probe --host 192.168.1.10 --type coils --address 0 --count 8
//! modbus-fast-probe --mode rtu --serial /dev/ttyUSB0 --baud 9600 --type holding
//! ```

use clap::Parser;
use modbus_fast_probe::{ProbeArgs, run};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ProbeArgs::parse();

    // stdout carries the JSON report only
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let report = match run(&args).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    match serde_json::to_string(&report) {
        Ok(line) => {
            println!("{}", line);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to encode result: {}", e);
            ExitCode::FAILURE
        }
    }
}
