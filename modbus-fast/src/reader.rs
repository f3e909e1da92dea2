//! Register reads normalized to a fixed-length bit sequence.

use crate::config::RegisterKind;
use crate::transport::{ModbusTransport, RawReadResult, TransportAdapter};
use tracing::debug;

/// Reads one kind of register and turns the answer into `count` booleans.
///
/// Registers are reduced to "nonzero means true": the poller watches status
/// bits packed into registers, not numeric telemetry, so magnitudes are
/// discarded on purpose.
pub struct RegisterReader<T> {
    adapter: TransportAdapter<T>,
}

impl<T: ModbusTransport> RegisterReader<T> {
    pub fn new(adapter: TransportAdapter<T>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &TransportAdapter<T> {
        &self.adapter
    }

    pub async fn connect(&mut self) -> bool {
        self.adapter.connect().await
    }

    pub async fn close(&mut self) {
        self.adapter.close().await
    }

    /// Read `count` points starting at `address`.
    ///
    /// Returns `None` on any failure: transport errors, timeouts and
    /// exception responses alike. Never panics on short or long answers.
    pub async fn read_booleans(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Option<Vec<bool>> {
        match self.adapter.read(kind, address, count).await {
            Ok(RawReadResult::Bits(bits)) => Some(fit_to_count(bits, count)),
            Ok(RawReadResult::Registers(words)) => {
                let bits = words.into_iter().map(|word| word != 0).collect();
                Some(fit_to_count(bits, count))
            }
            Ok(RawReadResult::Exception(exception)) => {
                debug!(
                    register_type = %kind,
                    address,
                    count,
                    exception = %exception,
                    "Device reported an exception"
                );
                None
            }
            Err(e) => {
                debug!(register_type = %kind, address, count, error = %e, "Poll error");
                None
            }
        }
    }
}

/// Truncate or pad (with `false`) to exactly `count` entries.
///
/// Coil responses arrive rounded up to whole bytes.
fn fit_to_count(mut bits: Vec<bool>, count: u16) -> Vec<bool> {
    bits.resize(usize::from(count), false);
    bits
}
