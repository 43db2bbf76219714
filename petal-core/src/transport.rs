//! transport.rs — Hardware transport boundary
//!
//! The petalcontroller is an external collaborator. The scheduler hands it
//! finalized hardware tables in one synchronous round trip and interprets the
//! structured response; it never retries on its own.

use std::time::Duration;

use fp_types::{HardwareTable, SendResponse};

/// Design timeout for one send-and-sync round trip. Exceeding it is reported
/// by the transport as `no_response` for the undelivered tables.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub trait PetalTransport {
    /// Deliver the tables and issue the sync pulse. Blocking; returns the
    /// structured response taxonomy.
    fn send_and_sync(&mut self, tables: &[HardwareTable], timeout: Duration) -> SendResponse;
}

/// Transport that acknowledges everything. Used where no hardware exists.
#[derive(Debug, Default)]
pub struct NullTransport;

impl PetalTransport for NullTransport {
    fn send_and_sync(&mut self, _tables: &[HardwareTable], _timeout: Duration) -> SendResponse {
        SendResponse::Success
    }
}
