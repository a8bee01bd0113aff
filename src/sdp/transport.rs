//! USB-HID transport contract.
//!
//! The core specifies only the request/response contract over report IDs
//! 1-4; enumerating and opening an actual USB-HID device is an external
//! collaborator's job (out of scope). Callers implement
//! [`HidTransport`] over whatever HID library/device handle they have.

use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HID transport error: {0}")]
    Io(String),
    #[error("transport timed out waiting for a report")]
    Timeout,
}

/// A single HID report exchange: report ID plus payload bytes.
pub struct Report {
    pub id: u8,
    pub data: Vec<u8>,
}

/// Half-duplex USB-HID report transport.
///
/// Every call blocks the caller until the report is sent/received or
/// `timeout` elapses; there is no pipelining.
pub trait HidTransport {
    fn write_report(&mut self, id: u8, data: &[u8]) -> Result<(), TransportError>;
    fn read_report(&mut self, timeout: Duration) -> Result<Report, TransportError>;
}

/// A scripted transport for tests: a queue of reports to hand back on
/// `read_report`, and a record of everything written.
#[derive(Default)]
pub struct MockTransport {
    pub to_read: std::collections::VecDeque<Report>,
    pub written: Vec<(u8, Vec<u8>)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&mut self, id: u8, data: Vec<u8>) -> &mut Self {
        self.to_read.push_back(Report { id, data });
        self
    }
}

impl HidTransport for MockTransport {
    fn write_report(&mut self, id: u8, data: &[u8]) -> Result<(), TransportError> {
        self.written.push((id, data.to_vec()));
        Ok(())
    }

    fn read_report(&mut self, _timeout: Duration) -> Result<Report, TransportError> {
        self.to_read.pop_front().ok_or(TransportError::Timeout)
    }
}

/// Stand-in transport for the CLI front-ends: enumerating and opening a
/// real USB-HID device is an external collaborator's job , so this
/// crate ships no such backend. Every call fails with a diagnostic pointing
/// at [`HidTransport`] as the seam a real transport plugs into.
#[derive(Default)]
pub struct NullTransport;

impl HidTransport for NullTransport {
    fn write_report(&mut self, _id: u8, _data: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Io(
            "no USB-HID backend is linked into this build; implement HidTransport over your \
             platform's HID library and pass it to SdpClient::open"
                .to_string(),
        ))
    }

    fn read_report(&mut self, _timeout: Duration) -> Result<Report, TransportError> {
        Err(TransportError::Io(
            "no USB-HID backend is linked into this build; implement HidTransport over your \
             platform's HID library and pass it to SdpClient::open"
                .to_string(),
        ))
    }
}
