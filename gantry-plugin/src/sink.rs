use http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Captures the response the gateway is building: chosen status code,
/// headers, and a running byte count.
///
/// Status is write-once: the first `write_header` wins, later calls are
/// ignored and logged. Headers present at the moment of the first body
/// write are committed; mutating them afterwards is an error rather
/// than a silent no-op. The byte counter is shared with the streaming
/// body wrapper so it keeps counting after the handler returns.
pub struct ResponseSink {
    status: Option<u16>,
    headers: HeaderMap,
    bytes_written: Arc<AtomicU64>,
    committed: bool,
    body: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("response headers already committed")]
    HeadersCommitted,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl ResponseSink {
    pub fn new() -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            bytes_written: Arc::new(AtomicU64::new(0)),
            committed: false,
            body: Vec::new(),
        }
    }

    /// Record the status code. First write wins.
    pub fn write_header(&mut self, status: u16) {
        if let Some(existing) = self.status {
            warn!(existing, attempted = status, "Ignoring duplicate status write");
            return;
        }
        self.status = Some(status);
    }

    /// The chosen status code, defaulting to 200.
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn status_written(&self) -> bool {
        self.status.is_some()
    }

    /// Set a response header. Fails once the headers are committed.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), SinkError> {
        if self.committed {
            return Err(SinkError::HeadersCommitted);
        }
        let name: HeaderName = name
            .parse()
            .map_err(|_| SinkError::InvalidHeader(name.to_string()))?;
        let value: HeaderValue = value
            .parse()
            .map_err(|_| SinkError::InvalidHeader(value.to_string()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Replace the header set wholesale (used by the proxy when copying
    /// the upstream response head). Fails once committed.
    pub fn replace_headers(&mut self, headers: HeaderMap) -> Result<(), SinkError> {
        if self.committed {
            return Err(SinkError::HeadersCommitted);
        }
        self.headers = headers;
        Ok(())
    }

    /// Write body bytes directly (abort responses, plugin-written
    /// bodies). Implicitly records status 200 when none is set and
    /// commits the headers.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.status.is_none() {
            self.status = Some(200);
        }
        self.committed = true;
        self.bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.body.extend_from_slice(bytes);
    }

    /// Mark headers committed without writing a body; called when the
    /// head is handed to the wire ahead of a streamed body.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Bytes written so far, including bytes counted by the streaming
    /// wrapper after the handler returned.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Shared counter handed to the streaming body wrapper.
    pub fn byte_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_written)
    }
}

impl Default for ResponseSink {
    fn default() -> Self {
        Self::new()
    }
}
