use std::time::Duration;

use ureq::Agent;

use super::http::HttpTransport;
use crate::{ClientOptions, Envelope, Transport};

/// How many failed envelopes are kept around for a later retry.
const DEFAULT_RETRY_BUFFER: usize = 30;

/// An [`HttpTransport`] that buffers envelopes which failed to send.
///
/// Failed envelopes, whether due to rate limiting or a network error, are
/// kept in a bounded in-memory queue and retried before new envelopes the
/// next time the worker wakes up. When the buffer is full the oldest
/// envelope is dropped first.
pub struct BufferedHttpTransport {
    inner: HttpTransport,
}

impl BufferedHttpTransport {
    /// Creates a new Transport with the default retry buffer size.
    pub fn new(options: &ClientOptions) -> Self {
        Self::with_capacity(options, DEFAULT_RETRY_BUFFER)
    }

    /// Creates a new Transport retaining up to `capacity` failed envelopes.
    pub fn with_capacity(options: &ClientOptions, capacity: usize) -> Self {
        Self {
            inner: HttpTransport::new_internal(options, None, capacity),
        }
    }

    /// Creates a new Transport that uses the specified [`ureq::Agent`].
    pub fn with_agent(options: &ClientOptions, agent: Agent) -> Self {
        Self {
            inner: HttpTransport::new_internal(options, Some(agent), DEFAULT_RETRY_BUFFER),
        }
    }
}

impl Transport for BufferedHttpTransport {
    fn send_envelope(&self, envelope: Envelope) {
        self.inner.send_envelope(envelope)
    }

    fn flush(&self, timeout: Duration) -> bool {
        self.inner.flush(timeout)
    }

    fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown(timeout)
    }
}
