//! The provided transports.
//!
//! This module exposes the transports that ship with the library. All of
//! them frame outgoing payloads as envelopes; the HTTP variants post them
//! to the collector endpoint derived from the DSN on a background worker
//! thread.

use std::sync::Arc;

use crate::{ClientOptions, Transport, TransportFactory};

mod ratelimit;
mod thread;

mod http;
pub use http::HttpTransport;

mod buffered;
pub use buffered::BufferedHttpTransport;

mod stdout;
pub use stdout::StdoutTransport;

pub use ratelimit::{RateLimiter, RateLimitingCategory};

/// The default transport factory.
///
/// Creates an [`HttpTransport`] when the client options carry a DSN.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create_transport(&self, options: &ClientOptions) -> Arc<dyn Transport> {
        Arc::new(HttpTransport::new(options))
    }
}
