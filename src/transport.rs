use std::sync::Arc;
use std::time::Duration;

use crate::{ClientOptions, Envelope};

/// The trait for transports.
///
/// A transport is responsible for shipping envelopes to the collector.
/// Custom implementations can be bound through
/// [`ClientOptions::transport`](crate::ClientOptions).
pub trait Transport: Send + Sync + 'static {
    /// Sends an [`Envelope`].
    fn send_envelope(&self, envelope: Envelope);

    /// Drains the transport queue if there is one.
    ///
    /// The default implementation is a no-op that reports success.
    fn flush(&self, timeout: Duration) -> bool {
        let _ = timeout;
        true
    }

    /// Instructs the transport to shut down.
    fn shutdown(&self, timeout: Duration) -> bool {
        self.flush(timeout)
    }
}

/// A factory creating transport instances.
///
/// Because the client is permitted to run in multiple processes or to be
/// reconfigured, the transport on the options is a factory rather than a
/// finished transport.  A closure taking the [`ClientOptions`] and returning
/// an `Arc<dyn Transport>` also works.
pub trait TransportFactory: Send + Sync {
    /// Given some client options, creates a transport.
    fn create_transport(&self, options: &ClientOptions) -> Arc<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn(&ClientOptions) -> Arc<dyn Transport> + Clone + Send + Sync,
{
    fn create_transport(&self, options: &ClientOptions) -> Arc<dyn Transport> {
        (*self)(options)
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn send_envelope(&self, envelope: Envelope) {
        (**self).send_envelope(envelope)
    }

    fn flush(&self, timeout: Duration) -> bool {
        (**self).flush(timeout)
    }

    fn shutdown(&self, timeout: Duration) -> bool {
        (**self).shutdown(timeout)
    }
}

impl<T: Transport> TransportFactory for Arc<T> {
    fn create_transport(&self, options: &ClientOptions) -> Arc<dyn Transport> {
        let _ = options;
        self.clone()
    }
}
