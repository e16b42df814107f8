use crate::{Envelope, Transport};

/// A [`Transport`] that writes envelopes to standard output.
///
/// This is mainly useful for debugging a client setup without a collector,
/// or for piping envelopes into another process.
#[derive(Debug, Default)]
pub struct StdoutTransport;

impl StdoutTransport {
    /// Creates a new Transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for StdoutTransport {
    fn send_envelope(&self, envelope: Envelope) {
        let stdout = std::io::stdout();
        if let Err(err) = envelope.to_writer(stdout.lock()) {
            flare_debug!("Failed to write envelope to stdout: {}", err);
        }
    }
}
