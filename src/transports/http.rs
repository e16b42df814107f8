use std::time::Duration;

use ureq::{Agent, AgentBuilder, Proxy};

use super::thread::{SendOutcome, TransportThread};
use crate::dsn::Scheme;
use crate::transports::RateLimiter;
use crate::{ClientOptions, Envelope, Transport};

/// A [`Transport`] that sends envelopes over HTTP via the [`ureq`] library.
pub struct HttpTransport {
    thread: TransportThread,
}

impl HttpTransport {
    /// Creates a new Transport.
    pub fn new(options: &ClientOptions) -> Self {
        Self::new_internal(options, None, 0)
    }

    /// Creates a new Transport that uses the specified [`ureq::Agent`].
    pub fn with_agent(options: &ClientOptions, agent: Agent) -> Self {
        Self::new_internal(options, Some(agent), 0)
    }

    pub(super) fn new_internal(
        options: &ClientOptions,
        agent: Option<Agent>,
        retry_buffer: usize,
    ) -> Self {
        let dsn = options.dsn.as_ref().unwrap();
        let scheme = dsn.scheme();
        let agent = agent.unwrap_or_else(|| {
            let mut builder = AgentBuilder::new();

            match (scheme, &options.http_proxy, &options.https_proxy) {
                (Scheme::Https, _, Some(proxy)) => match Proxy::new(proxy.as_ref()) {
                    Ok(proxy) => {
                        builder = builder.proxy(proxy);
                    }
                    Err(err) => {
                        flare_debug!("invalid proxy: {:?}", err);
                    }
                },
                (_, Some(proxy), _) => match Proxy::new(proxy.as_ref()) {
                    Ok(proxy) => {
                        builder = builder.proxy(proxy);
                    }
                    Err(err) => {
                        flare_debug!("invalid proxy: {:?}", err);
                    }
                },
                _ => {}
            }

            builder.build()
        });
        let user_agent = options.user_agent.clone();
        let auth = dsn.to_auth(Some(&user_agent)).to_string();
        let url = dsn.envelope_api_url().to_string();

        let thread = TransportThread::new(retry_buffer, move |envelope, rl| {
            send_envelope(&agent, &url, &auth, envelope, rl)
        });
        Self { thread }
    }
}

fn send_envelope(
    agent: &Agent,
    url: &str,
    auth: &str,
    envelope: &Envelope,
    rl: &mut RateLimiter,
) -> SendOutcome {
    let mut body = Vec::new();
    if let Err(err) = envelope.to_writer(&mut body) {
        flare_debug!("Failed to serialize envelope: {}", err);
        // not retryable, drop it
        return SendOutcome::Success;
    }
    let request = agent.post(url).set("X-Flare-Auth", auth).send_bytes(&body);

    match request {
        Ok(response) => {
            if let Some(limits) = response.header("x-flare-rate-limits") {
                rl.update_from_limits_header(limits);
            } else if let Some(retry_after) = response.header("retry-after") {
                rl.update_from_retry_after(retry_after);
            }

            match response.into_string() {
                Err(err) => {
                    flare_debug!("Failed to read collector response: {}", err);
                }
                Ok(text) => {
                    flare_debug!("Get response: `{}`", text);
                }
            }
            SendOutcome::Success
        }
        Err(ureq::Error::Status(429, response)) => {
            if let Some(limits) = response.header("x-flare-rate-limits") {
                rl.update_from_limits_header(limits);
            } else if let Some(retry_after) = response.header("retry-after") {
                rl.update_from_retry_after(retry_after);
            } else {
                rl.update_from_429();
            }
            let backoff = rl
                .is_disabled(super::RateLimitingCategory::Any)
                .unwrap_or_default();
            flare_debug!(
                "Envelope was rate limited for {}s",
                backoff.as_secs()
            );
            SendOutcome::RateLimited(backoff)
        }
        Err(ureq::Error::Status(code, _)) => {
            flare_debug!("Failed to send envelope: collector responded with {}", code);
            SendOutcome::Failure
        }
        Err(err) => {
            flare_debug!("Failed to send envelope: {}", err);
            SendOutcome::Failure
        }
    }
}

impl Transport for HttpTransport {
    fn send_envelope(&self, envelope: Envelope) {
        self.thread.send(envelope)
    }

    fn flush(&self, timeout: Duration) -> bool {
        self.thread.flush(timeout)
    }

    fn shutdown(&self, timeout: Duration) -> bool {
        self.flush(timeout)
    }
}
