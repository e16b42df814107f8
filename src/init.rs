use std::borrow::Cow;
use std::env;
use std::sync::Arc;

use crate::transports::DefaultTransportFactory;
use crate::{Client, ClientOptions, Dsn, Hub};

/// Helper struct that is returned from `init`.
///
/// When this is dropped events are drained with the configured shutdown
/// timeout.
#[must_use = "when the init guard is dropped the transport will be shut down and no further \
              events can be sent.  If you do want to ignore this use mem::forget on it."]
pub struct ClientInitGuard(Arc<Client>);

impl std::ops::Deref for ClientInitGuard {
    type Target = Client;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ClientInitGuard {
    /// Quick check if the client is enabled.
    pub fn is_enabled(&self) -> bool {
        self.0.is_enabled()
    }

    /// Flush and shut down the client.
    pub fn close(&self, timeout: Option<std::time::Duration>) -> bool {
        self.0.close(timeout)
    }
}

impl Drop for ClientInitGuard {
    fn drop(&mut self) {
        if self.is_enabled() {
            flare_debug!("dropping client guard -> disposing client");
        } else {
            flare_debug!("dropping client guard (no client to dispose)");
        }
        self.0.close(None);
    }
}

/// Creates the telemetry client for a given configuration and binds it.
///
/// This returns a client init guard that must be kept in scope, and will
/// help the client send events before the application closes. When the
/// guard is dropped the transport that was initialized shuts down and no
/// further events can be sent on it.
///
/// If you don't want (or can't) keep the guard around it's permissible to
/// call `mem::forget` on it.
///
/// # Examples
///
/// ```
/// let _guard = flare::init("https://key@flare.example.com/1234");
/// ```
///
/// The guard returned can also be inspected to see if a client has been
/// created to enable further configuration:
///
/// ```
/// let guard = flare::init(flare::ClientOptions {
///     release: Some("foo-bar-baz@1.0.0".into()),
///     ..Default::default()
/// });
/// if guard.is_enabled() {
///     // further setup
/// }
/// ```
pub fn init<C: Into<ClientOptions>>(opts: C) -> ClientInitGuard {
    let opts = apply_defaults(opts.into());
    let auto_session_tracking = opts.auto_session_tracking;
    let client = Arc::new(Client::from_config(opts));

    Hub::with(|hub| hub.bind_client(Some(client.clone())));
    if auto_session_tracking {
        crate::start_session();
    }

    if let Some(dsn) = client.dsn() {
        flare_debug!("enabled client for DSN {}", dsn);
    } else {
        flare_debug!("initialized disabled client due to disabled or invalid DSN");
    }
    ClientInitGuard(client)
}

/// Resolve options which are left unset from the environment.
pub fn apply_defaults(mut opts: ClientOptions) -> ClientOptions {
    if opts.transport.is_none() {
        opts.transport = Some(Arc::new(DefaultTransportFactory));
    }
    if opts.dsn.is_none() {
        opts.dsn = env::var("FLARE_DSN")
            .ok()
            .and_then(|dsn| dsn.parse::<Dsn>().ok());
    }
    if opts.release.is_none() {
        opts.release = env::var("FLARE_RELEASE").ok().map(Cow::Owned);
    }
    if opts.environment.is_none() {
        opts.environment = env::var("FLARE_ENVIRONMENT")
            .ok()
            .map(Cow::Owned)
            .or_else(|| {
                Some(Cow::Borrowed(if cfg!(debug_assertions) {
                    "debug"
                } else {
                    "release"
                }))
            });
    }
    if opts.http_proxy.is_none() {
        opts.http_proxy = env::var("HTTP_PROXY")
            .ok()
            .map(Cow::Owned)
            .or_else(|| env::var("http_proxy").ok().map(Cow::Owned));
    }
    if opts.https_proxy.is_none() {
        opts.https_proxy = env::var("HTTPS_PROXY")
            .ok()
            .map(Cow::Owned)
            .or_else(|| env::var("https_proxy").ok().map(Cow::Owned))
            .or_else(|| opts.http_proxy.clone());
    }
    opts
}
