use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::USER_AGENT;
use crate::performance::TransactionContext;
use crate::protocol::{Breadcrumb, Event, Transaction};
use crate::scope::ScopeObserver;
use crate::{Dsn, IntoDsn, TransportFactory};

/// Type alias for before event/breadcrumb handlers.
pub type BeforeCallback<T> = Arc<dyn Fn(T) -> Option<T> + Send + Sync>;

/// Type alias for the `traces_sampler` callback.
pub type TracesSampler = dyn Fn(&TransactionContext) -> f32 + Send + Sync;

/// The Session Mode of the SDK.
///
/// Depending on the use-case, the SDK can be set to two different session modes:
///
/// **Application Mode Sessions**:
/// This mode should be used for user-attended programs, which typically have
/// a single long running session that span the applications runtime.
///
/// **Request Mode Sessions**:
/// This mode is intended for servers that use one session per incoming
/// request, and thus have a lot of very short lived sessions. Sessions in
/// this mode are aggregated before submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Long running application session.
    Application,
    /// Lots of short per-request sessions.
    Request,
}

/// Configuration settings for the client.
///
/// # Examples
///
/// ```
/// let _options = flare::ClientOptions {
///     debug: true,
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct ClientOptions {
    // Common options
    /// The DSN to use.  If not set the client is effectively disabled.
    pub dsn: Option<Dsn>,
    /// Enables debug mode.
    ///
    /// In debug mode debug information is printed to stderr to help you
    /// understand what the SDK is doing.  When the `debug-logs` feature is
    /// enabled, the SDK will instead log to the `flare` logger independently
    /// of this flag with the `Debug` level.
    pub debug: bool,
    /// The release to be sent with events.
    pub release: Option<Cow<'static, str>>,
    /// The environment to be sent with events.
    pub environment: Option<Cow<'static, str>>,
    /// The sample rate for event submission. (0.0 - 1.0, defaults to 1.0)
    pub sample_rate: f32,
    /// The sample rate for tracing transactions. (0.0 - 1.0, defaults to 0.0)
    pub traces_sample_rate: f32,
    /// If given, called with a [`TransactionContext`] for each transaction to
    /// determine the sampling rate, taking precedence over
    /// `traces_sample_rate`.
    ///
    /// Return a rate between 0.0 (exclude the transaction) and 1.0 (include
    /// all transactions).
    pub traces_sampler: Option<Arc<TracesSampler>>,
    /// Maximum number of breadcrumbs held on the scope. (defaults to 100)
    pub max_breadcrumbs: usize,
    /// The server name to be reported.
    pub server_name: Option<Cow<'static, str>>,
    // Hooks
    /// Callback that is executed before event sending.
    pub before_send: Option<BeforeCallback<Event<'static>>>,
    /// Callback that is executed before a transaction is sent.
    pub before_send_transaction: Option<BeforeCallback<Transaction<'static>>>,
    /// Callback that is executed for each Breadcrumb being added.
    pub before_breadcrumb: Option<BeforeCallback<Breadcrumb>>,
    /// Observers that are notified synchronously about scope changes.
    pub scope_observers: Vec<Arc<dyn ScopeObserver>>,
    // Transport options
    /// The transport to use.
    ///
    /// This is typically either a boxed function taking the client options by
    /// reference and returning a `Transport`, a boxed `Arc<Transport>` or
    /// alternatively the `DefaultTransportFactory`.
    pub transport: Option<Arc<dyn TransportFactory>>,
    /// An optional HTTP proxy to use.
    ///
    /// This will default to the `http_proxy` environment variable.
    pub http_proxy: Option<Cow<'static, str>>,
    /// An optional HTTPS proxy to use.
    ///
    /// This will default to the `HTTPS_PROXY` environment variable
    /// or `http_proxy` if that one exists.
    pub https_proxy: Option<Cow<'static, str>>,
    /// The timeout on client drop for draining events on shutdown.
    pub shutdown_timeout: Duration,
    // Other options
    /// Enable Release Health Session tracking.
    ///
    /// When automatic session tracking is enabled, a new "application-mode"
    /// session is started at the time of `flare::init`, and will persist for
    /// the application lifetime.
    pub auto_session_tracking: bool,
    /// Determine how Sessions are being tracked.
    pub session_mode: SessionMode,
    /// The user agent that should be reported.
    pub user_agent: Cow<'static, str>,
}

impl ClientOptions {
    /// Creates new Options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates new Options and immediately configures them.
    pub fn configure<F>(f: F) -> Self
    where
        F: FnOnce(&mut ClientOptions) -> &mut ClientOptions,
    {
        let mut opts = Self::new();
        f(&mut opts);
        opts
    }

    /// Adds a scope observer to the options.
    pub fn add_scope_observer<O: ScopeObserver + 'static>(mut self, observer: O) -> Self {
        self.scope_observers.push(Arc::new(observer));
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct BeforeSend;
        let before_send = self.before_send.as_ref().map(|_| BeforeSend);
        #[derive(Debug)]
        struct BeforeSendTransaction;
        let before_send_transaction = self
            .before_send_transaction
            .as_ref()
            .map(|_| BeforeSendTransaction);
        #[derive(Debug)]
        struct BeforeBreadcrumb;
        let before_breadcrumb = self.before_breadcrumb.as_ref().map(|_| BeforeBreadcrumb);
        #[derive(Debug)]
        struct TracesSampler;
        let traces_sampler = self.traces_sampler.as_ref().map(|_| TracesSampler);
        #[derive(Debug)]
        struct TransportFactory;

        f.debug_struct("ClientOptions")
            .field("dsn", &self.dsn)
            .field("debug", &self.debug)
            .field("release", &self.release)
            .field("environment", &self.environment)
            .field("sample_rate", &self.sample_rate)
            .field("traces_sample_rate", &self.traces_sample_rate)
            .field("traces_sampler", &traces_sampler)
            .field("max_breadcrumbs", &self.max_breadcrumbs)
            .field("server_name", &self.server_name)
            .field("before_send", &before_send)
            .field("before_send_transaction", &before_send_transaction)
            .field("before_breadcrumb", &before_breadcrumb)
            .field("scope_observers", &self.scope_observers.len())
            .field("transport", &TransportFactory)
            .field("http_proxy", &self.http_proxy)
            .field("https_proxy", &self.https_proxy)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("auto_session_tracking", &self.auto_session_tracking)
            .field("session_mode", &self.session_mode)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for ClientOptions {
    fn default() -> ClientOptions {
        ClientOptions {
            dsn: None,
            debug: false,
            release: None,
            environment: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.0,
            traces_sampler: None,
            max_breadcrumbs: 100,
            server_name: None,
            before_send: None,
            before_send_transaction: None,
            before_breadcrumb: None,
            scope_observers: vec![],
            transport: None,
            http_proxy: None,
            https_proxy: None,
            shutdown_timeout: Duration::from_secs(2),
            auto_session_tracking: false,
            session_mode: SessionMode::Application,
            user_agent: Cow::Borrowed(USER_AGENT),
        }
    }
}

impl<T: IntoDsn> From<(T, ClientOptions)> for ClientOptions {
    fn from((into_dsn, mut opts): (T, ClientOptions)) -> ClientOptions {
        opts.dsn = into_dsn.into_dsn().expect("invalid value for DSN");
        opts
    }
}

impl<T: IntoDsn> From<T> for ClientOptions {
    fn from(into_dsn: T) -> ClientOptions {
        ClientOptions {
            dsn: into_dsn.into_dsn().expect("invalid value for DSN"),
            ..ClientOptions::default()
        }
    }
}
