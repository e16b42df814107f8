use std::borrow::Cow;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe, RefUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rand::random;
use uuid::Uuid;

use crate::clientoptions::SessionMode;
use crate::constants::SDK_INFO;
use crate::performance::TransactionContext;
use crate::protocol::{Event, SessionUpdate, Transaction};
use crate::session::SessionFlusher;
use crate::{ClientOptions, Dsn, Envelope, Hub, Scope, Transport};

impl<T: Into<ClientOptions>> From<T> for Client {
    fn from(o: T) -> Client {
        Client::with_options(o.into())
    }
}

pub(crate) type TransportArc = Arc<RwLock<Option<Arc<dyn Transport>>>>;

/// The telemetry client.
///
/// The Client is responsible for event processing and sending events to the
/// collector via the configured [`Transport`]. It can be created from a
/// [`ClientOptions`].
///
/// # Examples
///
/// ```
/// flare::Client::from(flare::ClientOptions::default());
/// ```
///
/// [`ClientOptions`]: struct.ClientOptions.html
/// [`Transport`]: trait.Transport.html
pub struct Client {
    options: ClientOptions,
    transport: TransportArc,
    session_flusher: RwLock<Option<SessionFlusher>>,
    pub(crate) sdk_info: crate::protocol::ClientSdkInfo,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("dsn", &self.dsn())
            .field("options", &self.options)
            .finish()
    }
}

impl Clone for Client {
    fn clone(&self) -> Client {
        let transport = Arc::new(RwLock::new(
            self.transport
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        ));
        let session_flusher = RwLock::new(Some(SessionFlusher::new(
            transport.clone(),
            self.options.session_mode,
        )));
        Client {
            options: self.options.clone(),
            transport,
            session_flusher,
            sdk_info: self.sdk_info.clone(),
        }
    }
}

impl Client {
    /// Creates a new client from a config.
    ///
    /// # Supported Configs
    ///
    /// The following common values are supported for the client config:
    ///
    /// * `ClientOptions`: configure the client with the given client options.
    /// * `()` or empty string: Disable the client.
    /// * `&str` / `String` / `&OsStr` / `OsString`: configure the client with the given DSN.
    /// * `Dsn` / `&Dsn`: configure the client with a given DSN.
    /// * `(Dsn, ClientOptions)`: configure the client from the given DSN and optional options.
    ///
    /// # Panics
    ///
    /// The `Into<ClientOptions>` implementations can panic for the forms
    /// where a DSN needs to be parsed.  If you want to handle invalid DSNs
    /// you need to parse them manually by calling parse on it and handle the
    /// error.
    pub fn from_config<O: Into<ClientOptions>>(opts: O) -> Client {
        Client::with_options(opts.into())
    }

    /// Creates a new client for the given options.
    ///
    /// If the DSN on the options is set to `None` the client will be entirely
    /// disabled.
    pub fn with_options(options: ClientOptions) -> Client {
        crate::set_debug_enabled(options.debug);

        // Create the main hub eagerly to avoid problems with the background
        // thread holding the first thread-local initialization.
        Hub::with(|_| {});

        let create_transport = || {
            options.dsn.as_ref()?;
            let factory = options.transport.as_ref()?;
            Some(factory.create_transport(&options))
        };

        let transport = Arc::new(RwLock::new(create_transport()));
        if transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            flare_debug!("no transport configured, the client is disabled");
        }

        let session_flusher = RwLock::new(Some(SessionFlusher::new(
            transport.clone(),
            options.session_mode,
        )));

        Client {
            options,
            transport,
            session_flusher,
            sdk_info: SDK_INFO.clone().into_owned(),
        }
    }

    /// Prepares an event for transmission to the collector.
    pub fn prepare_event(
        &self,
        mut event: Event<'static>,
        scope: Option<&Scope>,
    ) -> Option<Event<'static>> {
        // event_id and sdk_info are set before the scope is applied so that
        // event processors can poke around in that data.
        if event.event_id.is_nil() {
            event.event_id = Uuid::new_v4();
        }

        if event.sdk.is_none() {
            // NOTE: we need to clone here because `Event` must be `'static`
            event.sdk = Some(Cow::Owned(self.sdk_info.clone()));
        }

        if let Some(scope) = scope {
            event = scope.apply_to_event(event)?;
        }

        if event.release.is_none() {
            event.release.clone_from(&self.options.release);
        }
        if event.environment.is_none() {
            event.environment.clone_from(&self.options.environment);
        }
        if event.server_name.is_none() {
            event.server_name.clone_from(&self.options.server_name);
        }
        if &event.platform == "other" {
            event.platform = "native".into();
        }

        if let Some(ref func) = self.options.before_send {
            let id = event.event_id;
            // A panicking callback must not lose the event, it proceeds as
            // it stood before the callback.
            match catch_unwind(AssertUnwindSafe(|| func(event.clone()))) {
                Ok(Some(processed_event)) => event = processed_event,
                Ok(None) => {
                    flare_debug!("before_send dropped event {:?}", id);
                    return None;
                }
                Err(_) => {
                    flare_debug!("before_send panicked, sending event {:?} unchanged", id);
                }
            }
        }

        if let Some(scope) = scope {
            scope.update_session_from_event(&event);
        }

        if !self.sample_should_send(self.options.sample_rate) {
            None
        } else {
            Some(event)
        }
    }

    /// Returns the options of this client.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the DSN that constructed this client.
    pub fn dsn(&self) -> Option<&Dsn> {
        self.options.dsn.as_ref()
    }

    /// Quick check to see if the client is enabled.
    ///
    /// The Client is enabled if it has a valid DSN and Transport configured.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// let client = flare::Client::from(flare::ClientOptions::default());
    /// assert!(!client.is_enabled());
    ///
    /// let dsn = "https://public@example.com/1";
    /// let transport = flare::test::TestTransport::new();
    /// let client = flare::Client::from((
    ///     dsn,
    ///     flare::ClientOptions {
    ///         transport: Some(Arc::new(transport)),
    ///         ..Default::default()
    ///     },
    /// ));
    /// assert!(client.is_enabled());
    /// ```
    pub fn is_enabled(&self) -> bool {
        self.options.dsn.is_some()
            && self
                .transport
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    /// Captures an event and sends it to the collector.
    ///
    /// Returns the id of the captured event, or the nil id if the event was
    /// discarded along the way.
    pub fn capture_event(&self, event: Event<'static>, scope: Option<&Scope>) -> Uuid {
        if let Some(ref transport) = *self.transport.read().unwrap_or_else(PoisonError::into_inner)
        {
            if let Some(event) = self.prepare_event(event, scope) {
                let event_id = event.event_id;
                let mut envelope: Envelope = event.into();

                // For request-mode sessions, we aggregate them all instead of
                // flushing them out early.
                if self.options.session_mode == SessionMode::Application {
                    let session_item = scope.and_then(|scope| {
                        scope
                            .session
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .as_mut()
                            .and_then(|session| session.create_envelope_item())
                    });
                    if let Some(session_item) = session_item {
                        envelope.add_item(session_item);
                    }
                }

                if let Some(scope) = scope {
                    for attachment in scope.attachments.iter().cloned() {
                        envelope.add_item(attachment);
                    }
                }

                transport.send_envelope(envelope);
                return event_id;
            }
        }
        Default::default()
    }

    /// Captures a finished transaction and sends it to the collector.
    pub fn capture_transaction(
        &self,
        mut transaction: Transaction<'static>,
        scope: Option<&Scope>,
    ) {
        if let Some(ref transport) = *self.transport.read().unwrap_or_else(PoisonError::into_inner)
        {
            if let Some(scope) = scope {
                scope.apply_to_transaction(&mut transaction);
            }

            if transaction.release.is_none() {
                transaction.release.clone_from(&self.options.release);
            }
            if transaction.environment.is_none() {
                transaction
                    .environment
                    .clone_from(&self.options.environment);
            }
            if transaction.sdk.is_none() {
                transaction.sdk = Some(Cow::Owned(self.sdk_info.clone()));
            }

            if let Some(ref func) = self.options.before_send_transaction {
                let id = transaction.event_id;
                match catch_unwind(AssertUnwindSafe(|| func(transaction.clone()))) {
                    Ok(Some(processed)) => transaction = processed,
                    Ok(None) => {
                        flare_debug!("before_send_transaction dropped transaction {:?}", id);
                        return;
                    }
                    Err(_) => {
                        flare_debug!(
                            "before_send_transaction panicked, sending transaction {:?} unchanged",
                            id
                        );
                    }
                }
            }

            let mut envelope = Envelope::new();
            envelope.add_item(transaction);
            transport.send_envelope(envelope);
        }
    }

    /// Sends the specified [`Envelope`] to the collector.
    pub fn send_envelope(&self, envelope: Envelope) {
        if let Some(ref transport) = *self.transport.read().unwrap_or_else(PoisonError::into_inner)
        {
            transport.send_envelope(envelope);
        } else {
            flare_debug!("client is disabled, dropping envelope");
        }
    }

    pub(crate) fn enqueue_session(&self, session_update: SessionUpdate<'static>) {
        if let Some(ref flusher) = *self
            .session_flusher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
        {
            flusher.enqueue(session_update);
        }
    }

    /// Drains all pending events without shutting down.
    pub fn flush(&self, timeout: Option<Duration>) -> bool {
        if let Some(ref flusher) = *self
            .session_flusher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
        {
            flusher.flush();
        }
        if let Some(ref transport) = *self.transport.read().unwrap_or_else(PoisonError::into_inner)
        {
            transport.flush(timeout.unwrap_or(self.options.shutdown_timeout))
        } else {
            true
        }
    }

    /// Drains all pending events and shuts down the transport behind the
    /// client.  After shutting down the transport is removed.
    ///
    /// This returns `true` if the queue was successfully drained in the
    /// given time or `false` if not (for instance because of a timeout).
    /// If no timeout is provided the client will wait for as long a
    /// `shutdown_timeout` in the client options.
    pub fn close(&self, timeout: Option<Duration>) -> bool {
        drop(
            self.session_flusher
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let transport_opt = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(transport) = transport_opt {
            flare_debug!("client close; request transport to shut down");
            transport.shutdown(timeout.unwrap_or(self.options.shutdown_timeout))
        } else {
            flare_debug!("client close; no transport to shut down");
            true
        }
    }

    /// Returns a random boolean with a probability defined by rate.
    pub fn sample_should_send(&self, rate: f32) -> bool {
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            random::<f32>() < rate
        }
    }

    /// Makes the sampling decision for a new transaction.
    ///
    /// The `traces_sampler` callback takes precedence over the plain
    /// `traces_sample_rate` option. A panicking sampler counts as
    /// undecided and falls back to the configured rate.
    pub(crate) fn is_transaction_sampled(&self, ctx: &TransactionContext) -> bool {
        let rate = match self.options.traces_sampler {
            Some(ref sampler) => match catch_unwind(AssertUnwindSafe(|| sampler(ctx))) {
                Ok(rate) => rate,
                Err(_) => {
                    flare_debug!("traces_sampler panicked, using traces_sample_rate");
                    self.options.traces_sample_rate
                }
            },
            None => self.options.traces_sample_rate,
        };
        self.sample_should_send(rate)
    }
}

// Make this unwind safe. It's not out of the box because of the
// `BeforeCallback`s inside `ClientOptions`.
impl RefUnwindSafe for Client {}
