use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{protocol, Client, Hub};

const MAX_SPANS: usize = 1_000;

// global API:

/// Start a new tracing transaction.
///
/// The transaction needs to be explicitly finished via [`Transaction::finish`],
/// otherwise it will be discarded.
/// The transaction itself also represents the root span in the span hierarchy.
/// Child spans can be started with the [`Transaction::start_child`] method.
pub fn start_transaction(ctx: TransactionContext) -> Transaction {
    let client = Hub::with_active(|hub| hub.client());
    Transaction::new(client, ctx)
}

// Hub API:

impl Hub {
    /// Start a new tracing transaction.
    ///
    /// See the global [`start_transaction`] for more documentation.
    pub fn start_transaction(&self, ctx: TransactionContext) -> Transaction {
        Transaction::new(self.client(), ctx)
    }
}

// "Context" Types:

/// Arbitrary data passed along to the `traces_sampler` callback.
pub type CustomTransactionContext = BTreeMap<String, protocol::Value>;

/// The Transaction Context used to start a new tracing transaction.
///
/// The Transaction Context defines the metadata for a tracing transaction, and
/// also the connection point for distributed tracing.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    name: String,
    op: String,
    trace_id: protocol::TraceId,
    parent_span_id: Option<protocol::SpanId>,
    sampled: Option<bool>,
    custom: Option<CustomTransactionContext>,
}

impl TransactionContext {
    /// Creates a new Transaction Context with the given `name` and `op`.
    ///
    /// See also the [`TransactionContext::continue_from_headers`] function that
    /// can be used for distributed tracing.
    #[must_use = "this must be used with `start_transaction`"]
    pub fn new(name: &str, op: &str) -> Self {
        Self::continue_from_headers(name, op, vec![])
    }

    /// Creates a new Transaction Context based on the distributed tracing `headers`.
    ///
    /// The `headers` in particular need to include the `flare-trace` header,
    /// which is used to associate the transaction with a distributed trace.
    /// The header name is matched case-insensitively.  A malformed header
    /// value is logged and ignored, in which case a fresh trace is started
    /// and no sampling decision is inherited.
    #[must_use = "this must be used with `start_transaction`"]
    pub fn continue_from_headers<'a, I: IntoIterator<Item = (&'a str, &'a str)>>(
        name: &str,
        op: &str,
        headers: I,
    ) -> Self {
        let mut trace = None;
        for (k, v) in headers.into_iter() {
            if k.eq_ignore_ascii_case("flare-trace") {
                trace = parse_trace_header(v);
                if trace.is_none() {
                    flare_debug!("invalid flare-trace header {:?}, starting a new trace", v);
                }
            }
        }

        let (trace_id, parent_span_id, sampled) = match trace {
            Some(trace) => (trace.trace_id, Some(trace.span_id), trace.sampled),
            None => (protocol::TraceId::default(), None, None),
        };

        Self {
            name: name.into(),
            op: op.into(),
            trace_id,
            parent_span_id,
            sampled,
            custom: None,
        }
    }

    /// Creates a new Transaction Context based on an existing Span.
    ///
    /// This should be used when an independent computation is spawned on
    /// another thread and should be connected to the calling thread via a
    /// distributed tracing transaction.
    pub fn continue_from_span(name: &str, op: &str, span: Option<TransactionOrSpan>) -> Self {
        let span = match span {
            Some(span) => span,
            None => return Self::new(name, op),
        };

        let (trace_id, parent_span_id, sampled) = match span {
            TransactionOrSpan::Transaction(transaction) => {
                let inner = transaction
                    .inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                (
                    inner.context.trace_id,
                    inner.context.span_id,
                    Some(inner.sampled),
                )
            }
            TransactionOrSpan::Span(span) => {
                let sampled = span.sampled;
                let span = span.span.lock().unwrap_or_else(PoisonError::into_inner);
                (span.trace_id, span.span_id, Some(sampled))
            }
        };

        Self {
            name: name.into(),
            op: op.into(),
            trace_id,
            parent_span_id: Some(parent_span_id),
            sampled,
            custom: None,
        }
    }

    /// Set the sampling decision for this Transaction.
    ///
    /// This can be either an explicit boolean flag, or [`None`], which will
    /// fall back to use the configured `traces_sampler` or
    /// `traces_sample_rate` option.
    pub fn set_sampled(&mut self, sampled: impl Into<Option<bool>>) {
        self.sampled = sampled.into();
    }

    /// The name of the transaction to be started.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operation of the transaction to be started.
    pub fn operation(&self) -> &str {
        &self.op
    }

    /// The trace id the transaction belongs to.
    pub fn trace_id(&self) -> protocol::TraceId {
        self.trace_id
    }

    /// The inherited sampling decision, if any.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// The custom data attached to this context.
    pub fn custom(&self) -> Option<&CustomTransactionContext> {
        self.custom.as_ref()
    }

    /// Attaches a custom key/value pair, available to the `traces_sampler`.
    pub fn custom_insert(&mut self, key: String, value: protocol::Value) {
        self.custom.get_or_insert_with(Default::default).insert(key, value);
    }
}

// global API types:

/// A wrapper that groups a [`Transaction`] and a [`Span`] together.
#[derive(Clone, Debug)]
pub enum TransactionOrSpan {
    /// A [`Transaction`].
    Transaction(Transaction),
    /// A [`Span`].
    Span(Span),
}

impl From<Transaction> for TransactionOrSpan {
    fn from(transaction: Transaction) -> Self {
        Self::Transaction(transaction)
    }
}

impl From<Span> for TransactionOrSpan {
    fn from(span: Span) -> Self {
        Self::Span(span)
    }
}

impl TransactionOrSpan {
    /// Set some extra information to be sent with this Transaction/Span.
    pub fn set_data(&self, key: &str, value: protocol::Value) {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.set_data(key, value),
            TransactionOrSpan::Span(span) => span.set_data(key, value),
        }
    }

    /// Get the status of the Transaction/Span.
    pub fn get_status(&self) -> Option<protocol::SpanStatus> {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.get_status(),
            TransactionOrSpan::Span(span) => span.get_status(),
        }
    }

    /// Set the status of the Transaction/Span.
    pub fn set_status(&self, status: protocol::SpanStatus) {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.set_status(status),
            TransactionOrSpan::Span(span) => span.set_status(status),
        }
    }

    /// Set the HTTP request information for this Transaction/Span.
    pub fn set_request(&self, request: protocol::Request) {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.set_request(request),
            TransactionOrSpan::Span(span) => span.set_request(request),
        }
    }

    /// Returns the headers needed for distributed tracing.
    pub fn iter_headers(&self) -> TraceHeadersIter {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.iter_headers(),
            TransactionOrSpan::Span(span) => span.iter_headers(),
        }
    }

    /// Starts a new child Span with the given `op` and `description`.
    ///
    /// The span is added to its transaction right away and needs to be
    /// explicitly finished via [`Span::finish`] to get an end timestamp.
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.start_child(op, description),
            TransactionOrSpan::Span(span) => span.start_child(op, description),
        }
    }

    /// Resolves the deepest part of the trace that is still running.
    ///
    /// A transaction resolves to its most recently started unfinished child
    /// span, or to itself when none is active; a span resolves to itself.
    pub fn latest_active_span(&self) -> TransactionOrSpan {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.latest_active_span(),
            TransactionOrSpan::Span(span) => TransactionOrSpan::Span(span.clone()),
        }
    }

    pub(crate) fn apply_to_event(&self, event: &mut protocol::Event<'_>) {
        if event.contexts.contains_key("trace") {
            return;
        }

        let context = match self {
            TransactionOrSpan::Transaction(transaction) => transaction
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .context
                .clone(),
            TransactionOrSpan::Span(span) => {
                let span = span.span.lock().unwrap_or_else(PoisonError::into_inner);
                protocol::TraceContext {
                    span_id: span.span_id,
                    trace_id: span.trace_id,
                    ..Default::default()
                }
            }
        };
        event.contexts.insert("trace".into(), context.into());
    }

    /// Finishes the Transaction/Span.
    ///
    /// This records the end timestamp and either submits the inner
    /// [`Transaction`] to the client, or marks the [`Span`] as finished.
    pub fn finish(self) {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.finish(),
            TransactionOrSpan::Span(span) => span.finish(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransactionInner {
    client: Option<Arc<Client>>,
    sampled: bool,
    context: protocol::TraceContext,
    pub(crate) transaction: Option<protocol::Transaction<'static>>,
    spans: Vec<SpanArc>,
}

pub(crate) type TransactionArc = Arc<Mutex<TransactionInner>>;

/// A running tracing transaction.
///
/// The transaction needs to be explicitly finished via [`Transaction::finish`],
/// otherwise neither the transaction nor any of its child spans will be
/// submitted.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub(crate) inner: TransactionArc,
}

impl Transaction {
    fn new(mut client: Option<Arc<Client>>, ctx: TransactionContext) -> Self {
        let context = protocol::TraceContext {
            trace_id: ctx.trace_id,
            parent_span_id: ctx.parent_span_id,
            op: Some(ctx.op.clone()),
            ..Default::default()
        };

        // The sampling decision is made exactly once, here. An inherited
        // decision is honored verbatim, children only ever copy it.
        let (sampled, mut transaction) = match client.as_ref() {
            Some(client) => (
                ctx.sampled
                    .unwrap_or_else(|| client.is_transaction_sampled(&ctx)),
                Some(protocol::Transaction {
                    name: Some(ctx.name),
                    ..Default::default()
                }),
            ),
            None => (ctx.sampled.unwrap_or(false), None),
        };

        // throw away the transaction here, which means there is nothing to
        // send on `finish`.
        if !sampled {
            transaction = None;
            client = None;
        }

        Self {
            inner: Arc::new(Mutex::new(TransactionInner {
                client,
                sampled,
                context,
                transaction,
                spans: vec![],
            })),
        }
    }

    /// Set some extra information to be sent with this Transaction.
    pub fn set_data(&self, key: &str, value: protocol::Value) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(transaction) = inner.transaction.as_mut() {
            transaction.extra.insert(key.into(), value);
        }
    }

    /// Get the status of the Transaction.
    pub fn get_status(&self) -> Option<protocol::SpanStatus> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.context.status
    }

    /// Set the status of the Transaction.
    pub fn set_status(&self, status: protocol::SpanStatus) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.context.status = Some(status);
    }

    /// Set the HTTP request information for this Transaction.
    pub fn set_request(&self, request: protocol::Request) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(transaction) = inner.transaction.as_mut() {
            transaction.request = Some(request);
        }
    }

    /// Returns the headers needed for distributed tracing.
    pub fn iter_headers(&self) -> TraceHeadersIter {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let trace = PropagatedTrace::new(
            inner.context.trace_id,
            inner.context.span_id,
            Some(inner.sampled),
        );
        TraceHeadersIter::new(trace.to_string())
    }

    /// Returns the most recently started span that has not been finished yet,
    /// falling back to the transaction itself.
    pub fn latest_active_span(&self) -> TransactionOrSpan {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for span in inner.spans.iter().rev() {
            if !span.lock().unwrap_or_else(PoisonError::into_inner).is_finished() {
                return TransactionOrSpan::Span(Span {
                    transaction: Arc::clone(&self.inner),
                    sampled: inner.sampled,
                    span: Arc::clone(span),
                });
            }
        }
        TransactionOrSpan::Transaction(self.clone())
    }

    /// Finishes the Transaction.
    ///
    /// This records the end timestamp and submits the transaction together
    /// with all finished child spans to the client. Spans that were started
    /// but never finished are dropped.
    pub fn finish(self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut transaction) = inner.transaction.take() {
            if let Some(client) = inner.client.take() {
                transaction.finish();
                // A status set by error handling elsewhere sticks.
                if inner.context.status.is_none() {
                    inner.context.status = Some(protocol::SpanStatus::Ok);
                }
                transaction.spans = inner
                    .spans
                    .iter()
                    .filter_map(|span| {
                        let span = span.lock().unwrap_or_else(PoisonError::into_inner);
                        span.is_finished().then(|| span.clone())
                    })
                    .collect();
                transaction
                    .contexts
                    .insert("trace".into(), inner.context.clone().into());

                drop(inner);

                let scope = Hub::with_active(|hub| hub.with_current_scope(Clone::clone));
                client.capture_transaction(transaction, Some(&scope));
            }
        }
    }

    /// Starts a new child Span with the given `op` and `description`.
    ///
    /// The span is registered with the transaction immediately; it still must
    /// be explicitly finished via [`Span::finish`] to receive an end
    /// timestamp. Once the transaction holds its maximum number of spans,
    /// newly started spans are no longer recorded but remain usable handles.
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let span = protocol::Span {
            trace_id: inner.context.trace_id,
            parent_span_id: Some(inner.context.span_id),
            op: Some(op.into()),
            description: if description.is_empty() {
                None
            } else {
                Some(description.into())
            },
            ..Default::default()
        };
        let span = Arc::new(Mutex::new(span));
        if inner.transaction.is_some() && inner.spans.len() < MAX_SPANS {
            inner.spans.push(Arc::clone(&span));
        }
        Span {
            transaction: Arc::clone(&self.inner),
            sampled: inner.sampled,
            span,
        }
    }
}

/// A running span of a tracing transaction.
///
/// The span needs to be explicitly finished via [`Span::finish`], otherwise it
/// is dropped when its transaction finishes.
#[derive(Clone, Debug)]
pub struct Span {
    pub(crate) transaction: TransactionArc,
    sampled: bool,
    span: SpanArc,
}

type SpanArc = Arc<Mutex<protocol::Span>>;

impl Span {
    /// Set some extra information to be sent with this Span.
    pub fn set_data(&self, key: &str, value: protocol::Value) {
        let mut span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        span.data.insert(key.into(), value);
    }

    /// Get the status of the Span.
    pub fn get_status(&self) -> Option<protocol::SpanStatus> {
        let span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        span.status
    }

    /// Set the status of the Span.
    pub fn set_status(&self, status: protocol::SpanStatus) {
        let mut span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        span.status = Some(status);
    }

    /// Set the HTTP request information for this Span.
    pub fn set_request(&self, request: protocol::Request) {
        let mut span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        // Extract values from the request to be used as data in the span.
        if let Some(method) = request.method {
            span.data.insert("method".into(), method.into());
        }
        if let Some(url) = request.url {
            span.data.insert("url".into(), url.to_string().into());
        }
        if let Some(data) = request.data {
            if let Ok(data) = serde_json::from_str::<serde_json::Value>(&data) {
                span.data.insert("data".into(), data);
            } else {
                span.data.insert("data".into(), data.into());
            }
        }
        if let Some(query_string) = request.query_string {
            span.data.insert("query_string".into(), query_string.into());
        }
        if let Some(cookies) = request.cookies {
            span.data.insert("cookies".into(), cookies.into());
        }
        if !request.headers.is_empty() {
            if let Ok(headers) = serde_json::to_value(request.headers) {
                span.data.insert("headers".into(), headers);
            }
        }
        if !request.env.is_empty() {
            if let Ok(env) = serde_json::to_value(request.env) {
                span.data.insert("env".into(), env);
            }
        }
    }

    /// Returns the headers needed for distributed tracing.
    pub fn iter_headers(&self) -> TraceHeadersIter {
        let span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        let trace = PropagatedTrace::new(span.trace_id, span.span_id, Some(self.sampled));
        TraceHeadersIter::new(trace.to_string())
    }

    /// Whether this span has already been finished.
    pub fn is_finished(&self) -> bool {
        self.span
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_finished()
    }

    /// Finishes the Span.
    ///
    /// This records the end timestamp. Finishing a span twice is a no-op; the
    /// first end timestamp sticks.
    pub fn finish(self) {
        let mut span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        if span.is_finished() {
            return;
        }
        if span.status.is_none() {
            span.status = Some(protocol::SpanStatus::Ok);
        }
        span.finish();
    }

    /// Starts a new child Span with the given `op` and `description`.
    ///
    /// The span is registered with the transaction immediately and must be
    /// explicitly finished via [`Span::finish`].
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        let span = {
            let span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
            protocol::Span {
                trace_id: span.trace_id,
                parent_span_id: Some(span.span_id),
                op: Some(op.into()),
                description: if description.is_empty() {
                    None
                } else {
                    Some(description.into())
                },
                ..Default::default()
            }
        };
        let span = Arc::new(Mutex::new(span));
        {
            let mut inner = self
                .transaction
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if inner.transaction.is_some() && inner.spans.len() < MAX_SPANS {
                inner.spans.push(Arc::clone(&span));
            }
        }
        Span {
            transaction: Arc::clone(&self.transaction),
            sampled: self.sampled,
            span,
        }
    }
}

/// The name of the propagation header yielded by [`TraceHeadersIter`].
pub type TraceHeader = (&'static str, String);

/// An Iterator over HTTP header names and values needed for distributed
/// tracing.
///
/// This currently only yields the `flare-trace` header, but other headers may
/// be added in the future.
pub struct TraceHeadersIter {
    trace: Option<String>,
}

impl TraceHeadersIter {
    pub(crate) fn new(trace: String) -> Self {
        Self { trace: Some(trace) }
    }
}

impl Iterator for TraceHeadersIter {
    type Item = TraceHeader;

    fn next(&mut self) -> Option<Self::Item> {
        self.trace.take().map(|t| ("flare-trace", t))
    }
}

/// The deserialized value of a `flare-trace` propagation header.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PropagatedTrace {
    pub(crate) trace_id: protocol::TraceId,
    pub(crate) span_id: protocol::SpanId,
    pub(crate) sampled: Option<bool>,
}

impl PropagatedTrace {
    pub(crate) fn new(
        trace_id: protocol::TraceId,
        span_id: protocol::SpanId,
        sampled: Option<bool>,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }
}

impl Default for PropagatedTrace {
    fn default() -> Self {
        Self {
            trace_id: protocol::TraceId::default(),
            span_id: protocol::SpanId::default(),
            sampled: None,
        }
    }
}

fn parse_trace_header(header: &str) -> Option<PropagatedTrace> {
    let header = header.trim();
    let mut parts = header.splitn(3, '-');

    let trace_id = parts.next()?.parse().ok()?;
    let span_id = parts.next()?.parse().ok()?;
    // A sampling flag other than a literal `1` or `0` invalidates the whole
    // header rather than silently continuing the trace undecided.
    let sampled = match parts.next() {
        Some("1") => Some(true),
        Some("0") => Some(false),
        Some(_) => return None,
        None => None,
    };

    Some(PropagatedTrace::new(trace_id, span_id, sampled))
}

impl fmt::Display for PropagatedTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.trace_id, self.span_id)?;
        if let Some(sampled) = self.sampled {
            write!(f, "-{}", if sampled { '1' } else { '0' })?;
        }
        Ok(())
    }
}
