//! This crate implements a telemetry client for error events and trace
//! data, centered around the concepts of [`Client`], [`Hub`] and [`Scope`].
//!
//! Events are enriched from a stack of scopes, framed into envelopes and
//! handed to a [`Transport`] which posts them to a collector on a background
//! worker thread. The crate also tracks release health sessions and supports
//! distributed tracing via transactions and spans.
//!
//! # Quick start
//!
//! ```
//! let _guard = flare::init(flare::ClientOptions {
//!     release: Some("my-app@1.0.0".into()),
//!     ..Default::default()
//! });
//!
//! flare::configure_scope(|scope| {
//!     scope.set_tag("worker", "worker1");
//! });
//!
//! flare::capture_message("Hello World!", flare::Level::Info);
//! ```
//!
//! # Parallelism, Concurrency and Async
//!
//! The main concurrency primitive is the [`Hub`]. In general, all concurrent
//! code, no matter if multithreaded parallelism or futures concurrency, needs
//! to run with its own copy of a [`Hub`]. Even though the [`Hub`] is
//! internally synchronized, using it concurrently may lead to unexpected
//! results.
//!
//! For threads or tasks that are running concurrently or outlive the current
//! execution context, a new [`Hub`] needs to be created and bound for the
//! computation:
//!
//! ```
//! use std::sync::Arc;
//! use flare::Hub;
//!
//! let hub = Arc::new(Hub::new_from_top(Hub::current()));
//! let result = std::thread::spawn(|| Hub::run(hub, || 1_u32)).join();
//!
//! assert_eq!(result.unwrap(), 1);
//! ```
//!
//! # Features
//!
//! - `feature = "debug-logs"`: Uses the `log` crate for debug output, instead
//!   of printing to `stderr` when debug mode is enabled.

#![warn(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};

// macros; these need to be first to be used by other modules
#[macro_use]
mod macros;

mod api;
mod client;
mod clientoptions;
mod constants;
mod dsn;
mod error;
mod hub;
mod hub_impl;
mod init;
mod intodsn;
mod performance;
mod scope;
mod session;
mod transport;
mod utils;

pub mod protocol;
pub mod test;
pub mod transports;

// public api or exports from this crate
pub use crate::api::*;
pub use crate::client::Client;
pub use crate::clientoptions::{BeforeCallback, ClientOptions, SessionMode};
pub use crate::dsn::{Auth, Dsn, DsnParseError, ProjectId, Scheme};
pub use crate::error::{capture_error, event_from_error};
pub use crate::hub::{Hub, IntoBreadcrumbs};
pub use crate::init::{apply_defaults, init, ClientInitGuard};
pub use crate::intodsn::IntoDsn;
pub use crate::performance::*;
pub use crate::protocol::{Breadcrumb, Envelope, Level, SessionStatus, User};
pub use crate::scope::{Scope, ScopeGuard, ScopeObserver};
pub use crate::transport::{Transport, TransportFactory};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Whether debug output to stderr is currently enabled.
///
/// This is controlled through the `debug` client option.
pub fn debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

pub(crate) fn set_debug_enabled(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}
