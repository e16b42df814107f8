use uuid::Uuid;

use crate::protocol::{Event, Level, SessionStatus};
use crate::{Hub, IntoBreadcrumbs, Scope};

/// Captures an event on the currently active client if any.
///
/// The event is discarded and the nil uuid returned if no client is bound to
/// the current hub.
pub fn capture_event(event: Event<'static>) -> Uuid {
    Hub::with_active(|hub| hub.capture_event(event))
}

/// Captures an arbitrary message.
///
/// # Examples
///
/// ```
/// flare::capture_message("some message", flare::Level::Info);
/// ```
pub fn capture_message(msg: &str, level: Level) -> Uuid {
    Hub::with_active(|hub| hub.capture_message(msg, level))
}

/// Records a breadcrumb by calling a function.
///
/// The total number of breadcrumbs kept is limited by the configured
/// `max_breadcrumbs` option, older breadcrumbs are discarded first.
///
/// # Examples
///
/// ```
/// flare::add_breadcrumb(flare::Breadcrumb {
///     ty: "http".into(),
///     category: Some("request".into()),
///     ..Default::default()
/// });
/// ```
pub fn add_breadcrumb<B: IntoBreadcrumbs>(breadcrumb: B) {
    Hub::with_active(|hub| hub.add_breadcrumb(breadcrumb))
}

/// Invokes a function that can modify the current scope.
///
/// # Examples
///
/// ```
/// flare::configure_scope(|scope| {
///     scope.set_user(Some(flare::User {
///         username: Some("john_doe".into()),
///         ..Default::default()
///     }));
/// });
/// ```
pub fn configure_scope<F, R>(f: F) -> R
where
    R: Default,
    F: FnOnce(&mut Scope) -> R,
{
    Hub::with_active(|hub| hub.configure_scope(f))
}

/// Temporarily pushes a scope for a single call optionally reconfiguring it.
///
/// This function takes two arguments: the first is a callback that is passed
/// a scope and can reconfigure it.  The second is a callback that then
/// executes in the context of that scope.
///
/// # Examples
///
/// ```
/// flare::with_scope(
///     |scope| scope.set_tag("worker", "worker1"),
///     || flare::capture_message("Message from a worker", flare::Level::Info),
/// );
/// ```
pub fn with_scope<C, F, R>(scope_config: C, callback: F) -> R
where
    C: FnOnce(&mut Scope),
    F: FnOnce() -> R,
{
    Hub::with(|hub| {
        if hub.is_active_and_usage_safe() {
            hub.with_scope(scope_config, callback)
        } else {
            callback()
        }
    })
}

/// Returns the last event ID captured.
pub fn last_event_id() -> Option<Uuid> {
    Hub::with(|hub| hub.last_event_id())
}

/// Start a new session for release health.
///
/// # Examples
///
/// ```
/// flare::start_session();
/// ```
pub fn start_session() {
    Hub::with_active(|hub| {
        hub.start_session();
    })
}

/// End the current release health session.
pub fn end_session() {
    Hub::with_active(|hub| {
        hub.end_session();
    })
}

/// End the current release health session with the given status.
pub fn end_session_with_status(status: SessionStatus) {
    Hub::with_active(|hub| {
        hub.end_session_with_status(status);
    })
}
