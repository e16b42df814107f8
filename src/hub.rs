use std::iter;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use uuid::Uuid;

use crate::hub_impl::HubImpl;
use crate::protocol::{Breadcrumb, Event, Level, SessionStatus, SessionUpdate};
use crate::scope::ScopeGuard;
use crate::session::Session;
use crate::Scope;

/// A helper trait that converts a value into a list of breadcrumbs.
pub trait IntoBreadcrumbs {
    /// The iterator type for the breadcrumbs.
    type Output: Iterator<Item = Breadcrumb>;

    /// This converts the object into an optional breadcrumb.
    fn into_breadcrumbs(self) -> Self::Output;
}

impl IntoBreadcrumbs for Breadcrumb {
    type Output = iter::Once<Breadcrumb>;

    fn into_breadcrumbs(self) -> Self::Output {
        iter::once(self)
    }
}

impl IntoBreadcrumbs for Vec<Breadcrumb> {
    type Output = std::vec::IntoIter<Breadcrumb>;

    fn into_breadcrumbs(self) -> Self::Output {
        self.into_iter()
    }
}

impl IntoBreadcrumbs for Option<Breadcrumb> {
    type Output = std::option::IntoIter<Breadcrumb>;

    fn into_breadcrumbs(self) -> Self::Output {
        self.into_iter()
    }
}

impl<F: FnOnce() -> I, I: IntoBreadcrumbs> IntoBreadcrumbs for F {
    type Output = I::Output;

    fn into_breadcrumbs(self) -> Self::Output {
        self().into_breadcrumbs()
    }
}

/// The central object that manages scopes and clients.
///
/// This can be used to capture events and manage the scope.  This object is
/// internally synchronized so it can be used from multiple threads if needed.
/// The default hub that is available automatically is thread local.
///
/// Toplevel convenience functions are exposed that will automatically
/// dispatch to the thread local hub ([`Hub::current`]).  The thread local
/// hub can be temporarily changed using [`Hub::run`].
pub struct Hub {
    pub(crate) inner: HubImpl,
    pub(crate) last_event_id: RwLock<Option<Uuid>>,
}

impl AsRef<Hub> for Hub {
    fn as_ref(&self) -> &Hub {
        self
    }
}

impl Hub {
    /// Like [`Hub::with`] but only calls the function if a client is bound.
    ///
    /// This is useful for integrations that want to do efficiently nothing
    /// if there is no client bound.  Additionally this internally ensures
    /// that the client can be safely synchronized.  This prevents accidental
    /// recursive calls into the client.
    pub fn with_active<F, R>(f: F) -> R
    where
        F: FnOnce(&Arc<Hub>) -> R,
        R: Default,
    {
        Hub::with(|hub| {
            if hub.is_active_and_usage_safe() {
                f(hub)
            } else {
                Default::default()
            }
        })
    }

    /// Sends the event to the current client with the current scope.
    ///
    /// See the global [`capture_event`](crate::capture_event) for more
    /// documentation.
    pub fn capture_event(&self, event: Event<'static>) -> Uuid {
        self.inner.with(|stack| {
            let top = stack.top();
            match top.client.as_ref() {
                Some(client) => {
                    let event_id = client.capture_event(event, Some(&top.scope));
                    if !event_id.is_nil() {
                        *self
                            .last_event_id
                            .write()
                            .unwrap_or_else(PoisonError::into_inner) = Some(event_id);
                    }
                    event_id
                }
                None => Default::default(),
            }
        })
    }

    /// Captures an arbitrary message.
    ///
    /// See the global [`capture_message`](crate::capture_message) for more
    /// documentation.
    pub fn capture_message(&self, msg: &str, level: Level) -> Uuid {
        let event = Event {
            message: Some(msg.to_string()),
            level,
            ..Default::default()
        };
        self.capture_event(event)
    }

    /// Start a new session for Release Health.
    ///
    /// Returns a snapshot of the new session, along with the final state of
    /// the previous session of this scope if starting a new one ended it.
    /// Returns `None` when no client with a configured release is bound.
    pub fn start_session(
        &self,
    ) -> Option<(SessionUpdate<'static>, Option<SessionUpdate<'static>>)> {
        self.inner.with_mut(|stack| {
            let top = stack.top_mut();
            let session = Session::from_stack(top)?;
            let snapshot = session.snapshot();
            let scope = Arc::make_mut(&mut top.scope);
            let old = std::mem::replace(&mut scope.session, Arc::new(Mutex::new(Some(session))));
            // If this layer held the only reference, the session it carried
            // is over now. A shared reference means the session was inherited
            // from an outer scope and stays untouched there.
            let previous = Arc::try_unwrap(old).ok().and_then(|mutex| {
                mutex
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .map(|mut prev| {
                        prev.close(SessionStatus::Exited);
                        prev.snapshot()
                    })
            });
            Some((snapshot, previous))
        })
    }

    /// End the current Release Health session.
    ///
    /// Returns the final session state if there was a session to end.
    pub fn end_session(&self) -> Option<SessionUpdate<'static>> {
        self.end_session_with_status(SessionStatus::Exited)
    }

    /// End the current Release Health session with the given status.
    pub fn end_session_with_status(&self, status: SessionStatus) -> Option<SessionUpdate<'static>> {
        self.inner.with_mut(|stack| {
            let top = stack.top_mut();
            // drop will implicitly enqueue the final update
            top.scope
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .map(|mut session| {
                    session.close(status);
                    session.snapshot()
                })
        })
    }

    /// Pushes a new scope.
    ///
    /// This returns a guard that when dropped will pop the scope again.
    pub fn push_scope(&self) -> ScopeGuard {
        self.inner.with_mut(|stack| {
            stack.push();
            ScopeGuard(Some((Arc::clone(&self.inner.stack), stack.depth())))
        })
    }

    /// Pops the topmost scope.
    ///
    /// Popping beyond the initial scope is a logged no-op, the hub always
    /// keeps at least one scope.
    pub fn pop_scope(&self) {
        self.inner.with_mut(|stack| {
            stack.pop();
        })
    }

    /// Temporarily pushes a scope for a single call optionally reconfiguring it.
    ///
    /// See the global [`with_scope`](crate::with_scope) for more
    /// documentation.
    pub fn with_scope<C, F, R>(&self, scope_config: C, callback: F) -> R
    where
        C: FnOnce(&mut Scope),
        F: FnOnce() -> R,
    {
        let _guard = self.push_scope();
        self.configure_scope(scope_config);
        callback()
    }

    /// Invokes a function that can modify the current scope.
    ///
    /// See the global [`configure_scope`](crate::configure_scope) for more
    /// documentation.
    pub fn configure_scope<F, R>(&self, f: F) -> R
    where
        R: Default,
        F: FnOnce(&mut Scope) -> R,
    {
        // runs under the stack's write lock so that concurrent scope
        // mutations cannot interleave with the callback
        self.with_current_scope_mut(f)
    }

    /// Adds a new breadcrumb to the current scope.
    ///
    /// Breadcrumbs first pass the client's `before_breadcrumb` callback and
    /// are then handed to all configured scope observers, in order.  A
    /// panicking callback or observer is caught and logged; the breadcrumb is
    /// recorded as it stood before the panic.
    pub fn add_breadcrumb<B: IntoBreadcrumbs>(&self, breadcrumb: B) {
        self.inner.with_mut(|stack| {
            let top = stack.top_mut();
            if let Some(ref client) = top.client {
                let scope = Arc::make_mut(&mut top.scope);
                let options = client.options();
                for breadcrumb in breadcrumb.into_breadcrumbs() {
                    let breadcrumb_opt = match &options.before_breadcrumb {
                        Some(callback) => {
                            match catch_unwind(AssertUnwindSafe(|| callback(breadcrumb.clone()))) {
                                Ok(opt) => opt,
                                Err(_) => {
                                    flare_debug!("before_breadcrumb panicked, keeping breadcrumb");
                                    Some(breadcrumb)
                                }
                            }
                        }
                        None => Some(breadcrumb),
                    };
                    let Some(breadcrumb) = breadcrumb_opt else {
                        flare_debug!("breadcrumb dropped by before_breadcrumb");
                        continue;
                    };
                    for observer in &options.scope_observers {
                        if catch_unwind(AssertUnwindSafe(|| observer.breadcrumb_added(&breadcrumb)))
                            .is_err()
                        {
                            flare_debug!("scope observer panicked");
                        }
                    }
                    let breadcrumbs = Arc::make_mut(&mut scope.breadcrumbs);
                    breadcrumbs.push_back(breadcrumb);
                    while breadcrumbs.len() > options.max_breadcrumbs {
                        breadcrumbs.pop_front();
                    }
                }
            }
        })
    }

    /// Returns the last event id.
    pub fn last_event_id(&self) -> Option<Uuid> {
        *self
            .last_event_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
