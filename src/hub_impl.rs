use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock, MutexGuard, PoisonError, RwLock};
use std::thread;

use crate::scope::Stack;
use crate::{Client, Hub, Scope};

static ROOT_HUB: LazyLock<(Arc<Hub>, thread::ThreadId)> = LazyLock::new(|| {
    (
        Arc::new(Hub::new(None, Arc::new(Default::default()))),
        thread::current().id(),
    )
});

// Every thread lazily derives its own hub from the root hub. The thread that
// created the root hub keeps using it directly, flagged by `uses_root`, so
// that a client bound after the thread local was initialized is still seen.
thread_local! {
    static CURRENT_HUB: LocalHub = LocalHub {
        hub: UnsafeCell::new(Arc::new(Hub::new_from_top(&ROOT_HUB.0))),
        uses_root: Cell::new(ROOT_HUB.1 == thread::current().id()),
    };
}

struct LocalHub {
    hub: UnsafeCell<Arc<Hub>>,
    uses_root: Cell<bool>,
}

impl LocalHub {
    // SAFETY: the cell is thread local, so no other thread can hold a
    // reference into it while we hand one out.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&self) -> &mut Arc<Hub> {
        &mut *self.hub.get()
    }
}

/// Installs a hub as the thread's current one until dropped.
///
/// The guard restores the previously installed hub on drop, also when the
/// code it wraps panics. It must be dropped on the thread that created it
/// and is therefore `!Send`.
pub struct SwitchGuard {
    previous: Option<(Arc<Hub>, bool)>,
    // keeps the type `!Send` without giving up `Sync`
    _not_send: PhantomData<MutexGuard<'static, ()>>,
}

impl SwitchGuard {
    /// Makes `hub` the thread's current hub and remembers the old one.
    ///
    /// Installing the hub that is already current is a no-op and the drop
    /// restores nothing.
    pub fn new(mut hub: Arc<Hub>) -> Self {
        let previous = CURRENT_HUB.with(|local| {
            let current = unsafe { local.get_mut() };
            if std::ptr::eq(current.as_ref(), hub.as_ref()) {
                return None;
            }
            std::mem::swap(current, &mut hub);
            Some((hub, local.uses_root.replace(false)))
        });
        SwitchGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for SwitchGuard {
    fn drop(&mut self) {
        if let Some((mut previous, used_root)) = self.previous.take() {
            CURRENT_HUB.with(|local| {
                std::mem::swap(unsafe { local.get_mut() }, &mut previous);
                if used_root {
                    local.uses_root.set(true);
                }
            });
        }
    }
}

#[derive(Debug)]
pub(crate) struct HubImpl {
    pub(crate) stack: Arc<RwLock<Stack>>,
}

impl HubImpl {
    pub(crate) fn with<F: FnOnce(&Stack) -> R, R>(&self, f: F) -> R {
        f(&self.stack.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn with_mut<F: FnOnce(&mut Stack) -> R, R>(&self, f: F) -> R {
        f(&mut self.stack.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn is_active_and_usage_safe(&self) -> bool {
        self.with(|stack| stack.top().client.as_ref().is_some_and(|c| c.is_enabled()))
    }
}

impl Hub {
    /// Creates a hub with the given client bound and `scope` as its only
    /// stack layer.
    pub fn new(client: Option<Arc<Client>>, scope: Arc<Scope>) -> Hub {
        Hub {
            inner: HubImpl {
                stack: Arc::new(RwLock::new(Stack::from_client_and_scope(client, scope))),
            },
            last_event_id: RwLock::new(None),
        }
    }

    /// Creates a hub that carries a copy of `other`'s topmost layer.
    ///
    /// This is the way to hand a hub to another thread: the new hub shares
    /// the client but scope changes no longer propagate between the two.
    pub fn new_from_top<H: AsRef<Hub>>(other: H) -> Hub {
        other.as_ref().inner.with(|stack| {
            let top = stack.top();
            Hub::new(top.client.clone(), top.scope.clone())
        })
    }

    /// Returns the hub bound to the current thread.
    ///
    /// On first use a thread derives its hub from the root hub's top layer;
    /// see [`Hub::main`]. Use [`Hub::run`] to control which hub a stretch of
    /// code sees.
    pub fn current() -> Arc<Hub> {
        Hub::with(Arc::clone)
    }

    /// Returns the root hub, the one [`init`](crate::init) binds the client
    /// to.
    pub fn main() -> Arc<Hub> {
        ROOT_HUB.0.clone()
    }

    /// Passes the current hub to `f` without cloning the [`Arc`].
    pub fn with<F, R>(f: F) -> R
    where
        F: FnOnce(&Arc<Hub>) -> R,
    {
        CURRENT_HUB.with(|local| {
            if local.uses_root.get() {
                f(&ROOT_HUB.0)
            } else {
                f(unsafe { &*local.hub.get() })
            }
        })
    }

    /// Runs `f` with `hub` installed as the current hub.
    ///
    /// [`Hub::current`] resolves to `hub` for the duration of the call. The
    /// previous hub is restored afterwards, also when `f` panics.
    pub fn run<F: FnOnce() -> R, R>(hub: Arc<Hub>, f: F) -> R {
        let _guard = SwitchGuard::new(hub);
        f()
    }

    /// Returns the client bound to this hub, if any.
    pub fn client(&self) -> Option<Arc<Client>> {
        self.inner.with(|stack| stack.top().client.clone())
    }

    /// Binds a client to this hub, replacing any previous one.
    pub fn bind_client(&self, client: Option<Arc<Client>>) {
        self.inner.with_mut(|stack| {
            stack.top_mut().client = client;
        })
    }

    pub(crate) fn is_active_and_usage_safe(&self) -> bool {
        self.inner.is_active_and_usage_safe()
    }

    pub(crate) fn with_current_scope<F: FnOnce(&Scope) -> R, R>(&self, f: F) -> R {
        self.inner.with(|stack| f(&stack.top().scope))
    }

    pub(crate) fn with_current_scope_mut<F: FnOnce(&mut Scope) -> R, R>(&self, f: F) -> R {
        self.inner
            .with_mut(|stack| f(Arc::make_mut(&mut stack.top_mut().scope)))
    }
}
