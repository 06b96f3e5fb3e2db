//! Scopes: nested regions that own per-scope instances.
//!
//! A scope is begun on the container and becomes the ambient scope of
//! its context (the current thread, or with the `async` feature the
//! current logical call context). Scopes nest; the newest one is
//! current. Ending a scope disposes what was tracked in it, makes its
//! parent current again and notifies completion listeners.
//!
//! ```text
//! begin_scope()          begin_scope()
//!  ┌──────────── outer ──────────────────────────────┐
//!  │                      ┌──── inner ────┐          │
//!  │                      └───────────────┘ dispose  │ dispose
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! Scopes must end inside-out: disposing a scope whose child is still
//! alive fails with [`ScopeError::ChildScopeAlive`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::container::ContainerInner;
use crate::dispose::{Disposable, DisposableBag};
use crate::error::{QalibError, Result, ScopeError};
use crate::factory::ServiceFactory;
use crate::key::ServiceName;
use crate::metadata::Instance;
use crate::types::ServiceType;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

pub type CompletedHandler = Box<dyn FnOnce(&ScopeRef) + Send>;

struct ScopeInner {
    id: u64,
    manager: Weak<ScopeManager>,
    container: Weak<ContainerInner>,
    parent: Option<ScopeRef>,
    child: Mutex<Option<Weak<ScopeInner>>>,
    disposables: DisposableBag,
    completed_handlers: Mutex<Vec<CompletedHandler>>,
    completed: AtomicBool,
}

/// Shared handle to a scope.
///
/// Handles stay valid after the scope ends; they then report
/// [`is_completed`](ScopeRef::is_completed).
#[derive(Clone)]
pub struct ScopeRef {
    inner: Arc<ScopeInner>,
}

impl ScopeRef {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn parent(&self) -> Option<&ScopeRef> {
        self.inner.parent.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// The nested scope begun inside this one, while it is alive.
    pub fn child(&self) -> Option<ScopeRef> {
        self.inner
            .child
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| ScopeRef { inner })
            .filter(|child| !child.is_completed())
    }

    /// Disposes `disposable` when this scope ends.
    pub fn track(&self, disposable: Arc<dyn Disposable>) {
        self.inner.disposables.track(disposable);
    }

    /// Runs `handler` once, after this scope has ended.
    pub fn on_completed(&self, handler: CompletedHandler) {
        let mut handlers = self.inner.completed_handlers.lock();
        if self.is_completed() {
            drop(handlers);
            handler(self);
            return;
        }
        handlers.push(handler);
    }

    pub fn ptr_eq(&self, other: &ScopeRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn container(&self) -> Result<Arc<ContainerInner>> {
        if self.is_completed() {
            return Err(ScopeError::Completed { scope: self.id() }.into());
        }
        self.inner.container.upgrade().ok_or(QalibError::ContainerDisposed)
    }

    fn complete(&self) -> Result<()> {
        if self.is_completed() {
            return Ok(());
        }
        if let Some(child) = self.child() {
            return Err(ScopeError::ChildScopeAlive {
                scope: self.id(),
                child: child.id(),
            }
            .into());
        }

        if self.inner.completed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.inner.disposables.dispose_all();

        match self.inner.manager.upgrade() {
            Some(manager) => manager.end_scope(self)?,
            None => self.detach_from_parent(),
        }

        let handlers = std::mem::take(&mut *self.inner.completed_handlers.lock());
        for handler in handlers {
            handler(self);
        }

        debug!(scope = self.id(), "Scope completed");
        Ok(())
    }

    fn detach_from_parent(&self) {
        if let Some(parent) = self.parent() {
            let mut child = parent.inner.child.lock();
            if child.as_ref().is_some_and(|c| std::ptr::eq(c.as_ptr(), Arc::as_ptr(&self.inner))) {
                *child = None;
            }
        }
    }
}

impl fmt::Debug for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("parent", &self.parent().map(ScopeRef::id))
            .field("completed", &self.is_completed())
            .field("tracked", &self.inner.disposables.len())
            .finish()
    }
}

impl ServiceFactory for ScopeRef {
    fn get_instance(&self, service_type: &ServiceType, name: &ServiceName) -> Result<Instance> {
        self.get_instance_with(service_type, name, &[])
    }

    fn get_instance_with(
        &self,
        service_type: &ServiceType,
        name: &ServiceName,
        arguments: &[Instance],
    ) -> Result<Instance> {
        self.container()?
            .get_instance_in(service_type, name, Some(self), arguments)
    }

    fn get_all_instances(&self, service_type: &ServiceType) -> Result<Vec<Instance>> {
        self.container()?.get_all_instances_in(service_type, Some(self))
    }
}

/// Owner of a scope. Dropping it ends the scope.
///
/// ```
/// use qalib_container::prelude::*;
///
/// let container = ServiceContainer::new();
/// let outer = container.begin_scope();
/// let inner = container.begin_scope();
///
/// assert!(outer.dispose().is_err());
/// inner.dispose().unwrap();
/// outer.dispose().unwrap();
/// ```
pub struct Scope {
    handle: ScopeRef,
}

impl Scope {
    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn handle(&self) -> &ScopeRef {
        &self.handle
    }

    /// Ends the scope. Calling it again is a no-op.
    pub fn dispose(&self) -> Result<()> {
        self.handle.complete()
    }
}

impl ServiceFactory for Scope {
    fn get_instance(&self, service_type: &ServiceType, name: &ServiceName) -> Result<Instance> {
        self.handle.get_instance(service_type, name)
    }

    fn get_instance_with(
        &self,
        service_type: &ServiceType,
        name: &ServiceName,
        arguments: &[Instance],
    ) -> Result<Instance> {
        self.handle.get_instance_with(service_type, name, arguments)
    }

    fn get_all_instances(&self, service_type: &ServiceType) -> Result<Vec<Instance>> {
        self.handle.get_all_instances(service_type)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Err(e) = self.handle.complete() {
            warn!(scope = self.handle.id(), error = %e, "Scope dropped without completing");
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

// ============================================================
// ScopeManager
// ============================================================

/// The stack of scopes of one context. The top is the current scope.
#[derive(Default)]
pub struct ScopeManager {
    current: Mutex<Option<ScopeRef>>,
}

impl ScopeManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current_scope(&self) -> Option<ScopeRef> {
        self.current.lock().clone()
    }

    /// Begins a scope nested in the current one and makes it current.
    pub(crate) fn begin_scope(self: &Arc<Self>, container: Weak<ContainerInner>) -> Scope {
        let mut current = self.current.lock();
        let parent = current.clone();

        let handle = ScopeRef {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                manager: Arc::downgrade(self),
                container,
                parent: parent.clone(),
                child: Mutex::new(None),
                disposables: DisposableBag::new(),
                completed_handlers: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
            }),
        };

        if let Some(parent) = &parent {
            *parent.inner.child.lock() = Some(Arc::downgrade(&handle.inner));
        }

        debug!(scope = handle.id(), parent = ?parent.as_ref().map(ScopeRef::id), "Scope started");
        *current = Some(handle.clone());
        Scope { handle }
    }

    /// Makes the parent of `scope` current again.
    pub(crate) fn end_scope(&self, scope: &ScopeRef) -> Result<()> {
        let mut current = self.current.lock();

        if let Some(child) = scope.child() {
            return Err(ScopeError::ChildScopeAlive {
                scope: scope.id(),
                child: child.id(),
            }
            .into());
        }

        scope.detach_from_parent();
        if current.as_ref().is_some_and(|c| c.ptr_eq(scope)) {
            *current = scope.parent().filter(|p| !p.is_completed()).cloned();
        }
        Ok(())
    }
}

impl fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeManager")
            .field("current", &self.current_scope().map(|s| s.id()))
            .finish()
    }
}

// ============================================================
// Providers
// ============================================================

/// Hands out the [`ScopeManager`] of the calling context.
pub trait ScopeManagerProvider: Send + Sync {
    fn scope_manager(&self) -> Arc<ScopeManager>;
}

thread_local! {
    static THREAD_MANAGERS: RefCell<HashMap<u64, ThreadManager>> = RefCell::new(HashMap::new());
}

/// A thread's scope stack for one provider, kept while the provider lives.
struct ThreadManager {
    provider: Weak<()>,
    manager: Arc<ScopeManager>,
}

/// One scope stack per thread.
///
/// Stacks of a dropped provider are released on the dropping thread at
/// once and on every other thread the next time it asks for a stack.
#[derive(Debug)]
pub struct PerThreadScopeManagerProvider {
    id: u64,
    alive: Arc<()>,
}

impl PerThreadScopeManagerProvider {
    pub fn new() -> Self {
        Self {
            id: NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
        }
    }
}

impl Default for PerThreadScopeManagerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeManagerProvider for PerThreadScopeManagerProvider {
    fn scope_manager(&self) -> Arc<ScopeManager> {
        THREAD_MANAGERS.with(|managers| {
            let mut managers = managers.borrow_mut();
            if let Some(entry) = managers.get(&self.id) {
                return entry.manager.clone();
            }

            managers.retain(|_, entry| entry.provider.strong_count() > 0);
            let manager = ScopeManager::new();
            managers.insert(
                self.id,
                ThreadManager {
                    provider: Arc::downgrade(&self.alive),
                    manager: manager.clone(),
                },
            );
            manager
        })
    }
}

impl Drop for PerThreadScopeManagerProvider {
    fn drop(&mut self) {
        let id = self.id;
        let _ = THREAD_MANAGERS.try_with(|managers| managers.borrow_mut().remove(&id));
    }
}

#[cfg(feature = "async")]
pub use call_context::{PerLogicalCallContextScopeManagerProvider, with_call_context};

#[cfg(feature = "async")]
mod call_context {
    use super::*;
    use std::future::Future;

    #[derive(Default)]
    struct CallContext {
        managers: Mutex<HashMap<u64, Arc<ScopeManager>>>,
    }

    tokio::task_local! {
        static CALL_CONTEXT: Arc<CallContext>;
    }

    /// Runs `future` in a fresh logical call context.
    ///
    /// Scopes begun inside follow the future across threads and are
    /// invisible to other call contexts.
    pub async fn with_call_context<F: Future>(future: F) -> F::Output {
        CALL_CONTEXT.scope(Arc::new(CallContext::default()), future).await
    }

    /// One scope stack per logical call context.
    ///
    /// Outside [`with_call_context`] it falls back to one stack per thread.
    #[derive(Debug, Default)]
    pub struct PerLogicalCallContextScopeManagerProvider {
        fallback: PerThreadScopeManagerProvider,
    }

    impl PerLogicalCallContextScopeManagerProvider {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl ScopeManagerProvider for PerLogicalCallContextScopeManagerProvider {
        fn scope_manager(&self) -> Arc<ScopeManager> {
            let id = self.fallback.id;
            CALL_CONTEXT
                .try_with(|context| {
                    context
                        .managers
                        .lock()
                        .entry(id)
                        .or_insert_with(ScopeManager::new)
                        .clone()
                })
                .unwrap_or_else(|_| self.fallback.scope_manager())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Counter(Arc<AtomicU32>);

    impl Disposable for Counter {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn nested_scopes_restore_parent() {
        let manager = ScopeManager::new();
        let outer = manager.begin_scope(Weak::new());
        let inner = manager.begin_scope(Weak::new());

        assert!(manager.current_scope().unwrap().ptr_eq(inner.handle()));
        assert_eq!(inner.handle().parent().unwrap().id(), outer.id());

        inner.dispose().unwrap();
        assert!(manager.current_scope().unwrap().ptr_eq(outer.handle()));

        outer.dispose().unwrap();
        assert!(manager.current_scope().is_none());
    }

    #[test]
    fn ending_parent_with_live_child_fails() {
        let manager = ScopeManager::new();
        let outer = manager.begin_scope(Weak::new());
        let inner = manager.begin_scope(Weak::new());

        let err = outer.dispose().unwrap_err();
        assert!(matches!(
            err,
            QalibError::Scope(ScopeError::ChildScopeAlive { .. })
        ));
        assert!(!outer.handle().is_completed());

        inner.dispose().unwrap();
        outer.dispose().unwrap();
    }

    #[test]
    fn dispose_is_idempotent_and_ordered() {
        let manager = ScopeManager::new();
        let scope = manager.begin_scope(Weak::new());
        let disposed = Arc::new(AtomicU32::new(0));
        scope.handle().track(Arc::new(Counter(disposed.clone())));
        scope.handle().track(Arc::new(Counter(disposed.clone())));

        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        let disposed_at_completion = disposed.clone();
        scope.handle().on_completed(Box::new(move |_| {
            seen.store(disposed_at_completion.load(Ordering::SeqCst) + 10, Ordering::SeqCst);
        }));

        scope.dispose().unwrap();
        scope.dispose().unwrap();

        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 12);
        assert!(scope.handle().is_completed());
    }

    #[test]
    fn drop_ends_scope() {
        let manager = ScopeManager::new();
        let disposed = Arc::new(AtomicU32::new(0));
        {
            let scope = manager.begin_scope(Weak::new());
            scope.handle().track(Arc::new(Counter(disposed.clone())));
        }
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(manager.current_scope().is_none());
    }

    #[test]
    fn completed_scope_rejects_resolution() {
        let manager = ScopeManager::new();
        let scope = manager.begin_scope(Weak::new());
        let handle = scope.handle().clone();
        scope.dispose().unwrap();

        let err = handle
            .get_instance(&ServiceType::of::<u8>(), &ServiceName::default())
            .unwrap_err();
        assert!(matches!(err, QalibError::Scope(ScopeError::Completed { .. })));
    }

    #[test]
    fn per_thread_provider_isolates_threads() {
        let provider = Arc::new(PerThreadScopeManagerProvider::new());
        let manager = provider.scope_manager();
        let _scope = manager.begin_scope(Weak::new());
        assert!(provider.scope_manager().current_scope().is_some());

        let remote = provider.clone();
        let seen = std::thread::spawn(move || remote.scope_manager().current_scope().is_some())
            .join()
            .unwrap();
        assert!(!seen);
    }

    #[test]
    fn dropped_provider_stack_is_released_on_other_threads() {
        let provider = PerThreadScopeManagerProvider::new();
        let manager = Arc::downgrade(&provider.scope_manager());

        std::thread::spawn(move || drop(provider)).join().unwrap();
        assert!(manager.upgrade().is_some());

        let _ = PerThreadScopeManagerProvider::new().scope_manager();
        assert!(manager.upgrade().is_none());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn call_context_isolates_tasks() {
        let provider = Arc::new(PerLogicalCallContextScopeManagerProvider::new());

        let outer = provider.clone();
        with_call_context(async move {
            let _scope = outer.scope_manager().begin_scope(Weak::new());
            tokio::task::yield_now().await;
            assert!(outer.scope_manager().current_scope().is_some());

            let other = outer.clone();
            let seen = tokio::spawn(with_call_context(async move {
                other.scope_manager().current_scope().is_some()
            }))
            .await
            .unwrap();
            assert!(!seen);
        })
        .await;
    }
}
