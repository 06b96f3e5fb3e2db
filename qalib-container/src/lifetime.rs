//! Lifetimes: how long a resolved instance is reused.
//!
//! A [`Lifetime`] object is attached to one registration and wraps its
//! creation routine. The container ships three:
//!
//! - [`PerContainerLifetime`]: one instance for the container's life
//! - [`PerScopeLifetime`]: one instance per scope, dropped when the scope ends
//! - [`PerRequestLifetime`]: a new instance per request, tracked for disposal
//!
//! A registration without a lifetime is transient: a new instance per
//! request and no disposal tracking.
//!
//! # Ordering
//! [`LifetimeKind`] orders lifetimes by how long an instance lives:
//! `PerContainer > PerScope > PerRequest > Transient`. Validation uses the
//! ordering to find long-lived services holding scope-bound ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::trace;

use crate::dispose::{Disposable, DisposableBag};
use crate::error::{Result, ScopeError};
use crate::key::ServiceKey;
use crate::metadata::Instance;
use crate::scope::ScopeRef;

/// Output of a creation routine.
pub struct Created {
    /// The instance in its service-facing form.
    pub instance: Instance,
    /// Disposables created with the instance and not yet tracked anywhere.
    pub disposables: Vec<Arc<dyn Disposable>>,
}

impl Created {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            disposables: Vec::new(),
        }
    }
}

impl fmt::Debug for Created {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Created")
            .field("disposables", &self.disposables.len())
            .finish_non_exhaustive()
    }
}

/// What a lifetime sees of the resolution it takes part in.
pub struct LifetimeContext<'a> {
    service: &'a ServiceKey,
    scope: Option<&'a ScopeRef>,
    container: &'a DisposableBag,
}

impl<'a> LifetimeContext<'a> {
    pub(crate) fn new(
        service: &'a ServiceKey,
        scope: Option<&'a ScopeRef>,
        container: &'a DisposableBag,
    ) -> Self {
        Self {
            service,
            scope,
            container,
        }
    }

    /// The registration being resolved.
    pub fn service(&self) -> &ServiceKey {
        self.service
    }

    /// The scope in effect for this resolution, if any.
    pub fn scope(&self) -> Option<&'a ScopeRef> {
        self.scope
    }

    /// The scope, or [`ScopeError::NoActiveScope`]. A scope that already
    /// ended is [`ScopeError::Completed`].
    pub fn require_scope(&self, lifetime: &'static str) -> Result<&'a ScopeRef> {
        let scope = self.scope.ok_or_else(|| ScopeError::NoActiveScope {
            service: self.service.clone(),
            lifetime,
        })?;
        if scope.is_completed() {
            return Err(ScopeError::Completed { scope: scope.id() }.into());
        }
        Ok(scope)
    }

    /// Disposes `disposable` when the container is disposed.
    pub fn track_in_container(&self, disposable: Arc<dyn Disposable>) {
        self.container.track(disposable);
    }
}

/// Decides when a registration's creation routine runs.
///
/// Implementations must be thread-safe: `get_instance` is called
/// concurrently from every thread resolving the service.
pub trait Lifetime: Send + Sync + fmt::Debug {
    /// Returns an instance, calling `create` when a new one is needed.
    fn get_instance(
        &self,
        create: &dyn Fn() -> Result<Created>,
        context: &LifetimeContext<'_>,
    ) -> Result<Instance>;

    /// A new, empty lifetime of the same kind.
    fn fresh(&self) -> Arc<dyn Lifetime>;

    fn kind(&self) -> LifetimeKind {
        LifetimeKind::Custom
    }
}

/// Classification of a lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifetimeKind {
    /// No lifetime: a new instance per request.
    Transient,
    PerRequest,
    PerScope,
    PerContainer,
    /// A user-defined lifetime; validation does not reason about it.
    Custom,
}

impl LifetimeKind {
    /// `true` if instances are reused.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, LifetimeKind::PerScope | LifetimeKind::PerContainer)
    }

    /// `true` if instances belong to a scope.
    #[inline]
    pub fn is_scope_bound(&self) -> bool {
        matches!(self, LifetimeKind::PerScope | LifetimeKind::PerRequest)
    }

    /// Higher lives longer.
    #[inline]
    fn ordering(&self) -> u8 {
        match self {
            LifetimeKind::PerContainer => 3,
            LifetimeKind::PerScope => 2,
            LifetimeKind::PerRequest => 1,
            LifetimeKind::Transient | LifetimeKind::Custom => 0,
        }
    }
}

impl PartialOrd for LifetimeKind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LifetimeKind {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordering().cmp(&other.ordering())
    }
}

impl fmt::Display for LifetimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifetimeKind::Transient => write!(f, "Transient"),
            LifetimeKind::PerRequest => write!(f, "PerRequest"),
            LifetimeKind::PerScope => write!(f, "PerScope"),
            LifetimeKind::PerContainer => write!(f, "PerContainer"),
            LifetimeKind::Custom => write!(f, "Custom"),
        }
    }
}

/// Kind of an optional lifetime, `Transient` when absent.
pub fn kind_of(lifetime: Option<&Arc<dyn Lifetime>>) -> LifetimeKind {
    lifetime.map_or(LifetimeKind::Transient, |l| l.kind())
}

// ============================================================
// PerContainer
// ============================================================

/// One instance per container, created on first request.
#[derive(Default)]
pub struct PerContainerLifetime {
    instance: OnceCell<Instance>,
}

impl PerContainerLifetime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lifetime for PerContainerLifetime {
    fn get_instance(
        &self,
        create: &dyn Fn() -> Result<Created>,
        context: &LifetimeContext<'_>,
    ) -> Result<Instance> {
        self.instance
            .get_or_try_init(|| {
                trace!(service = %context.service(), "Creating per-container instance");
                let created = create()?;
                for disposable in created.disposables {
                    context.track_in_container(disposable);
                }
                Ok(created.instance)
            })
            .cloned()
    }

    fn fresh(&self) -> Arc<dyn Lifetime> {
        Arc::new(PerContainerLifetime::new())
    }

    fn kind(&self) -> LifetimeKind {
        LifetimeKind::PerContainer
    }
}

impl fmt::Debug for PerContainerLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerContainerLifetime")
            .field("created", &self.instance.get().is_some())
            .finish()
    }
}

// ============================================================
// PerScope
// ============================================================

type ScopeInstances = Arc<Mutex<HashMap<u64, Arc<OnceCell<Instance>>>>>;

/// One instance per scope.
///
/// The instance is tracked for disposal in the scope it was created in,
/// and forgotten when that scope completes.
#[derive(Default)]
pub struct PerScopeLifetime {
    instances: ScopeInstances,
}

impl PerScopeLifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes currently holding an instance.
    pub fn live_scopes(&self) -> usize {
        self.instances.lock().len()
    }

    fn cell_for(&self, scope: &ScopeRef) -> Arc<OnceCell<Instance>> {
        let cell = {
            let mut instances = self.instances.lock();
            if let Some(cell) = instances.get(&scope.id()) {
                return cell.clone();
            }
            let cell = Arc::new(OnceCell::new());
            instances.insert(scope.id(), cell.clone());
            cell
        };

        // The handler runs right away when the scope has already ended, so
        // the map must not be locked here.
        let registry = Arc::downgrade(&self.instances);
        scope.on_completed(Box::new(move |completed: &ScopeRef| {
            if let Some(registry) = registry.upgrade() {
                registry.lock().remove(&completed.id());
            }
        }));
        cell
    }
}

impl Lifetime for PerScopeLifetime {
    fn get_instance(
        &self,
        create: &dyn Fn() -> Result<Created>,
        context: &LifetimeContext<'_>,
    ) -> Result<Instance> {
        let scope = context.require_scope("PerScope")?;
        let cell = self.cell_for(scope);

        cell.get_or_try_init(|| {
            trace!(service = %context.service(), scope = scope.id(), "Creating per-scope instance");
            let created = create()?;
            for disposable in created.disposables {
                scope.track(disposable);
            }
            Ok(created.instance)
        })
        .cloned()
    }

    fn fresh(&self) -> Arc<dyn Lifetime> {
        Arc::new(PerScopeLifetime::new())
    }

    fn kind(&self) -> LifetimeKind {
        LifetimeKind::PerScope
    }
}

impl fmt::Debug for PerScopeLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerScopeLifetime")
            .field("live_scopes", &self.live_scopes())
            .finish()
    }
}

// ============================================================
// PerRequest
// ============================================================

/// A new instance per request. Disposable instances are tracked in the
/// current scope, which must exist.
#[derive(Debug, Default)]
pub struct PerRequestLifetime;

impl PerRequestLifetime {
    pub fn new() -> Self {
        Self
    }
}

impl Lifetime for PerRequestLifetime {
    fn get_instance(
        &self,
        create: &dyn Fn() -> Result<Created>,
        context: &LifetimeContext<'_>,
    ) -> Result<Instance> {
        let created = create()?;
        if !created.disposables.is_empty() {
            let scope = context.require_scope("PerRequest")?;
            for disposable in created.disposables {
                scope.track(disposable);
            }
        }
        Ok(created.instance)
    }

    fn fresh(&self) -> Arc<dyn Lifetime> {
        Arc::new(PerRequestLifetime)
    }

    fn kind(&self) -> LifetimeKind {
        LifetimeKind::PerRequest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QalibError;
    use crate::scope::ScopeManager;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Barrier, Weak};
    use std::thread;
    use std::time::Duration;

    fn counting(counter: &AtomicU32) -> impl Fn() -> Result<Created> + '_ {
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Created::new(Arc::new(n)))
        }
    }

    struct Flag(Arc<AtomicU32>);

    impl Disposable for Flag {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn kind_ordering() {
        assert!(LifetimeKind::PerContainer > LifetimeKind::PerScope);
        assert!(LifetimeKind::PerScope > LifetimeKind::PerRequest);
        assert!(LifetimeKind::PerRequest > LifetimeKind::Transient);
        assert!(LifetimeKind::PerScope.is_cached());
        assert!(!LifetimeKind::PerRequest.is_cached());
        assert_eq!(LifetimeKind::PerScope.to_string(), "PerScope");
    }

    #[test]
    fn per_container_creates_once() {
        let key = ServiceKey::of::<u32>();
        let bag = DisposableBag::new();
        let ctx = LifetimeContext::new(&key, None, &bag);
        let counter = AtomicU32::new(0);
        let lifetime = PerContainerLifetime::new();

        let a = lifetime.get_instance(&counting(&counter), &ctx).unwrap();
        let b = lifetime.get_instance(&counting(&counter), &ctx).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fresh_lifetime_is_empty() {
        let key = ServiceKey::of::<u32>();
        let bag = DisposableBag::new();
        let ctx = LifetimeContext::new(&key, None, &bag);
        let counter = AtomicU32::new(0);
        let lifetime = PerContainerLifetime::new();
        lifetime.get_instance(&counting(&counter), &ctx).unwrap();

        let fresh = lifetime.fresh();
        fresh.get_instance(&counting(&counter), &ctx).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(fresh.kind(), LifetimeKind::PerContainer);
    }

    #[test]
    fn per_scope_requires_scope() {
        let key = ServiceKey::of::<u32>();
        let bag = DisposableBag::new();
        let ctx = LifetimeContext::new(&key, None, &bag);
        let counter = AtomicU32::new(0);

        let err = PerScopeLifetime::new()
            .get_instance(&counting(&counter), &ctx)
            .unwrap_err();
        assert!(matches!(err, QalibError::Scope(ScopeError::NoActiveScope { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn per_scope_caches_per_scope_and_evicts() {
        let key = ServiceKey::of::<u32>();
        let bag = DisposableBag::new();
        let counter = AtomicU32::new(0);
        let lifetime = PerScopeLifetime::new();
        let manager = ScopeManager::new();

        let first = manager.begin_scope(Weak::new());
        let ctx = LifetimeContext::new(&key, Some(first.handle()), &bag);
        let a = lifetime.get_instance(&counting(&counter), &ctx).unwrap();
        let b = lifetime.get_instance(&counting(&counter), &ctx).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(lifetime.live_scopes(), 1);

        first.dispose().unwrap();
        assert_eq!(lifetime.live_scopes(), 0);

        let second = manager.begin_scope(Weak::new());
        let ctx = LifetimeContext::new(&key, Some(second.handle()), &bag);
        let c = lifetime.get_instance(&counting(&counter), &ctx).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn per_scope_rejects_completed_scope() {
        let key = ServiceKey::of::<u32>();
        let bag = DisposableBag::new();
        let counter = AtomicU32::new(0);
        let lifetime = PerScopeLifetime::new();
        let scope = ScopeManager::new().begin_scope(Weak::new());
        let handle = scope.handle().clone();
        scope.dispose().unwrap();

        let ctx = LifetimeContext::new(&key, Some(&handle), &bag);
        let err = lifetime.get_instance(&counting(&counter), &ctx).unwrap_err();
        assert!(matches!(err, QalibError::Scope(ScopeError::Completed { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // The completion handler runs at once and evicts the cell again.
        lifetime.cell_for(&handle);
        assert_eq!(lifetime.live_scopes(), 0);
    }

    #[test]
    fn concurrent_first_requests_share_one_instance() {
        const THREADS: usize = 8;

        let key = ServiceKey::of::<u32>();
        let bag = DisposableBag::new();
        let counter = AtomicU32::new(0);
        let slow = || -> Result<Created> {
            thread::sleep(Duration::from_millis(20));
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Created::new(Arc::new(n)))
        };
        let per_container = PerContainerLifetime::new();
        let per_scope = PerScopeLifetime::new();
        let scope = ScopeManager::new().begin_scope(Weak::new());
        let barrier = Barrier::new(THREADS);

        let instances: Vec<(Instance, Instance)> = thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let ctx = LifetimeContext::new(&key, Some(scope.handle()), &bag);
                        (
                            per_container.get_instance(&slow, &ctx).unwrap(),
                            per_scope.get_instance(&slow, &ctx).unwrap(),
                        )
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let (first_container, first_scope) = &instances[0];
        for (container, scoped) in &instances {
            assert!(Arc::ptr_eq(container, first_container));
            assert!(Arc::ptr_eq(scoped, first_scope));
        }
        assert_eq!(per_scope.live_scopes(), 1);
    }

    #[test]
    fn per_request_tracks_disposables_in_scope() {
        let key = ServiceKey::of::<Flag>();
        let bag = DisposableBag::new();
        let disposed = Arc::new(AtomicU32::new(0));
        let manager = ScopeManager::new();
        let scope = manager.begin_scope(Weak::new());
        let ctx = LifetimeContext::new(&key, Some(scope.handle()), &bag);

        let create = || -> Result<Created> {
            let flag = Arc::new(Flag(disposed.clone()));
            Ok(Created {
                instance: flag.clone(),
                disposables: vec![flag as Arc<dyn Disposable>],
            })
        };
        let a = PerRequestLifetime.get_instance(&create, &ctx).unwrap();
        let b = PerRequestLifetime.get_instance(&create, &ctx).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        scope.dispose().unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn per_request_disposable_without_scope_fails() {
        let key = ServiceKey::of::<Flag>();
        let bag = DisposableBag::new();
        let ctx = LifetimeContext::new(&key, None, &bag);
        let create = || -> Result<Created> {
            let flag = Arc::new(Flag(Arc::new(AtomicU32::new(0))));
            Ok(Created {
                instance: flag.clone(),
                disposables: vec![flag as Arc<dyn Disposable>],
            })
        };
        assert!(PerRequestLifetime.get_instance(&create, &ctx).is_err());
    }
}
