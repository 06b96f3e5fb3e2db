//! # The container
//!
//! Owns the registrations, the plan and routine caches, the container-wide
//! disposables and the scope context, and resolves services by compiling
//! and running creation routines.
//!
//! # Architecture
//! ```text
//! ContainerBuilder ──build()──> ServiceContainer ──begin_scope()──> Scope
//!                                      │
//!                                get_instance(T, name)
//!                                      │
//!                  routine cache ──miss──> Compiler ──> Emitter
//!                                      │
//!                                 run routine
//! ```
//!
//! # Examples
//! ```rust
//! use qalib_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct English;
//!
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         "hello".into()
//!     }
//! }
//!
//! impl Component for English {
//!     fn type_info() -> TypeInfo {
//!         TypeInfo::builder::<English>()
//!             .constructor(|p| p, |_| Ok(English))
//!             .implements::<Arc<dyn Greeter>>(|this| this as Arc<dyn Greeter>)
//!             .build()
//!     }
//! }
//!
//! let container = ServiceContainer::new();
//! container.register_singleton::<Arc<dyn Greeter>, English>().unwrap();
//!
//! let greeter: Arc<dyn Greeter> = container.resolve().unwrap();
//! assert_eq!(greeter.greet(), "hello");
//! ```

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace};

use crate::compiler::Compiler;
use crate::composition::CompositionRoot;
use crate::dispose::DisposableBag;
use crate::emit::{CreationRoutine, EmitterFactory, Frame, StackEmitterFactory};
use crate::error::{QalibError, Result, ScopeError};
use crate::expression::FactoryExpression;
use crate::factory::ServiceFactory;
use crate::graph::{self, ValidationReport};
use crate::key::{ServiceKey, ServiceName};
use crate::lifetime::{PerContainerLifetime, PerScopeLifetime};
use crate::metadata::{Component, GenericTypeInfo, Instance};
use crate::options::{ContainerOptions, ScopeAffinity};
use crate::plan::{ConstructionInfoBuilder, ConstructionInfoProvider};
use crate::registration::{DecoratorRegistration, FactoryRule, ServiceRegistration};
use crate::registry::{RegisterOutcome, Registry};
use crate::scope::{PerThreadScopeManagerProvider, Scope, ScopeManagerProvider, ScopeRef};
use crate::selector::{
    ConstructorDependencySelector, ConstructorSelector, DefaultConstructorDependencySelector,
    GreediestConstructorSelector, PropertyDependencySelector, SettablePropertyDependencySelector,
};
use crate::types::{GenericDefinition, ServiceType};
use crate::wrappers::EnumerableInstance;

// ============================================================
// ContainerInner
// ============================================================

/// State shared by the container, its scopes and the deferred wrappers it
/// hands out. Scopes and wrappers hold it weakly.
pub(crate) struct ContainerInner {
    options: ContainerOptions,
    registry: Registry,
    plans: ConstructionInfoProvider,
    routines: DashMap<ServiceKey, (u64, CreationRoutine)>,
    /// Bumped on every structural change; routines of older generations are stale.
    generation: AtomicU64,
    scope_provider: Arc<dyn ScopeManagerProvider>,
    emitters: Arc<dyn EmitterFactory>,
    disposables: DisposableBag,
    /// Original registrations of mocked keys; `None` when nothing was registered.
    pub(crate) mocks: Mutex<HashMap<ServiceKey, Option<ServiceRegistration>>>,
    composed: Mutex<HashSet<TypeId>>,
    disposed: AtomicBool,
}

impl ContainerInner {
    pub(crate) fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn plans(&self) -> &ConstructionInfoProvider {
        &self.plans
    }

    pub(crate) fn emitters(&self) -> &dyn EmitterFactory {
        &*self.emitters
    }

    pub(crate) fn disposables(&self) -> &DisposableBag {
        &self.disposables
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn current_scope(&self) -> Option<ScopeRef> {
        self.scope_provider.scope_manager().current_scope()
    }

    pub(crate) fn cached_routine(&self, key: &ServiceKey, generation: u64) -> Option<CreationRoutine> {
        self.routines
            .get(key)
            .filter(|entry| entry.0 == generation)
            .map(|entry| entry.1.clone())
    }

    /// Stores `routine` unless a routine of the same generation got there
    /// first, in which case that one is returned.
    pub(crate) fn memoize(&self, key: &ServiceKey, generation: u64, routine: CreationRoutine) -> CreationRoutine {
        if self.generation() != generation {
            return routine;
        }
        match self.routines.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().0 == generation => entry.get().1.clone(),
            Entry::Occupied(mut entry) => {
                if entry.get().0 < generation {
                    entry.insert((generation, routine.clone()));
                }
                routine
            }
            Entry::Vacant(entry) => {
                entry.insert((generation, routine.clone()));
                routine
            }
        }
    }

    /// Drops every compiled routine and plan.
    pub(crate) fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.routines.clear();
        self.plans.clear();
        trace!(generation, "Invalidated compiled routines");
    }

    fn routine_for(self: &Arc<Self>, key: &ServiceKey) -> Result<CreationRoutine> {
        if let Some(routine) = self.cached_routine(key, self.generation()) {
            return Ok(routine);
        }
        Compiler::new(self).compile(key)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(QalibError::ContainerDisposed);
        }
        Ok(())
    }

    /// Resolves in `scope`, or in the ambient scope when `None`.
    pub(crate) fn get_instance_in(
        self: &Arc<Self>,
        service_type: &ServiceType,
        name: &ServiceName,
        scope: Option<&ScopeRef>,
        arguments: &[Instance],
    ) -> Result<Instance> {
        self.ensure_alive()?;
        let key = ServiceKey::new(service_type.clone(), name.clone());
        let routine = self.routine_for(&key)?;

        let ambient;
        let scope = match scope {
            Some(scope) => Some(scope),
            None => {
                ambient = self.current_scope();
                ambient.as_ref()
            }
        };

        if let Some(scope) = scope.filter(|s| s.is_completed()) {
            return Err(ScopeError::Completed { scope: scope.id() }.into());
        }

        trace!(service = %key, scope = ?scope.map(ScopeRef::id), "Resolving");
        Ok(routine(&Frame::new(self, scope, arguments))?.instance)
    }

    pub(crate) fn get_all_instances_in(
        self: &Arc<Self>,
        service_type: &ServiceType,
        scope: Option<&ScopeRef>,
    ) -> Result<Vec<Instance>> {
        let instance = self.get_instance_in(
            &ServiceType::enumerable(service_type.clone()),
            &ServiceName::default(),
            scope,
            &[],
        )?;
        let all = instance
            .downcast_ref::<EnumerableInstance>()
            .ok_or_else(|| QalibError::TypeMismatch {
                expected: std::any::type_name::<EnumerableInstance>(),
                context: format!("enumeration of {service_type}"),
            })?;
        Ok(all.instances()?.to_vec())
    }

    pub(crate) fn register(&self, registration: ServiceRegistration) -> Result<RegisterOutcome> {
        self.ensure_alive()?;
        let outcome = self.registry.register(registration, self.options.allow_override)?;
        if outcome != RegisterOutcome::Ignored {
            self.invalidate();
        }
        Ok(outcome)
    }

    pub(crate) fn decorate(&self, decorator: DecoratorRegistration) -> Result<()> {
        self.ensure_alive()?;
        let decorator = self.registry.add_decorator(decorator);
        debug!(decorator = ?decorator, "Registered decorator");
        self.invalidate();
        Ok(())
    }

    pub(crate) fn register_fallback(&self, rule: FactoryRule) -> Result<()> {
        self.ensure_alive()?;
        debug!(rule = ?rule, "Registered factory rule");
        self.registry.add_rule(rule);
        self.invalidate();
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(tracked = self.disposables.len(), "Disposing container");
        self.disposables.dispose_all();
        self.routines.clear();
    }
}

// ============================================================
// ServiceContainer
// ============================================================

/// The dependency injection container.
///
/// Registration and resolution may happen from any thread. Dropping the
/// container disposes its per-container instances.
pub struct ServiceContainer {
    inner: Arc<ContainerInner>,
}

impl ServiceContainer {
    /// A container with default options.
    pub fn new() -> Self {
        ContainerBuilder::new().assemble()
    }

    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.inner.options
    }

    // ── Registration ──

    /// Adds a registration. See [`ContainerOptions::allow_override`] for
    /// what happens when the key is taken.
    pub fn register(&self, registration: ServiceRegistration) -> Result<RegisterOutcome> {
        self.inner.register(registration)
    }

    /// `S` implemented by `I`, a new instance per request.
    pub fn register_type<S: ?Sized + 'static, I: Component>(&self) -> Result<RegisterOutcome> {
        self.register(ServiceRegistration::for_type::<S, I>())
    }

    /// `S` implemented by `I`, one instance per container.
    pub fn register_singleton<S: ?Sized + 'static, I: Component>(&self) -> Result<RegisterOutcome> {
        self.register(ServiceRegistration::for_type::<S, I>().with_lifetime(PerContainerLifetime::new()))
    }

    /// `S` implemented by `I`, one instance per scope.
    pub fn register_scoped<S: ?Sized + 'static, I: Component>(&self) -> Result<RegisterOutcome> {
        self.register(ServiceRegistration::for_type::<S, I>().with_lifetime(PerScopeLifetime::new()))
    }

    /// A fixed value.
    pub fn register_instance<S: Send + Sync + 'static>(&self, value: S) -> Result<RegisterOutcome> {
        self.register(ServiceRegistration::instance(value))
    }

    /// `S` produced by `expression` on every request.
    pub fn register_factory<S: ?Sized + 'static>(
        &self,
        expression: impl Into<FactoryExpression>,
    ) -> Result<RegisterOutcome> {
        self.register(ServiceRegistration::factory::<S>(expression))
    }

    /// Every closed form of `service`, implemented by `implementation`.
    pub fn register_open_generic(
        &self,
        service: GenericDefinition,
        implementation: GenericTypeInfo,
    ) -> Result<RegisterOutcome> {
        self.register(ServiceRegistration::open_generic(service, implementation))
    }

    /// Wraps the registrations of the decorator's service type.
    ///
    /// The last decorator registered is the outermost one.
    pub fn decorate(&self, decorator: DecoratorRegistration) -> Result<()> {
        self.inner.decorate(decorator)
    }

    /// Adds a rule producing services that have no registration.
    pub fn register_fallback(&self, rule: FactoryRule) -> Result<()> {
        self.inner.register_fallback(rule)
    }

    /// Runs the composition root `R` unless it already ran on this container.
    pub fn register_from<R: CompositionRoot + Default + 'static>(&self) -> Result<()> {
        self.compose(TypeId::of::<R>(), std::any::type_name::<R>(), &R::default())
    }

    fn compose(&self, id: TypeId, name: &'static str, root: &dyn CompositionRoot) -> Result<()> {
        if !self.inner.composed.lock().insert(id) {
            trace!(root = name, "Composition root already executed");
            return Ok(());
        }
        debug!(root = name, "Executing composition root");
        root.compose(self)
    }

    /// Every registration, in registration order.
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.inner.registry.all()
    }

    pub fn is_registered(&self, key: &ServiceKey) -> bool {
        self.inner.registry.contains(key)
    }

    // ── Resolution ──

    /// Checks every registration without creating anything.
    pub fn validate(&self) -> ValidationReport {
        graph::validate(&self.inner)
    }

    // ── Scopes and lifecycle ──

    /// Begins a scope nested in the current one of this context.
    pub fn begin_scope(&self) -> Scope {
        self.inner
            .scope_provider
            .scope_manager()
            .begin_scope(Arc::downgrade(&self.inner))
    }

    /// The ambient scope of the calling context.
    pub fn current_scope(&self) -> Option<ScopeRef> {
        self.inner.current_scope()
    }

    /// Disposes every per-container instance, in creation order, once.
    /// Later resolutions fail with [`QalibError::ContainerDisposed`].
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceFactory for ServiceContainer {
    fn get_instance(&self, service_type: &ServiceType, name: &ServiceName) -> Result<Instance> {
        self.inner.get_instance_in(service_type, name, None, &[])
    }

    fn get_instance_with(
        &self,
        service_type: &ServiceType,
        name: &ServiceName,
        arguments: &[Instance],
    ) -> Result<Instance> {
        self.inner.get_instance_in(service_type, name, None, arguments)
    }

    fn get_all_instances(&self, service_type: &ServiceType) -> Result<Vec<Instance>> {
        self.inner.get_all_instances_in(service_type, None)
    }
}

impl Drop for ServiceContainer {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("registrations", &self.inner.registry.len())
            .field("decorators", &self.inner.registry.decorator_count())
            .field("compiled", &self.inner.routines.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================
// ContainerBuilder
// ============================================================

/// Configures and builds a [`ServiceContainer`].
///
/// ```rust
/// use qalib_container::prelude::*;
///
/// let container = ServiceContainer::builder()
///     .allow_override(false)
///     .validate_on_build(true)
///     .build()
///     .unwrap();
///
/// container.register_instance(8080u16).unwrap();
/// assert!(container.register_instance(9090u16).is_err());
/// ```
pub struct ContainerBuilder {
    options: ContainerOptions,
    constructor_selector: Arc<dyn ConstructorSelector>,
    constructor_dependency_selector: Arc<dyn ConstructorDependencySelector>,
    property_dependency_selector: Arc<dyn PropertyDependencySelector>,
    emitters: Arc<dyn EmitterFactory>,
    scope_provider: Option<Arc<dyn ScopeManagerProvider>>,
    roots: Vec<(TypeId, &'static str, Box<dyn CompositionRoot>)>,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            options: ContainerOptions::default(),
            constructor_selector: Arc::new(GreediestConstructorSelector),
            constructor_dependency_selector: Arc::new(DefaultConstructorDependencySelector),
            property_dependency_selector: Arc::new(SettablePropertyDependencySelector),
            emitters: Arc::new(StackEmitterFactory),
            scope_provider: None,
            roots: Vec::new(),
        }
    }

    /// Replaces every option at once.
    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn allow_override(mut self, allow: bool) -> Self {
        self.options.allow_override = allow;
        self
    }

    pub fn enable_property_injection(mut self, enable: bool) -> Self {
        self.options.enable_property_injection = enable;
        self
    }

    pub fn enable_single_named_fallback(mut self, enable: bool) -> Self {
        self.options.enable_single_named_fallback = enable;
        self
    }

    pub fn enable_open_generic_fallback(mut self, enable: bool) -> Self {
        self.options.enable_open_generic_fallback = enable;
        self
    }

    pub fn scope_affinity(mut self, affinity: ScopeAffinity) -> Self {
        self.options.scope_affinity = affinity;
        self
    }

    pub fn validate_on_build(mut self, validate: bool) -> Self {
        self.options.validate_on_build = validate;
        self
    }

    pub fn constructor_selector(mut self, selector: impl ConstructorSelector + 'static) -> Self {
        self.constructor_selector = Arc::new(selector);
        self
    }

    pub fn constructor_dependency_selector(mut self, selector: impl ConstructorDependencySelector + 'static) -> Self {
        self.constructor_dependency_selector = Arc::new(selector);
        self
    }

    pub fn property_dependency_selector(mut self, selector: impl PropertyDependencySelector + 'static) -> Self {
        self.property_dependency_selector = Arc::new(selector);
        self
    }

    /// Plugs in another code emission backend.
    pub fn emitter_factory(mut self, factory: impl EmitterFactory + 'static) -> Self {
        self.emitters = Arc::new(factory);
        self
    }

    /// Overrides the scope context chosen by [`ScopeAffinity`].
    pub fn scope_manager_provider(mut self, provider: impl ScopeManagerProvider + 'static) -> Self {
        self.scope_provider = Some(Arc::new(provider));
        self
    }

    /// Runs the composition root `R` when the container is built.
    pub fn with_root<R: CompositionRoot + Default + 'static>(mut self) -> Self {
        self.roots
            .push((TypeId::of::<R>(), std::any::type_name::<R>(), Box::new(R::default())));
        self
    }

    fn default_scope_provider(affinity: ScopeAffinity) -> Arc<dyn ScopeManagerProvider> {
        match affinity {
            #[cfg(feature = "async")]
            ScopeAffinity::CallContext => Arc::new(crate::scope::PerLogicalCallContextScopeManagerProvider::new()),
            _ => Arc::new(PerThreadScopeManagerProvider::new()),
        }
    }

    fn assemble(self) -> ServiceContainer {
        let scope_provider = self
            .scope_provider
            .unwrap_or_else(|| Self::default_scope_provider(self.options.scope_affinity));
        let builder = ConstructionInfoBuilder::new(
            self.constructor_selector,
            self.constructor_dependency_selector,
            self.property_dependency_selector,
        );

        let inner = Arc::new(ContainerInner {
            options: self.options,
            registry: Registry::new(),
            plans: ConstructionInfoProvider::new(builder),
            routines: DashMap::new(),
            generation: AtomicU64::new(1),
            scope_provider,
            emitters: self.emitters,
            disposables: DisposableBag::new(),
            mocks: Mutex::new(HashMap::new()),
            composed: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
        });
        ServiceContainer { inner }
    }

    /// Builds the container and runs the composition roots.
    ///
    /// With `validate_on_build` the container is validated afterwards and
    /// any issue fails the build with [`QalibError::ValidationFailed`].
    #[instrument(skip(self), name = "container_build")]
    pub fn build(mut self) -> Result<ServiceContainer> {
        let roots = std::mem::take(&mut self.roots);
        let container = self.assemble();

        for (id, name, root) in &roots {
            container.compose(*id, name, root.as_ref())?;
        }

        info!(
            registered = container.inner.registry.len(),
            decorators = container.inner.registry.decorator_count(),
            roots = roots.len(),
            "Built container"
        );

        if container.inner.options.validate_on_build {
            let report = container.validate();
            if !report.is_valid() {
                return Err(QalibError::ValidationFailed(report));
            }
        }
        Ok(container)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("options", &self.options)
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

/// Convenient imports for working with the container.
pub mod prelude {
    pub use super::{ContainerBuilder, ServiceContainer};
    pub use crate::composition::{CompositionRoot, ServiceRegistry};
    pub use crate::dispose::Disposable;
    pub use crate::error::{QalibError, Result};
    pub use crate::expression::FactoryExpression;
    pub use crate::factory::{ServiceFactory, ServiceFactoryExt};
    pub use crate::graph::ValidationReport;
    pub use crate::key::{ServiceKey, ServiceName};
    pub use crate::lifetime::{Lifetime, PerContainerLifetime, PerRequestLifetime, PerScopeLifetime};
    pub use crate::metadata::{Arguments, Component, GenericTypeInfo, Instance, TypeInfo};
    pub use crate::options::{ContainerOptions, ScopeAffinity};
    pub use crate::registration::{DecoratorRegistration, FactoryRule, ServiceRegistration};
    pub use crate::registry::RegisterOutcome;
    pub use crate::scope::{Scope, ScopeRef};
    pub use crate::types::{GenericDefinition, ServiceType};
    pub use crate::wrappers::{All, Func, FuncWith, Lazy};
}
