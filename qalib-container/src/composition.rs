//! Composition roots and type scanning.
//!
//! A [`CompositionRoot`] groups related registrations in one place. A
//! [`TypeScanner`] discovers implementing types on its own and calls back
//! into a [`ServiceRegistry`] once per service it decides to register.
//!
//! The shipped scanner, [`InventoryScanner`], walks the components that
//! announced themselves with [`inventory::submit!`], which is what
//! `#[derive(Component)]` emits for `#[component(scan)]` types.

use std::sync::Arc;

use qalib_support::rendering::shorten_type_name;
use tracing::{debug, trace};

use crate::container::ServiceContainer;
use crate::error::Result;
use crate::lifetime::Lifetime;
use crate::metadata::TypeInfo;
use crate::registration::{DecoratorRegistration, FactoryRule, ServiceRegistration};
use crate::registry::RegisterOutcome;
use crate::types::ServiceType;

/// The registration surface handed to composition roots and scanners.
pub trait ServiceRegistry {
    fn register(&self, registration: ServiceRegistration) -> Result<RegisterOutcome>;

    fn decorate(&self, decorator: DecoratorRegistration) -> Result<()>;

    fn register_fallback(&self, rule: FactoryRule) -> Result<()>;
}

impl ServiceRegistry for ServiceContainer {
    fn register(&self, registration: ServiceRegistration) -> Result<RegisterOutcome> {
        ServiceContainer::register(self, registration)
    }

    fn decorate(&self, decorator: DecoratorRegistration) -> Result<()> {
        ServiceContainer::decorate(self, decorator)
    }

    fn register_fallback(&self, rule: FactoryRule) -> Result<()> {
        ServiceContainer::register_fallback(self, rule)
    }
}

/// A group of registrations.
///
/// ```
/// use qalib_container::prelude::*;
///
/// #[derive(Default)]
/// struct Settings;
///
/// impl CompositionRoot for Settings {
///     fn compose(&self, registry: &dyn ServiceRegistry) -> Result<()> {
///         registry.register(ServiceRegistration::instance(30u64).named("timeout"))?;
///         Ok(())
///     }
/// }
///
/// let container = ServiceContainer::new();
/// container.register_from::<Settings>().unwrap();
/// assert_eq!(container.resolve_named::<u64>("timeout").unwrap(), 30);
/// ```
pub trait CompositionRoot: Send + Sync {
    fn compose(&self, registry: &dyn ServiceRegistry) -> Result<()>;
}

/// Lifetime for a scanned type; `None` registers it transient.
pub type LifetimeFactory<'a> = &'a dyn Fn(&TypeInfo) -> Option<Arc<dyn Lifetime>>;

/// Decides whether a scanned (service, implementing type) pair is registered.
pub type ShouldRegister<'a> = &'a dyn Fn(&ServiceType, &TypeInfo) -> bool;

/// Discovers implementing types and registers them.
pub trait TypeScanner {
    /// Registers every accepted pair and returns how many were registered.
    fn scan(
        &self,
        registry: &dyn ServiceRegistry,
        lifetime_factory: LifetimeFactory<'_>,
        should_register: ShouldRegister<'_>,
    ) -> Result<usize>;
}

/// A component announced for scanning.
pub struct ComponentDescriptor {
    type_info: fn() -> TypeInfo,
    module: &'static str,
}

impl ComponentDescriptor {
    pub const fn new(type_info: fn() -> TypeInfo, module: &'static str) -> Self {
        Self { type_info, module }
    }

    pub fn type_info(&self) -> TypeInfo {
        (self.type_info)()
    }

    /// Module path the component was declared in.
    pub fn module(&self) -> &'static str {
        self.module
    }
}

inventory::collect!(ComponentDescriptor);

/// Scans the components announced with [`inventory::submit!`].
///
/// Every service a component exposes is registered under the component's
/// short type name, so a service with one scanned implementation still
/// resolves by its default name.
#[derive(Debug, Default, Clone)]
pub struct InventoryScanner {
    module_prefix: Option<String>,
}

impl InventoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only components declared under `prefix`.
    pub fn in_module(prefix: impl Into<String>) -> Self {
        Self {
            module_prefix: Some(prefix.into()),
        }
    }

    fn accepts(&self, descriptor: &ComponentDescriptor) -> bool {
        self.module_prefix
            .as_deref()
            .is_none_or(|prefix| descriptor.module().starts_with(prefix))
    }
}

impl TypeScanner for InventoryScanner {
    fn scan(
        &self,
        registry: &dyn ServiceRegistry,
        lifetime_factory: LifetimeFactory<'_>,
        should_register: ShouldRegister<'_>,
    ) -> Result<usize> {
        let mut registered = 0;

        for descriptor in inventory::iter::<ComponentDescriptor> {
            if !self.accepts(descriptor) {
                continue;
            }
            let type_info = descriptor.type_info();
            let name = shorten_type_name(type_info.name());

            for service_type in type_info.exposed_services().cloned().collect::<Vec<_>>() {
                if !should_register(&service_type, &type_info) {
                    trace!(service = %service_type, implementing = %name, "Scanner skipped service");
                    continue;
                }

                let mut registration =
                    ServiceRegistration::implemented_by(service_type, type_info.clone()).named(name.as_str());
                if let Some(lifetime) = lifetime_factory(&type_info) {
                    registration = registration.with_shared_lifetime(lifetime);
                }
                if registry.register(registration)? != RegisterOutcome::Ignored {
                    registered += 1;
                }
            }
        }

        debug!(registered, module = ?self.module_prefix, "Scanned components");
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ServiceFactoryExt;
    use crate::key::ServiceKey;
    use crate::lifetime::PerContainerLifetime;
    use crate::metadata::Component;

    trait Notifier: Send + Sync {
        fn channel(&self) -> &'static str;
    }

    struct EmailNotifier;

    impl Notifier for EmailNotifier {
        fn channel(&self) -> &'static str {
            "email"
        }
    }

    impl Component for EmailNotifier {
        fn type_info() -> TypeInfo {
            TypeInfo::builder::<EmailNotifier>()
                .constructor(|p| p, |_| Ok(EmailNotifier))
                .implements::<Arc<dyn Notifier>>(|this| this as Arc<dyn Notifier>)
                .build()
        }
    }

    inventory::submit! {
        ComponentDescriptor::new(<EmailNotifier as Component>::type_info, module_path!())
    }

    #[derive(Default)]
    struct Counting;

    static RUNS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    impl CompositionRoot for Counting {
        fn compose(&self, registry: &dyn ServiceRegistry) -> Result<()> {
            RUNS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            registry.register(ServiceRegistration::instance(7u16))?;
            Ok(())
        }
    }

    #[test]
    fn composition_root_runs_once() {
        let container = ServiceContainer::new();
        container.register_from::<Counting>().unwrap();
        container.register_from::<Counting>().unwrap();

        assert_eq!(RUNS.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(container.resolve::<u16>().unwrap(), 7);
    }

    #[test]
    fn scanner_registers_under_short_type_name() {
        let container = ServiceContainer::new();
        let singleton = |_: &TypeInfo| Some(Arc::new(PerContainerLifetime::new()) as Arc<dyn Lifetime>);
        let count = InventoryScanner::in_module(module_path!())
            .scan(&container, &singleton, &|_: &ServiceType, _: &TypeInfo| true)
            .unwrap();

        assert!(count >= 1);
        assert!(container.is_registered(&ServiceKey::named::<Arc<dyn Notifier>>("EmailNotifier")));

        let first: Arc<dyn Notifier> = container.resolve().unwrap();
        let second: Arc<dyn Notifier> = container.resolve().unwrap();
        assert_eq!(first.channel(), "email");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn scanner_honours_predicate() {
        let container = ServiceContainer::new();
        let count = InventoryScanner::in_module(module_path!())
            .scan(&container, &|_: &TypeInfo| None, &|_: &ServiceType, _: &TypeInfo| false)
            .unwrap();
        assert_eq!(count, 0);
        assert!(container.registrations().is_empty());
    }
}
