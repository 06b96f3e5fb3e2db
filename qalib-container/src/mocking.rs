//! Runtime substitution of registrations.
//!
//! Mocking swaps the registration of a key for a stub factory and later
//! puts the original back. The original keeps its lifetime object, so a
//! singleton created before the mock is the one returned after it.
//!
//! ```
//! use qalib_container::prelude::*;
//!
//! let container = ServiceContainer::new();
//! container.register_instance(String::from("production")).unwrap();
//!
//! container.start_mocking::<String>(|_| Ok(String::from("stub"))).unwrap();
//! assert_eq!(container.resolve::<String>().unwrap(), "stub");
//!
//! container.end_mocking::<String>().unwrap();
//! assert_eq!(container.resolve::<String>().unwrap(), "production");
//! ```

use tracing::debug;

use crate::container::ServiceContainer;
use crate::error::{QalibError, Result};
use crate::expression::FactoryExpression;
use crate::factory::ServiceFactory;
use crate::key::ServiceKey;
use crate::registration::{Implementation, ServiceRegistration};

impl ServiceContainer {
    /// Replaces the default registration of `S` with `factory`.
    pub fn start_mocking<S: Send + Sync + 'static>(
        &self,
        factory: impl Fn(&dyn ServiceFactory) -> Result<S> + Send + Sync + 'static,
    ) -> Result<()> {
        self.start_mocking_key(ServiceKey::of::<S>(), FactoryExpression::factory(factory))
    }

    /// Replaces the registration of `S` named `name` with `factory`.
    pub fn start_mocking_named<S: Send + Sync + 'static>(
        &self,
        name: &str,
        factory: impl Fn(&dyn ServiceFactory) -> Result<S> + Send + Sync + 'static,
    ) -> Result<()> {
        self.start_mocking_key(ServiceKey::named::<S>(name), FactoryExpression::factory(factory))
    }

    /// Replaces the registration of `key` with `expression`, producing a
    /// new instance per request.
    ///
    /// Mocking a key again replaces the stub; the saved original stays the
    /// one registered before the first mock.
    pub fn start_mocking_key(&self, key: ServiceKey, expression: FactoryExpression) -> Result<()> {
        let inner = self.inner();
        let mock = ServiceRegistration::new(key.service_type().clone(), Implementation::Expression(expression))
            .named(key.service_name().clone());

        let mut mocks = inner.mocks.lock();
        let previous = inner.registry().replace(mock);
        mocks.entry(key.clone()).or_insert(previous);
        drop(mocks);

        debug!(service = %key, "Started mocking");
        inner.invalidate();
        Ok(())
    }

    /// Restores the default registration of `S`.
    pub fn end_mocking<S: ?Sized + 'static>(&self) -> Result<()> {
        self.end_mocking_key(&ServiceKey::of::<S>())
    }

    /// Restores the registration of `key` as it was before mocking began.
    pub fn end_mocking_key(&self, key: &ServiceKey) -> Result<()> {
        let inner = self.inner();
        let mut mocks = inner.mocks.lock();
        let original = mocks
            .remove(key)
            .ok_or_else(|| QalibError::MockNotStarted { key: key.clone() })?;

        match original {
            Some(registration) => {
                inner.registry().replace(registration);
            }
            None => {
                inner.registry().remove(key);
            }
        }
        drop(mocks);

        debug!(service = %key, "Ended mocking");
        inner.invalidate();
        Ok(())
    }

    /// `true` while `key` is mocked.
    pub fn is_mocked(&self, key: &ServiceKey) -> bool {
        self.inner().mocks.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::factory::ServiceFactoryExt;
    use crate::lifetime::PerContainerLifetime;
    use crate::metadata::{Component, TypeInfo};

    use super::*;

    trait Clock: Send + Sync {
        fn now(&self) -> u64;
    }

    struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> u64 {
            1_700_000_000
        }
    }

    impl Component for SystemClock {
        fn type_info() -> TypeInfo {
            TypeInfo::builder::<SystemClock>()
                .constructor(|p| p, |_| Ok(SystemClock))
                .implements::<Arc<dyn Clock>>(|this| this as Arc<dyn Clock>)
                .build()
        }
    }

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn mock_replaces_and_restores_singleton() {
        let container = ServiceContainer::new();
        container
            .register(
                ServiceRegistration::for_type::<Arc<dyn Clock>, SystemClock>()
                    .with_lifetime(PerContainerLifetime::new()),
            )
            .unwrap();

        let original: Arc<dyn Clock> = container.resolve().unwrap();

        container
            .start_mocking::<Arc<dyn Clock>>(|_| Ok(Arc::new(FixedClock(42)) as Arc<dyn Clock>))
            .unwrap();
        assert!(container.is_mocked(&ServiceKey::of::<Arc<dyn Clock>>()));
        let stub: Arc<dyn Clock> = container.resolve().unwrap();
        assert_eq!(stub.now(), 42);

        container.end_mocking::<Arc<dyn Clock>>().unwrap();
        let restored: Arc<dyn Clock> = container.resolve().unwrap();
        assert!(Arc::ptr_eq(&original, &restored));
    }

    #[test]
    fn mocking_an_unregistered_key_removes_it_afterwards() {
        let container = ServiceContainer::new();
        container.start_mocking_named::<u32>("port", |_| Ok(8080)).unwrap();
        assert_eq!(container.resolve_named::<u32>("port").unwrap(), 8080);

        container.end_mocking_key(&ServiceKey::named::<u32>("port")).unwrap();
        assert!(container.try_resolve::<u32>().unwrap().is_none());
    }

    #[test]
    fn remocking_keeps_the_first_original() {
        let container = ServiceContainer::new();
        container.register_instance(1u8).unwrap();
        container.start_mocking::<u8>(|_| Ok(2)).unwrap();
        container.start_mocking::<u8>(|_| Ok(3)).unwrap();
        assert_eq!(container.resolve::<u8>().unwrap(), 3);

        container.end_mocking::<u8>().unwrap();
        assert_eq!(container.resolve::<u8>().unwrap(), 1);
    }

    #[test]
    fn ending_without_start_fails() {
        let container = ServiceContainer::new();
        let err = container.end_mocking::<u8>().unwrap_err();
        assert!(matches!(err, QalibError::MockNotStarted { .. }));
    }
}
