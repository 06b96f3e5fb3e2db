//! The resolution surface shared by containers, scopes and factory delegates.

use std::any::type_name;
use std::sync::Arc;

use crate::error::{QalibError, Result};
use crate::key::ServiceName;
use crate::metadata::{Instance, downcast_instance};
use crate::types::ServiceType;
use crate::wrappers::{Func, FuncInstance, Lazy, LazyInstance};

/// Object-safe resolution over erased instances.
///
/// Everything user code receives while the container builds a graph
/// (factory delegates, factory rules, composition helpers) sees the
/// container through this trait. Typed helpers live on
/// [`ServiceFactoryExt`].
pub trait ServiceFactory: Send + Sync {
    /// Resolves `service_type` registered under `name`.
    fn get_instance(&self, service_type: &ServiceType, name: &ServiceName) -> Result<Instance>;

    /// Like [`get_instance`](Self::get_instance), but `Ok(None)` when the
    /// requested service itself is unknown.
    fn try_get_instance(&self, service_type: &ServiceType, name: &ServiceName) -> Result<Option<Instance>> {
        match self.get_instance(service_type, name) {
            Ok(instance) => Ok(Some(instance)),
            Err(e) if e.is_unresolved() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolves with runtime arguments available to the factory.
    fn get_instance_with(
        &self,
        service_type: &ServiceType,
        name: &ServiceName,
        arguments: &[Instance],
    ) -> Result<Instance>;

    /// Every registration of `service_type`, in registration order.
    fn get_all_instances(&self, service_type: &ServiceType) -> Result<Vec<Instance>>;
}

/// Typed helpers over [`ServiceFactory`].
pub trait ServiceFactoryExt: ServiceFactory {
    /// Resolves the default registration of `T`.
    fn resolve<T: Clone + 'static>(&self) -> Result<T> {
        downcast_instance(&self.get_instance(&ServiceType::of::<T>(), &ServiceName::default())?)
    }

    fn resolve_named<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        downcast_instance(&self.get_instance(&ServiceType::of::<T>(), &ServiceName::from(name))?)
    }

    fn try_resolve<T: Clone + 'static>(&self) -> Result<Option<T>> {
        self.try_get_instance(&ServiceType::of::<T>(), &ServiceName::default())?
            .map(|instance| downcast_instance(&instance))
            .transpose()
    }

    /// Resolves `T` without cloning it.
    fn resolve_shared<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_instance(&ServiceType::of::<T>(), &ServiceName::default())?
            .downcast::<T>()
            .map_err(|_| QalibError::TypeMismatch {
                expected: type_name::<T>(),
                context: "resolve_shared".into(),
            })
    }

    /// Resolves `T` passing one runtime argument to its factory.
    fn resolve_with<A: Send + Sync + 'static, T: Clone + 'static>(&self, argument: A) -> Result<T> {
        let arguments = [Arc::new(argument) as Instance];
        downcast_instance(&self.get_instance_with(
            &ServiceType::of::<T>(),
            &ServiceName::default(),
            &arguments,
        )?)
    }

    fn resolve_lazy<T: 'static>(&self) -> Result<Lazy<T>> {
        let instance = self.get_instance(
            &ServiceType::lazy(ServiceType::of::<T>()),
            &ServiceName::default(),
        )?;
        downcast_instance::<LazyInstance>(&instance).map(Lazy::from_instance)
    }

    fn resolve_func<T: 'static>(&self) -> Result<Func<T>> {
        let instance = self.get_instance(
            &ServiceType::func(ServiceType::of::<T>()),
            &ServiceName::default(),
        )?;
        downcast_instance::<FuncInstance>(&instance).map(Func::from_instance)
    }

    fn resolve_all<T: Clone + 'static>(&self) -> Result<Vec<T>> {
        self.get_all_instances(&ServiceType::of::<T>())?
            .iter()
            .map(downcast_instance)
            .collect()
    }
}

impl<F: ServiceFactory + ?Sized> ServiceFactoryExt for F {}
