//! Dependency discovery over [`TypeInfo`] metadata.
//!
//! Selectors are pure: they read metadata and describe what must be
//! supplied, without resolving anything. Each one sits behind a trait so
//! a host can swap the policy on [`ContainerBuilder`](crate::container::ContainerBuilder).

use crate::error::{QalibError, Result};
use crate::key::ServiceName;
use crate::metadata::{ConstructorInfo, TypeInfo, Visibility};
use crate::plan::{ConstructorDependency, Dependency, PropertyDependency};

/// Picks the constructor the container calls.
pub trait ConstructorSelector: Send + Sync {
    fn select(&self, type_info: &TypeInfo) -> Result<ConstructorInfo>;
}

/// Picks the public constructor with the most parameters; the first
/// declared wins a tie.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreediestConstructorSelector;

impl ConstructorSelector for GreediestConstructorSelector {
    fn select(&self, type_info: &TypeInfo) -> Result<ConstructorInfo> {
        let constructors = type_info.constructors();
        if constructors.is_empty() {
            return Err(QalibError::NoUsableConstructor {
                type_name: type_info.name().to_string(),
                reason: "the type declares no constructors".into(),
            });
        }

        constructors
            .iter()
            .filter(|c| c.visibility() == Visibility::Public)
            .fold(None::<&ConstructorInfo>, |best, candidate| match best {
                Some(best) if best.parameters().len() >= candidate.parameters().len() => Some(best),
                _ => Some(candidate),
            })
            .cloned()
            .ok_or_else(|| QalibError::NoUsableConstructor {
                type_name: type_info.name().to_string(),
                reason: "only private constructors are declared".into(),
            })
    }
}

/// Lists what each constructor parameter asks for.
pub trait ConstructorDependencySelector: Send + Sync {
    fn select(&self, constructor: &ConstructorInfo) -> Vec<ConstructorDependency>;
}

/// One required dependency per parameter, in declaration order, asking
/// for the parameter's service type under its declared service name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConstructorDependencySelector;

impl ConstructorDependencySelector for DefaultConstructorDependencySelector {
    fn select(&self, constructor: &ConstructorInfo) -> Vec<ConstructorDependency> {
        constructor
            .parameters()
            .iter()
            .map(|parameter| ConstructorDependency {
                dependency: Dependency::required(
                    parameter.service_type().clone(),
                    parameter.service_name().clone(),
                ),
                parameter: parameter.clone(),
                is_decorator_target: false,
            })
            .collect()
    }
}

/// Lists the properties the container sets after construction.
pub trait PropertyDependencySelector: Send + Sync {
    fn select(&self, type_info: &TypeInfo) -> Vec<PropertyDependency>;
}

/// Every settable instance property with a public setter. Plain
/// properties are optional; properties marked for injection are required
/// and ask for their annotated name.
#[derive(Debug, Default, Clone, Copy)]
pub struct SettablePropertyDependencySelector;

impl PropertyDependencySelector for SettablePropertyDependencySelector {
    fn select(&self, type_info: &TypeInfo) -> Vec<PropertyDependency> {
        type_info
            .properties()
            .iter()
            .filter(|p| p.has_setter() && !p.is_static() && p.setter_visibility() == Visibility::Public)
            .map(|property| {
                let service_type = property.service_type().clone();
                let dependency = match property.injection() {
                    Some(name) => Dependency::required(service_type, name.clone()),
                    None => Dependency::optional(service_type, ServiceName::default()),
                };
                PropertyDependency {
                    dependency,
                    property: property.clone(),
                }
            })
            .collect()
    }
}

/// Only properties marked for injection; those are required.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnotatedPropertyDependencySelector;

impl PropertyDependencySelector for AnnotatedPropertyDependencySelector {
    fn select(&self, type_info: &TypeInfo) -> Vec<PropertyDependency> {
        type_info
            .properties()
            .iter()
            .filter(|p| p.has_setter() && !p.is_static())
            .filter_map(|property| {
                let name: &ServiceName = property.injection()?;
                Some(PropertyDependency {
                    dependency: Dependency::required(property.service_type().clone(), name.clone()),
                    property: property.clone(),
                })
            })
            .collect()
    }
}

/// Disables property injection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPropertyDependencySelector;

impl PropertyDependencySelector for NoPropertyDependencySelector {
    fn select(&self, _type_info: &TypeInfo) -> Vec<PropertyDependency> {
        Vec::new()
    }
}
