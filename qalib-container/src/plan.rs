//! Construction plans.
//!
//! A [`ConstructionInfo`] says how one registration builds its instance:
//! which constructor to call, what each parameter and property asks for,
//! or which opaque factory delegate to run instead. Plans are derived
//! from either the implementing type (through the selectors) or the
//! registration's [`FactoryExpression`], and cached per registration
//! until the container's registrations change.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::error::{QalibError, Result};
use crate::expression::{FactoryExpression, NameArgument, NewExpression};
use crate::key::ServiceName;
use crate::metadata::{ConstructorInfo, ParameterInfo, PropertyInfo, TypeInfo, Visibility};
use crate::registration::{DecoratorRegistration, Registration};
use crate::selector::{
    ConstructorDependencySelector, ConstructorSelector, DefaultConstructorDependencySelector,
    GreediestConstructorSelector, PropertyDependencySelector, SettablePropertyDependencySelector,
};
use crate::types::ServiceType;

/// Something a constructor parameter or property needs.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub service_type: ServiceType,
    pub service_name: ServiceName,
    /// Evaluated directly instead of resolving `service_type`.
    pub factory_expression: Option<FactoryExpression>,
    pub is_required: bool,
}

impl Dependency {
    pub fn required(service_type: ServiceType, service_name: ServiceName) -> Self {
        Self {
            service_type,
            service_name,
            factory_expression: None,
            is_required: true,
        }
    }

    pub fn optional(service_type: ServiceType, service_name: ServiceName) -> Self {
        Self {
            is_required: false,
            ..Self::required(service_type, service_name)
        }
    }

    fn from_expression(service_type: ServiceType, expression: FactoryExpression) -> Self {
        Self {
            factory_expression: Some(expression),
            ..Self::required(service_type, ServiceName::default())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstructorDependency {
    pub dependency: Dependency,
    pub parameter: ParameterInfo,
    /// Receives the instance being decorated.
    pub is_decorator_target: bool,
}

#[derive(Debug, Clone)]
pub struct PropertyDependency {
    pub dependency: Dependency,
    pub property: PropertyInfo,
}

/// How to build the instance of one registration.
#[derive(Debug, Clone, Default)]
pub struct ConstructionInfo {
    pub implementing_type: Option<TypeInfo>,
    pub constructor: Option<ConstructorInfo>,
    pub constructor_dependencies: Vec<ConstructorDependency>,
    pub property_dependencies: Vec<PropertyDependency>,
    /// Set when the registration's expression cannot be decomposed.
    pub factory_delegate: Option<FactoryExpression>,
}

impl ConstructionInfo {
    /// Every dependency, constructor parameters first.
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.constructor_dependencies
            .iter()
            .map(|d| &d.dependency)
            .chain(self.property_dependencies.iter().map(|d| &d.dependency))
    }
}

/// Derives [`ConstructionInfo`] from registrations.
#[derive(Clone)]
pub struct ConstructionInfoBuilder {
    constructor_selector: Arc<dyn ConstructorSelector>,
    constructor_dependency_selector: Arc<dyn ConstructorDependencySelector>,
    property_dependency_selector: Arc<dyn PropertyDependencySelector>,
}

impl Default for ConstructionInfoBuilder {
    fn default() -> Self {
        Self::new(
            Arc::new(GreediestConstructorSelector),
            Arc::new(DefaultConstructorDependencySelector),
            Arc::new(SettablePropertyDependencySelector),
        )
    }
}

impl ConstructionInfoBuilder {
    pub fn new(
        constructor_selector: Arc<dyn ConstructorSelector>,
        constructor_dependency_selector: Arc<dyn ConstructorDependencySelector>,
        property_dependency_selector: Arc<dyn PropertyDependencySelector>,
    ) -> Self {
        Self {
            constructor_selector,
            constructor_dependency_selector,
            property_dependency_selector,
        }
    }

    /// Plans `registration`, preferring its factory expression over its
    /// implementing type.
    pub fn build(&self, registration: &dyn Registration) -> Result<ConstructionInfo> {
        if let Some(expression) = registration.factory_expression() {
            return self.from_expression(expression);
        }
        match registration.implementing_type() {
            Some(type_info) => self.from_type(type_info),
            None => Err(QalibError::InvalidExpression {
                reason: format!(
                    "registration for {} has neither an implementing type nor a factory expression",
                    registration.service_type()
                ),
            }),
        }
    }

    pub fn from_type(&self, type_info: &TypeInfo) -> Result<ConstructionInfo> {
        let constructor = self.constructor_selector.select(type_info)?;
        Ok(ConstructionInfo {
            implementing_type: Some(type_info.clone()),
            constructor_dependencies: self.constructor_dependency_selector.select(&constructor),
            property_dependencies: self.property_dependency_selector.select(type_info),
            constructor: Some(constructor),
            factory_delegate: None,
        })
    }

    /// Decomposes a `New` expression; anything else becomes a delegate.
    pub fn from_expression(&self, expression: &FactoryExpression) -> Result<ConstructionInfo> {
        match expression {
            FactoryExpression::New(new) => decompose(new),
            other => Ok(ConstructionInfo {
                factory_delegate: Some(other.clone()),
                ..ConstructionInfo::default()
            }),
        }
    }
}

fn decompose(new: &NewExpression) -> Result<ConstructionInfo> {
    let type_info = new.type_info();
    let arity = new.arguments().len();
    let constructor = type_info
        .constructors()
        .iter()
        .find(|c| c.visibility() == Visibility::Public && c.parameters().len() == arity)
        .cloned()
        .ok_or_else(|| QalibError::NoUsableConstructor {
            type_name: type_info.name().to_string(),
            reason: format!("no public constructor takes {arity} argument(s)"),
        })?;

    let constructor_dependencies = constructor
        .parameters()
        .iter()
        .zip(new.arguments())
        .map(|(parameter, argument)| ConstructorDependency {
            dependency: dependency_for(parameter.service_type(), argument),
            parameter: parameter.clone(),
            is_decorator_target: false,
        })
        .collect();

    let property_dependencies = new
        .initializers()
        .iter()
        .map(|(name, value)| {
            let property = type_info.property(name).ok_or_else(|| QalibError::InvalidExpression {
                reason: format!("{} has no property {name}", type_info.name()),
            })?;
            Ok(PropertyDependency {
                dependency: dependency_for(property.service_type(), value),
                property: property.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ConstructionInfo {
        implementing_type: Some(type_info.clone()),
        constructor: Some(constructor),
        constructor_dependencies,
        property_dependencies,
        factory_delegate: None,
    })
}

/// A `GetInstance` with a default or literal name is a plain dependency on
/// the requested service; every other argument is evaluated as written.
fn dependency_for(member_type: &ServiceType, argument: &FactoryExpression) -> Dependency {
    match argument {
        FactoryExpression::GetInstance {
            service_type,
            name: NameArgument::Default,
        } => Dependency::required(service_type.clone(), ServiceName::default()),
        FactoryExpression::GetInstance {
            service_type,
            name: NameArgument::Literal(name),
        } => Dependency::required(service_type.clone(), name.clone()),
        other => Dependency::from_expression(member_type.clone(), other.clone()),
    }
}

/// Flags the one constructor dependency of a decorator plan that receives
/// the decorated instance: a plain dependency on `target` or `Lazy<target>`.
pub(crate) fn mark_decorator_target(
    plan: &mut ConstructionInfo,
    target: &ServiceType,
    decorator: &DecoratorRegistration,
) -> Result<()> {
    let invalid = |reason: String| QalibError::InvalidDecorator {
        decorator: decorator.describe(),
        service: target.clone(),
        reason,
    };

    if plan.factory_delegate.is_some() {
        return Err(invalid("a decorator must construct a type".into()));
    }

    let lazy_target = ServiceType::lazy(target.clone());
    let candidates: Vec<usize> = plan
        .constructor_dependencies
        .iter()
        .enumerate()
        .filter(|(_, d)| {
            d.dependency.factory_expression.is_none()
                && (d.dependency.service_type == *target || d.dependency.service_type == lazy_target)
        })
        .map(|(i, _)| i)
        .collect();

    match candidates.as_slice() {
        [index] => {
            plan.constructor_dependencies[*index].is_decorator_target = true;
            Ok(())
        }
        [] => Err(invalid(format!("no constructor parameter of type {target} or Lazy<{target}>"))),
        _ => Err(invalid(format!(
            "{} constructor parameters could receive the decorated {target}",
            candidates.len()
        ))),
    }
}

/// Caches plans per registration and target service type.
pub struct ConstructionInfoProvider {
    builder: ConstructionInfoBuilder,
    cache: DashMap<(u64, ServiceType), Arc<ConstructionInfo>>,
}

impl ConstructionInfoProvider {
    pub fn new(builder: ConstructionInfoBuilder) -> Self {
        Self {
            builder,
            cache: DashMap::new(),
        }
    }

    pub fn get(&self, registration: &dyn Registration) -> Result<Arc<ConstructionInfo>> {
        let key = (registration.id(), registration.service_type().clone());
        if let Some(plan) = self.cache.get(&key) {
            return Ok(plan.clone());
        }

        let plan = Arc::new(self.builder.build(registration)?);
        trace!(
            service = %registration.service_type(),
            dependencies = plan.dependencies().count(),
            delegate = plan.factory_delegate.is_some(),
            "Built construction plan"
        );
        Ok(self.cache.entry(key).or_insert(plan).clone())
    }

    /// The plan of `decorator` applied to `target`, with its decorator
    /// target marked.
    pub fn get_decorator(
        &self,
        decorator: &DecoratorRegistration,
        target: &ServiceType,
    ) -> Result<Arc<ConstructionInfo>> {
        let key = (decorator.id(), target.clone());
        if let Some(plan) = self.cache.get(&key) {
            return Ok(plan.clone());
        }

        let mut plan = self.builder.build(decorator)?;
        mark_decorator_target(&mut plan, target, decorator)?;
        Ok(self.cache.entry(key).or_insert(Arc::new(plan)).clone())
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Instance;
    use crate::registration::ServiceRegistration;

    trait Sender: Send + Sync {}

    struct SmtpSender;

    impl Sender for SmtpSender {}

    struct RetryingSender {
        _inner: Arc<dyn Sender>,
        _attempts: u32,
    }

    impl Sender for RetryingSender {}

    fn retrying_info() -> TypeInfo {
        TypeInfo::builder::<RetryingSender>()
            .constructor(
                |p| p.param::<Arc<dyn Sender>>("inner").param::<u32>("attempts"),
                |mut a| {
                    Ok(RetryingSender {
                        _inner: a.take(0)?,
                        _attempts: a.take(1)?,
                    })
                },
            )
            .property::<String>("label", |_, _| {})
            .implements::<Arc<dyn Sender>>(|this| this as Arc<dyn Sender>)
            .build()
    }

    #[test]
    fn type_plan_uses_selectors() {
        let plan = ConstructionInfoBuilder::default().from_type(&retrying_info()).unwrap();
        assert_eq!(plan.constructor_dependencies.len(), 2);
        assert_eq!(plan.property_dependencies.len(), 1);
        assert!(plan.factory_delegate.is_none());
    }

    #[test]
    fn new_expression_is_decomposed() {
        let expr = FactoryExpression::construct(retrying_info())
            .arg(FactoryExpression::get_named::<Arc<dyn Sender>>("smtp"))
            .arg(FactoryExpression::constant(3u32))
            .init("label", FactoryExpression::get::<String>())
            .into_expression();

        let plan = ConstructionInfoBuilder::default().from_expression(&expr).unwrap();
        let deps = &plan.constructor_dependencies;
        assert_eq!(deps[0].dependency.service_name.as_str(), "smtp");
        assert!(deps[0].dependency.factory_expression.is_none());
        assert_eq!(deps[1].dependency.service_type, ServiceType::of::<u32>());
        assert!(matches!(
            deps[1].dependency.factory_expression,
            Some(FactoryExpression::Constant(_))
        ));
        assert!(plan.property_dependencies[0].dependency.is_required);
    }

    #[test]
    fn computed_name_is_kept_as_expression() {
        let expr = FactoryExpression::construct(retrying_info())
            .arg(FactoryExpression::get_computed::<Arc<dyn Sender>>(|_| "smtp".into()))
            .arg(FactoryExpression::argument(0))
            .into_expression();

        let plan = ConstructionInfoBuilder::default().from_expression(&expr).unwrap();
        assert!(plan
            .constructor_dependencies
            .iter()
            .all(|d| d.dependency.factory_expression.is_some()));
    }

    #[test]
    fn unknown_initializer_is_rejected() {
        let expr = FactoryExpression::construct(retrying_info())
            .arg(FactoryExpression::get::<Arc<dyn Sender>>())
            .arg(FactoryExpression::constant(1u32))
            .init("missing", FactoryExpression::constant(1u8))
            .into_expression();
        let err = ConstructionInfoBuilder::default().from_expression(&expr).unwrap_err();
        assert!(matches!(err, QalibError::InvalidExpression { .. }));
    }

    #[test]
    fn wrong_arity_has_no_constructor() {
        let expr = FactoryExpression::construct(retrying_info()).into_expression();
        let err = ConstructionInfoBuilder::default().from_expression(&expr).unwrap_err();
        assert!(matches!(err, QalibError::NoUsableConstructor { .. }));
    }

    #[test]
    fn opaque_expression_becomes_delegate() {
        let expr = FactoryExpression::factory(|_| Ok(SmtpSender));
        let plan = ConstructionInfoBuilder::default().from_expression(&expr).unwrap();
        assert!(plan.factory_delegate.is_some());
        assert!(plan.constructor.is_none());
    }

    #[test]
    fn decorator_target_is_marked() {
        let target = ServiceType::of::<Arc<dyn Sender>>();
        let decorator = DecoratorRegistration::new(
            target.clone(),
            crate::registration::DecoratorImplementation::Type(retrying_info()),
        );
        let provider = ConstructionInfoProvider::new(ConstructionInfoBuilder::default());
        let plan = provider.get_decorator(&decorator, &target).unwrap();

        let flags: Vec<_> = plan.constructor_dependencies.iter().map(|d| d.is_decorator_target).collect();
        assert_eq!(flags, [true, false]);
    }

    #[test]
    fn decorator_without_target_parameter_is_invalid() {
        let info = TypeInfo::builder::<SmtpSender>()
            .constructor(|p| p, |_| Ok(SmtpSender))
            .implements::<Arc<dyn Sender>>(|this| this as Arc<dyn Sender>)
            .build();
        let target = ServiceType::of::<Arc<dyn Sender>>();
        let decorator =
            DecoratorRegistration::new(target.clone(), crate::registration::DecoratorImplementation::Type(info));

        let provider = ConstructionInfoProvider::new(ConstructionInfoBuilder::default());
        let err = provider.get_decorator(&decorator, &target).unwrap_err();
        assert!(matches!(err, QalibError::InvalidDecorator { .. }));
    }

    #[test]
    fn plans_are_cached_per_registration() {
        let provider = ConstructionInfoProvider::new(ConstructionInfoBuilder::default());
        let registration = ServiceRegistration::instance(1u8);
        assert!(provider.get(&registration).is_err());

        let registration = ServiceRegistration::factory::<u8>(FactoryExpression::delegate(|_, _| {
            Ok(Arc::new(1u8) as Instance)
        }));
        let a = provider.get(&registration).unwrap();
        let b = provider.get(&registration).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        provider.clear();
        assert!(provider.is_empty());
    }
}
