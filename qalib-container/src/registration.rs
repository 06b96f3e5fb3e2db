//! Registrations: what the container knows how to produce.
//!
//! - [`ServiceRegistration`] maps a [`ServiceKey`] to an implementing
//!   type, an open generic implementation, a factory expression or a
//!   fixed value, plus an optional lifetime.
//! - [`DecoratorRegistration`] wraps every matching service.
//! - [`FactoryRule`] produces services the registry has no entry for.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{QalibError, Result};
use crate::expression::FactoryExpression;
use crate::factory::ServiceFactory;
use crate::key::{ServiceKey, ServiceName};
use crate::lifetime::{Lifetime, LifetimeKind, kind_of};
use crate::metadata::{Component, GenericTypeInfo, Instance, TypeInfo};
use crate::types::{GenericDefinition, ServiceType};

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// What the container needs from any registration to plan its construction.
pub trait Registration {
    /// Unique per registration object; plans are cached by it.
    fn id(&self) -> u64;
    fn service_type(&self) -> &ServiceType;
    fn implementing_type(&self) -> Option<&TypeInfo>;
    fn factory_expression(&self) -> Option<&FactoryExpression>;
}

/// How a service registration produces its instance.
#[derive(Clone)]
pub enum Implementation {
    Type(TypeInfo),
    /// Open generic implementation; registered under an open service type.
    Generic(GenericTypeInfo),
    Expression(FactoryExpression),
    Value(Instance),
}

impl Implementation {
    pub fn describe(&self) -> String {
        match self {
            Implementation::Type(info) => info.name().to_string(),
            Implementation::Generic(generic) => format!("{:?}", generic.definition()),
            Implementation::Expression(expr) => format!("{expr:?}"),
            Implementation::Value(_) => "<value>".to_string(),
        }
    }
}

/// A service registration.
///
/// ```
/// use qalib_container::registration::ServiceRegistration;
///
/// let registration = ServiceRegistration::instance(String::from("postgres://"))
///     .named("dsn")
///     .read_only();
/// assert_eq!(registration.service_name().as_str(), "dsn");
/// assert!(registration.is_read_only());
/// ```
#[derive(Clone)]
pub struct ServiceRegistration {
    id: u64,
    service_type: ServiceType,
    service_name: ServiceName,
    implementation: Implementation,
    lifetime: Option<Arc<dyn Lifetime>>,
    read_only: bool,
}

impl ServiceRegistration {
    pub fn new(service_type: ServiceType, implementation: Implementation) -> Self {
        Self {
            id: next_id(),
            service_type,
            service_name: ServiceName::default(),
            implementation,
            lifetime: None,
            read_only: false,
        }
    }

    /// `S` implemented by the component `I`.
    pub fn for_type<S: ?Sized + 'static, I: Component>() -> Self {
        Self::new(ServiceType::of::<S>(), Implementation::Type(I::type_info()))
    }

    /// `service_type` implemented by the described type.
    pub fn implemented_by(service_type: ServiceType, type_info: TypeInfo) -> Self {
        Self::new(service_type, Implementation::Type(type_info))
    }

    /// A fixed value of service type `S`.
    pub fn instance<S: Send + Sync + 'static>(value: S) -> Self {
        Self::new(ServiceType::of::<S>(), Implementation::Value(Arc::new(value)))
    }

    /// `S` produced by a factory expression.
    pub fn factory<S: ?Sized + 'static>(expression: impl Into<FactoryExpression>) -> Self {
        Self::new(ServiceType::of::<S>(), Implementation::Expression(expression.into()))
    }

    /// The open generic service `service` implemented by `implementation`.
    pub fn open_generic(service: GenericDefinition, implementation: GenericTypeInfo) -> Self {
        Self::new(ServiceType::open(service), Implementation::Generic(implementation))
    }

    pub fn named(mut self, name: impl Into<ServiceName>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_lifetime(self, lifetime: impl Lifetime + 'static) -> Self {
        self.with_shared_lifetime(Arc::new(lifetime))
    }

    pub fn with_shared_lifetime(mut self, lifetime: Arc<dyn Lifetime>) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Later registrations of the same key leave this one in place.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.service_type.clone(), self.service_name.clone())
    }

    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    pub fn implementation(&self) -> &Implementation {
        &self.implementation
    }

    pub fn lifetime(&self) -> Option<&Arc<dyn Lifetime>> {
        self.lifetime.as_ref()
    }

    pub fn lifetime_kind(&self) -> LifetimeKind {
        kind_of(self.lifetime.as_ref())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Rejects implementing types that cannot be exposed as the service type.
    pub(crate) fn check_assignable(&self) -> Result<()> {
        match &self.implementation {
            Implementation::Type(info) if !info.is_assignable_to(&self.service_type) => {
                Err(QalibError::NotAssignable {
                    implementing: info.name().to_string(),
                    service: self.service_type.clone(),
                })
            }
            Implementation::Generic(generic) if !self.service_type.is_open() => {
                Err(QalibError::NotAssignable {
                    implementing: generic.name().to_string(),
                    service: self.service_type.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Closes an open generic registration over the arguments of `requested`.
    ///
    /// The closed registration gets its own, empty lifetime of the same kind.
    pub(crate) fn close(&self, requested: &ServiceType) -> Option<ServiceRegistration> {
        let Implementation::Generic(generic) = &self.implementation else {
            return None;
        };
        let info = generic.close(requested.type_arguments())?;
        if !info.is_assignable_to(requested) {
            return None;
        }

        let mut closed = ServiceRegistration::new(requested.clone(), Implementation::Type(info))
            .named(self.service_name.clone());
        closed.lifetime = self.lifetime.as_ref().map(|l| l.fresh());
        Some(closed)
    }
}

impl Registration for ServiceRegistration {
    fn id(&self) -> u64 {
        self.id
    }

    fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    fn implementing_type(&self) -> Option<&TypeInfo> {
        match &self.implementation {
            Implementation::Type(info) => Some(info),
            _ => None,
        }
    }

    fn factory_expression(&self) -> Option<&FactoryExpression> {
        match &self.implementation {
            Implementation::Expression(expr) => Some(expr),
            _ => None,
        }
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("key", &self.key())
            .field("implementation", &self.implementation.describe())
            .field("lifetime", &self.lifetime_kind())
            .field("read_only", &self.read_only)
            .finish()
    }
}

// ============================================================
// Decorators
// ============================================================

pub type DecorateFn = Arc<dyn Fn(&dyn ServiceFactory, Instance) -> Result<Instance> + Send + Sync>;
pub type DecoratorPredicate = Arc<dyn Fn(&ServiceRegistration) -> bool + Send + Sync>;

/// How a decorator wraps the instance it decorates.
#[derive(Clone)]
pub enum DecoratorImplementation {
    /// A type with exactly one constructor parameter of the decorated
    /// service type (or `Lazy` of it).
    Type(TypeInfo),
    /// Open generic decorator, closed over the decorated service's arguments.
    Generic(GenericTypeInfo),
    /// A `New` expression with exactly one `GetInstance` of the decorated service.
    Expression(FactoryExpression),
    /// A function receiving the inner instance.
    Function(DecorateFn),
}

/// A decorator for every registration of a service type.
#[derive(Clone)]
pub struct DecoratorRegistration {
    id: u64,
    index: usize,
    service_type: ServiceType,
    implementation: DecoratorImplementation,
    predicate: Option<DecoratorPredicate>,
}

impl DecoratorRegistration {
    pub fn new(service_type: ServiceType, implementation: DecoratorImplementation) -> Self {
        Self {
            id: next_id(),
            index: 0,
            service_type,
            implementation,
            predicate: None,
        }
    }

    /// `S` decorated by the component `D`.
    pub fn for_type<S: ?Sized + 'static, D: Component>() -> Self {
        Self::new(ServiceType::of::<S>(), DecoratorImplementation::Type(D::type_info()))
    }

    /// `S` decorated by a function of the inner instance.
    pub fn function<S: Clone + Send + Sync + 'static>(
        decorate: impl Fn(&dyn ServiceFactory, S) -> Result<S> + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            ServiceType::of::<S>(),
            DecoratorImplementation::Function(Arc::new(move |container, inner| {
                let inner = crate::metadata::downcast_instance::<S>(&inner)?;
                Ok(Arc::new(decorate(container, inner)?) as Instance)
            })),
        )
    }

    /// Every closed form of `service` decorated by `decorator`.
    pub fn open_generic(service: GenericDefinition, decorator: GenericTypeInfo) -> Self {
        Self::new(ServiceType::open(service), DecoratorImplementation::Generic(decorator))
    }

    /// Restricts the decorator to registrations accepted by `predicate`.
    pub fn when(mut self, predicate: impl Fn(&ServiceRegistration) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Application order; higher wraps lower.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn implementation(&self) -> &DecoratorImplementation {
        &self.implementation
    }

    pub fn can_decorate(&self, registration: &ServiceRegistration) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(registration))
    }

    pub fn describe(&self) -> String {
        match &self.implementation {
            DecoratorImplementation::Type(info) => info.name().to_string(),
            DecoratorImplementation::Generic(generic) => format!("{:?}", generic.definition()),
            DecoratorImplementation::Expression(expr) => format!("{expr:?}"),
            DecoratorImplementation::Function(_) => "<function>".to_string(),
        }
    }

    pub(crate) fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// `true` if this decorator applies to registrations of `target`,
    /// exactly or through its generic definition.
    pub(crate) fn targets(&self, target: &ServiceType) -> bool {
        self.service_type == *target
            || (self.service_type.is_open() && target.open_form().as_ref() == Some(&self.service_type))
    }

    /// The decorator as it applies to `target`; open generic decorators
    /// are closed over `target`'s arguments.
    pub(crate) fn close_for(&self, target: &ServiceType) -> Option<DecoratorRegistration> {
        let DecoratorImplementation::Generic(generic) = &self.implementation else {
            return Some(self.clone());
        };
        let info = generic.close(target.type_arguments())?;
        Some(DecoratorRegistration {
            id: self.id,
            index: self.index,
            service_type: target.clone(),
            implementation: DecoratorImplementation::Type(info),
            predicate: self.predicate.clone(),
        })
    }
}

impl Registration for DecoratorRegistration {
    fn id(&self) -> u64 {
        self.id
    }

    fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    fn implementing_type(&self) -> Option<&TypeInfo> {
        match &self.implementation {
            DecoratorImplementation::Type(info) => Some(info),
            _ => None,
        }
    }

    fn factory_expression(&self) -> Option<&FactoryExpression> {
        match &self.implementation {
            DecoratorImplementation::Expression(expr) => Some(expr),
            _ => None,
        }
    }
}

impl fmt::Debug for DecoratorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorRegistration")
            .field("service_type", &self.service_type)
            .field("decorator", &self.describe())
            .field("index", &self.index)
            .finish()
    }
}

// ============================================================
// Factory rules
// ============================================================

/// A request a [`FactoryRule`] is asked to satisfy.
pub struct ServiceRequest<'a> {
    pub service_type: &'a ServiceType,
    pub service_name: &'a ServiceName,
    pub container: &'a dyn ServiceFactory,
}

pub type RulePredicate = Arc<dyn Fn(&ServiceType, &ServiceName) -> bool + Send + Sync>;
pub type RuleFactory = Arc<dyn Fn(&ServiceRequest<'_>) -> Result<Instance> + Send + Sync>;

/// Produces services that have no registration.
///
/// The first rule whose predicate accepts a request is turned into a
/// registration for that request, with its own copy of the rule's lifetime.
#[derive(Clone)]
pub struct FactoryRule {
    predicate: RulePredicate,
    factory: RuleFactory,
    lifetime: Option<Arc<dyn Lifetime>>,
}

impl FactoryRule {
    pub fn new(
        predicate: impl Fn(&ServiceType, &ServiceName) -> bool + Send + Sync + 'static,
        factory: impl Fn(&ServiceRequest<'_>) -> Result<Instance> + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Arc::new(predicate),
            factory: Arc::new(factory),
            lifetime: None,
        }
    }

    pub fn with_lifetime(mut self, lifetime: impl Lifetime + 'static) -> Self {
        self.lifetime = Some(Arc::new(lifetime));
        self
    }

    pub fn matches(&self, service_type: &ServiceType, service_name: &ServiceName) -> bool {
        (self.predicate)(service_type, service_name)
    }

    pub(crate) fn registration_for(&self, service_type: &ServiceType, service_name: &ServiceName) -> ServiceRegistration {
        let factory = self.factory.clone();
        let requested_type = service_type.clone();
        let requested_name = service_name.clone();
        let expression = FactoryExpression::delegate(move |container, _| {
            factory(&ServiceRequest {
                service_type: &requested_type,
                service_name: &requested_name,
                container,
            })
        });

        let mut registration = ServiceRegistration::new(service_type.clone(), Implementation::Expression(expression))
            .named(service_name.clone());
        registration.lifetime = self.lifetime.as_ref().map(|l| l.fresh());
        registration
    }
}

impl fmt::Debug for FactoryRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRule")
            .field("lifetime", &kind_of(self.lifetime.as_ref()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::PerContainerLifetime;

    trait Repo: Send + Sync {}

    struct SqlRepo;

    impl Repo for SqlRepo {}

    fn repo_generic() -> GenericDefinition {
        GenericDefinition::new("tests::Repo", 1)
    }

    fn sql_repo_info() -> TypeInfo {
        TypeInfo::builder::<SqlRepo>()
            .constructor(|p| p, |_| Ok(SqlRepo))
            .implements_as(
                ServiceType::constructed(repo_generic(), vec![ServiceType::of::<u32>()]),
                |this| Ok(Arc::new(this as Arc<dyn Repo>) as Instance),
            )
            .build()
    }

    #[test]
    fn ids_are_unique() {
        let a = ServiceRegistration::instance(1u8);
        let b = ServiceRegistration::instance(1u8);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn unassignable_type_is_rejected() {
        let registration = ServiceRegistration::implemented_by(ServiceType::of::<u64>(), sql_repo_info());
        assert!(matches!(
            registration.check_assignable(),
            Err(QalibError::NotAssignable { .. })
        ));
    }

    #[test]
    fn closing_an_open_generic_copies_lifetime_kind() {
        let open = ServiceRegistration::open_generic(
            repo_generic(),
            GenericTypeInfo::new(GenericDefinition::new("tests::SqlRepo", 1), |args| {
                (args[0] == ServiceType::of::<u32>()).then(sql_repo_info)
            }),
        )
        .with_lifetime(PerContainerLifetime::new());
        assert!(open.check_assignable().is_ok());

        let requested = ServiceType::constructed(repo_generic(), vec![ServiceType::of::<u32>()]);
        let closed = open.close(&requested).unwrap();
        assert_eq!(closed.service_type(), &requested);
        assert_eq!(closed.lifetime_kind(), LifetimeKind::PerContainer);
        assert!(!Arc::ptr_eq(closed.lifetime().unwrap(), open.lifetime().unwrap()));

        let unsupported = ServiceType::constructed(repo_generic(), vec![ServiceType::of::<u8>()]);
        assert!(open.close(&unsupported).is_none());
    }

    #[test]
    fn open_decorator_targets_closed_services() {
        let decorator = DecoratorRegistration::open_generic(
            repo_generic(),
            GenericTypeInfo::new(GenericDefinition::new("tests::Logged", 1), |_| Some(sql_repo_info())),
        );
        let closed = ServiceType::constructed(repo_generic(), vec![ServiceType::of::<u32>()]);
        assert!(decorator.targets(&closed));
        assert!(!decorator.targets(&ServiceType::of::<u32>()));

        let applied = decorator.close_for(&closed).unwrap();
        assert!(matches!(applied.implementation(), DecoratorImplementation::Type(_)));
    }

    #[test]
    fn predicate_filters_registrations() {
        let decorator = DecoratorRegistration::function::<u32>(|_, n| Ok(n + 1))
            .when(|r| r.service_name().as_str() == "wrapped");
        assert!(decorator.can_decorate(&ServiceRegistration::instance(1u32).named("wrapped")));
        assert!(!decorator.can_decorate(&ServiceRegistration::instance(1u32)));
    }

    #[test]
    fn rule_registration_is_named_after_request() {
        let rule = FactoryRule::new(
            |t, _| *t == ServiceType::of::<String>(),
            |req| Ok(Arc::new(req.service_name.as_str().to_uppercase()) as Instance),
        )
        .with_lifetime(PerContainerLifetime::new());

        assert!(rule.matches(&ServiceType::of::<String>(), &ServiceName::from("x")));
        let registration = rule.registration_for(&ServiceType::of::<String>(), &ServiceName::from("abc"));
        assert_eq!(registration.service_name().as_str(), "abc");
        assert_eq!(registration.lifetime_kind(), LifetimeKind::PerContainer);
        assert!(registration.factory_expression().is_some());
    }
}
