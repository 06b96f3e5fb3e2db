//! Explicit type metadata.
//!
//! The container cannot inspect a Rust type, so every implementing type
//! describes itself with a [`TypeInfo`]: its constructors and their
//! parameters, its injectable properties, the service types it may be
//! exposed as, and whether it needs explicit disposal.
//!
//! `#[derive(Component)]` writes this description for plain structs;
//! the builder below is what it expands to.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use qalib_container::metadata::TypeInfo;
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! #[derive(Clone)]
//! struct FixedClock {
//!     at: u64,
//! }
//!
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 { self.at }
//! }
//!
//! let info = TypeInfo::builder::<FixedClock>()
//!     .constructor(|p| p.param::<u64>("at"), |mut args| Ok(FixedClock { at: args.take(0)? }))
//!     .implements::<Arc<dyn Clock>>(|this| this as Arc<dyn Clock>)
//!     .build();
//!
//! assert_eq!(info.constructors().len(), 1);
//! assert!(info.is_assignable_to(&qalib_container::types::ServiceType::of::<Arc<dyn Clock>>()));
//! ```

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dispose::Disposable;
use crate::error::{QalibError, Result};
use crate::key::ServiceName;
use crate::types::{GenericDefinition, ServiceType};
use crate::wrappers::{All, EnumerableInstance, Func, FuncInstance, FuncWith, Lazy, LazyInstance};

/// A resolved value in its service-facing form.
///
/// For a service type `S` the instance holds an `S`. Trait services are
/// registered as `Arc<dyn Trait>`, so the instance holds that `Arc`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A freshly constructed value that has not been shared yet.
pub type Object = Box<dyn Any + Send + Sync>;

pub type ConstructorFn = Arc<dyn Fn(Arguments) -> Result<Object> + Send + Sync>;
pub type SetterFn = Arc<dyn Fn(&mut Object, Instance) -> Result<()> + Send + Sync>;
pub type CastFn = Arc<dyn Fn(Instance) -> Result<Instance> + Send + Sync>;
pub type DisposeProbe = Arc<dyn Fn(&Instance) -> Option<Arc<dyn Disposable>> + Send + Sync>;

/// Implemented by types that describe themselves to the container.
pub trait Component: Send + Sync + Sized + 'static {
    fn type_info() -> TypeInfo;
}

/// Reads a `T` out of an erased instance by cloning it.
pub fn downcast_instance<T: Clone + 'static>(instance: &Instance) -> Result<T> {
    instance
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| QalibError::TypeMismatch {
            expected: type_name::<T>(),
            context: "resolved instance".into(),
        })
}

/// Member visibility. Only public members are injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

// ============================================================
// Parameters and constructors
// ============================================================

/// One constructor parameter.
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    name: Cow<'static, str>,
    position: usize,
    service_type: ServiceType,
    service_name: ServiceName,
}

impl ParameterInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Name of the registration this parameter asks for. Empty unless
    /// the parameter was declared with `named_param`.
    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }
}

/// Parameter list under construction, passed to [`TypeInfoBuilder::constructor`].
#[derive(Default)]
pub struct ParameterList {
    parameters: Vec<ParameterInfo>,
}

impl ParameterList {
    /// A parameter of service type `P`.
    pub fn param<P: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param_of(name, ServiceType::of::<P>())
    }

    /// A parameter that asks for the registration named `service_name`.
    pub fn named_param<P: ?Sized + 'static>(self, name: &'static str, service_name: &str) -> Self {
        self.push(name, ServiceType::of::<P>(), ServiceName::from(service_name))
    }

    /// A `Lazy<P>` parameter.
    pub fn lazy_param<P: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param_of(name, ServiceType::lazy(ServiceType::of::<P>()))
    }

    /// A `Func<P>` parameter.
    pub fn func_param<P: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param_of(name, ServiceType::func(ServiceType::of::<P>()))
    }

    /// A `FuncWith<A, P>` parameter.
    pub fn func_with_param<A: 'static, P: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param_of(
            name,
            ServiceType::func_with(vec![ServiceType::of::<A>()], ServiceType::of::<P>()),
        )
    }

    /// An `All<P>` parameter: every registration of `P`.
    pub fn all_param<P: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.param_of(name, ServiceType::enumerable(ServiceType::of::<P>()))
    }

    /// A parameter with an explicit service type.
    pub fn param_of(self, name: &'static str, service_type: ServiceType) -> Self {
        self.push(name, service_type, ServiceName::default())
    }

    /// A parameter with an explicit service type, resolved by name.
    pub fn named_param_of(self, name: &'static str, service_type: ServiceType, service_name: &str) -> Self {
        self.push(name, service_type, ServiceName::from(service_name))
    }

    fn push(mut self, name: &'static str, service_type: ServiceType, service_name: ServiceName) -> Self {
        let position = self.parameters.len();
        self.parameters.push(ParameterInfo {
            name: Cow::Borrowed(name),
            position,
            service_type,
            service_name,
        });
        self
    }
}

/// A constructor: its parameters and the function that runs it.
#[derive(Clone)]
pub struct ConstructorInfo {
    declaring_type: &'static str,
    parameters: Arc<[ParameterInfo]>,
    visibility: Visibility,
    invoke: ConstructorFn,
}

impl ConstructorInfo {
    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn declaring_type(&self) -> &'static str {
        self.declaring_type
    }

    pub fn invoke(&self, arguments: Arguments) -> Result<Object> {
        (self.invoke)(arguments)
    }
}

impl fmt::Debug for ConstructorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.parameters.iter().map(|p| p.name()).collect();
        write!(f, "{}({})", self.declaring_type, params.join(", "))
    }
}

/// Positional constructor arguments, each taken at most once.
pub struct Arguments {
    values: Vec<Option<Instance>>,
}

impl Arguments {
    pub fn new(values: Vec<Instance>) -> Self {
        Self {
            values: values.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw instance at `index`.
    pub fn take_instance(&mut self, index: usize) -> Result<Instance> {
        let available = self.values.len();
        self.values
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(QalibError::MissingArgument { index, available })
    }

    /// Clones the `T` held at `index`.
    pub fn take<T: Clone + 'static>(&mut self, index: usize) -> Result<T> {
        downcast_instance(&self.take_instance(index)?)
    }

    /// Shares the `T` held at `index` without cloning it.
    pub fn take_shared<T: Send + Sync + 'static>(&mut self, index: usize) -> Result<Arc<T>> {
        self.take_instance(index)?
            .downcast::<T>()
            .map_err(|_| QalibError::TypeMismatch {
                expected: type_name::<T>(),
                context: format!("constructor argument #{index}"),
            })
    }

    pub fn take_lazy<T: 'static>(&mut self, index: usize) -> Result<Lazy<T>> {
        self.take::<LazyInstance>(index).map(Lazy::from_instance)
    }

    pub fn take_func<T: 'static>(&mut self, index: usize) -> Result<Func<T>> {
        self.take::<FuncInstance>(index).map(Func::from_instance)
    }

    pub fn take_func_with<A: 'static, T: 'static>(&mut self, index: usize) -> Result<FuncWith<A, T>> {
        self.take::<FuncInstance>(index).map(FuncWith::from_instance)
    }

    pub fn take_all<T: 'static>(&mut self, index: usize) -> Result<All<T>> {
        self.take::<EnumerableInstance>(index).map(All::from_instance)
    }
}

// ============================================================
// Properties
// ============================================================

/// A settable member.
#[derive(Clone)]
pub struct PropertyInfo {
    name: Cow<'static, str>,
    service_type: ServiceType,
    is_static: bool,
    setter: Option<SetterFn>,
    setter_visibility: Visibility,
    inject: Option<ServiceName>,
}

impl PropertyInfo {
    /// A property with no setter; see [`PropertyInfo::with_setter`].
    pub fn new(name: impl Into<Cow<'static, str>>, service_type: ServiceType) -> Self {
        Self {
            name: name.into(),
            service_type,
            is_static: false,
            setter: None,
            setter_visibility: Visibility::Public,
            inject: None,
        }
    }

    pub fn with_setter(mut self, setter: SetterFn) -> Self {
        self.setter = Some(setter);
        self
    }

    pub fn private_setter(mut self) -> Self {
        self.setter_visibility = Visibility::Private;
        self
    }

    pub fn static_member(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Marks the property for attribute-driven injection, optionally
    /// asking for a named registration.
    pub fn inject(mut self, service_name: Option<&str>) -> Self {
        self.inject = Some(service_name.map(ServiceName::from).unwrap_or_default());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    pub fn setter_visibility(&self) -> Visibility {
        self.setter_visibility
    }

    pub fn injection(&self) -> Option<&ServiceName> {
        self.inject.as_ref()
    }

    /// Writes `value` into `target`.
    pub fn set(&self, target: &mut Object, value: Instance) -> Result<()> {
        match &self.setter {
            Some(setter) => setter(target, value),
            None => Err(QalibError::InvalidExpression {
                reason: format!("property {} has no setter", self.name),
            }),
        }
    }

    /// Builds a setter for a `T` from a typed closure receiving a clone of `P`.
    pub fn setter_for<T, P>(setter: impl Fn(&mut T, P) + Send + Sync + 'static) -> SetterFn
    where
        T: Send + Sync + 'static,
        P: Clone + 'static,
    {
        Self::raw_setter_for::<T>(move |target, value| {
            setter(target, downcast_instance::<P>(&value)?);
            Ok(())
        })
    }

    /// Builds a setter for a `T` from a closure receiving the raw instance.
    pub fn raw_setter_for<T>(
        setter: impl Fn(&mut T, Instance) -> Result<()> + Send + Sync + 'static,
    ) -> SetterFn
    where
        T: Send + Sync + 'static,
    {
        Arc::new(move |target: &mut Object, value: Instance| {
            let target = target
                .downcast_mut::<T>()
                .ok_or_else(|| QalibError::TypeMismatch {
                    expected: type_name::<T>(),
                    context: "property target".into(),
                })?;
            setter(target, value)
        })
    }
}

impl fmt::Debug for PropertyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyInfo")
            .field("name", &self.name)
            .field("service_type", &self.service_type)
            .field("settable", &self.setter.is_some())
            .field("inject", &self.inject)
            .finish()
    }
}

// ============================================================
// TypeInfo
// ============================================================

#[derive(Clone)]
struct Exposure {
    service_type: ServiceType,
    cast: CastFn,
}

struct TypeInfoInner {
    name: Cow<'static, str>,
    self_type: ServiceType,
    constructors: Vec<ConstructorInfo>,
    properties: Vec<PropertyInfo>,
    exposures: Vec<Exposure>,
    disposer: Option<DisposeProbe>,
}

/// Description of an implementing type. Cheap to clone.
#[derive(Clone)]
pub struct TypeInfo {
    inner: Arc<TypeInfoInner>,
}

impl TypeInfo {
    pub fn builder<T: Send + Sync + 'static>() -> TypeInfoBuilder<T> {
        TypeInfoBuilder {
            inner: TypeInfoInner {
                name: Cow::Borrowed(type_name::<T>()),
                self_type: ServiceType::of::<T>(),
                constructors: Vec::new(),
                properties: Vec::new(),
                exposures: Vec::new(),
                disposer: None,
            },
            _marker: PhantomData,
        }
    }

    /// Metadata of a [`Component`].
    pub fn of<T: Component>() -> Self {
        T::type_info()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The Rust type this metadata describes.
    pub fn self_type(&self) -> &ServiceType {
        &self.inner.self_type
    }

    pub fn constructors(&self) -> &[ConstructorInfo] {
        &self.inner.constructors
    }

    pub fn properties(&self) -> &[PropertyInfo] {
        &self.inner.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.inner.properties.iter().find(|p| p.name() == name)
    }

    /// Service types this type can be registered as, itself excluded.
    pub fn exposed_services(&self) -> impl Iterator<Item = &ServiceType> {
        self.inner.exposures.iter().map(|e| &e.service_type)
    }

    pub fn is_assignable_to(&self, service_type: &ServiceType) -> bool {
        *service_type == self.inner.self_type
            || self.inner.exposures.iter().any(|e| e.service_type == *service_type)
    }

    /// Conversion from the raw constructed value to `service_type`.
    /// `None` when no conversion is needed.
    pub fn cast_to(&self, service_type: &ServiceType) -> Result<Option<CastFn>> {
        if *service_type == self.inner.self_type {
            return Ok(None);
        }
        self.inner
            .exposures
            .iter()
            .find(|e| e.service_type == *service_type)
            .map(|e| Some(e.cast.clone()))
            .ok_or_else(|| QalibError::NotAssignable {
                implementing: self.name().to_string(),
                service: service_type.clone(),
            })
    }

    pub fn is_disposable(&self) -> bool {
        self.inner.disposer.is_some()
    }

    pub fn dispose_probe(&self) -> Option<DisposeProbe> {
        self.inner.disposer.clone()
    }

    /// `true` if both handles describe the same metadata object.
    pub fn ptr_eq(&self, other: &TypeInfo) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.inner.name)
            .field("constructors", &self.inner.constructors)
            .field("properties", &self.inner.properties)
            .field("exposes", &self.exposed_services().collect::<Vec<_>>())
            .field("disposable", &self.is_disposable())
            .finish()
    }
}

/// Builder for [`TypeInfo`].
pub struct TypeInfoBuilder<T> {
    inner: TypeInfoInner,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> TypeInfoBuilder<T> {
    /// Overrides the display name, e.g. for closed generic implementations.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.inner.name = name.into();
        self
    }

    /// Adds a public constructor.
    pub fn constructor(
        self,
        parameters: impl FnOnce(ParameterList) -> ParameterList,
        invoke: impl Fn(Arguments) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        self.add_constructor(Visibility::Public, parameters, invoke)
    }

    /// Adds a constructor the container must not call.
    pub fn private_constructor(
        self,
        parameters: impl FnOnce(ParameterList) -> ParameterList,
        invoke: impl Fn(Arguments) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        self.add_constructor(Visibility::Private, parameters, invoke)
    }

    fn add_constructor(
        mut self,
        visibility: Visibility,
        parameters: impl FnOnce(ParameterList) -> ParameterList,
        invoke: impl Fn(Arguments) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        let parameters = parameters(ParameterList::default()).parameters;
        self.inner.constructors.push(ConstructorInfo {
            declaring_type: type_name::<T>(),
            parameters: parameters.into(),
            visibility,
            invoke: Arc::new(move |args| Ok(Box::new(invoke(args)?) as Object)),
        });
        self
    }

    /// Adds a public, settable property of service type `P`.
    pub fn property<P: Clone + 'static>(
        self,
        name: &'static str,
        setter: impl Fn(&mut T, P) + Send + Sync + 'static,
    ) -> Self {
        self.property_info(
            PropertyInfo::new(name, ServiceType::of::<P>())
                .with_setter(PropertyInfo::setter_for::<T, P>(setter)),
        )
    }

    /// Adds a settable property marked for attribute-driven injection.
    pub fn inject_property<P: Clone + 'static>(
        self,
        name: &'static str,
        service_name: Option<&str>,
        setter: impl Fn(&mut T, P) + Send + Sync + 'static,
    ) -> Self {
        self.property_info(
            PropertyInfo::new(name, ServiceType::of::<P>())
                .with_setter(PropertyInfo::setter_for::<T, P>(setter))
                .inject(service_name),
        )
    }

    pub fn property_info(mut self, property: PropertyInfo) -> Self {
        self.inner.properties.push(property);
        self
    }

    /// Declares that `T` can be exposed as the service type `S`.
    pub fn implements<S: Send + Sync + 'static>(
        self,
        cast: impl Fn(Arc<T>) -> S + Send + Sync + 'static,
    ) -> Self {
        self.implements_as(ServiceType::of::<S>(), move |this| Ok(Arc::new(cast(this)) as Instance))
    }

    /// Declares that `T` can be exposed as an arbitrary service type,
    /// such as a constructed generic.
    pub fn implements_as(
        mut self,
        service_type: ServiceType,
        cast: impl Fn(Arc<T>) -> Result<Instance> + Send + Sync + 'static,
    ) -> Self {
        let cast: CastFn = Arc::new(move |instance: Instance| {
            let this = instance.downcast::<T>().map_err(|_| QalibError::TypeMismatch {
                expected: type_name::<T>(),
                context: "service cast".into(),
            })?;
            cast(this)
        });
        self.inner.exposures.retain(|e| e.service_type != service_type);
        self.inner.exposures.push(Exposure { service_type, cast });
        self
    }

    pub fn build(self) -> TypeInfo {
        TypeInfo {
            inner: Arc::new(self.inner),
        }
    }
}

impl<T: Disposable + 'static> TypeInfoBuilder<T> {
    /// Tracks constructed values for disposal.
    pub fn disposable(mut self) -> Self {
        self.inner.disposer = Some(Arc::new(|instance: &Instance| {
            instance
                .clone()
                .downcast::<T>()
                .ok()
                .map(|this| this as Arc<dyn Disposable>)
        }));
        self
    }
}

// ============================================================
// Open generic implementations
// ============================================================

type Closer = Arc<dyn Fn(&[ServiceType]) -> Option<TypeInfo> + Send + Sync>;

/// An open generic implementation, closed on demand.
///
/// The closer receives the type arguments of the requested service and
/// returns metadata for the matching closed implementation, or `None`
/// when the arguments are not supported.
#[derive(Clone)]
pub struct GenericTypeInfo {
    definition: GenericDefinition,
    closer: Closer,
}

impl GenericTypeInfo {
    pub fn new(
        definition: GenericDefinition,
        closer: impl Fn(&[ServiceType]) -> Option<TypeInfo> + Send + Sync + 'static,
    ) -> Self {
        Self {
            definition,
            closer: Arc::new(closer),
        }
    }

    pub fn definition(&self) -> &GenericDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn close(&self, arguments: &[ServiceType]) -> Option<TypeInfo> {
        if arguments.len() != self.definition.arity() {
            return None;
        }
        (self.closer)(arguments)
    }
}

impl fmt::Debug for GenericTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericTypeInfo({:?})", self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    #[derive(Default)]
    struct English {
        suffix: Option<String>,
        closed: AtomicBool,
    }

    impl Greeter for English {
        fn greet(&self) -> String {
            format!("hello{}", self.suffix.clone().unwrap_or_default())
        }
    }

    impl Disposable for English {
        fn dispose(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn english() -> TypeInfo {
        TypeInfo::builder::<English>()
            .constructor(|p| p, |_| Ok(English::default()))
            .private_constructor(|p| p.param::<String>("suffix"), |mut a| {
                Ok(English {
                    suffix: Some(a.take(0)?),
                    ..Default::default()
                })
            })
            .property::<String>("suffix", |this, v| this.suffix = Some(v))
            .implements::<Arc<dyn Greeter>>(|this| this as Arc<dyn Greeter>)
            .disposable()
            .build()
    }

    #[test]
    fn constructors_keep_declaration_order() {
        let info = english();
        assert_eq!(info.constructors()[0].parameters().len(), 0);
        assert_eq!(info.constructors()[1].visibility(), Visibility::Private);
        assert_eq!(info.constructors()[1].parameters()[0].name(), "suffix");
    }

    #[test]
    fn construct_set_and_cast() {
        let info = english();
        let mut object = info.constructors()[0].invoke(Arguments::new(vec![])).unwrap();
        info.property("suffix")
            .unwrap()
            .set(&mut object, Arc::new(String::from("!")))
            .unwrap();

        let raw: Instance = Arc::from(object);
        let cast = info
            .cast_to(&ServiceType::of::<Arc<dyn Greeter>>())
            .unwrap()
            .unwrap();
        let service = cast(raw).unwrap();
        let greeter = downcast_instance::<Arc<dyn Greeter>>(&service).unwrap();
        assert_eq!(greeter.greet(), "hello!");
    }

    #[test]
    fn unknown_service_is_not_assignable() {
        let info = english();
        assert!(info.cast_to(&ServiceType::of::<u32>()).is_err());
        assert!(info.cast_to(&ServiceType::of::<English>()).unwrap().is_none());
    }

    #[test]
    fn dispose_probe_shares_the_instance() {
        let info = english();
        let raw: Instance = Arc::new(English::default());
        let disposable = (info.dispose_probe().unwrap())(&raw).unwrap();
        disposable.dispose();
        assert!(raw.downcast_ref::<English>().unwrap().closed.load(Ordering::SeqCst));
    }

    #[test]
    fn arguments_are_taken_once() {
        let mut args = Arguments::new(vec![Arc::new(7u32) as Instance]);
        assert_eq!(args.take::<u32>(0).unwrap(), 7);
        assert!(matches!(
            args.take::<u32>(0),
            Err(QalibError::MissingArgument { index: 0, available: 1 })
        ));
    }

    #[test]
    fn argument_type_mismatch() {
        let mut args = Arguments::new(vec![Arc::new(7u32) as Instance]);
        assert!(matches!(args.take_shared::<String>(0), Err(QalibError::TypeMismatch { .. })));
    }

    #[test]
    fn generic_closing_checks_arity() {
        let def = GenericDefinition::new("tests::Boxed", 1);
        let generic = GenericTypeInfo::new(def, |args| {
            (args[0] == ServiceType::of::<u8>()).then(english)
        });
        assert!(generic.close(&[ServiceType::of::<u8>()]).is_some());
        assert!(generic.close(&[ServiceType::of::<u16>()]).is_none());
        assert!(generic.close(&[]).is_none());
    }
}
