//! Factory expressions.
//!
//! A registration may describe how to build its service instead of
//! naming an implementing type. A [`FactoryExpression`] is a small tree
//! the container can inspect: when its root is [`FactoryExpression::New`]
//! the container decomposes it into a construction plan (constructor,
//! argument dependencies, property initializers). Any other root is run
//! as an opaque delegate.
//!
//! ```
//! use qalib_container::expression::FactoryExpression;
//! use qalib_container::metadata::TypeInfo;
//!
//! struct Greeting {
//!     text: String,
//! }
//!
//! let info = TypeInfo::builder::<Greeting>()
//!     .constructor(|p| p.param::<String>("text"), |mut a| Ok(Greeting { text: a.take(0)? }))
//!     .build();
//!
//! let expr = FactoryExpression::construct(info)
//!     .arg(FactoryExpression::get_named::<String>("greeting"))
//!     .into_expression();
//! assert!(expr.is_new());
//! ```

use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::{QalibError, Result};
use crate::factory::ServiceFactory;
use crate::key::ServiceName;
use crate::metadata::{Component, Instance, TypeInfo, downcast_instance};
use crate::types::ServiceType;

pub type DelegateFn = Arc<dyn Fn(&dyn ServiceFactory, &[Instance]) -> Result<Instance> + Send + Sync>;
pub type NameFn = Arc<dyn Fn(&[Instance]) -> String + Send + Sync>;

/// The service name argument of [`FactoryExpression::GetInstance`].
#[derive(Clone)]
pub enum NameArgument {
    Default,
    Literal(ServiceName),
    /// Computed from the runtime arguments at resolution time.
    Computed(NameFn),
}

/// An inspectable description of how to produce an instance.
#[derive(Clone)]
pub enum FactoryExpression {
    /// Construct a type, passing arguments and setting properties.
    New(NewExpression),
    /// Ask the container for another service.
    GetInstance {
        service_type: ServiceType,
        name: NameArgument,
    },
    /// A fixed value.
    Constant(Instance),
    /// A runtime argument passed to `get_instance_with`.
    Argument(usize),
    /// Arbitrary code with access to the container.
    Delegate(DelegateFn),
}

impl FactoryExpression {
    /// Starts a `New` expression for `type_info`.
    pub fn construct(type_info: TypeInfo) -> NewExpression {
        NewExpression {
            type_info,
            arguments: Vec::new(),
            initializers: Vec::new(),
        }
    }

    /// Starts a `New` expression for a [`Component`].
    pub fn new_component<T: Component>() -> NewExpression {
        Self::construct(T::type_info())
    }

    pub fn get<T: ?Sized + 'static>() -> Self {
        Self::get_type(ServiceType::of::<T>(), NameArgument::Default)
    }

    pub fn get_named<T: ?Sized + 'static>(name: &str) -> Self {
        Self::get_type(ServiceType::of::<T>(), NameArgument::Literal(name.into()))
    }

    pub fn get_type(service_type: ServiceType, name: NameArgument) -> Self {
        FactoryExpression::GetInstance { service_type, name }
    }

    /// A `GetInstance` whose name is computed from the runtime arguments.
    pub fn get_computed<T: ?Sized + 'static>(
        name: impl Fn(&[Instance]) -> String + Send + Sync + 'static,
    ) -> Self {
        Self::get_type(ServiceType::of::<T>(), NameArgument::Computed(Arc::new(name)))
    }

    pub fn constant<T: Send + Sync + 'static>(value: T) -> Self {
        FactoryExpression::Constant(Arc::new(value))
    }

    pub fn argument(index: usize) -> Self {
        FactoryExpression::Argument(index)
    }

    pub fn delegate(
        delegate: impl Fn(&dyn ServiceFactory, &[Instance]) -> Result<Instance> + Send + Sync + 'static,
    ) -> Self {
        FactoryExpression::Delegate(Arc::new(delegate))
    }

    /// An opaque typed factory.
    ///
    /// ```
    /// use qalib_container::expression::FactoryExpression;
    ///
    /// let expr = FactoryExpression::factory(|_| Ok(String::from("hi")));
    /// assert!(!expr.is_new());
    /// ```
    pub fn factory<S: Send + Sync + 'static>(
        factory: impl Fn(&dyn ServiceFactory) -> Result<S> + Send + Sync + 'static,
    ) -> Self {
        Self::delegate(move |container, _| Ok(Arc::new(factory(container)?) as Instance))
    }

    /// An opaque typed factory taking one runtime argument.
    pub fn factory_with<A: Clone + 'static, S: Send + Sync + 'static>(
        factory: impl Fn(&dyn ServiceFactory, A) -> Result<S> + Send + Sync + 'static,
    ) -> Self {
        Self::delegate(move |container, arguments| {
            let argument = arguments.first().ok_or(QalibError::MissingArgument {
                index: 0,
                available: arguments.len(),
            })?;
            let argument = downcast_instance::<A>(argument).map_err(|_| QalibError::TypeMismatch {
                expected: type_name::<A>(),
                context: "runtime argument #0".into(),
            })?;
            Ok(Arc::new(factory(container, argument)?) as Instance)
        })
    }

    pub fn is_new(&self) -> bool {
        matches!(self, FactoryExpression::New(_))
    }

    /// Evaluates the expression directly, without a compiled plan.
    pub fn evaluate(&self, container: &dyn ServiceFactory, arguments: &[Instance]) -> Result<Instance> {
        match self {
            FactoryExpression::New(new) => new.evaluate(container, arguments),
            FactoryExpression::GetInstance { service_type, name } => {
                let name = name.resolve(arguments);
                container.get_instance_with(service_type, &name, arguments)
            }
            FactoryExpression::Constant(value) => Ok(value.clone()),
            FactoryExpression::Argument(index) => {
                arguments
                    .get(*index)
                    .cloned()
                    .ok_or(QalibError::MissingArgument {
                        index: *index,
                        available: arguments.len(),
                    })
            }
            FactoryExpression::Delegate(delegate) => delegate(container, arguments),
        }
    }
}

impl NameArgument {
    pub fn resolve(&self, arguments: &[Instance]) -> ServiceName {
        match self {
            NameArgument::Default => ServiceName::default(),
            NameArgument::Literal(name) => name.clone(),
            NameArgument::Computed(compute) => ServiceName::from(compute(arguments)),
        }
    }
}

/// The `New` form: a type, its constructor arguments and property initializers.
#[derive(Clone)]
pub struct NewExpression {
    type_info: TypeInfo,
    arguments: Vec<FactoryExpression>,
    initializers: Vec<(Cow<'static, str>, FactoryExpression)>,
}

impl NewExpression {
    /// Appends a constructor argument.
    pub fn arg(mut self, argument: FactoryExpression) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Adds a property initializer.
    pub fn init(mut self, property: impl Into<Cow<'static, str>>, value: FactoryExpression) -> Self {
        self.initializers.push((property.into(), value));
        self
    }

    pub fn into_expression(self) -> FactoryExpression {
        FactoryExpression::New(self)
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    pub fn arguments(&self) -> &[FactoryExpression] {
        &self.arguments
    }

    pub fn initializers(&self) -> &[(Cow<'static, str>, FactoryExpression)] {
        &self.initializers
    }

    fn evaluate(&self, container: &dyn ServiceFactory, arguments: &[Instance]) -> Result<Instance> {
        let constructor = self
            .type_info
            .constructors()
            .iter()
            .find(|c| c.parameters().len() == self.arguments.len())
            .ok_or_else(|| QalibError::InvalidExpression {
                reason: format!(
                    "{} has no constructor taking {} argument(s)",
                    self.type_info.name(),
                    self.arguments.len()
                ),
            })?;

        let values = self
            .arguments
            .iter()
            .map(|a| a.evaluate(container, arguments))
            .collect::<Result<Vec<_>>>()?;
        let mut object = constructor.invoke(crate::metadata::Arguments::new(values))?;

        for (name, value) in &self.initializers {
            let property = self.type_info.property(name).ok_or_else(|| QalibError::InvalidExpression {
                reason: format!("{} has no property {name}", self.type_info.name()),
            })?;
            property.set(&mut object, value.evaluate(container, arguments)?)?;
        }

        Ok(Arc::from(object))
    }
}

impl From<NewExpression> for FactoryExpression {
    fn from(new: NewExpression) -> Self {
        FactoryExpression::New(new)
    }
}

impl fmt::Debug for FactoryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryExpression::New(new) => write!(
                f,
                "New({}, args={:?}, init={:?})",
                new.type_info.name(),
                new.arguments,
                new.initializers.iter().map(|(n, _)| n).collect::<Vec<_>>()
            ),
            FactoryExpression::GetInstance { service_type, name } => match name {
                NameArgument::Default => write!(f, "GetInstance({service_type})"),
                NameArgument::Literal(n) => write!(f, "GetInstance({service_type}, {n:?})"),
                NameArgument::Computed(_) => write!(f, "GetInstance({service_type}, <computed>)"),
            },
            FactoryExpression::Constant(_) => write!(f, "Constant"),
            FactoryExpression::Argument(i) => write!(f, "Argument({i})"),
            FactoryExpression::Delegate(_) => write!(f, "Delegate"),
        }
    }
}
