//! The resolution compiler.
//!
//! Turns a requested [`ServiceKey`] into a [`CreationRoutine`]. Strategies
//! are tried in order, first match wins:
//!
//! 1. a registration for the exact key
//! 2. a factory rule accepting the key
//! 3. `Lazy<X>`
//! 4. `Func<X>`
//! 5. `Func<A.., X>`
//! 6. `Enumerable<X>`
//! 7. the only named registration of a type requested by default name
//! 8. an open generic registration closed over the requested arguments
//!
//! Compiling a registration compiles each of its dependencies through the
//! same process. The keys currently being compiled form a stack; meeting a
//! key that is already on it is a recursive dependency.
//!
//! Compiled routines are memoized per key, stamped with the container's
//! registration generation so a routine compiled against an older set of
//! registrations is never served.

use std::sync::Arc;

use tracing::{instrument, trace, warn};

use crate::container::ContainerInner;
use crate::emit::{CreationRoutine, Emitter, Frame, Instruction};
use crate::error::{MemberKind, NotRegisteredError, QalibError, RecursiveDependencyError, Result, UnresolvedDependencyError};
use crate::expression::FactoryExpression;
use crate::key::ServiceKey;
use crate::lifetime::{Created, LifetimeContext};
use crate::metadata::Instance;
use crate::plan::{ConstructionInfo, Dependency};
use crate::registration::{DecoratorImplementation, DecoratorRegistration, Implementation, Registration, ServiceRegistration};
use crate::types::ServiceType;
use crate::wrappers::{EnumerableInstance, FuncInstance, Invoker, LazyInstance, Producer};

/// One compilation request and the keys it is currently compiling.
pub(crate) struct Compiler<'c> {
    container: &'c Arc<ContainerInner>,
    generation: u64,
    stack: Vec<ServiceKey>,
    /// Lowest stack position an enumeration skipped during the current key.
    lowest_exclusion: Option<usize>,
}

impl<'c> Compiler<'c> {
    pub fn new(container: &'c Arc<ContainerInner>) -> Self {
        Self {
            container,
            generation: container.generation(),
            stack: Vec::new(),
            lowest_exclusion: None,
        }
    }

    /// Compiles `key`, or returns its memoized routine.
    #[instrument(skip_all, level = "trace", fields(service = %key))]
    pub fn compile(&mut self, key: &ServiceKey) -> Result<CreationRoutine> {
        self.compile_key(key)
    }

    fn compile_key(&mut self, key: &ServiceKey) -> Result<CreationRoutine> {
        if let Some(routine) = self.container.cached_routine(key, self.generation) {
            trace!(service = %key, "Routine cache hit");
            return Ok(routine);
        }

        let depth = self.stack.len();
        let outer = self.lowest_exclusion.take();
        let result = self.resolve(key);
        let inner = self.lowest_exclusion;
        self.lowest_exclusion = match (outer, inner) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let routine = result?;

        // A routine that skipped an ancestor of this key is only right
        // beneath that ancestor.
        if inner.is_none_or(|position| position >= depth) {
            Ok(self.container.memoize(key, self.generation, routine))
        } else {
            Ok(routine)
        }
    }

    fn resolve(&mut self, key: &ServiceKey) -> Result<CreationRoutine> {
        let container = self.container;
        let registry = container.registry();
        let service_type = key.service_type();

        if let Some(registration) = registry.get(key) {
            return self.compile_registration(&registration);
        }

        if let Some(rule) = registry.rule_for(key) {
            trace!(service = %key, "Resolving through factory rule");
            let registration = registry.get_or_insert(rule.registration_for(service_type, key.service_name()));
            return self.compile_registration(&registration);
        }

        if let Some(target) = service_type.lazy_target() {
            return self.compile_lazy(key, target);
        }

        if let Some((parameters, result)) = service_type.func_signature() {
            return self.compile_func(key, parameters.len(), result);
        }

        if let Some(element) = service_type.enumerable_element() {
            return self.compile_enumerable(key, element);
        }

        let options = container.options();
        if options.enable_single_named_fallback && key.service_name().is_default() {
            let named = registry.registrations_of(service_type);
            match named.as_slice() {
                [] => {}
                [only] => {
                    trace!(service = %key, name = %only.service_name(), "Using the only named registration");
                    return self.compile_key(&only.key());
                }
                _ => {
                    return Err(QalibError::AmbiguousService {
                        service_type: service_type.clone(),
                        names: named.iter().map(|r| r.service_name().to_string()).collect(),
                    });
                }
            }
        }

        if options.enable_open_generic_fallback
            && let Some(registration) = self.close_open_generic(key)
        {
            return self.compile_registration(&registration);
        }

        Err(QalibError::NotRegistered(NotRegisteredError {
            requested: key.clone(),
            suggestions: registry.suggestions(key),
        }))
    }

    /// Closes the open registration matching `key`, registering the result.
    fn close_open_generic(&self, key: &ServiceKey) -> Option<ServiceRegistration> {
        let service_type = key.service_type();
        let open = self.container.registry().registrations_of(&service_type.open_form()?);

        let candidate = open
            .iter()
            .find(|r| r.service_name() == key.service_name())
            .or_else(|| match open.as_slice() {
                [only] if key.service_name().is_default() => Some(only),
                _ => None,
            })?;

        let closed = candidate.close(service_type)?;
        trace!(service = %key, open = ?candidate, "Closed open generic registration");
        Some(self.container.registry().get_or_insert(closed))
    }

    // ============================================================
    // Registrations
    // ============================================================

    fn compile_registration(&mut self, registration: &ServiceRegistration) -> Result<CreationRoutine> {
        let key = registration.key();
        if let Some(position) = self.stack.iter().position(|k| *k == key) {
            let mut chain = self.stack[position..].to_vec();
            chain.push(key.clone());
            warn!(cycle = ?chain, "Recursive dependency detected");
            return Err(QalibError::RecursiveDependency(RecursiveDependencyError { chain }));
        }

        let depth = self.stack.len();
        self.stack.push(key.clone());
        let result = self.build_registration(registration, &key);
        self.stack.truncate(depth);
        result
    }

    fn build_registration(&mut self, registration: &ServiceRegistration, key: &ServiceKey) -> Result<CreationRoutine> {
        let mut routine = match registration.implementation() {
            Implementation::Value(value) => {
                let mut emitter = self.emitter(key);
                let index = emitter.constant(value.clone());
                emitter.emit(Instruction::Load(index));
                emitter.emit(Instruction::Seal { cast: None, probe: None });
                emitter.finish()?
            }
            Implementation::Type(_) | Implementation::Expression(_) => {
                let plan = self.container.plans().get(registration)?;
                self.emit_plan(key, registration.service_type(), &plan, None)?
            }
            Implementation::Generic(generic) => {
                return Err(QalibError::InvalidExpression {
                    reason: format!(
                        "open generic {:?} can only be resolved through a closed service type",
                        generic.definition()
                    ),
                });
            }
        };

        for decorator in self.decorators_for(registration) {
            trace!(service = %key, decorator = %decorator.describe(), "Applying decorator");
            routine = self.decorate(key, registration.service_type(), &decorator, routine)?;
        }

        Ok(apply_lifetime(registration, key.clone(), routine))
    }

    fn decorators_for(&self, registration: &ServiceRegistration) -> Vec<DecoratorRegistration> {
        let service_type = registration.service_type();
        self.container
            .registry()
            .decorators_for(service_type)
            .into_iter()
            .filter(|d| d.can_decorate(registration))
            .filter_map(|d| d.close_for(service_type))
            .collect()
    }

    fn decorate(
        &mut self,
        key: &ServiceKey,
        service_type: &ServiceType,
        decorator: &DecoratorRegistration,
        inner: CreationRoutine,
    ) -> Result<CreationRoutine> {
        if let DecoratorImplementation::Function(decorate) = decorator.implementation() {
            let decorate = decorate.clone();
            return Ok(Arc::new(move |frame: &Frame<'_>| {
                let created = frame.run(&inner, true)?;
                Ok(Created {
                    instance: decorate(frame, created.instance)?,
                    disposables: created.disposables,
                })
            }));
        }

        let plan = self.container.plans().get_decorator(decorator, service_type)?;
        self.emit_plan(key, service_type, &plan, Some(&inner))
    }

    // ============================================================
    // Emission
    // ============================================================

    fn emitter(&self, key: &ServiceKey) -> Box<dyn Emitter> {
        self.container.emitters().create(key)
    }

    fn emit_plan(
        &mut self,
        key: &ServiceKey,
        service_type: &ServiceType,
        plan: &ConstructionInfo,
        decorated: Option<&CreationRoutine>,
    ) -> Result<CreationRoutine> {
        let mut emitter = self.emitter(key);

        if let Some(expression) = &plan.factory_delegate {
            emit_expression(&mut *emitter, expression);
            emitter.emit(Instruction::Seal { cast: None, probe: None });
            return emitter.finish();
        }

        let (Some(type_info), Some(constructor)) = (&plan.implementing_type, &plan.constructor) else {
            return Err(QalibError::InvalidExpression {
                reason: format!("plan for {key} has no constructor"),
            });
        };

        for dependency in &plan.constructor_dependencies {
            if dependency.is_decorator_target {
                let inner = decorated.cloned().ok_or_else(|| QalibError::InvalidDecorator {
                    decorator: type_info.name().to_string(),
                    service: service_type.clone(),
                    reason: "decorator target outside of a decorator".into(),
                })?;
                if dependency.dependency.service_type.lazy_target().is_some() {
                    emitter.emit(Instruction::Defer {
                        target: service_type.clone(),
                        routine: inner,
                        forward_arguments: true,
                    });
                } else {
                    emitter.emit(Instruction::Invoke {
                        routine: inner,
                        forward_arguments: true,
                    });
                }
                continue;
            }

            let member = (MemberKind::Parameter, dependency.parameter.name());
            if !self.emit_dependency(&mut *emitter, type_info.name(), member, &dependency.dependency)? {
                return Err(QalibError::InvalidRoutine {
                    reason: format!("constructor parameter {} of {} was skipped", member.1, type_info.name()),
                });
            }
        }

        emitter.emit(Instruction::Construct {
            constructor: constructor.clone(),
            arity: constructor.parameters().len(),
        });

        let properties_enabled = self.container.options().enable_property_injection;
        for dependency in &plan.property_dependencies {
            let explicit = dependency.dependency.factory_expression.is_some() || dependency.dependency.is_required;
            if !properties_enabled && !explicit {
                continue;
            }
            let member = (MemberKind::Property, dependency.property.name());
            if self.emit_dependency(&mut *emitter, type_info.name(), member, &dependency.dependency)? {
                emitter.emit(Instruction::SetProperty(dependency.property.clone()));
            }
        }

        emitter.emit(Instruction::Seal {
            cast: type_info.cast_to(service_type)?,
            probe: type_info.dispose_probe(),
        });
        emitter.finish()
    }

    /// Pushes the value of one dependency. Returns `false` when an optional
    /// dependency cannot be resolved and nothing was pushed.
    fn emit_dependency(
        &mut self,
        emitter: &mut dyn Emitter,
        target: &str,
        (member, member_name): (MemberKind, &str),
        dependency: &Dependency,
    ) -> Result<bool> {
        if let Some(expression) = &dependency.factory_expression {
            emit_expression(emitter, expression);
            return Ok(true);
        }

        let key = ServiceKey::new(dependency.service_type.clone(), dependency.service_name.clone());
        match self.compile_key(&key) {
            Ok(routine) => {
                emitter.emit(Instruction::Invoke {
                    routine,
                    forward_arguments: false,
                });
                Ok(true)
            }
            Err(QalibError::NotRegistered(e)) if e.requested == key => {
                if dependency.is_required {
                    return Err(QalibError::UnresolvedDependency(UnresolvedDependencyError {
                        target: target.to_string(),
                        member,
                        member_name: member_name.to_string(),
                        dependency: key,
                    }));
                }
                trace!(target, member = member_name, dependency = %key, "Skipping unresolved optional dependency");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ============================================================
    // Wrapper types
    // ============================================================

    /// `Lazy<X>`: resolves X on first access, in the scope of the request.
    fn compile_lazy(&mut self, key: &ServiceKey, target: &ServiceType) -> Result<CreationRoutine> {
        let target = target.clone();
        let name = key.service_name().clone();

        let mut emitter = self.emitter(key);
        emitter.emit(Instruction::Evaluate(Arc::new(move |frame: &Frame<'_>| {
            let container = Arc::downgrade(frame.container());
            let scope = frame.scope().cloned();
            let (service_type, name) = (target.clone(), name.clone());
            let producer: Producer = Arc::new(move || {
                container
                    .upgrade()
                    .ok_or(QalibError::ContainerDisposed)?
                    .get_instance_in(&service_type, &name, scope.as_ref(), &[])
            });
            Ok(Arc::new(LazyInstance::new(target.clone(), producer)))
        })));
        emitter.emit(Instruction::Seal { cast: None, probe: None });
        emitter.finish()
    }

    /// `Func<A.., X>`: one stable delegate resolving X on every call, in the
    /// scope current at call time.
    fn compile_func(&mut self, key: &ServiceKey, parameters: usize, result: &ServiceType) -> Result<CreationRoutine> {
        let container = Arc::downgrade(self.container);
        let (service_type, name) = (result.clone(), key.service_name().clone());
        let invoker: Invoker = Arc::new(move |arguments: &[Instance]| {
            if arguments.len() != parameters {
                return Err(QalibError::MissingArgument {
                    index: arguments.len().min(parameters),
                    available: arguments.len(),
                });
            }
            container
                .upgrade()
                .ok_or(QalibError::ContainerDisposed)?
                .get_instance_in(&service_type, &name, None, arguments)
        });

        let mut emitter = self.emitter(key);
        let index = emitter.constant(Arc::new(FuncInstance::new(result.clone(), parameters, invoker)));
        emitter.emit(Instruction::Load(index));
        emitter.emit(Instruction::Seal { cast: None, probe: None });
        emitter.finish()
    }

    /// `Enumerable<X>`: every registration of X, each created on first
    /// enumeration. Registrations being compiled above this request are
    /// left out.
    fn compile_enumerable(&mut self, key: &ServiceKey, element: &ServiceType) -> Result<CreationRoutine> {
        let container = self.container;
        let registry = container.registry();
        let mut registrations = registry.registrations_of(element);

        if container.options().enable_open_generic_fallback
            && let Some(open) = element.open_form()
        {
            for generic in registry.registrations_of(&open) {
                if registrations.iter().any(|r| r.service_name() == generic.service_name()) {
                    continue;
                }
                if let Some(closed) = generic.close(element) {
                    registrations.push(registry.get_or_insert(closed));
                }
            }
        }

        let mut routines = Vec::with_capacity(registrations.len());
        for registration in &registrations {
            let member = registration.key();
            if let Some(position) = self.stack.iter().position(|k| *k == member) {
                trace!(service = %key, skipped = %member, "Leaving the registration being compiled out of the enumeration");
                self.lowest_exclusion = Some(self.lowest_exclusion.map_or(position, |p| p.min(position)));
                continue;
            }
            routines.push(self.compile_key(&member)?);
        }

        let element = element.clone();
        let routines: Arc<[CreationRoutine]> = routines.into();
        let mut emitter = self.emitter(key);
        emitter.emit(Instruction::Evaluate(Arc::new(move |frame: &Frame<'_>| {
            let producers = routines
                .iter()
                .map(|routine| {
                    let routine = routine.clone();
                    let container = Arc::downgrade(frame.container());
                    let scope = frame.scope().cloned();
                    Arc::new(move || {
                        let container = container.upgrade().ok_or(QalibError::ContainerDisposed)?;
                        let created = routine(&Frame::new(&container, scope.as_ref(), &[]))?;
                        Ok(created.instance)
                    }) as Producer
                })
                .collect();
            Ok(Arc::new(EnumerableInstance::new(element.clone(), producers)))
        })));
        emitter.emit(Instruction::Seal { cast: None, probe: None });
        emitter.finish()
    }
}

/// Pushes the value of a dependency given as an expression.
fn emit_expression(emitter: &mut dyn Emitter, expression: &FactoryExpression) {
    match expression {
        FactoryExpression::Argument(index) => emitter.emit(Instruction::LoadArgument(*index)),
        FactoryExpression::Constant(value) => {
            let index = emitter.constant(value.clone());
            emitter.emit(Instruction::Load(index));
        }
        other => {
            let expression = other.clone();
            emitter.emit(Instruction::Evaluate(Arc::new(move |frame: &Frame<'_>| {
                expression.evaluate(frame, frame.arguments())
            })));
        }
    }
}

/// Wraps a raw routine with the registration's lifetime.
///
/// Without a lifetime the instance is transient and its disposables are
/// not tracked.
fn apply_lifetime(registration: &ServiceRegistration, key: ServiceKey, raw: CreationRoutine) -> CreationRoutine {
    match registration.lifetime().cloned() {
        None => Arc::new(move |frame: &Frame<'_>| Ok(Created::new(raw(frame)?.instance))),
        Some(lifetime) => Arc::new(move |frame: &Frame<'_>| {
            let context = LifetimeContext::new(&key, frame.scope(), frame.container().disposables());
            let instance = lifetime.get_instance(&|| raw(frame), &context)?;
            Ok(Created::new(instance))
        }),
    }
}
