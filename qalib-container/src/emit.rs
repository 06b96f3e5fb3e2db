//! Code emission: turning a plan into a creation routine.
//!
//! The compiler drives an [`Emitter`] with straight-line [`Instruction`]s
//! over a constant table and gets back a [`CreationRoutine`]. The shipped
//! backend, [`StackEmitter`], verifies the instruction stream once and
//! interprets it with a small value stack on every call. Another backend
//! can be plugged in through [`EmitterFactory`].
//!
//! ```text
//! Invoke(clock)          stack: [Instance]
//! Load(#0)               stack: [Instance, Instance]
//! Construct(2 args)      stack: [Object]
//! Invoke(logger)         stack: [Object, Instance]
//! SetProperty(logger)    stack: [Object]
//! Seal                   stack: [Created]
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::container::ContainerInner;
use crate::error::{QalibError, Result};
use crate::factory::ServiceFactory;
use crate::key::{ServiceKey, ServiceName};
use crate::lifetime::Created;
use crate::metadata::{Arguments, CastFn, ConstructorInfo, DisposeProbe, Instance, Object, PropertyInfo};
use crate::scope::ScopeRef;
use crate::types::ServiceType;
use crate::wrappers::{LazyInstance, Producer};

/// A compiled creation routine.
pub type CreationRoutine = Arc<dyn Fn(&Frame<'_>) -> Result<Created> + Send + Sync>;

/// Code run by [`Instruction::Evaluate`].
pub type EvaluateFn = Arc<dyn Fn(&Frame<'_>) -> Result<Instance> + Send + Sync>;

/// One step of a creation routine.
#[derive(Clone)]
pub enum Instruction {
    /// Pushes constant `#i`.
    Load(usize),
    /// Pushes runtime argument `#i`.
    LoadArgument(usize),
    /// Runs another routine and pushes its instance. Its disposables
    /// travel with the value being built.
    Invoke {
        routine: CreationRoutine,
        forward_arguments: bool,
    },
    /// Pushes a `Lazy` whose value is produced by `routine` on first access.
    Defer {
        target: ServiceType,
        routine: CreationRoutine,
        forward_arguments: bool,
    },
    /// Runs arbitrary code and pushes its result.
    Evaluate(EvaluateFn),
    /// Pops `arity` instances and pushes the constructed object.
    Construct {
        constructor: ConstructorInfo,
        arity: usize,
    },
    /// Pops an instance and writes it into the object below it.
    SetProperty(PropertyInfo),
    /// Pops the object (or instance) on top, probes it for disposal,
    /// casts it to the service type and pushes the finished value.
    Seal {
        cast: Option<CastFn>,
        probe: Option<DisposeProbe>,
    },
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Load(i) => write!(f, "Load(#{i})"),
            Instruction::LoadArgument(i) => write!(f, "LoadArgument({i})"),
            Instruction::Invoke { forward_arguments, .. } => {
                write!(f, "Invoke(forward_arguments={forward_arguments})")
            }
            Instruction::Defer { target, .. } => write!(f, "Defer({target})"),
            Instruction::Evaluate(_) => write!(f, "Evaluate"),
            Instruction::Construct { constructor, arity } => write!(f, "Construct({constructor:?}, {arity})"),
            Instruction::SetProperty(p) => write!(f, "SetProperty({})", p.name()),
            Instruction::Seal { cast, probe } => {
                write!(f, "Seal(cast={}, disposable={})", cast.is_some(), probe.is_some())
            }
        }
    }
}

/// Builds one creation routine.
pub trait Emitter: Send {
    /// Adds a value to the constant table and returns its index.
    fn constant(&mut self, value: Instance) -> usize;

    fn emit(&mut self, instruction: Instruction);

    /// Verifies the instruction stream and produces the routine.
    fn finish(self: Box<Self>) -> Result<CreationRoutine>;
}

/// Creates an [`Emitter`] per compiled service.
pub trait EmitterFactory: Send + Sync {
    fn create(&self, service: &ServiceKey) -> Box<dyn Emitter>;
}

// ============================================================
// Frame
// ============================================================

/// What a running creation routine sees: the container, the scope in
/// effect and the runtime arguments of the request.
pub struct Frame<'a> {
    container: &'a Arc<ContainerInner>,
    scope: Option<&'a ScopeRef>,
    arguments: &'a [Instance],
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        container: &'a Arc<ContainerInner>,
        scope: Option<&'a ScopeRef>,
        arguments: &'a [Instance],
    ) -> Self {
        Self {
            container,
            scope,
            arguments,
        }
    }

    pub(crate) fn container(&self) -> &'a Arc<ContainerInner> {
        self.container
    }

    pub fn scope(&self) -> Option<&'a ScopeRef> {
        self.scope
    }

    pub fn arguments(&self) -> &'a [Instance] {
        self.arguments
    }

    /// Runs `routine` in this frame, with or without the runtime arguments.
    pub fn run(&self, routine: &CreationRoutine, forward_arguments: bool) -> Result<Created> {
        let arguments: &[Instance] = if forward_arguments { self.arguments } else { &[] };
        routine(&Frame::new(self.container, self.scope, arguments))
    }

    /// A `Lazy` over `routine`, bound to this frame's container and scope.
    ///
    /// Disposables created on first access go to the scope, or to the
    /// container when there is none.
    pub fn defer(&self, target: ServiceType, routine: CreationRoutine, forward_arguments: bool) -> Instance {
        let container = Arc::downgrade(self.container);
        let scope = self.scope.cloned();
        let arguments: Vec<Instance> = if forward_arguments { self.arguments.to_vec() } else { Vec::new() };

        let producer: Producer = Arc::new(move || {
            let container = container.upgrade().ok_or(QalibError::ContainerDisposed)?;
            let created = routine(&Frame::new(&container, scope.as_ref(), &arguments))?;
            for disposable in created.disposables {
                match &scope {
                    Some(scope) => scope.track(disposable),
                    None => container.disposables().track(disposable),
                }
            }
            Ok(created.instance)
        });
        Arc::new(LazyInstance::new(target, producer))
    }
}

impl ServiceFactory for Frame<'_> {
    fn get_instance(&self, service_type: &ServiceType, name: &ServiceName) -> Result<Instance> {
        self.container.get_instance_in(service_type, name, self.scope, &[])
    }

    fn get_instance_with(
        &self,
        service_type: &ServiceType,
        name: &ServiceName,
        arguments: &[Instance],
    ) -> Result<Instance> {
        self.container.get_instance_in(service_type, name, self.scope, arguments)
    }

    fn get_all_instances(&self, service_type: &ServiceType) -> Result<Vec<Instance>> {
        self.container.get_all_instances_in(service_type, self.scope)
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("scope", &self.scope.map(ScopeRef::id))
            .field("arguments", &self.arguments.len())
            .finish()
    }
}

// ============================================================
// StackEmitter
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Instance,
    Object,
    Created,
}

enum Slot {
    Instance(Instance),
    Object(Object),
    Created(Created),
}

impl Slot {
    fn into_instance(self) -> Result<Instance> {
        match self {
            Slot::Instance(instance) => Ok(instance),
            _ => Err(invalid("expected an instance on the stack")),
        }
    }
}

fn invalid(reason: impl Into<String>) -> QalibError {
    QalibError::InvalidRoutine { reason: reason.into() }
}

/// Interpreting backend: a verified instruction list run over a value stack.
pub struct StackEmitter {
    service: ServiceKey,
    constants: Vec<Instance>,
    instructions: Vec<Instruction>,
}

impl StackEmitter {
    pub fn new(service: ServiceKey) -> Self {
        Self {
            service,
            constants: Vec::new(),
            instructions: Vec::new(),
        }
    }

    /// Simulates the stack by kind; returns the maximum depth.
    fn verify(&self) -> Result<usize> {
        let mut stack: Vec<Kind> = Vec::new();
        let mut max_depth = 0;

        for (pc, instruction) in self.instructions.iter().enumerate() {
            let fail = |what: &str| invalid(format!("{what} at #{pc} ({instruction:?}) for {}", self.service));
            match instruction {
                Instruction::Load(index) => {
                    if *index >= self.constants.len() {
                        return Err(fail("constant out of range"));
                    }
                    stack.push(Kind::Instance);
                }
                Instruction::LoadArgument(_)
                | Instruction::Invoke { .. }
                | Instruction::Defer { .. }
                | Instruction::Evaluate(_) => stack.push(Kind::Instance),
                Instruction::Construct { constructor, arity } => {
                    if constructor.parameters().len() != *arity {
                        return Err(fail("constructor arity mismatch"));
                    }
                    if stack.len() < *arity {
                        return Err(fail("stack underflow"));
                    }
                    let arguments = stack.split_off(stack.len() - arity);
                    if arguments.iter().any(|k| *k != Kind::Instance) {
                        return Err(fail("constructor argument is not an instance"));
                    }
                    stack.push(Kind::Object);
                }
                Instruction::SetProperty(_) => {
                    if stack.pop() != Some(Kind::Instance) || stack.last() != Some(&Kind::Object) {
                        return Err(fail("property value must sit on an object"));
                    }
                }
                Instruction::Seal { .. } => match stack.pop() {
                    Some(Kind::Object | Kind::Instance) => stack.push(Kind::Created),
                    _ => return Err(fail("nothing to seal")),
                },
            }
            max_depth = max_depth.max(stack.len());
        }

        if stack != [Kind::Created] {
            return Err(invalid(format!(
                "routine for {} must leave exactly one sealed value, found {stack:?}",
                self.service
            )));
        }
        Ok(max_depth)
    }
}

impl Emitter for StackEmitter {
    fn constant(&mut self, value: Instance) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn finish(self: Box<Self>) -> Result<CreationRoutine> {
        let max_depth = self.verify()?;
        trace!(
            service = %self.service,
            instructions = self.instructions.len(),
            constants = self.constants.len(),
            "Emitted creation routine"
        );

        let program = Arc::new(Program {
            constants: self.constants,
            instructions: self.instructions,
            max_depth,
        });
        Ok(Arc::new(move |frame: &Frame<'_>| program.run(frame)))
    }
}

struct Program {
    constants: Vec<Instance>,
    instructions: Vec<Instruction>,
    max_depth: usize,
}

impl Program {
    fn run(&self, frame: &Frame<'_>) -> Result<Created> {
        let mut stack: Vec<Slot> = Vec::with_capacity(self.max_depth);
        let mut disposables = Vec::new();

        for instruction in &self.instructions {
            match instruction {
                Instruction::Load(index) => {
                    let value = self.constants.get(*index).ok_or_else(|| invalid("constant out of range"))?;
                    stack.push(Slot::Instance(value.clone()));
                }
                Instruction::LoadArgument(index) => {
                    let value = frame.arguments().get(*index).ok_or(QalibError::MissingArgument {
                        index: *index,
                        available: frame.arguments().len(),
                    })?;
                    stack.push(Slot::Instance(value.clone()));
                }
                Instruction::Invoke {
                    routine,
                    forward_arguments,
                } => {
                    let created = frame.run(routine, *forward_arguments)?;
                    disposables.extend(created.disposables);
                    stack.push(Slot::Instance(created.instance));
                }
                Instruction::Defer {
                    target,
                    routine,
                    forward_arguments,
                } => {
                    stack.push(Slot::Instance(frame.defer(target.clone(), routine.clone(), *forward_arguments)));
                }
                Instruction::Evaluate(evaluate) => stack.push(Slot::Instance(evaluate(frame)?)),
                Instruction::Construct { constructor, arity } => {
                    let split = stack.len().checked_sub(*arity).ok_or_else(|| invalid("stack underflow"))?;
                    let values = stack
                        .split_off(split)
                        .into_iter()
                        .map(Slot::into_instance)
                        .collect::<Result<Vec<_>>>()?;
                    stack.push(Slot::Object(constructor.invoke(Arguments::new(values))?));
                }
                Instruction::SetProperty(property) => {
                    let value = stack.pop().ok_or_else(|| invalid("stack underflow"))?.into_instance()?;
                    match stack.last_mut() {
                        Some(Slot::Object(target)) => property.set(target, value)?,
                        _ => return Err(invalid("property target is not an object")),
                    }
                }
                Instruction::Seal { cast, probe } => {
                    let raw: Instance = match stack.pop() {
                        Some(Slot::Object(object)) => Arc::from(object),
                        Some(Slot::Instance(instance)) => instance,
                        _ => return Err(invalid("nothing to seal")),
                    };
                    if let Some(disposable) = probe.as_ref().and_then(|probe| probe(&raw)) {
                        disposables.push(disposable);
                    }
                    let instance = match cast {
                        Some(cast) => cast(raw)?,
                        None => raw,
                    };
                    stack.push(Slot::Created(Created {
                        instance,
                        disposables: std::mem::take(&mut disposables),
                    }));
                }
            }
        }

        match stack.pop() {
            Some(Slot::Created(created)) if stack.is_empty() => Ok(created),
            _ => Err(invalid("routine did not produce a sealed value")),
        }
    }
}

/// Creates a [`StackEmitter`] per service.
#[derive(Debug, Default, Clone, Copy)]
pub struct StackEmitterFactory;

impl EmitterFactory for StackEmitterFactory {
    fn create(&self, service: &ServiceKey) -> Box<dyn Emitter> {
        Box::new(StackEmitter::new(service.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TypeInfo;

    struct Pair {
        left: u32,
        right: u32,
        label: String,
    }

    fn pair_info() -> TypeInfo {
        TypeInfo::builder::<Pair>()
            .constructor(
                |p| p.param::<u32>("left").param::<u32>("right"),
                |mut a| {
                    Ok(Pair {
                        left: a.take(0)?,
                        right: a.take(1)?,
                        label: String::new(),
                    })
                },
            )
            .property::<String>("label", |p, v| p.label = v)
            .implements::<u64>(|this| u64::from(this.left + this.right))
            .build()
    }

    fn emitter() -> Box<dyn Emitter> {
        StackEmitterFactory.create(&ServiceKey::of::<u64>())
    }

    #[test]
    fn verifies_a_well_formed_stream() {
        let info = pair_info();
        let mut e = emitter();
        let one = e.constant(Arc::new(1u32));
        let label = e.constant(Arc::new(String::from("sum")));
        e.emit(Instruction::Load(one));
        e.emit(Instruction::LoadArgument(0));
        e.emit(Instruction::Construct {
            constructor: info.constructors()[0].clone(),
            arity: 2,
        });
        e.emit(Instruction::Load(label));
        e.emit(Instruction::SetProperty(info.property("label").unwrap().clone()));
        e.emit(Instruction::Seal {
            cast: info.cast_to(&ServiceType::of::<u64>()).unwrap(),
            probe: None,
        });
        assert!(e.finish().is_ok());
    }

    #[test]
    fn rejects_underflow() {
        let info = pair_info();
        let mut e = emitter();
        let one = e.constant(Arc::new(1u32));
        e.emit(Instruction::Load(one));
        e.emit(Instruction::Construct {
            constructor: info.constructors()[0].clone(),
            arity: 2,
        });
        e.emit(Instruction::Seal { cast: None, probe: None });
        assert!(matches!(e.finish(), Err(QalibError::InvalidRoutine { .. })));
    }

    #[test]
    fn rejects_unsealed_values() {
        let mut e = emitter();
        let one = e.constant(Arc::new(1u32));
        e.emit(Instruction::Load(one));
        assert!(e.finish().is_err());

        let mut e = emitter();
        let one = e.constant(Arc::new(1u32));
        e.emit(Instruction::Load(one));
        e.emit(Instruction::Seal { cast: None, probe: None });
        e.emit(Instruction::Load(one));
        e.emit(Instruction::Seal { cast: None, probe: None });
        assert!(e.finish().is_err());
    }

    #[test]
    fn rejects_out_of_range_constant() {
        let mut e = emitter();
        e.emit(Instruction::Load(3));
        e.emit(Instruction::Seal { cast: None, probe: None });
        assert!(e.finish().is_err());
    }

    #[test]
    fn property_needs_an_object() {
        let info = pair_info();
        let mut e = emitter();
        let label = e.constant(Arc::new(String::from("x")));
        e.emit(Instruction::Load(label));
        e.emit(Instruction::Load(label));
        e.emit(Instruction::SetProperty(info.property("label").unwrap().clone()));
        e.emit(Instruction::Seal { cast: None, probe: None });
        assert!(e.finish().is_err());
    }
}
