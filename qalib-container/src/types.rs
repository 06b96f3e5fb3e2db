//! Runtime type descriptors.
//!
//! Rust has no reflection, so the container works over an explicit
//! description of types. A [`ServiceType`] is one of:
//!
//! - a **concrete** Rust type, identified by its [`TypeId`];
//! - a **constructed** generic: a [`GenericDefinition`] closed over
//!   argument types, e.g. `Repository<Order>`;
//! - an **open** generic: the bare definition, e.g. `Repository<>`.
//!
//! Constructed generics are what let one open registration serve
//! every closed request. The container also knows four built-in
//! definitions: `Lazy<X>`, `Func<X>`, `Func<A.., X>` and
//! `Enumerable<X>`.

use std::any::{TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use qalib_support::rendering::shorten_type_name;

const LAZY: &str = "qalib::Lazy";
const FUNC: &str = "qalib::Func";
const ENUMERABLE: &str = "qalib::Enumerable";

/// Identity of a generic type definition: a name and an arity.
///
/// # Examples
/// ```
/// use qalib_container::types::GenericDefinition;
///
/// let repo = GenericDefinition::new("app::Repository", 1);
/// assert_eq!(repo.arity(), 1);
/// assert_eq!(repo, GenericDefinition::new("app::Repository", 1));
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GenericDefinition {
    name: Cow<'static, str>,
    arity: usize,
}

impl GenericDefinition {
    pub fn new(name: impl Into<Cow<'static, str>>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }

    /// `Lazy<X>`.
    pub fn lazy() -> Self {
        Self::new(LAZY, 1)
    }

    /// `Func<X>` for `parameters == 0`, `Func<A1.., X>` otherwise.
    pub fn func(parameters: usize) -> Self {
        Self::new(FUNC, parameters + 1)
    }

    /// `Enumerable<X>`.
    pub fn enumerable() -> Self {
        Self::new(ENUMERABLE, 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Debug for GenericDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.name, ",".repeat(self.arity.saturating_sub(1)))
    }
}

#[derive(Clone)]
enum TypeRepr {
    Concrete(TypeId, &'static str),
    Constructed(GenericDefinition, Arc<[ServiceType]>),
    Open(GenericDefinition),
}

/// A runtime descriptor of a service or implementing type.
///
/// Cheap to clone. Equality is structural; concrete types compare by
/// [`TypeId`] only.
///
/// # Examples
/// ```
/// use qalib_container::types::{GenericDefinition, ServiceType};
///
/// let repo = GenericDefinition::new("app::Repository", 1);
/// let closed = ServiceType::constructed(repo.clone(), vec![ServiceType::of::<u64>()]);
///
/// assert!(closed.is_constructed());
/// assert_eq!(closed.generic_definition(), Some(&repo));
/// assert_eq!(closed.open_form(), Some(ServiceType::open(repo)));
/// ```
#[derive(Clone)]
pub struct ServiceType {
    repr: Arc<TypeRepr>,
}

impl ServiceType {
    /// Descriptor for the Rust type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            repr: Arc::new(TypeRepr::Concrete(TypeId::of::<T>(), type_name::<T>())),
        }
    }

    /// A generic definition closed over `arguments`.
    pub fn constructed(definition: GenericDefinition, arguments: Vec<ServiceType>) -> Self {
        Self {
            repr: Arc::new(TypeRepr::Constructed(definition, arguments.into())),
        }
    }

    /// The open form of a generic definition.
    pub fn open(definition: GenericDefinition) -> Self {
        Self {
            repr: Arc::new(TypeRepr::Open(definition)),
        }
    }

    /// `Lazy<inner>`.
    pub fn lazy(inner: ServiceType) -> Self {
        Self::constructed(GenericDefinition::lazy(), vec![inner])
    }

    /// `Func<result>`.
    pub fn func(result: ServiceType) -> Self {
        Self::constructed(GenericDefinition::func(0), vec![result])
    }

    /// `Func<parameters.., result>`.
    pub fn func_with(parameters: Vec<ServiceType>, result: ServiceType) -> Self {
        let arity = parameters.len();
        let mut arguments = parameters;
        arguments.push(result);
        Self::constructed(GenericDefinition::func(arity), arguments)
    }

    /// `Enumerable<element>`.
    pub fn enumerable(element: ServiceType) -> Self {
        Self::constructed(GenericDefinition::enumerable(), vec![element])
    }

    /// The [`TypeId`] of a concrete descriptor.
    pub fn type_id(&self) -> Option<TypeId> {
        match &*self.repr {
            TypeRepr::Concrete(id, _) => Some(*id),
            _ => None,
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(&*self.repr, TypeRepr::Concrete(..))
    }

    pub fn is_constructed(&self) -> bool {
        matches!(&*self.repr, TypeRepr::Constructed(..))
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.repr, TypeRepr::Open(_))
    }

    /// Definition of a constructed or open generic.
    pub fn generic_definition(&self) -> Option<&GenericDefinition> {
        match &*self.repr {
            TypeRepr::Constructed(def, _) | TypeRepr::Open(def) => Some(def),
            TypeRepr::Concrete(..) => None,
        }
    }

    /// Type arguments of a constructed generic; empty otherwise.
    pub fn type_arguments(&self) -> &[ServiceType] {
        match &*self.repr {
            TypeRepr::Constructed(_, args) => args,
            _ => &[],
        }
    }

    /// The open descriptor this constructed generic was closed from.
    pub fn open_form(&self) -> Option<ServiceType> {
        match &*self.repr {
            TypeRepr::Constructed(def, _) => Some(Self::open(def.clone())),
            _ => None,
        }
    }

    /// `X` if this is `Lazy<X>`.
    pub fn lazy_target(&self) -> Option<&ServiceType> {
        self.single_argument_of(LAZY)
    }

    /// `X` if this is `Enumerable<X>`.
    pub fn enumerable_element(&self) -> Option<&ServiceType> {
        self.single_argument_of(ENUMERABLE)
    }

    /// `(parameters, X)` if this is `Func<..., X>`.
    pub fn func_signature(&self) -> Option<(&[ServiceType], &ServiceType)> {
        match &*self.repr {
            TypeRepr::Constructed(def, args) if def.name() == FUNC => {
                let (result, parameters) = args.split_last()?;
                Some((parameters, result))
            }
            _ => None,
        }
    }

    fn single_argument_of(&self, definition: &str) -> Option<&ServiceType> {
        match &*self.repr {
            TypeRepr::Constructed(def, args) if def.name() == definition && args.len() == 1 => {
                args.first()
            }
            _ => None,
        }
    }

    /// Fully qualified display name.
    pub fn name(&self) -> String {
        match &*self.repr {
            TypeRepr::Concrete(_, name) => (*name).to_string(),
            TypeRepr::Constructed(def, args) => {
                let args: Vec<String> = args.iter().map(ServiceType::name).collect();
                format!("{}<{}>", def.name(), args.join(", "))
            }
            TypeRepr::Open(def) => format!("{def:?}"),
        }
    }

    /// Display name with module paths stripped.
    pub fn short_name(&self) -> String {
        shorten_type_name(&self.name())
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.repr, &other.repr) {
            return true;
        }
        match (&*self.repr, &*other.repr) {
            (TypeRepr::Concrete(a, _), TypeRepr::Concrete(b, _)) => a == b,
            (TypeRepr::Constructed(da, aa), TypeRepr::Constructed(db, ab)) => da == db && aa == ab,
            (TypeRepr::Open(a), TypeRepr::Open(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &*self.repr {
            TypeRepr::Concrete(id, _) => {
                0u8.hash(state);
                id.hash(state);
            }
            TypeRepr::Constructed(def, args) => {
                1u8.hash(state);
                def.hash(state);
                args.hash(state);
            }
            TypeRepr::Open(def) => {
                2u8.hash(state);
                def.hash(state);
            }
        }
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceType({})", self.name())
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handler() -> GenericDefinition {
        GenericDefinition::new("app::Handler", 1)
    }

    #[test]
    fn concrete_equality_ignores_name_source() {
        assert_eq!(ServiceType::of::<String>(), ServiceType::of::<String>());
        assert_ne!(ServiceType::of::<String>(), ServiceType::of::<u8>());
    }

    #[test]
    fn constructed_equality_is_structural() {
        let a = ServiceType::constructed(handler(), vec![ServiceType::of::<u32>()]);
        let b = ServiceType::constructed(handler(), vec![ServiceType::of::<u32>()]);
        let c = ServiceType::constructed(handler(), vec![ServiceType::of::<u64>()]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn open_and_constructed_differ() {
        let closed = ServiceType::constructed(handler(), vec![ServiceType::of::<u32>()]);
        assert_ne!(closed, ServiceType::open(handler()));
        assert_eq!(closed.open_form(), Some(ServiceType::open(handler())));
    }

    #[test]
    fn built_in_shapes() {
        let x = ServiceType::of::<u8>();
        assert_eq!(ServiceType::lazy(x.clone()).lazy_target(), Some(&x));
        assert_eq!(ServiceType::enumerable(x.clone()).enumerable_element(), Some(&x));
        assert!(ServiceType::lazy(x.clone()).enumerable_element().is_none());

        let func = ServiceType::func_with(vec![ServiceType::of::<String>()], x.clone());
        let (params, result) = func.func_signature().unwrap();
        assert_eq!(params, &[ServiceType::of::<String>()]);
        assert_eq!(result, &x);

        let func = ServiceType::func(x);
        let (params, _) = func.func_signature().unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn func_arity_is_part_of_identity() {
        let x = ServiceType::of::<u8>();
        assert_ne!(
            ServiceType::func(x.clone()),
            ServiceType::func_with(vec![ServiceType::of::<u8>()], x)
        );
    }

    #[test]
    fn names_render_arguments() {
        let closed = ServiceType::constructed(handler(), vec![ServiceType::of::<u32>()]);
        assert_eq!(closed.name(), "app::Handler<u32>");
        assert_eq!(closed.short_name(), "Handler<u32>");
        assert_eq!(ServiceType::open(handler()).name(), "app::Handler<>");
    }
}
