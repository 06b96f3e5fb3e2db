//! Deferred and collection wrappers.
//!
//! The container resolves four shapes it was never explicitly told
//! about: `Lazy<X>`, `Func<X>`, `FuncWith<A, X>` and `All<X>`. At runtime
//! each is held as an erased value ([`LazyInstance`], [`FuncInstance`],
//! [`EnumerableInstance`]); the generic types are typed views over them.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::metadata::{Instance, downcast_instance};
use crate::types::ServiceType;

pub type Producer = Arc<dyn Fn() -> Result<Instance> + Send + Sync>;
pub type Invoker = Arc<dyn Fn(&[Instance]) -> Result<Instance> + Send + Sync>;

// ============================================================
// Lazy
// ============================================================

struct LazyInner {
    target: ServiceType,
    cell: OnceCell<Instance>,
    producer: Producer,
}

/// Erased `Lazy<X>`: resolves its target on first access, then keeps it.
#[derive(Clone)]
pub struct LazyInstance {
    inner: Arc<LazyInner>,
}

impl LazyInstance {
    pub fn new(target: ServiceType, producer: Producer) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                target,
                cell: OnceCell::new(),
                producer,
            }),
        }
    }

    pub fn target(&self) -> &ServiceType {
        &self.inner.target
    }

    pub fn value(&self) -> Result<Instance> {
        self.inner
            .cell
            .get_or_try_init(|| (self.inner.producer)())
            .cloned()
    }

    pub fn is_value_created(&self) -> bool {
        self.inner.cell.get().is_some()
    }
}

impl fmt::Debug for LazyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyInstance")
            .field("target", &self.inner.target)
            .field("created", &self.is_value_created())
            .finish()
    }
}

/// A deferred `T`. Nothing is resolved until [`Lazy::get`] is called.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use qalib_container::metadata::Instance;
/// use qalib_container::types::ServiceType;
/// use qalib_container::wrappers::{Lazy, LazyInstance};
///
/// let lazy: Lazy<u32> = Lazy::from_instance(LazyInstance::new(
///     ServiceType::of::<u32>(),
///     Arc::new(|| Ok(Arc::new(42u32) as Instance)),
/// ));
/// assert!(!lazy.is_value_created());
/// assert_eq!(lazy.get().unwrap(), 42);
/// assert!(lazy.is_value_created());
/// ```
pub struct Lazy<T> {
    inner: LazyInstance,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Lazy<T> {
    pub fn from_instance(inner: LazyInstance) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn is_value_created(&self) -> bool {
        self.inner.is_value_created()
    }

    pub fn as_instance(&self) -> &LazyInstance {
        &self.inner
    }
}

impl<T: Clone + 'static> Lazy<T> {
    pub fn get(&self) -> Result<T> {
        downcast_instance(&self.inner.value()?)
    }
}

impl<T: Send + Sync + 'static> Lazy<T> {
    /// The value as a shared `Arc`, for types that are not `Clone`.
    pub fn get_shared(&self) -> Result<Arc<T>> {
        self.inner
            .value()?
            .downcast::<T>()
            .map_err(|_| crate::error::QalibError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                context: "lazy value".into(),
            })
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

// ============================================================
// Func
// ============================================================

/// Erased `Func<.., X>`: a factory delegate with a fixed parameter count.
#[derive(Clone)]
pub struct FuncInstance {
    result: ServiceType,
    parameters: usize,
    invoker: Invoker,
}

impl FuncInstance {
    pub fn new(result: ServiceType, parameters: usize, invoker: Invoker) -> Self {
        Self {
            result,
            parameters,
            invoker,
        }
    }

    pub fn result_type(&self) -> &ServiceType {
        &self.result
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters
    }

    pub fn invoke(&self, arguments: &[Instance]) -> Result<Instance> {
        (self.invoker)(arguments)
    }

    /// `true` if both handles call the same delegate.
    pub fn ptr_eq(&self, other: &FuncInstance) -> bool {
        Arc::ptr_eq(&self.invoker, &other.invoker)
    }
}

impl fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncInstance({} -> {})", self.parameters, self.result)
    }
}

/// A factory for `T`. Every call resolves `T` again, honouring its lifetime.
pub struct Func<T> {
    inner: FuncInstance,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Func<T> {
    pub fn from_instance(inner: FuncInstance) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn as_instance(&self) -> &FuncInstance {
        &self.inner
    }
}

impl<T: Clone + 'static> Func<T> {
    pub fn call(&self) -> Result<T> {
        downcast_instance(&self.inner.invoke(&[])?)
    }
}

impl<T> Clone for Func<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Func<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// A factory for `T` taking one runtime argument.
pub struct FuncWith<A, T> {
    inner: FuncInstance,
    _marker: PhantomData<fn(A) -> T>,
}

impl<A: 'static, T: 'static> FuncWith<A, T> {
    pub fn from_instance(inner: FuncInstance) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn as_instance(&self) -> &FuncInstance {
        &self.inner
    }
}

impl<A: Send + Sync + 'static, T: Clone + 'static> FuncWith<A, T> {
    pub fn call(&self, argument: A) -> Result<T> {
        downcast_instance(&self.inner.invoke(&[Arc::new(argument) as Instance])?)
    }
}

impl<A, T> Clone for FuncWith<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, T> fmt::Debug for FuncWith<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

// ============================================================
// Enumerable
// ============================================================

struct EnumerableInner {
    element: ServiceType,
    producers: Vec<Producer>,
    items: OnceCell<Vec<Instance>>,
}

/// Erased `Enumerable<X>`.
///
/// Elements are created on first enumeration. Later enumerations see
/// the same elements.
#[derive(Clone)]
pub struct EnumerableInstance {
    inner: Arc<EnumerableInner>,
}

impl EnumerableInstance {
    pub fn new(element: ServiceType, producers: Vec<Producer>) -> Self {
        Self {
            inner: Arc::new(EnumerableInner {
                element,
                producers,
                items: OnceCell::new(),
            }),
        }
    }

    pub fn element_type(&self) -> &ServiceType {
        &self.inner.element
    }

    pub fn len(&self) -> usize {
        self.inner.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.producers.is_empty()
    }

    pub fn instances(&self) -> Result<&[Instance]> {
        self.inner
            .items
            .get_or_try_init(|| self.inner.producers.iter().map(|produce| produce()).collect())
            .map(Vec::as_slice)
    }
}

impl fmt::Debug for EnumerableInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumerableInstance")
            .field("element", &self.inner.element)
            .field("len", &self.len())
            .finish()
    }
}

/// Every registration of `T`, in registration order.
pub struct All<T> {
    inner: EnumerableInstance,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> All<T> {
    pub fn from_instance(inner: EnumerableInstance) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_instance(&self) -> &EnumerableInstance {
        &self.inner
    }
}

impl<T: Clone + 'static> All<T> {
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.inner.instances()?.iter().map(downcast_instance).collect()
    }
}

impl<T> Clone for All<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for All<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(counter: &Arc<AtomicU32>) -> Producer {
        let counter = counter.clone();
        Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(n) as Instance)
        })
    }

    #[test]
    fn lazy_resolves_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let lazy: Lazy<u32> =
            Lazy::from_instance(LazyInstance::new(ServiceType::of::<u32>(), counting(&counter)));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(lazy.get().unwrap(), 1);
        assert_eq!(lazy.clone().get().unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn func_calls_every_time() {
        let counter = Arc::new(AtomicU32::new(0));
        let produce = counting(&counter);
        let func: Func<u32> = Func::from_instance(FuncInstance::new(
            ServiceType::of::<u32>(),
            0,
            Arc::new(move |_| produce()),
        ));

        assert_eq!(func.call().unwrap(), 1);
        assert_eq!(func.call().unwrap(), 2);
    }

    #[test]
    fn func_with_forwards_argument() {
        let func: FuncWith<u32, String> = FuncWith::from_instance(FuncInstance::new(
            ServiceType::of::<String>(),
            1,
            Arc::new(|args| {
                let n = downcast_instance::<u32>(&args[0])?;
                Ok(Arc::new(format!("#{n}")) as Instance)
            }),
        ));
        assert_eq!(func.call(7).unwrap(), "#7");
    }

    #[test]
    fn enumerable_materializes_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let all: All<u32> = All::from_instance(EnumerableInstance::new(
            ServiceType::of::<u32>(),
            vec![counting(&counter), counting(&counter)],
        ));

        assert_eq!(all.len(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(all.to_vec().unwrap(), vec![1, 2]);
        assert_eq!(all.to_vec().unwrap(), vec![1, 2]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
