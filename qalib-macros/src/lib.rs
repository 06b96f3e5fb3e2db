//! Procedural macros for Qalib DI.
//!
//! `#[derive(Component)]` writes the [`TypeInfo`] a container needs to
//! construct a struct: one constructor taking every injected field, the
//! optional properties, the services the struct is exposed as, and the
//! disposal probe.
//!
//! [`TypeInfo`]: https://docs.rs/qalib/latest/qalib/metadata/struct.TypeInfo.html

use proc_macro::TokenStream;

mod component;

/// Derives `Component` for a struct.
///
/// ```ignore
/// #[derive(Component)]
/// #[component(expose = "Arc<dyn Notifier>", disposable, scan)]
/// struct EmailNotifier {
///     transport: Arc<dyn Transport>,
///     #[component(name = "smtp")]
///     settings: Arc<dyn Settings>,
///     templates: Lazy<Arc<dyn Templates>>,
///     #[component(property)]
///     audit: Option<Arc<dyn AuditLog>>,
///     #[component(default)]
///     sent: AtomicUsize,
/// }
/// ```
///
/// Struct options:
/// - `expose = "Type"` (repeatable): a service type the struct is assignable to
/// - `disposable`: the struct implements `Disposable`
/// - `scan`: announce the struct to `InventoryScanner`
/// - `crate = "path"`: path of the qalib facade, `::qalib` by default
///
/// Field options:
/// - `name = "..."`: resolve the dependency by name
/// - `shared`: the field is `Arc<T>` holding the service `T`
/// - `property`: an optional `Option<T>` property, set when `T` resolves
/// - `inject`: a required property
/// - `default`: not injected, filled with `Default::default()`
///
/// `Lazy<T>`, `Func<T>`, `FuncWith<A, T>` and `All<T>` fields are recognised
/// by their type.
#[proc_macro_derive(Component, attributes(component))]
pub fn component_derive(input: TokenStream) -> TokenStream {
    component::component_derive_impl(input)
}
