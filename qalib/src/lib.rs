//! # Qalib — Dependency Injection Container for Rust
//!
//! Register services, describe how their implementations are built, and
//! let the container compile each request into a reusable creation routine.
//!
//! ```
//! use std::sync::Arc;
//!
//! use qalib::prelude::*;
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! #[derive(Component)]
//! #[component(expose = "Arc<dyn Clock>")]
//! struct FixedClock;
//!
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 {
//!         42
//!     }
//! }
//!
//! #[derive(Component)]
//! struct Greeter {
//!     clock: Arc<dyn Clock>,
//!     #[component(name = "greeting")]
//!     text: String,
//! }
//!
//! impl Greeter {
//!     fn greet(&self) -> String {
//!         format!("{} at {}", self.text, self.clock.now())
//!     }
//! }
//!
//! let container = ServiceContainer::new();
//! container.register_singleton::<Arc<dyn Clock>, FixedClock>().unwrap();
//! container.register(ServiceRegistration::instance(String::from("hello")).named("greeting")).unwrap();
//! container.register_type::<Greeter, Greeter>().unwrap();
//!
//! let greeter = container.resolve_shared::<Greeter>().unwrap();
//! assert_eq!(greeter.greet(), "hello at 42");
//! ```

pub use qalib_container::*;
pub use qalib_container::metadata::Component;
pub use qalib_derive::*;
pub use qalib_support::*;

pub use qalib_container::wrappers::{All, Func, FuncWith, Lazy};

/// Everything needed to register, derive and resolve services.
pub mod prelude {
    pub use qalib_container::prelude::*;
    pub use qalib_derive::Component;
}
