//! Core container implementation for Qalib DI.
//!
//! Services are described by [`TypeInfo`](metadata::TypeInfo) metadata,
//! planned into construction plans, compiled into creation routines and
//! run under their registration's lifetime.

mod compiler;
pub mod composition;
pub mod container;
pub mod dispose;
pub mod emit;
pub mod error;
pub mod expression;
pub mod factory;
pub mod graph;
pub mod key;
pub mod lifetime;
pub mod metadata;
pub mod mocking;
pub mod options;
pub mod plan;
pub mod registration;
pub mod registry;
pub mod scope;
pub mod selector;
pub mod types;
pub mod wrappers;

pub use container::{ContainerBuilder, ServiceContainer, prelude};
pub use error::{QalibError, Result};
pub use key::{ServiceKey, ServiceName};
pub use scope::Scope;
pub use types::ServiceType;

#[doc(hidden)]
pub use inventory;
