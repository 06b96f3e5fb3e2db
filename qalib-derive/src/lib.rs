//! Derive macros for Qalib DI.

pub use qalib_macros::Component;
