//! # Qalib Support
//!
//! Shared helpers for the Qalib DI crates.
//!
//! This crate provides:
//! - Rendering of dependency chains and validation paths for diagnostics
//! - Type-name shortening and "did you mean?" suggestions

pub mod rendering;
