//! Container configuration.

use serde::{Deserialize, Serialize};

/// Which context a scope belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeAffinity {
    /// One scope stack per thread.
    #[default]
    Thread,
    /// One scope stack per logical call chain, following `.await` points.
    /// Requires the `async` feature; falls back to [`ScopeAffinity::Thread`] without it.
    CallContext,
}

/// Behavioural switches of a container.
///
/// Every field has a default, so partial configuration is accepted:
///
/// ```
/// use qalib_container::options::ContainerOptions;
///
/// let options: ContainerOptions = serde_json::from_str(r#"{ "allow_override": false }"#).unwrap();
/// assert!(!options.allow_override);
/// assert!(options.enable_property_injection);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Inject settable properties after construction.
    pub enable_property_injection: bool,
    /// Resolve a default request through the only named registration.
    pub enable_single_named_fallback: bool,
    /// Close open generic registrations for unregistered closed requests.
    pub enable_open_generic_fallback: bool,
    /// Let a registration replace an existing one with the same key.
    pub allow_override: bool,
    pub scope_affinity: ScopeAffinity,
    /// Fail `build()` when validation finds errors.
    pub validate_on_build: bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            enable_property_injection: true,
            enable_single_named_fallback: true,
            enable_open_generic_fallback: true,
            allow_override: true,
            scope_affinity: ScopeAffinity::Thread,
            validate_on_build: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let json = serde_json::to_string(&ContainerOptions::default()).unwrap();
        assert!(json.contains("\"scope_affinity\":\"thread\""));
        let back: ContainerOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ContainerOptions::default());
    }

    #[test]
    fn affinity_parses_snake_case() {
        let options: ContainerOptions =
            serde_json::from_str(r#"{ "scope_affinity": "call_context", "validate_on_build": true }"#).unwrap();
        assert_eq!(options.scope_affinity, ScopeAffinity::CallContext);
        assert!(options.validate_on_build);
        assert!(options.allow_override);
    }
}
