//! Service identification keys.
//!
//! A [`ServiceKey`] pairs a [`ServiceType`] with a [`ServiceName`].
//! The empty name is the default (unnamed) registration. Names compare
//! case-insensitively, so `"Primary"` and `"primary"` address the same
//! registration.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::types::ServiceType;

/// Case-insensitive service name. Empty means "default".
///
/// # Examples
/// ```
/// use qalib_container::key::ServiceName;
///
/// assert_eq!(ServiceName::from("Primary"), ServiceName::from("PRIMARY"));
/// assert!(ServiceName::default().is_default());
/// assert_eq!(ServiceName::from("Primary").as_str(), "Primary");
/// ```
#[derive(Clone)]
pub struct ServiceName {
    display: Arc<str>,
    folded: Arc<str>,
}

impl ServiceName {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self {
            display: Arc::from(name),
            folded: Arc::from(name.to_lowercase()),
        }
    }

    /// The name as it was registered.
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// `true` for the empty (default) name.
    pub fn is_default(&self) -> bool {
        self.display.is_empty()
    }
}

impl Default for ServiceName {
    fn default() -> Self {
        Self::new("")
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&String> for ServiceName {
    fn from(name: &String) -> Self {
        Self::new(name)
    }
}

impl PartialEq for ServiceName {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for ServiceName {}

impl Hash for ServiceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.display)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Uniquely identifies a registration: service type plus name.
///
/// # Examples
/// ```
/// use qalib_container::key::ServiceKey;
///
/// let default = ServiceKey::of::<String>();
/// let named = ServiceKey::named::<String>("connection");
/// assert_ne!(default, named);
/// assert!(default.service_name().is_default());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    service_type: ServiceType,
    service_name: ServiceName,
}

impl ServiceKey {
    pub fn new(service_type: ServiceType, service_name: impl Into<ServiceName>) -> Self {
        Self {
            service_type,
            service_name: service_name.into(),
        }
    }

    /// Default key for the Rust type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceType::of::<T>(), ServiceName::default())
    }

    /// Named key for the Rust type `T`.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: &str) -> Self {
        Self::new(ServiceType::of::<T>(), name)
    }

    #[inline]
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    #[inline]
    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    /// Same service type, different name.
    pub fn with_name(&self, name: impl Into<ServiceName>) -> Self {
        Self::new(self.service_type.clone(), name)
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.service_name.is_default() {
            write!(f, "ServiceKey({})", self.service_type)
        } else {
            write!(f, "ServiceKey({}, name={:?})", self.service_type, self.service_name)
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.service_name.is_default() {
            write!(f, "{}", self.service_type)
        } else {
            write!(f, "{} (name={:?})", self.service_type, self.service_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Mailer;

    #[test]
    fn key_of_type() {
        let key = ServiceKey::of::<Mailer>();
        assert!(key.service_type().name().contains("Mailer"));
        assert!(key.service_name().is_default());
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(
            ServiceKey::named::<Mailer>("Smtp"),
            ServiceKey::named::<Mailer>("smtp")
        );
    }

    #[test]
    fn named_vs_default_differ() {
        assert_ne!(ServiceKey::named::<Mailer>("smtp"), ServiceKey::of::<Mailer>());
    }

    #[test]
    fn case_folded_keys_share_hash_slot() {
        let mut map = HashMap::new();
        map.insert(ServiceKey::named::<Mailer>("SMTP"), 1);
        assert_eq!(map.get(&ServiceKey::named::<Mailer>("smtp")), Some(&1));
    }

    #[test]
    fn display_keeps_original_case() {
        let key = ServiceKey::named::<u8>("Primary");
        assert_eq!(key.to_string(), "u8 (name=\"Primary\")");
    }

    #[test]
    fn unsized_type_key() {
        trait Notifier {}
        let _key = ServiceKey::of::<dyn Notifier>();
    }
}
