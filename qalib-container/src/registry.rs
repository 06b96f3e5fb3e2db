//! Registry: every registration, decorator and factory rule of a container.
//!
//! Registrations are grouped by service type. Within a type they keep
//! registration order; replacing a registration keeps its position, so
//! enumerations stay stable across overrides.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use qalib_support::rendering::suggest_similar;

use crate::error::{AlreadyRegisteredError, QalibError, Result};
use crate::key::ServiceKey;
use crate::registration::{DecoratorRegistration, FactoryRule, Registration, ServiceRegistration};
use crate::types::ServiceType;

/// What a registration call did with a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    Replaced,
    /// The existing registration is read-only and was kept.
    Ignored,
}

/// Thread-safe store of registrations.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    services: DashMap<ServiceType, Vec<ServiceRegistration>>,
    decorators: RwLock<Vec<DecoratorRegistration>>,
    rules: RwLock<Vec<FactoryRule>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the registration for its key.
    ///
    /// # Errors
    /// Returns [`QalibError::AlreadyRegistered`] if the key is
    /// already registered and `allow_override` is false.
    pub fn register(&self, registration: ServiceRegistration, allow_override: bool) -> Result<RegisterOutcome> {
        registration.check_assignable()?;
        let key = registration.key();
        let mut entries = self.services.entry(key.service_type().clone()).or_default();

        let Some(position) = entries.iter().position(|r| r.service_name() == key.service_name()) else {
            debug!(key = %key, lifetime = %registration.lifetime_kind(), "Registered service");
            entries.push(registration);
            return Ok(RegisterOutcome::Added);
        };

        let existing = &mut entries[position];
        if existing.is_read_only() {
            warn!(key = %key, "Ignoring registration: existing registration is read-only");
            return Ok(RegisterOutcome::Ignored);
        }
        if !allow_override {
            return Err(QalibError::AlreadyRegistered(AlreadyRegisteredError { key }));
        }

        debug!(key = %key, lifetime = %registration.lifetime_kind(), "Replaced service registration");
        *existing = registration;
        Ok(RegisterOutcome::Replaced)
    }

    /// Replaces or adds a registration unconditionally, returning the previous one.
    pub fn replace(&self, registration: ServiceRegistration) -> Option<ServiceRegistration> {
        let key = registration.key();
        let mut entries = self.services.entry(key.service_type().clone()).or_default();
        match entries.iter().position(|r| r.service_name() == key.service_name()) {
            Some(position) => Some(std::mem::replace(&mut entries[position], registration)),
            None => {
                entries.push(registration);
                None
            }
        }
    }

    /// Returns the registration for `registration`'s key, inserting it first if absent.
    ///
    /// Used for registrations the container derives on demand, so
    /// concurrent derivations agree on one registration.
    pub fn get_or_insert(&self, registration: ServiceRegistration) -> ServiceRegistration {
        let key = registration.key();
        let mut entries = self.services.entry(key.service_type().clone()).or_default();
        if let Some(position) = entries.iter().position(|r| r.service_name() == key.service_name()) {
            return entries[position].clone();
        }
        trace!(key = %key, "Derived registration");
        entries.push(registration.clone());
        registration
    }

    pub fn remove(&self, key: &ServiceKey) -> Option<ServiceRegistration> {
        let Entry::Occupied(mut entry) = self.services.entry(key.service_type().clone()) else {
            return None;
        };
        let position = entry.get().iter().position(|r| r.service_name() == key.service_name())?;
        let removed = entry.get_mut().remove(position);
        if entry.get().is_empty() {
            entry.remove();
        }
        Some(removed)
    }

    pub fn get(&self, key: &ServiceKey) -> Option<ServiceRegistration> {
        self.services
            .get(key.service_type())?
            .iter()
            .find(|r| r.service_name() == key.service_name())
            .cloned()
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.get(key).is_some()
    }

    /// Every registration of `service_type`, in registration order.
    pub fn registrations_of(&self, service_type: &ServiceType) -> Vec<ServiceRegistration> {
        self.services
            .get(service_type)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Every registration, oldest first.
    pub fn all(&self) -> Vec<ServiceRegistration> {
        let mut all: Vec<_> = self
            .services
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(Registration::id);
        all
    }

    pub fn keys(&self) -> Vec<ServiceKey> {
        self.all().iter().map(ServiceRegistration::key).collect()
    }

    pub fn len(&self) -> usize {
        self.services.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered service type names close to the one `key` asks for.
    pub fn suggestions(&self, key: &ServiceKey) -> Vec<String> {
        let names: Vec<String> = self.keys().iter().map(ToString::to_string).collect();
        let available: Vec<&str> = names.iter().map(String::as_str).collect();
        suggest_similar(&key.service_type().name(), &available, 3)
    }

    // ============================================================
    // Decorators and rules
    // ============================================================

    /// Appends a decorator; later decorators wrap earlier ones.
    pub fn add_decorator(&self, decorator: DecoratorRegistration) -> DecoratorRegistration {
        let mut decorators = self.decorators.write();
        let decorator = decorator.with_index(decorators.len());
        debug!(decorator = ?decorator, "Registered decorator");
        decorators.push(decorator.clone());
        decorator
    }

    /// Decorators registered for `target` exactly or for its generic
    /// definition, in application order.
    pub fn decorators_for(&self, target: &ServiceType) -> Vec<DecoratorRegistration> {
        self.decorators
            .read()
            .iter()
            .filter(|d| d.targets(target))
            .cloned()
            .collect()
    }

    pub fn decorator_count(&self) -> usize {
        self.decorators.read().len()
    }

    pub fn add_rule(&self, rule: FactoryRule) {
        debug!(rule = ?rule, "Registered factory rule");
        self.rules.write().push(rule);
    }

    /// The first rule that can produce `key`.
    pub fn rule_for(&self, key: &ServiceKey) -> Option<FactoryRule> {
        self.rules
            .read()
            .iter()
            .find(|rule| rule.matches(key.service_type(), key.service_name()))
            .cloned()
    }
}
