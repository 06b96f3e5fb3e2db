//! Dependency graph validation.
//!
//! Checks every registration without creating anything:
//! - every required dependency can be resolved
//! - no service depends on itself
//! - no service depends on something that lives shorter than it does
//!   and belongs to a scope (a captive dependency)
//!
//! The first two come from compiling each registration's creation
//! routine; captive dependencies are found by a DFS over the
//! construction plans.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use qalib_support::rendering::{ChainEntry, render_chain, render_chain_vertical};
use tracing::{debug, instrument, warn};

use crate::compiler::Compiler;
use crate::container::ContainerInner;
use crate::error::{MemberKind, QalibError};
use crate::key::ServiceKey;
use crate::lifetime::LifetimeKind;
use crate::registration::{Registration, ServiceRegistration};

/// One problem found by validation.
#[derive(Debug, Clone)]
pub enum ValidationIssue {
    /// A required dependency of `service` has no registration.
    MissingDependency {
        service: ServiceKey,
        target: String,
        member: MemberKind,
        member_name: String,
        dependency: ServiceKey,
    },
    /// Services on a cycle; the first and last entries are the same.
    RecursiveDependency { chain: Vec<ServiceKey> },
    /// A longer-lived service holds on to a scope-bound one. The chain runs
    /// from the consumer to the captured service.
    CaptiveDependency { chain: Vec<(ServiceKey, LifetimeKind)> },
    /// Any other reason the registration cannot be compiled.
    InvalidRegistration { service: ServiceKey, reason: String },
}

fn short(key: &ServiceKey) -> String {
    if key.service_name().is_default() {
        key.service_type().short_name()
    } else {
        format!("{}({:?})", key.service_type().short_name(), key.service_name().as_str())
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingDependency {
                service,
                target,
                member,
                member_name,
                dependency,
            } => write!(
                f,
                "Missing dependency of {}: {target} {member} {member_name} requires {}",
                short(service),
                short(dependency)
            ),
            ValidationIssue::RecursiveDependency { chain } => {
                let names: Vec<String> = chain.iter().map(short).collect();
                write!(f, "Recursive dependency: {}", render_chain(&names))
            }
            ValidationIssue::CaptiveDependency { chain } => {
                let entries: Vec<ChainEntry> = chain
                    .iter()
                    .map(|(key, kind)| ChainEntry {
                        type_name: key.service_type().short_name(),
                        lifetime: kind.to_string(),
                        service_name: (!key.service_name().is_default())
                            .then(|| key.service_name().to_string()),
                    })
                    .collect();
                write!(f, "Captive dependency:\n{}", render_chain_vertical(&entries).trim_end())
            }
            ValidationIssue::InvalidRegistration { service, reason } => {
                write!(f, "Invalid registration {}: {reason}", short(service))
            }
        }
    }
}

/// Everything validation found.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "Container validation passed");
        }
        write!(f, "Container validation found {} issue(s):", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, issue.to_string().replace('\n', "\n     "))?;
        }
        Ok(())
    }
}

#[instrument(skip_all, name = "graph_validation")]
pub(crate) fn validate(container: &Arc<ContainerInner>) -> ValidationReport {
    let registrations: Vec<ServiceRegistration> = container
        .registry()
        .all()
        .into_iter()
        .filter(|r| !r.service_type().is_open())
        .collect();

    debug!(registrations = registrations.len(), "Starting container validation");

    let mut report = ValidationReport::default();
    let mut cycles: HashSet<Vec<String>> = HashSet::new();

    for registration in &registrations {
        let key = registration.key();
        let Err(error) = Compiler::new(container).compile(&key) else {
            continue;
        };

        let issue = match error {
            QalibError::UnresolvedDependency(e) => ValidationIssue::MissingDependency {
                service: key,
                target: e.target,
                member: e.member,
                member_name: e.member_name,
                dependency: e.dependency,
            },
            QalibError::RecursiveDependency(e) => {
                let mut members: Vec<String> = e.chain.iter().map(ToString::to_string).collect();
                members.sort();
                members.dedup();
                if !cycles.insert(members) {
                    continue;
                }
                ValidationIssue::RecursiveDependency { chain: e.chain }
            }
            other => ValidationIssue::InvalidRegistration {
                service: key,
                reason: other.to_string(),
            },
        };
        report.push(issue);
    }

    let mut captives = CaptiveSearch {
        container,
        visited: HashSet::new(),
        path: Vec::new(),
        found: Vec::new(),
    };
    for registration in &registrations {
        captives.visit(registration);
    }
    for chain in captives.found {
        warn!(consumer = %chain[0].0, captured = %chain[chain.len() - 1].0, "Captive dependency detected");
        report.push(ValidationIssue::CaptiveDependency { chain });
    }

    debug!(issues = report.issues.len(), "Container validation finished");
    report
}

/// DFS over construction plans tracking the longest-lived consumer on the
/// current path.
struct CaptiveSearch<'a> {
    container: &'a Arc<ContainerInner>,
    /// (service, longest-lived consumer kind) pairs already explored.
    visited: HashSet<(ServiceKey, LifetimeKind)>,
    path: Vec<(ServiceKey, LifetimeKind)>,
    found: Vec<Vec<(ServiceKey, LifetimeKind)>>,
}

impl CaptiveSearch<'_> {
    fn visit(&mut self, registration: &ServiceRegistration) {
        let key = registration.key();
        let kind = registration.lifetime_kind();

        if self.path.iter().any(|(k, _)| *k == key) {
            return;
        }

        if kind.is_scope_bound()
            && let Some(position) = self.longest_lived_above(kind)
        {
            let mut chain = self.path[position..].to_vec();
            chain.push((key, kind));
            self.found.push(chain);
            return;
        }

        let ceiling = self.path.iter().map(|(_, k)| *k).max().unwrap_or(kind).max(kind);
        if !self.visited.insert((key.clone(), ceiling)) {
            return;
        }

        let Ok(plan) = self.container.plans().get(registration) else {
            return;
        };

        self.path.push((key, kind));
        for dependency in plan.dependencies() {
            if dependency.factory_expression.is_some() {
                continue;
            }
            // Wrappers defer creation, so they capture nothing.
            let service_type = &dependency.service_type;
            if service_type.lazy_target().is_some()
                || service_type.func_signature().is_some()
                || service_type.enumerable_element().is_some()
            {
                continue;
            }
            let dependency_key = ServiceKey::new(service_type.clone(), dependency.service_name.clone());
            if let Some(target) = self.registration_for(&dependency_key) {
                self.visit(&target);
            }
        }
        self.path.pop();
    }

    /// Position of the first consumer on the path outliving `kind`.
    fn longest_lived_above(&self, kind: LifetimeKind) -> Option<usize> {
        let (position, (_, longest)) = self
            .path
            .iter()
            .enumerate()
            .max_by(|(i, (_, a)), (j, (_, b))| a.cmp(b).then(j.cmp(i)))?;
        (*longest > kind).then_some(position)
    }

    fn registration_for(&self, key: &ServiceKey) -> Option<ServiceRegistration> {
        let registry = self.container.registry();
        if let Some(registration) = registry.get(key) {
            return Some(registration);
        }
        if !key.service_name().is_default() {
            return None;
        }
        match registry.registrations_of(key.service_type()).as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ServiceContainer;
    use crate::lifetime::{PerContainerLifetime, PerScopeLifetime};
    use crate::metadata::TypeInfo;
    use crate::wrappers::Lazy;

    #[derive(Clone)]
    struct Database;
    #[derive(Clone)]
    struct UnitOfWork;
    #[derive(Clone)]
    struct Repository;
    #[derive(Clone)]
    struct ReportCache;

    fn database() -> TypeInfo {
        TypeInfo::builder::<Database>().constructor(|p| p, |_| Ok(Database)).build()
    }

    fn unit_of_work() -> TypeInfo {
        TypeInfo::builder::<UnitOfWork>()
            .constructor(|p| p.param::<Database>("db"), |_| Ok(UnitOfWork))
            .build()
    }

    fn repository() -> TypeInfo {
        TypeInfo::builder::<Repository>()
            .constructor(|p| p.param::<UnitOfWork>("uow"), |_| Ok(Repository))
            .build()
    }

    fn register(container: &ServiceContainer, registration: ServiceRegistration) {
        container.register(registration).unwrap();
    }

    fn of<T: 'static>(info: TypeInfo) -> ServiceRegistration {
        ServiceRegistration::implemented_by(crate::types::ServiceType::of::<T>(), info)
    }

    #[test]
    fn valid_graph_passes() {
        let container = ServiceContainer::new();
        register(&container, of::<Database>(database()).with_lifetime(PerContainerLifetime::new()));
        register(&container, of::<UnitOfWork>(unit_of_work()).with_lifetime(PerScopeLifetime::new()));
        register(&container, of::<Repository>(repository()));

        let report = container.validate();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.to_string(), "Container validation passed");
    }

    #[test]
    fn missing_dependency_is_reported() {
        let container = ServiceContainer::new();
        register(&container, of::<UnitOfWork>(unit_of_work()));

        let report = container.validate();
        assert_eq!(report.issues().len(), 1);
        match &report.issues()[0] {
            ValidationIssue::MissingDependency {
                member_name, dependency, ..
            } => {
                assert_eq!(member_name, "db");
                assert_eq!(*dependency, ServiceKey::of::<Database>());
            }
            other => panic!("expected a missing dependency, got {other:?}"),
        }
    }

    #[test]
    fn cycle_is_reported_once() {
        #[derive(Clone)]
        struct A;
        #[derive(Clone)]
        struct B;

        let container = ServiceContainer::new();
        register(
            &container,
            of::<A>(TypeInfo::builder::<A>().constructor(|p| p.param::<B>("b"), |_| Ok(A)).build()),
        );
        register(
            &container,
            of::<B>(TypeInfo::builder::<B>().constructor(|p| p.param::<A>("a"), |_| Ok(B)).build()),
        );

        let report = container.validate();
        let cycles: Vec<_> = report
            .issues()
            .iter()
            .filter(|i| matches!(i, ValidationIssue::RecursiveDependency { .. }))
            .collect();
        assert_eq!(cycles.len(), 1);
        assert!(report.to_string().contains("Recursive dependency"));
    }

    #[test]
    fn captive_dependency_through_transient() {
        let container = ServiceContainer::new();
        register(&container, of::<Database>(database()));
        register(&container, of::<UnitOfWork>(unit_of_work()).with_lifetime(PerScopeLifetime::new()));
        register(&container, of::<Repository>(repository()));
        register(
            &container,
            of::<ReportCache>(
                TypeInfo::builder::<ReportCache>()
                    .constructor(|p| p.param::<Repository>("repo"), |_| Ok(ReportCache))
                    .build(),
            )
            .with_lifetime(PerContainerLifetime::new()),
        );

        let report = container.validate();
        let chain = report
            .issues()
            .iter()
            .find_map(|i| match i {
                ValidationIssue::CaptiveDependency { chain } => Some(chain.clone()),
                _ => None,
            })
            .expect("captive dependency");

        assert_eq!(chain.first().unwrap().1, LifetimeKind::PerContainer);
        assert_eq!(chain.last().unwrap().0, ServiceKey::of::<UnitOfWork>());
        assert!(report.to_string().contains("[PerScope    ] UnitOfWork"));
    }

    #[test]
    fn lazy_dependency_is_not_captive() {
        let container = ServiceContainer::new();
        register(&container, of::<Database>(database()));
        register(&container, of::<UnitOfWork>(unit_of_work()).with_lifetime(PerScopeLifetime::new()));
        register(
            &container,
            of::<ReportCache>(
                TypeInfo::builder::<ReportCache>()
                    .constructor(|p| p.lazy_param::<UnitOfWork>("uow"), |mut a| {
                        let _uow: Lazy<UnitOfWork> = a.take_lazy(0)?;
                        Ok(ReportCache)
                    })
                    .build(),
            )
            .with_lifetime(PerContainerLifetime::new()),
        );

        assert!(container.validate().is_valid());
    }
}
