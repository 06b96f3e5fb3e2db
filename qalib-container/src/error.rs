//! Error types for Qalib container operations.
//!
//! Every error carries enough context (target type, member, requested
//! service and name, cycle participants) to find the misconfiguration
//! without a debugger.

use std::fmt;

use qalib_support::rendering::render_chain;

use crate::graph::ValidationReport;
use crate::key::ServiceKey;
use crate::types::ServiceType;

/// Main error type for all Qalib operations.
#[derive(Debug, thiserror::Error)]
pub enum QalibError {
    /// The requested service has no registration and no derivable shape.
    #[error("{}", .0)]
    NotRegistered(NotRegisteredError),

    /// A required constructor or property dependency cannot be resolved.
    #[error("{}", .0)]
    UnresolvedDependency(UnresolvedDependencyError),

    /// A service depends on itself, directly or through other services.
    #[error("{}", .0)]
    RecursiveDependency(RecursiveDependencyError),

    /// The implementing type exposes no constructor the container may call.
    #[error("No usable constructor found for {type_name}: {reason}")]
    NoUsableConstructor { type_name: String, reason: String },

    /// No default registration and more than one named registration.
    #[error(
        "Unable to resolve {service_type}: no default registration and several named registrations exist ({})",
        .names.join(", ")
    )]
    AmbiguousService {
        service_type: ServiceType,
        names: Vec<String>,
    },

    /// Scope misuse.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// `end_mocking` without a matching `start_mocking`.
    #[error("Mocking was never started for {key}")]
    MockNotStarted { key: ServiceKey },

    /// A decorator that cannot wrap the service it was registered for.
    #[error("Invalid decorator {decorator} for {service}: {reason}")]
    InvalidDecorator {
        decorator: String,
        service: ServiceType,
        reason: String,
    },

    /// The implementing type cannot be exposed as the service type.
    #[error("{implementing} is not assignable to {service}")]
    NotAssignable {
        implementing: String,
        service: ServiceType,
    },

    /// A type-erased value did not hold the expected Rust type.
    #[error("Type mismatch: expected {expected} ({context})")]
    TypeMismatch {
        expected: &'static str,
        context: String,
    },

    /// An expression asked for a runtime argument that was not supplied.
    #[error("Missing runtime argument #{index}: {available} argument(s) supplied")]
    MissingArgument { index: usize, available: usize },

    /// A factory expression that cannot be turned into a plan.
    #[error("Invalid factory expression: {reason}")]
    InvalidExpression { reason: String },

    /// An emitted instruction sequence that does not form a routine.
    #[error("Invalid creation routine: {reason}")]
    InvalidRoutine { reason: String },

    /// Re-registration while overriding is disabled.
    #[error("{}", .0)]
    AlreadyRegistered(AlreadyRegisteredError),

    /// User construction code failed.
    #[error("Construction failed: {source}")]
    ConstructionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The container behind a deferred wrapper or scope is gone.
    #[error("The container has been disposed")]
    ContainerDisposed,

    /// `validate_on_build` found errors.
    #[error("{}", .0)]
    ValidationFailed(ValidationReport),
}

impl QalibError {
    /// Wraps an error raised by user construction code.
    pub fn construction(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        QalibError::ConstructionFailed {
            source: source.into(),
        }
    }

    /// `true` if the requested service itself could not be resolved.
    ///
    /// This is the only outcome `try_get_instance` turns into `None`.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, QalibError::NotRegistered(_))
    }
}

/// A requested service that has no registration.
#[derive(Debug)]
pub struct NotRegisteredError {
    /// The service that was requested.
    pub requested: ServiceKey,
    /// Registered services with similar names.
    pub suggestions: Vec<String>,
}

impl fmt::Display for NotRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unable to resolve type: {}, service name: {:?}",
            self.requested.service_type(),
            self.requested.service_name().as_str()
        )?;

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        Ok(())
    }
}

/// Whether a dependency is a constructor parameter or a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Parameter,
    Property,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Parameter => write!(f, "Parameter"),
            MemberKind::Property => write!(f, "Property"),
        }
    }
}

/// A required dependency of some implementing type that cannot be resolved.
#[derive(Debug)]
pub struct UnresolvedDependencyError {
    /// Implementing type being constructed.
    pub target: String,
    pub member: MemberKind,
    pub member_name: String,
    /// What the member asked for.
    pub dependency: ServiceKey,
}

impl fmt::Display for UnresolvedDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unresolved dependency [Target Type: {}], [{}: {}({})], [Requested dependency: ServiceType: {}, ServiceName: {:?}]",
            self.target,
            self.member,
            self.member_name,
            self.dependency.service_type().short_name(),
            self.dependency.service_type(),
            self.dependency.service_name().as_str(),
        )
    }
}

/// A dependency cycle found while compiling a creation routine.
#[derive(Debug)]
pub struct RecursiveDependencyError {
    /// Services on the cycle; the first and last entries are the same.
    pub chain: Vec<ServiceKey>,
}

impl RecursiveDependencyError {
    /// The service that closed the cycle.
    pub fn offending(&self) -> Option<&ServiceKey> {
        self.chain.last()
    }
}

impl fmt::Display for RecursiveDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .chain
            .iter()
            .map(|k| {
                if k.service_name().is_default() {
                    k.service_type().short_name()
                } else {
                    format!("{}({:?})", k.service_type().short_name(), k.service_name().as_str())
                }
            })
            .collect();

        write!(f, "Recursive dependency detected: {}", render_chain(&rendered))?;

        if let Some(key) = self.offending() {
            write!(
                f,
                "\n  ServiceType: {}, ServiceName: {:?}",
                key.service_type(),
                key.service_name().as_str()
            )?;
        }

        write!(f, "\n  Hint: inject Lazy<T> or Func<T> to break the cycle")
    }
}

/// Scope misuse.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// Scopes must end inside-out.
    #[error("Attempt to end scope {scope} before its child scope {child} has completed")]
    ChildScopeAlive { scope: u64, child: u64 },

    /// A scoped lifetime was used with no ambient scope.
    #[error("Attempt to create a {lifetime} instance of {service} without a current scope")]
    NoActiveScope {
        service: ServiceKey,
        lifetime: &'static str,
    },

    /// Resolution through a scope that has already ended.
    #[error("Scope {scope} has already completed")]
    Completed { scope: u64 },
}

/// Re-registration of an existing key while overriding is disabled.
#[derive(Debug)]
pub struct AlreadyRegisteredError {
    pub key: ServiceKey,
}

impl fmt::Display for AlreadyRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service already registered: {}", self.key)?;
        write!(
            f,
            "\n  Hint: enable ContainerOptions::allow_override to replace existing registrations"
        )
    }
}

/// Convenient Result type for Qalib operations.
pub type Result<T> = std::result::Result<T, QalibError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_registered_display() {
        let err = QalibError::NotRegistered(NotRegisteredError {
            requested: ServiceKey::named::<String>("dsn"),
            suggestions: vec!["alloc::string::String".into()],
        });

        let msg = err.to_string();
        assert!(msg.contains("Unable to resolve type"));
        assert!(msg.contains("\"dsn\""));
        assert!(msg.contains("Did you mean"));
        assert!(err.is_unresolved());
    }

    #[test]
    fn missing_dependency_is_not_unresolved() {
        let err = QalibError::UnresolvedDependency(UnresolvedDependencyError {
            target: "app::Mailer".into(),
            member: MemberKind::Property,
            member_name: "audit".into(),
            dependency: ServiceKey::of::<u8>(),
        });
        assert!(!err.is_unresolved());
    }

    #[test]
    fn unresolved_dependency_names_member() {
        let err = QalibError::UnresolvedDependency(UnresolvedDependencyError {
            target: "app::ReportService".into(),
            member: MemberKind::Parameter,
            member_name: "clock".into(),
            dependency: ServiceKey::of::<u64>(),
        });

        let msg = err.to_string();
        assert!(msg.contains("Target Type: app::ReportService"));
        assert!(msg.contains("Parameter: clock(u64)"));
        assert!(!err.is_unresolved());
    }

    #[test]
    fn recursive_dependency_display() {
        let err = QalibError::RecursiveDependency(RecursiveDependencyError {
            chain: vec![
                ServiceKey::of::<String>(),
                ServiceKey::named::<u32>("port"),
                ServiceKey::of::<String>(),
            ],
        });

        let msg = err.to_string();
        assert!(msg.contains("Recursive dependency"));
        assert!(msg.contains("String → u32(\"port\") → String"));
        assert!(msg.contains("ServiceType: alloc::string::String"));
    }

    #[test]
    fn scope_error_display() {
        let err = QalibError::from(ScopeError::ChildScopeAlive { scope: 1, child: 2 });
        assert!(err.to_string().contains("child scope 2"));
    }

    #[test]
    fn ambiguous_lists_names() {
        let err = QalibError::AmbiguousService {
            service_type: ServiceType::of::<u8>(),
            names: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("(a, b)"));
    }
}
