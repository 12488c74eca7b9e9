use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrellisError>;

/// Error raised by a handler, middleware or guard while serving a request.
pub type HandlerError = anyhow::Error;

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Startup and configuration failures.
///
/// Everything in here is raised while routes are compiled or providers are
/// resolved. None of it is produced while a request is being served; request
/// time failures go through [`crate::exception`] instead.
#[derive(Debug, Error)]
pub enum TrellisError {
    #[error("Invalid route path '{path}': segment '{segment}' {reason}")]
    InvalidPath {
        path: String,
        segment: String,
        reason: String,
    },

    #[error("Route conflict on {method} {path}: '{existing}' is already bound, cannot bind '{incoming}'")]
    RouteConflict {
        method: String,
        path: String,
        existing: String,
        incoming: String,
    },

    #[error(
        "Dependency not found: '{dependency}' at index [{index}] of '{requester}' in module '{module}'"
    )]
    DependencyNotFound {
        dependency: String,
        index: usize,
        requester: String,
        module: String,
    },

    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("Unable to resolve {} provider(s): {}", providers.len(), UnresolvedList(providers))]
    UnresolvedDependencies { providers: Vec<UnresolvedProvider> },

    #[error("Invalid provider '{token}': {reason}")]
    InvalidProvider { token: String, reason: String },

    #[error("Failed to downcast type: {type_name}")]
    DowncastFailed { type_name: String },

    #[error("Module registration failed: {message}")]
    ModuleRegistrationFailed { message: String },

    #[error("Controller '{controller}' could not be instantiated: {reason}")]
    ControllerResolution { controller: String, reason: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One entry of a [`TrellisError::UnresolvedDependencies`] report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedProvider {
    pub module: String,
    pub provider: String,
    pub missing: Vec<String>,
}

impl fmt::Display for UnresolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.missing.is_empty() {
            write!(f, "{}::{} (pending factory)", self.module, self.provider)
        } else {
            write!(
                f,
                "{}::{} (waiting on {})",
                self.module,
                self.provider,
                self.missing.join(", ")
            )
        }
    }
}

struct UnresolvedList<'a>(&'a [UnresolvedProvider]);

impl fmt::Display for UnresolvedList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, provider) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{provider}")?;
        }
        Ok(())
    }
}

impl TrellisError {
    pub(crate) fn invalid_path(
        path: impl Into<String>,
        segment: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidPath {
            path: path.into(),
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_provider(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProvider {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised because the dependency graph could not be satisfied.
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Self::DependencyNotFound { .. }
                | Self::CircularDependency { .. }
                | Self::UnresolvedDependencies { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_report_lists_every_provider() {
        let err = TrellisError::UnresolvedDependencies {
            providers: vec![
                UnresolvedProvider {
                    module: "UserModule".into(),
                    provider: "UserService".into(),
                    missing: vec!["Database".into()],
                },
                UnresolvedProvider {
                    module: "CacheModule".into(),
                    provider: "REDIS".into(),
                    missing: vec![],
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("Unable to resolve 2 provider(s)"));
        assert!(message.contains("UserModule::UserService (waiting on Database)"));
        assert!(message.contains("CacheModule::REDIS (pending factory)"));
        assert!(err.is_dependency_error());
    }

    #[test]
    fn test_dependency_not_found_names_index_and_requester() {
        let err = TrellisError::DependencyNotFound {
            dependency: "Mailer".into(),
            index: 1,
            requester: "SignupService".into(),
            module: "AuthModule".into(),
        };
        assert_eq!(
            err.to_string(),
            "Dependency not found: 'Mailer' at index [1] of 'SignupService' in module 'AuthModule'"
        );
    }
}
