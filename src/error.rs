//! Error types for the service container.

use crate::name::ServiceName;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while building, installing, or driving services.
#[derive(Error, Debug, Clone)]
pub enum ContainerError {
    /// A declared dependency is neither in the registry nor in the batch
    /// being installed.
    #[error("missing dependency: {dependency} (required by {dependent})")]
    MissingDependency {
        dependent: ServiceName,
        dependency: ServiceName,
    },

    /// The installer's walker reached an entry already on the active path.
    #[error("circular dependency detected involving {0}")]
    CircularDependency(ServiceName),

    /// A name already exists in the registry when installing a batch entry.
    #[error("service already registered: {0}")]
    DuplicateService(ServiceName),

    /// `getRequired` on an absent name.
    #[error("service not found: {0}")]
    ServiceNotFound(ServiceName),

    /// `Value::get()` invoked before the value was populated (or after it
    /// was uninjected).
    #[error("value not available: {0}")]
    InvalidValue(&'static str),

    /// An injector rejected a value.
    #[error("injection into {destination} failed: {reason}")]
    InjectionException {
        destination: ServiceName,
        reason: String,
    },

    /// A value translation failed.
    #[error("value translation failed: {0}")]
    TranslationException(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// Lifecycle context misuse: double completion, `failed` before
    /// `asynchronous`, or mutation after completion.
    #[error("illegal lifecycle context state: {0}")]
    IllegalState(&'static str),

    /// Carried in a failed start transition; surfaces to listeners and is
    /// retained on the controller in `START_FAILED`.
    #[error("service {service} failed to start: {reason}")]
    StartException {
        service: ServiceName,
        reason: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// Resolution failed for a reason not covered by a more specific variant
    /// (e.g. a type mismatch between an injection source and destination).
    #[error("resolution error: {0}")]
    ResolutionError(String),
}

impl ContainerError {
    /// Build a [`ContainerError::StartException`] from any boxed error.
    pub fn start_failed(
        service: ServiceName,
        reason: impl Into<Arc<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::StartException {
            service,
            reason: reason.into(),
        }
    }

    /// Build a [`ContainerError::TranslationException`] from any boxed error.
    pub fn translation_failed(reason: impl Into<Arc<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::TranslationException(reason.into())
    }
}

/// A plain string error, used where callers fail a start/stop with a reason
/// that isn't already a `std::error::Error`.
#[derive(Debug, Clone)]
pub struct Reason(pub String);

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Reason {}

impl From<&str> for Reason {
    fn from(value: &str) -> Self {
        Reason(value.to_string())
    }
}

impl From<String> for Reason {
    fn from(value: String) -> Self {
        Reason(value)
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_name_the_service() {
        let err = ContainerError::ServiceNotFound(ServiceName::parse("app.db"));
        assert!(err.to_string().contains("app.db"));
    }

    #[test]
    fn start_exception_wraps_reason() {
        let err = ContainerError::start_failed(
            ServiceName::parse("app.db"),
            Arc::new(Reason::from("connection refused")) as Arc<dyn std::error::Error + Send + Sync>,
        );
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn clone_preserves_variant() {
        let err = ContainerError::CircularDependency(ServiceName::parse("a.b"));
        let cloned = err.clone();
        assert!(matches!(cloned, ContainerError::CircularDependency(_)));
    }
}
