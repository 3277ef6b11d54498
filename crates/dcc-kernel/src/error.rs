//! Error types for the component container
//!
//! - [`ContainerError`]: raised by Type and Instance Containers
//! - [`HandlerError`]: raised by handler callbacks
//! - [`StateMachineError`]: illegal lifecycle moves

use crate::types::InstanceState;
use dcc_naming::NamingError;

/// Main container error type
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Type definition is malformed (missing class name, bad metadata)
    #[error("type definition error: {0}")]
    TypeDefinition(String),

    /// Instance configuration rejected by the type's property rules
    #[error("unacceptable configuration: {0}")]
    UnacceptableConfiguration(String),

    /// Type Container is not VALID; lists the unbound requirements
    #[error("missing handlers: {}", .0.join(", "))]
    MissingHandler(Vec<String>),

    /// Instance could not be configured, started or constructed
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Name generation failed
    #[error("naming error: {0}")]
    Naming(#[from] NamingError),

    /// Type description could not be computed; the Type Container was stopped
    #[error("type description failed for {factory}: {reason}")]
    TypeDescription {
        /// Type Container name
        factory: String,
        /// Underlying failure
        reason: String,
    },

    /// Constructor parameter registration is inconsistent
    #[error("constructor parameter error: {0}")]
    ConstructorParameter(String),

    /// Operation on a disposed Type Container
    #[error("factory disposed: {0}")]
    Disposed(String),
}

impl ContainerError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an unacceptable-configuration error
    pub fn unacceptable(msg: impl Into<String>) -> Self {
        Self::UnacceptableConfiguration(msg.into())
    }

    /// Retrying may succeed without changing the request
    /// (a provider may appear, a name may be released)
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MissingHandler(_) => true,
            Self::Naming(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The request itself is at fault
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnacceptableConfiguration(_) | Self::TypeDefinition(_) | Self::Naming(_)
        )
    }
}

/// Errors raised by handler callbacks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Handler refuses the current lifecycle move; the instance is force-stopped
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Handler configuration failed
    #[error("handler configuration failed: {0}")]
    Configuration(String),

    /// Provider could not create a handler
    #[error("handler creation failed: {0}")]
    Creation(String),
}

impl HandlerError {
    /// Create an illegal-state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Lifecycle state machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// The move is not in the lifecycle matrix
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: InstanceState,
        /// Requested state
        to: InstanceState,
    },
}

/// Result type for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Boxed error returned by implementation objects
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
