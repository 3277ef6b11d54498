//! # DCC Naming
//!
//! Instance naming for the dynamic component container.
//!
//! ## Overview
//!
//! Every component instance carries a name that is unique across all
//! Type Containers sharing one [`NameRegistry`]. Names are produced by a
//! chain of [`NameGenerator`]s:
//!
//! - [`SequenceNameGenerator`]: synthesizes `"{type}-{n}"`
//! - [`UserProvidedNameGenerator`]: returns the requested name unchanged
//! - [`SwitchNameGenerator`]: routes between the two
//! - [`UniquenessNameGenerator`]: checks and reserves in one atomic step
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dcc_naming::{NameGenerator, NameRegistry, UniquenessNameGenerator};
//!
//! let names = Arc::new(NameRegistry::new());
//! let generator = UniquenessNameGenerator::for_type("hello", Arc::clone(&names));
//!
//! assert_eq!(generator.generate(None, None).unwrap(), "hello-0");
//! assert_eq!(generator.generate(Some("greeter"), None).unwrap(), "greeter");
//! assert!(generator.generate(Some("greeter"), None).is_err());
//! assert_eq!(generator.generate(Some("greeter"), Some("1.2")).unwrap(), "greeter-1.2");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod generator;
mod registry;

pub use generator::{
    NameGenerator, SequenceNameGenerator, SwitchNameGenerator, UniquenessNameGenerator,
    UserProvidedNameGenerator,
};
pub use registry::NameRegistry;

/// Errors raised while producing an instance name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    /// The name (and its versioned fallback, if any) is already reserved
    #[error("{factory}: name already used: {name}")]
    NameAlreadyUsed {
        /// Type Container that asked for the name
        factory: String,
        /// Last candidate that was rejected
        name: String,
    },

    /// The generator only forwards names and none was supplied
    #[error("{factory}: no instance name supplied")]
    MissingName {
        /// Type Container that asked for the name
        factory: String,
    },
}

impl NamingError {
    /// A conflict may succeed later once the other holder releases the name
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NameAlreadyUsed { .. })
    }
}

/// Result type for naming operations
pub type Result<T> = std::result::Result<T, NamingError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
