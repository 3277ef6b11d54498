//! Name generator chain

use crate::{NameRegistry, NamingError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Produces an instance name from an optional requested name and version
pub trait NameGenerator: Send + Sync {
    /// Produce a name. `requested` is the user-supplied name, `version`
    /// qualifies it when the bare name is already taken.
    ///
    /// # Errors
    ///
    /// Returns a [`NamingError`] when no acceptable name can be produced.
    fn generate(&self, requested: Option<&str>, version: Option<&str>) -> Result<String>;
}

/// Synthesizes `"{type}-{n}"` from a per-type monotonic counter
#[derive(Debug)]
pub struct SequenceNameGenerator {
    type_name: String,
    next: AtomicU64,
}

impl SequenceNameGenerator {
    /// Create a generator counting from zero
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            next: AtomicU64::new(0),
        }
    }

    /// Number of names synthesized so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl NameGenerator for SequenceNameGenerator {
    fn generate(&self, _requested: Option<&str>, _version: Option<&str>) -> Result<String> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{}-{}", self.type_name, n))
    }
}

/// Returns the requested name unchanged
#[derive(Debug)]
pub struct UserProvidedNameGenerator {
    type_name: String,
}

impl UserProvidedNameGenerator {
    /// Create a generator for the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl NameGenerator for UserProvidedNameGenerator {
    fn generate(&self, requested: Option<&str>, _version: Option<&str>) -> Result<String> {
        requested
            .map(str::to_owned)
            .ok_or_else(|| NamingError::MissingName {
                factory: self.type_name.clone(),
            })
    }
}

/// Uses the user-provided name when present, otherwise synthesizes one
#[derive(Debug)]
pub struct SwitchNameGenerator {
    computed: SequenceNameGenerator,
    provided: UserProvidedNameGenerator,
}

impl SwitchNameGenerator {
    /// Create the default switch for a type
    pub fn new(type_name: &str) -> Self {
        Self {
            computed: SequenceNameGenerator::new(type_name),
            provided: UserProvidedNameGenerator::new(type_name),
        }
    }
}

impl NameGenerator for SwitchNameGenerator {
    fn generate(&self, requested: Option<&str>, version: Option<&str>) -> Result<String> {
        match requested {
            Some(_) => self.provided.generate(requested, version),
            // synthesized names are never versioned at this stage
            None => self.computed.generate(None, None),
        }
    }
}

/// Wraps a delegate and atomically reserves its output in a [`NameRegistry`].
///
/// When the candidate is taken and a version was given, `"{candidate}-{version}"`
/// is tried once before failing.
pub struct UniquenessNameGenerator<G = SwitchNameGenerator> {
    type_name: String,
    delegate: G,
    registry: Arc<NameRegistry>,
}

impl UniquenessNameGenerator<SwitchNameGenerator> {
    /// The standard chain: switch between sequence and user names, then reserve
    pub fn for_type(type_name: &str, registry: Arc<NameRegistry>) -> Self {
        Self::new(type_name, SwitchNameGenerator::new(type_name), registry)
    }
}

impl<G: NameGenerator> UniquenessNameGenerator<G> {
    /// Wrap an arbitrary delegate
    pub fn new(type_name: impl Into<String>, delegate: G, registry: Arc<NameRegistry>) -> Self {
        Self {
            type_name: type_name.into(),
            delegate,
            registry,
        }
    }

    /// Registry this generator reserves into
    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }
}

impl<G: NameGenerator> NameGenerator for UniquenessNameGenerator<G> {
    fn generate(&self, requested: Option<&str>, version: Option<&str>) -> Result<String> {
        let candidate = self.delegate.generate(requested, version)?;

        match self.registry.reserve_qualified(&candidate, version) {
            Ok(name) => {
                debug!("Instance name reserved for {}: {}", self.type_name, name);
                Ok(name)
            }
            Err(name) => Err(NamingError::NameAlreadyUsed {
                factory: self.type_name.clone(),
                name,
            }),
        }
    }
}

impl<G> std::fmt::Debug for UniquenessNameGenerator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniquenessNameGenerator")
            .field("type_name", &self.type_name)
            .field("reserved", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let generator = SequenceNameGenerator::new("t");

        assert_eq!(generator.generate(None, None).unwrap(), "t-0");
        assert_eq!(generator.generate(Some("ignored"), None).unwrap(), "t-1");
        assert_eq!(generator.issued(), 2);
    }

    #[test]
    fn test_user_provided_requires_name() {
        let generator = UserProvidedNameGenerator::new("t");

        assert_eq!(generator.generate(Some("n"), None).unwrap(), "n");
        assert!(matches!(
            generator.generate(None, None),
            Err(NamingError::MissingName { .. })
        ));
    }

    #[test]
    fn test_switch_routes_by_presence() {
        let generator = SwitchNameGenerator::new("t");

        assert_eq!(generator.generate(None, Some("1.0")).unwrap(), "t-0");
        assert_eq!(generator.generate(Some("mine"), Some("1.0")).unwrap(), "mine");
        assert_eq!(generator.generate(None, None).unwrap(), "t-1");
    }

    #[test]
    fn test_uniqueness_without_version_fails_on_conflict() {
        let registry = Arc::new(NameRegistry::new());
        let generator = UniquenessNameGenerator::for_type("t", Arc::clone(&registry));

        assert_eq!(generator.generate(Some("a"), None).unwrap(), "a");
        let err = generator.generate(Some("a"), None).unwrap_err();
        assert_eq!(
            err,
            NamingError::NameAlreadyUsed {
                factory: "t".to_string(),
                name: "a".to_string()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_uniqueness_versioned_fallback_reported() {
        let registry = Arc::new(NameRegistry::new());
        let generator = UniquenessNameGenerator::for_type("t", Arc::clone(&registry));

        generator.generate(Some("a"), Some("2")).unwrap();
        assert_eq!(generator.generate(Some("a"), Some("2")).unwrap(), "a-2");

        match generator.generate(Some("a"), Some("2")) {
            Err(NamingError::NameAlreadyUsed { name, .. }) => assert_eq!(name, "a-2"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_generated_name_conflicts_with_user_name() {
        let registry = Arc::new(NameRegistry::new());
        let generator = UniquenessNameGenerator::for_type("t", Arc::clone(&registry));

        generator.generate(Some("t-0"), None).unwrap();
        assert!(generator.generate(None, None).is_err());
        // the counter moved on, so the next synthesized name is free
        assert_eq!(generator.generate(None, None).unwrap(), "t-1");
    }
}
