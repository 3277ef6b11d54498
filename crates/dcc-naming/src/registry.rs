//! Process-wide set of reserved instance names

use parking_lot::Mutex;
use std::collections::HashSet;

/// Reserved instance names shared by every Type Container of a process.
///
/// Share it through an `Arc`. All check-and-reserve steps happen under a
/// single lock so two concurrent requests can never both obtain a name.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: Mutex<HashSet<String>>,
}

impl NameRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name` if it is free. Returns `false` when already taken.
    pub fn try_reserve(&self, name: &str) -> bool {
        let mut names = self.names.lock();
        if names.contains(name) {
            return false;
        }
        names.insert(name.to_owned())
    }

    /// Reserve `candidate`, or `"{candidate}-{qualifier}"` when the bare
    /// candidate is taken and a qualifier exists.
    ///
    /// Both checks run under one lock acquisition. On failure the last
    /// rejected candidate is returned.
    pub fn reserve_qualified(
        &self,
        candidate: &str,
        qualifier: Option<&str>,
    ) -> std::result::Result<String, String> {
        let mut names = self.names.lock();
        if !names.contains(candidate) {
            names.insert(candidate.to_owned());
            return Ok(candidate.to_owned());
        }

        let Some(qualifier) = qualifier else {
            return Err(candidate.to_owned());
        };

        let qualified = format!("{candidate}-{qualifier}");
        if names.contains(&qualified) {
            return Err(qualified);
        }
        names.insert(qualified.clone());
        Ok(qualified)
    }

    /// Release a reserved name. Releasing an unknown name is a no-op.
    pub fn release(&self, name: &str) -> bool {
        let released = self.names.lock().remove(name);
        if released {
            tracing::trace!("Instance name released: {}", name);
        }
        released
    }

    /// Check whether `name` is currently reserved
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    /// Number of reserved names
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    /// True when no name is reserved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.lock().is_empty()
    }

    /// Sorted snapshot of the reserved names
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.lock().iter().cloned().collect();
        names.sort();
        names
    }
}
