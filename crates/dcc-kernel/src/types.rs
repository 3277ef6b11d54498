//! Core state and identifier types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a component instance.
///
/// Totally ordered: `Disposed < Stopped < Invalid < Valid`. Moving up is a
/// forward transition (handlers notified in declared order), moving down
/// is a backward one (reverse order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Terminal; the instance can no longer be used
    Disposed,
    /// Not running
    Stopped,
    /// Running but at least one handler is invalid
    Invalid,
    /// Running and every handler is valid
    Valid,
}

impl InstanceState {
    /// All states, lowest first
    pub const ALL: [InstanceState; 4] = [
        InstanceState::Disposed,
        InstanceState::Stopped,
        InstanceState::Invalid,
        InstanceState::Valid,
    ];

    /// Running, i.e. `Invalid` or `Valid`
    #[inline]
    #[must_use]
    pub fn is_started(self) -> bool {
        self > InstanceState::Stopped
    }

    /// Stable lowercase label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Disposed => "disposed",
            InstanceState::Stopped => "stopped",
            InstanceState::Invalid => "invalid",
            InstanceState::Valid => "valid",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validity of a Type Container or of a handler binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Validity {
    /// Requirements or handler conditions not met
    #[default]
    Invalid,
    /// Ready
    Valid,
}

impl Validity {
    /// Map a boolean condition
    #[inline]
    #[must_use]
    pub fn from_bool(valid: bool) -> Self {
        if valid {
            Validity::Valid
        } else {
            Validity::Invalid
        }
    }

    /// True for [`Validity::Valid`]
    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        self == Validity::Valid
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validity::Invalid => f.write_str("invalid"),
            Validity::Valid => f.write_str("valid"),
        }
    }
}

impl From<Validity> for InstanceState {
    fn from(value: Validity) -> Self {
        match value {
            Validity::Invalid => InstanceState::Invalid,
            Validity::Valid => InstanceState::Valid,
        }
    }
}

/// State of a Type Container
pub type FactoryState = Validity;

/// Identifier assigned to a provider by its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub u64);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider#{}", self.0)
    }
}

/// Identifier of a registry subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(InstanceState::Disposed < InstanceState::Stopped);
        assert!(InstanceState::Stopped < InstanceState::Invalid);
        assert!(InstanceState::Invalid < InstanceState::Valid);
        assert!(!InstanceState::Stopped.is_started());
        assert!(InstanceState::Invalid.is_started());
    }

    #[test]
    fn test_validity_mapping() {
        assert_eq!(Validity::from_bool(true), Validity::Valid);
        assert_eq!(InstanceState::from(Validity::Invalid), InstanceState::Invalid);
        assert_eq!(Validity::default(), Validity::Invalid);
    }
}
