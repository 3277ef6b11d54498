//! Instance lifecycle transition rules

use crate::error::StateMachineError;
use crate::types::InstanceState;

/// Validates an instance lifecycle move.
///
/// A started instance only leaves `Valid` through `Invalid`, and only
/// reaches `Disposed` from `Stopped`. The debug panic can be enabled with
/// the `strict-debug` feature.
///
/// # Errors
///
/// [`StateMachineError::IllegalTransition`] when the move is not allowed.
pub fn validate_transition(from: InstanceState, to: InstanceState) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal state transition attempted: {:?} -> {:?}", from, to);

        #[cfg(not(feature = "strict-debug"))]
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: InstanceState) -> Vec<InstanceState> {
    use InstanceState::{Disposed, Invalid, Stopped, Valid};
    match from {
        Stopped => vec![Invalid, Disposed],
        Invalid => vec![Valid, Stopped],
        Valid => vec![Invalid],
        Disposed => vec![],
    }
}

/// Steps from `from` to `to`, expanding moves that would skip `Invalid`
#[must_use]
pub fn path(from: InstanceState, to: InstanceState) -> Vec<InstanceState> {
    use InstanceState::{Invalid, Stopped, Valid};
    match (from, to) {
        (Stopped, Valid) => vec![Invalid, Valid],
        (Valid, Stopped) => vec![Invalid, Stopped],
        _ if from == to => vec![],
        _ => vec![to],
    }
}

fn allowed(from: InstanceState, to: InstanceState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expanded_paths_are_legal() {
        for from in InstanceState::ALL {
            for to in InstanceState::ALL {
                let mut current = from;
                let steps = path(from, to);
                let legal = steps.iter().all(|next| {
                    let ok = allowed(current, *next);
                    current = *next;
                    ok
                });
                if legal && !steps.is_empty() {
                    assert_eq!(current, to);
                }
            }
        }
        assert_eq!(
            path(InstanceState::Stopped, InstanceState::Valid),
            vec![InstanceState::Invalid, InstanceState::Valid]
        );
    }
}
