// Status workflow for material requests.
// Pure and stateless: validates a transition, never performs it.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::RequestStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
}

/// An accepted transition, handed to the coordinator for the optimistic mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: RequestStatus,
    pub to: RequestStatus,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StatusWorkflow;

impl StatusWorkflow {
    pub fn allowed_transitions(current: RequestStatus) -> &'static [RequestStatus] {
        use RequestStatus::{Approved, Fulfilled, Pending, Rejected};

        match current {
            Pending => &[Approved, Rejected],
            Approved => &[Fulfilled, Rejected],
            Rejected => &[Pending],
            Fulfilled => &[],
        }
    }

    pub fn allowed_set(current: RequestStatus) -> BTreeSet<RequestStatus> {
        Self::allowed_transitions(current).iter().copied().collect()
    }

    pub fn can_transition(current: RequestStatus, target: RequestStatus) -> bool {
        Self::allowed_transitions(current).contains(&target)
    }

    pub fn request_transition(
        current: RequestStatus,
        target: RequestStatus,
    ) -> Result<StatusTransition, TransitionError> {
        if Self::can_transition(current, target) {
            tracing::debug!(from = %current, to = %target, "Status transition accepted");
            Ok(StatusTransition {
                from: current,
                to: target,
            })
        } else {
            tracing::debug!(from = %current, to = %target, "Status transition rejected");
            Err(TransitionError::InvalidTransition {
                from: current,
                to: target,
            })
        }
    }

    pub fn is_terminal(status: RequestStatus) -> bool {
        Self::allowed_transitions(status).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestStatus::{Approved, Fulfilled, Pending, Rejected};

    #[test]
    fn test_transition_table() {
        assert_eq!(StatusWorkflow::allowed_transitions(Pending), &[Approved, Rejected]);
        assert_eq!(StatusWorkflow::allowed_transitions(Approved), &[Fulfilled, Rejected]);
        assert_eq!(StatusWorkflow::allowed_transitions(Rejected), &[Pending]);
        assert!(StatusWorkflow::allowed_transitions(Fulfilled).is_empty());
    }

    #[test]
    fn test_request_transition_matches_table_for_all_pairs() {
        for &from in RequestStatus::ALL {
            let allowed = StatusWorkflow::allowed_set(from);
            for &to in RequestStatus::ALL {
                let result = StatusWorkflow::request_transition(from, to);
                assert_eq!(result.is_ok(), allowed.contains(&to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_examples() {
        assert_eq!(
            StatusWorkflow::request_transition(Fulfilled, Pending),
            Err(TransitionError::InvalidTransition {
                from: Fulfilled,
                to: Pending
            })
        );
        assert_eq!(
            StatusWorkflow::request_transition(Rejected, Pending),
            Ok(StatusTransition {
                from: Rejected,
                to: Pending
            })
        );
        assert!(StatusWorkflow::request_transition(Pending, Fulfilled).is_err());
        assert!(StatusWorkflow::request_transition(Pending, Pending).is_err());
    }

    #[test]
    fn test_only_fulfilled_is_terminal() {
        assert!(StatusWorkflow::is_terminal(Fulfilled));
        assert!(!StatusWorkflow::is_terminal(Pending));
        assert!(!StatusWorkflow::is_terminal(Approved));
        assert!(!StatusWorkflow::is_terminal(Rejected));
    }
}
