use crate::entities::purchase_request::RequestStatus;
use crate::errors::ServiceError;

/// Validates if a status transition is allowed.
///
/// The table is exhaustive: anything not listed is illegal, including
/// transitioning to the current status.
pub fn is_valid_transition(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;
    match (from, to) {
        // From draft
        (Draft, Submitted) => true,

        // From submitted
        (Submitted, Approved) => true,
        (Submitted, Rejected) => true,
        (Submitted, RevisionNeeded) => true,

        // From approved
        (Approved, Completed) => true,

        // From rejected
        (Rejected, Submitted) => true,

        // From revision_needed
        (RevisionNeeded, Submitted) => true,
        (RevisionNeeded, Draft) => true,

        // Completed is terminal
        _ => false,
    }
}

/// Returns an `InvalidStatusTransition` error unless `from -> to` is legal.
pub fn ensure_transition(from: RequestStatus, to: RequestStatus) -> Result<(), ServiceError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidStatusTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestStatus::*;

    #[test]
    fn transition_table_matches_lifecycle() {
        assert!(is_valid_transition(Draft, Submitted));
        assert!(is_valid_transition(Submitted, Approved));
        assert!(is_valid_transition(Submitted, Rejected));
        assert!(is_valid_transition(Submitted, RevisionNeeded));
        assert!(is_valid_transition(Approved, Completed));
        assert!(is_valid_transition(Rejected, Submitted));
        assert!(is_valid_transition(RevisionNeeded, Submitted));
        assert!(is_valid_transition(RevisionNeeded, Draft));
    }

    #[test]
    fn completed_is_terminal() {
        for to in [Draft, Submitted, Approved, Rejected, RevisionNeeded, Completed] {
            assert!(!is_valid_transition(Completed, to));
        }
    }

    #[test]
    fn self_transitions_are_rejected() {
        for status in [Draft, Submitted, Approved, Rejected, RevisionNeeded, Completed] {
            assert!(!is_valid_transition(status, status));
        }
    }

    #[test]
    fn illegal_transition_error_names_both_statuses() {
        let err = ensure_transition(Completed, Approved).unwrap_err();
        match err {
            ServiceError::InvalidStatusTransition { from, to } => {
                assert_eq!(from, "completed");
                assert_eq!(to, "approved");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn illegal_transition_fails_identically_on_repeat() {
        let first = ensure_transition(Completed, Approved).unwrap_err().to_string();
        let second = ensure_transition(Completed, Approved).unwrap_err().to_string();
        assert_eq!(first, second);
    }
}
