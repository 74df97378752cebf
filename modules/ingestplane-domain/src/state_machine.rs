//! State-Machine Guards (§4.3). Pure transition validation plus the
//! cross-entity derivation maps used when one side drives the other.
//! Grounded on `repository.py`'s `_validate_candidate_transition` /
//! `_validate_posting_status_transition` / `_derive_posting_status_for_candidate`
//! / `_derive_candidate_state_for_posting`.

use ingestplane_common::{CandidateState, PostingStatus, RepoError, RepoResult};

fn candidate_allowed(from: CandidateState) -> &'static [CandidateState] {
    use CandidateState::*;
    match from {
        Discovered => &[Processed, NeedsReview, Rejected, Archived],
        Processed => &[Publishable, NeedsReview, Rejected, Archived],
        NeedsReview => &[Publishable, Rejected, Archived, Processed],
        Publishable => &[Published, Rejected, NeedsReview, Archived],
        Published => &[Archived, Closed],
        Archived => &[Published, Closed],
        Closed => &[Archived],
        Rejected => &[NeedsReview, Archived],
    }
}

fn posting_allowed(from: PostingStatus) -> &'static [PostingStatus] {
    use PostingStatus::*;
    match from {
        Active => &[Stale, Archived, Closed],
        Stale => &[Active, Archived, Closed],
        Archived => &[Active, Stale, Closed],
        Closed => &[Archived],
    }
}

/// Identity is always allowed; otherwise `to` must be in `from`'s allowed set.
pub fn validate_candidate_transition(from: CandidateState, to: CandidateState) -> RepoResult<()> {
    if from == to || candidate_allowed(from).contains(&to) {
        Ok(())
    } else {
        Err(RepoError::conflict(format!(
            "candidate transition {from} -> {to} is not allowed"
        )))
    }
}

pub fn validate_posting_transition(from: PostingStatus, to: PostingStatus) -> RepoResult<()> {
    if from == to || posting_allowed(from).contains(&to) {
        Ok(())
    } else {
        Err(RepoError::conflict(format!(
            "posting transition {from} -> {to} is not allowed"
        )))
    }
}

/// Derived posting status when a candidate-state change drives the linked
/// posting (§4.3 table). `None` means the candidate state has no forced
/// projection and the posting is left untouched.
pub fn derive_posting_status_for_candidate(state: CandidateState) -> Option<PostingStatus> {
    use CandidateState::*;
    match state {
        Published => Some(PostingStatus::Active),
        Archived => Some(PostingStatus::Archived),
        Closed => Some(PostingStatus::Closed),
        Rejected => Some(PostingStatus::Archived),
        Discovered | Processed | Publishable | NeedsReview => None,
    }
}

/// Derived candidate state when a posting-status change drives the linked
/// candidate (§4.3 table).
pub fn derive_candidate_state_for_posting(status: PostingStatus) -> CandidateState {
    use PostingStatus::*;
    match status {
        Active | Stale => CandidateState::Published,
        Archived => CandidateState::Archived,
        Closed => CandidateState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CandidateState::*;
    use PostingStatus::*;

    #[test]
    fn identity_transition_always_allowed() {
        for state in CandidateState::ALL {
            assert!(validate_candidate_transition(*state, *state).is_ok());
        }
        for status in PostingStatus::ALL {
            assert!(validate_posting_transition(*status, *status).is_ok());
        }
    }

    #[test]
    fn candidate_allowed_paths_accept() {
        assert!(validate_candidate_transition(Discovered, Processed).is_ok());
        assert!(validate_candidate_transition(Publishable, Published).is_ok());
        assert!(validate_candidate_transition(Archived, Published).is_ok());
        assert!(validate_candidate_transition(Closed, Archived).is_ok());
    }

    #[test]
    fn candidate_disallowed_paths_reject() {
        assert!(validate_candidate_transition(Discovered, Published).is_err());
        assert!(validate_candidate_transition(Closed, Published).is_err());
        assert!(validate_candidate_transition(Published, Discovered).is_err());
    }

    #[test]
    fn posting_allowed_and_disallowed_paths() {
        assert!(validate_posting_transition(Active, Stale).is_ok());
        assert!(validate_posting_transition(Closed, Archived).is_ok());
        assert!(validate_posting_transition(Closed, Active).is_err());
    }

    #[test]
    fn candidate_to_posting_projection_matches_table() {
        assert_eq!(derive_posting_status_for_candidate(Published), Some(Active));
        assert_eq!(derive_posting_status_for_candidate(Archived), Some(Archived));
        assert_eq!(derive_posting_status_for_candidate(Closed), Some(Closed));
        assert_eq!(derive_posting_status_for_candidate(Rejected), Some(Archived));
        assert_eq!(derive_posting_status_for_candidate(Processed), None);
    }

    #[test]
    fn posting_to_candidate_projection_matches_table() {
        assert_eq!(derive_candidate_state_for_posting(Active), Published);
        assert_eq!(derive_candidate_state_for_posting(Stale), Published);
        assert_eq!(derive_candidate_state_for_posting(Archived), CandidateState::Archived);
        assert_eq!(derive_candidate_state_for_posting(Closed), CandidateState::Closed);
    }
}
