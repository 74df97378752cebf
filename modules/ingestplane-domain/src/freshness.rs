//! Freshness fallback (§4.6.3). When a `check_freshness` job terminally
//! fails (no more retries), the posting downgrades one notch rather than
//! staying in an unverified state forever.

use ingestplane_common::PostingStatus;

/// `active -> stale`, `stale -> archived`; `archived`/`closed` are already
/// terminal enough and are left untouched.
pub fn terminal_failure_downgrade(current: PostingStatus) -> Option<PostingStatus> {
    match current {
        PostingStatus::Active => Some(PostingStatus::Stale),
        PostingStatus::Stale => Some(PostingStatus::Archived),
        PostingStatus::Archived | PostingStatus::Closed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrades_active_and_stale() {
        assert_eq!(terminal_failure_downgrade(PostingStatus::Active), Some(PostingStatus::Stale));
        assert_eq!(terminal_failure_downgrade(PostingStatus::Stale), Some(PostingStatus::Archived));
    }

    #[test]
    fn leaves_archived_and_closed_alone() {
        assert_eq!(terminal_failure_downgrade(PostingStatus::Archived), None);
        assert_eq!(terminal_failure_downgrade(PostingStatus::Closed), None);
    }
}
