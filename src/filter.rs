use crate::models::{PullRequest, Status};
use crate::state::SeenSet;

/// Keep only the pull requests that have not yet been notified for `status`.
///
/// Input order is preserved and nothing is deduplicated here. The seen-set
/// is not modified: recording happens only after a notification has been
/// dispatched, so a failed send leaves the pull request eligible for retry
/// on the next run.
pub fn filter_unseen<'a>(
    seen: &SeenSet,
    status: Status,
    pulls: &'a [PullRequest],
) -> Vec<&'a PullRequest> {
    pulls
        .iter()
        .filter(|pull| !seen.is_seen(status, pull.number))
        .collect()
}
