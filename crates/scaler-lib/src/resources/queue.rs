//! Ordering of pending resource requests

use super::{RequestStatus, ResourceRequest};
use std::cmp::Ordering;

/// Queue order: priority descending, then deadline ascending (requests
/// without a deadline last), then creation time ascending
pub fn compare_pending(a: &ResourceRequest, b: &ResourceRequest) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.deadline, b.deadline) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Ids of the first `limit` pending requests in queue order
pub fn next_batch<'a>(
    requests: impl Iterator<Item = &'a ResourceRequest>,
    limit: usize,
) -> Vec<String> {
    let mut pending: Vec<&ResourceRequest> = requests
        .filter(|r| r.status == RequestStatus::Pending)
        .collect();
    pending.sort_by(|a, b| compare_pending(a, b));
    pending.into_iter().take(limit).map(|r| r.id.clone()).collect()
}
