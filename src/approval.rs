//! Narrows a pull request listing to the ones still short of a review quorum.

use futures::{StreamExt, TryStreamExt, stream};
use tracing::debug;

use crate::{
    context::ActionContext,
    error::ActionError,
    types::{Forge, PullRequest, Quorum, Repo, Review},
};

/// Counts approvals in the order given, stopping once `quorum` is reached.
///
/// Repeat approvals from the same reviewer each count.
pub fn count_approvals<P>(reviews: &[Review], is_approval: P, quorum: Quorum) -> usize
where
    P: Fn(&Review) -> bool,
{
    let mut count = 0;
    for review in reviews {
        if is_approval(review) {
            count += 1;
            if count == quorum.get() {
                break;
            }
        }
    }
    count
}

pub fn lacks_quorum<P>(reviews: &[Review], is_approval: P, quorum: Quorum) -> bool
where
    P: Fn(&Review) -> bool,
{
    count_approvals(reviews, is_approval, quorum) < quorum.get()
}

/// Pure form of the filter: `reviews[i]` belongs to `prs[i]`.
pub fn retain_without_quorum<P>(
    prs: Vec<PullRequest>,
    reviews: &[Vec<Review>],
    is_approval: P,
    quorum: Quorum,
) -> Vec<PullRequest>
where
    P: Fn(&Review) -> bool,
{
    prs.into_iter()
        .zip(reviews)
        .filter(|(_, reviews)| lacks_quorum(reviews, &is_approval, quorum))
        .map(|(pr, _)| pr)
        .collect()
}

/// Fetches reviews for every pull request and keeps those with fewer than
/// `quorum` approvals, in their original order.
///
/// Up to `max_concurrent` review lookups are in flight at once. The first
/// failure drops the remaining lookups and is returned; no partial list is
/// produced.
pub async fn filter_without_quorum<F, P>(
    ctx: &ActionContext,
    forge: &F,
    repo: &Repo,
    prs: Vec<PullRequest>,
    is_approval: P,
    quorum: Quorum,
    max_concurrent: usize,
) -> Result<Vec<PullRequest>, ActionError>
where
    F: Forge + Sync + ?Sized,
    P: Fn(&Review) -> bool,
{
    // Unordered so that any failure surfaces as soon as it happens, not after
    // the lookups queued ahead of it.
    let numbers: Vec<u64> = prs.iter().map(|pr| pr.number).collect();
    let mut indexed: Vec<(usize, Vec<Review>)> = stream::iter(numbers.into_iter().enumerate())
        .map(|(index, number)| async move {
            forge
                .list_reviews(ctx, repo, number)
                .await
                .map(|reviews| (index, reviews))
        })
        .buffer_unordered(max_concurrent.max(1))
        .try_collect()
        .await?;
    indexed.sort_unstable_by_key(|(index, _)| *index);
    let reviews: Vec<Vec<Review>> = indexed.into_iter().map(|(_, reviews)| reviews).collect();

    let total = prs.len();
    let retained = retain_without_quorum(prs, &reviews, is_approval, quorum);

    debug!(
        repo = %repo,
        quorum = quorum.get(),
        total,
        retained = retained.len(),
        "filtered pull requests by approvals"
    );

    Ok(retained)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::types::{ReviewState, StateFilter};

    fn approved(by: &str) -> Review {
        Review::new(by, ReviewState::Approved)
    }

    fn quorum(n: usize) -> Quorum {
        Quorum::new(n).unwrap()
    }

    #[test]
    fn test_no_reviews_lacks_quorum() {
        assert!(lacks_quorum(&[], Review::is_approval, quorum(1)));
    }

    #[test]
    fn test_counting_stops_at_quorum() {
        let reviews = vec![approved("a"), approved("b"), approved("c")];
        let seen = AtomicUsize::new(0);
        let count = count_approvals(
            &reviews,
            |r| {
                seen.fetch_add(1, Ordering::SeqCst);
                r.is_approval()
            },
            quorum(2),
        );
        assert_eq!(count, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_approvals_from_one_reviewer_count_separately() {
        let reviews = vec![approved("alice"), approved("alice")];
        assert!(!lacks_quorum(&reviews, Review::is_approval, quorum(2)));
    }

    #[test]
    fn test_other_states_do_not_count() {
        let reviews = vec![
            Review::new("a", ReviewState::ChangesRequested),
            Review::new("b", ReviewState::Commented),
            Review::new("c", ReviewState::Dismissed),
            approved("d"),
            Review::new("e", ReviewState::Pending),
        ];
        assert_eq!(count_approvals(&reviews, Review::is_approval, quorum(3)), 1);
        assert!(lacks_quorum(&reviews, Review::is_approval, quorum(2)));
        assert!(!lacks_quorum(&reviews, Review::is_approval, quorum(1)));
    }

    #[test]
    fn test_below_quorum_always_retained_in_any_order() {
        let mixed = [
            ReviewState::Approved,
            ReviewState::ChangesRequested,
            ReviewState::Commented,
            ReviewState::Approved,
        ];
        for t in 3..6 {
            for rotation in 0..mixed.len() {
                let mut states = mixed.to_vec();
                states.rotate_left(rotation);
                let reviews: Vec<Review> =
                    states.into_iter().map(|s| Review::new("x", s)).collect();
                assert!(lacks_quorum(&reviews, Review::is_approval, quorum(t)));
                assert!(!lacks_quorum(&reviews, Review::is_approval, quorum(2)));
            }
        }
    }

    fn pr(number: u64) -> PullRequest {
        PullRequest {
            repo: Repo::new("acme", "widgets").unwrap(),
            number,
            title: format!("PR {number}"),
            author: "alice".to_string(),
            state: "open".to_string(),
            url: format!("https://github.com/acme/widgets/pull/{number}"),
            draft: false,
            created_at: None,
        }
    }

    struct SlowForge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Forge for SlowForge {
        async fn list_pull_requests(
            &self,
            _ctx: &ActionContext,
            _repo: &Repo,
            _state: StateFilter,
        ) -> Result<Vec<PullRequest>, ActionError> {
            Ok(vec![])
        }

        async fn list_reviews(
            &self,
            _ctx: &ActionContext,
            _repo: &Repo,
            number: u64,
        ) -> Result<Vec<Review>, ActionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // Later pull requests finish first.
            tokio::time::sleep(std::time::Duration::from_millis(20 - number)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if number % 2 == 0 {
                Ok(vec![approved("a"), approved("b")])
            } else {
                Ok(vec![])
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_filter_keeps_input_order_and_bound() {
        let forge = SlowForge {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let repo = Repo::new("acme", "widgets").unwrap();
        let prs: Vec<PullRequest> = (1..=8).map(pr).collect();

        let retained = filter_without_quorum(
            &ActionContext::default(),
            &forge,
            &repo,
            prs,
            Review::is_approval,
            quorum(2),
            3,
        )
        .await
        .unwrap();

        let numbers: Vec<u64> = retained.iter().map(|pr| pr.number).collect();
        assert_eq!(numbers, vec![1, 3, 5, 7]);
        assert!(forge.peak.load(Ordering::SeqCst) <= 3);
    }
}
