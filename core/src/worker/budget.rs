//! Pool-wide request budget

use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared request counter for an exact total across all workers
///
/// Workers claim a request before issuing it. A claim that cannot be turned
/// into a request (no free sequence id) is handed back with
/// [`RequestBudget::unclaim`].
#[derive(Debug, Default)]
pub struct RequestBudget {
    limit: Option<usize>,
    claimed: AtomicUsize,
}

impl RequestBudget {
    /// Budget of `limit` requests, unbounded when `None`
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            claimed: AtomicUsize::new(0),
        }
    }

    /// Unbounded budget
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Configured limit
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Requests claimed so far
    pub fn claimed(&self) -> usize {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Try to claim one request
    ///
    /// Returns `false` once the limit is reached. Always `true` without a limit.
    pub fn try_claim(&self) -> bool {
        match self.limit {
            Some(limit) => self
                .claimed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |claimed| {
                    (claimed < limit).then_some(claimed + 1)
                })
                .is_ok(),
            None => {
                self.claimed.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Return a claim that was not used
    pub fn unclaim(&self) {
        let _ = self
            .claimed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |claimed| {
                claimed.checked_sub(1)
            });
    }

    /// Whether no further claim can succeed
    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.claimed() >= limit)
    }
}
