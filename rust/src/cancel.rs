//! Cooperative cancellation for long algorithmic passes.

use tokio_util::sync::CancellationToken;

/// Checks a cancellation token once every `interval` processed nodes.
#[derive(Clone, Copy, Debug)]
pub struct CancelCheck<'a> {
    token: Option<&'a CancellationToken>,
    interval: usize,
}

impl<'a> CancelCheck<'a> {
    pub fn new(token: Option<&'a CancellationToken>, interval: usize) -> Self {
        Self {
            token,
            interval: interval.max(1),
        }
    }

    /// A check that never fires.
    pub fn never() -> Self {
        Self::new(None, usize::MAX)
    }

    /// True when `processed` closes a batch and cancellation was requested.
    #[inline]
    pub fn should_stop(&self, processed: usize) -> bool {
        match self.token {
            Some(token) => processed % self.interval == 0 && token.is_cancelled(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_only_at_batch_boundaries() {
        let token = CancellationToken::new();
        token.cancel();
        let check = CancelCheck::new(Some(&token), 4);

        assert!(check.should_stop(0));
        assert!(!check.should_stop(3));
        assert!(check.should_stop(8));
    }

    #[test]
    fn test_never_fires() {
        assert!(!CancelCheck::never().should_stop(0));
    }
}
