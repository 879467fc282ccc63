use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("operation cancelled before {0}")]
pub struct Cancelled(pub &'static str);

/// Cooperative cancellation, checked between pipeline steps.
///
/// Cancelling after a content upload but before the meta upload leaves only
/// an orphaned blob behind; no row is ever written for a cancelled pipeline.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// The triggering side of a [`CancelToken`]
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
    }

    /// A token nobody can cancel.
    pub fn never() -> Self {
        let (_, token) = Self::pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with [`Cancelled`] if cancellation was requested. `step` names
    /// the step that would have run next.
    pub fn check(&self, step: &'static str) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            tracing::debug!(step, "pipeline cancelled");
            return Err(Cancelled(step));
        }
        Ok(())
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cancel_is_observed_by_clones() {
        let (handle, token) = CancelToken::pair();
        let clone = token.clone();
        assert!(token.check("upload").is_ok());
        handle.cancel();
        assert_eq!(clone.check("upload"), Err(Cancelled("upload")));
    }

    #[test]
    fn test_never_stays_live() {
        assert!(!CancelToken::never().is_cancelled());
    }
}
