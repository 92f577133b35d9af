use std::future::Future;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Cancellation scope shared by every operation issued through one store.
///
/// Cancelling aborts in-flight operations (their futures are dropped) and
/// makes later ones fail with [`Error::Closed`] without touching the client.
pub struct CancelScope {
    cancelled: watch::Sender<bool>,
}

impl CancelScope {
    pub fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self { cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Runs `fut` unless the scope is cancelled first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut rx = self.cancelled.subscribe();
        if *rx.borrow_and_update() {
            return Err(Error::Closed);
        }
        tokio::select! {
            biased;
            _ = rx.wait_for(|cancelled| *cancelled) => Err(Error::Closed),
            result = fut => result,
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn runs_future_while_open() {
        let scope = CancelScope::new();
        assert_eq!(scope.run(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn fails_fast_after_cancel() {
        let scope = CancelScope::new();
        scope.cancel();
        assert!(scope.is_cancelled());
        let result = scope.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn cancel_aborts_pending_operation() {
        let scope = Arc::new(CancelScope::new());
        let pending = {
            let scope = Arc::clone(&scope);
            tokio::spawn(async move {
                scope
                    .run(async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        scope.cancel();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::Closed)));
    }
}
