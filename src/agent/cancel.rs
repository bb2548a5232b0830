use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::chat::ChatStream;
use crate::error::LLMError;

/// Cancellation signal shared by every suspension point of a run.
///
/// Clones observe the same signal. A token can also carry a deadline, after
/// which it behaves as if [`CancellationToken::cancel`] had been called.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            deadline: None,
        }
    }

    /// A token that cancels itself after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    /// Same signal, with a deadline. The earliest deadline wins.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token is cancelled or its deadline has passed.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        let signalled = async move {
            // the sender lives as long as self, so this only returns on cancel
            let _ = receiver.wait_for(|cancelled| *cancelled).await;
        };
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = signalled => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
            None => signalled.await,
        }
    }

    /// Runs `future` unless the token fires first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, LLMError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(LLMError::Cancelled),
            output = future => Ok(output),
        }
    }

    /// Ends `stream` with `LLMError::Cancelled` as soon as the token fires.
    pub fn guard(&self, stream: ChatStream) -> ChatStream {
        let token = self.clone();
        Box::pin(futures::stream::unfold(Some(stream), move |state| {
            let token = token.clone();
            async move {
                let mut stream = state?;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Some((Err(LLMError::Cancelled), None)),
                    item = stream.next() => item.map(|item| (item, Some(stream))),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::collect_stream;

    #[tokio::test]
    async fn clones_share_the_signal() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn run_aborts_pending_work() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.run(futures::future::pending::<()>()).await });
        token.cancel();
        assert!(matches!(handle.await.unwrap(), Err(LLMError::Cancelled)));
    }

    #[tokio::test]
    async fn run_returns_the_output() {
        let token = CancellationToken::new();
        assert_eq!(token.run(async { 42 }).await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels() {
        let token = CancellationToken::with_timeout(Duration::from_secs(5));
        let slow = tokio::time::sleep(Duration::from_secs(60));
        assert!(matches!(token.run(slow).await, Err(LLMError::Cancelled)));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn guarded_stream_ends_with_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let inner: ChatStream = Box::pin(futures::stream::pending());
        assert!(matches!(
            collect_stream(token.guard(inner)).await,
            Err(LLMError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn guarded_stream_passes_fragments_through() {
        let token = CancellationToken::new();
        let inner: ChatStream = Box::pin(futures::stream::iter(vec![
            Ok("Live long ".to_string()),
            Ok("and prosper".to_string()),
        ]));
        assert_eq!(
            collect_stream(token.guard(inner)).await.unwrap(),
            "Live long and prosper"
        );
    }
}
