//! Retry mechanism for RPC attempts.
//!
//! A [`Strategy`] classifies every failed attempt into a [`RetryAction`] and bounds the total
//! number of attempts. [`retry_with`] drives a future-generating function under a strategy and a
//! cancellation token.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio::time;
use tokio_util::sync::CancellationToken;

/// Type alias for the error handler function to reduce type complexity.
pub type ErrorHandler<E> = Arc<dyn Fn(&E, usize) -> RetryAction + Send + Sync>;

/// Represents the action to take when an error occurs during retry attempts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryAction {
    /// Continue retrying with the specified delay.
    Retry(Duration),

    /// Stop retrying and return the error.
    Stop,
}

/// A retry strategy that determines how to handle errors and when to give up.
#[derive(Clone)]
pub struct Strategy<E> {
    /// Determines the action to take for a given error and the number of attempts made so far.
    error_handler: ErrorHandler<E>,

    /// Maximum number of attempts, including the first one (None for unlimited).
    max_attempts: Option<usize>,
}

impl<E> fmt::Debug for Strategy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl<E> Strategy<E> {
    /// Creates a new retry strategy with the given error handler.
    ///
    /// This will retry indefinitely unless a bound is set later with
    /// [`Self::with_max_attempts`].
    pub fn new<F>(error_handler: F) -> Self
    where
        F: Fn(&E, usize) -> RetryAction + Send + Sync + 'static,
    {
        Self {
            error_handler: Arc::new(error_handler),
            max_attempts: None,
        }
    }

    /// Bounds the total number of attempts. A bound of zero still allows one attempt.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Returns the bound on the number of attempts.
    pub const fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }

    /// Creates a strategy that retries every error with a fixed delay.
    pub fn fixed_delay(delay: Duration) -> Strategy<E>
    where
        E: Send + Sync + 'static,
    {
        Strategy::new(move |_error, _attempts| RetryAction::Retry(delay))
    }
}

/// Why [`retry_with`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The token was cancelled before or during an attempt or a back-off sleep.
    Cancelled,

    /// The strategy classified `error` as not retryable.
    Stopped {
        /// Attempts made, including the failed one.
        attempts: usize,

        /// The error of the last attempt.
        error: E,
    },

    /// Every allowed attempt failed with a retryable error.
    Exhausted {
        /// Attempts made.
        attempts: usize,

        /// The error of the last attempt.
        error: E,
    },
}

/// Runs `generator` until it succeeds or `strategy` gives up.
///
/// `generator` receives the 1-based number of the attempt it is making. Cancellation is checked
/// before each attempt and raced against every attempt and back-off sleep, so a cancelled token
/// never costs a delay.
pub async fn retry_with<A, E, Fut, Gen>(
    strategy: &Strategy<E>,
    cancel: &CancellationToken,
    mut generator: Gen,
) -> Result<A, RetryError<E>>
where
    Fut: Future<Output = Result<A, E>>,
    Gen: FnMut(usize) -> Fut,
{
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempts += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = generator(attempts) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let delay = match (strategy.error_handler)(&error, attempts) {
            RetryAction::Retry(delay) => delay,
            RetryAction::Stop => return Err(RetryError::Stopped { attempts, error }),
        };

        if strategy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(RetryError::Exhausted { attempts, error });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    enum TestError {
        Retryable,
        Fatal,
    }

    fn classify(error: &TestError, _attempts: usize) -> RetryAction {
        match error {
            TestError::Retryable => RetryAction::Retry(Duration::from_millis(1)),
            TestError::Fatal => RetryAction::Stop,
        }
    }

    #[tokio::test]
    async fn test_fixed_delay_strategy() {
        let counter = AtomicUsize::new(0);
        const SUCCEED_ON: usize = 3;

        let strategy = Strategy::fixed_delay(Duration::from_millis(10)).with_max_attempts(5);
        let cancel = CancellationToken::new();

        let result = retry_with(&strategy, &cancel, |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < SUCCEED_ON {
                    Err(TestError::Retryable)
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(counter.load(Ordering::SeqCst), SUCCEED_ON);
    }

    #[tokio::test]
    async fn test_error_classification() {
        let counter = AtomicUsize::new(0);
        let strategy = Strategy::new(classify).with_max_attempts(10);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with(&strategy, &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert_eq!(
            result,
            Err(RetryError::Stopped {
                attempts: 1,
                error: TestError::Fatal
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let counter = AtomicUsize::new(0);
        const MAX_ATTEMPTS: usize = 4;

        let strategy = Strategy::new(classify).with_max_attempts(MAX_ATTEMPTS);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with(&strategy, &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Retryable) }
        })
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: MAX_ATTEMPTS,
                error: TestError::Retryable
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_zero_attempts_means_one() {
        let counter = AtomicUsize::new(0);
        let strategy = Strategy::new(classify).with_max_attempts(0);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with(&strategy, &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Retryable) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_makes_no_attempt() {
        let counter = AtomicUsize::new(0);
        let strategy = Strategy::new(classify).with_max_attempts(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry_with(&strategy, &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Retryable) }
        })
        .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_back_off() {
        let strategy: Strategy<TestError> =
            Strategy::fixed_delay(Duration::from_secs(3600)).with_max_attempts(2);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result: Result<(), _> =
            retry_with(&strategy, &cancel, |_| async { Err(TestError::Retryable) }).await;

        assert_eq!(result, Err(RetryError::Cancelled));
    }
}
