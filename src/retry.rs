//! Retrying of recoverable failures with logging.
//!
//! The retry functions operate on a predefined set of constants for
//! simplicity. An attempt signals its outcome through [`Fault`]: recoverable
//! faults are logged and retried according to the strategy, fatal ones end
//! the loop immediately.

use crate::logging::Logger;
use crate::Error;
use std::future::Future;
use std::time::Duration;

/// Smallest backoff delay, used for the first retry.
pub const BACKOFF_MIN_DELAY: Duration = Duration::from_millis(50);

/// Ceiling for the backoff delay.
pub const BACKOFF_MAX_DELAY: Duration = Duration::from_secs(600);

/// Multiplier applied to the backoff delay after every retry.
pub const BACKOFF_FACTOR: u32 = 2;

/// Delay used by the fixed-rate strategy.
pub const FIXED_DELAY: Duration = Duration::from_secs(1);

/// Outcome of a failed attempt.
#[derive(Debug)]
pub enum Fault {
    /// Retried per the strategy; `msg` is logged along with the error and
    /// the current delay.
    Recoverable { error: Error, msg: &'static str },
    /// Ends the retry loop; the error is propagated to the caller.
    Fatal(Error),
}

impl Fault {
    /// Explicitly mark a failure as worth retrying.
    pub fn recoverable(error: Error, msg: &'static str) -> Self {
        Fault::Recoverable { error, msg }
    }
}

/// Runs `f` until it succeeds or fails fatally, sleeping between recoverable
/// failures for whatever the `delays` scheduler returns next.
pub async fn recover<F, Fut>(
    logger: &dyn Logger,
    mut delays: impl FnMut() -> Duration,
    mut f: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Fault>>,
{
    loop {
        match f().await {
            Ok(()) => return Ok(()),
            Err(Fault::Fatal(error)) => return Err(error),
            Err(Fault::Recoverable { error, msg }) => {
                let delay = delays();
                let delay_fmt = format!("{delay:?}");
                logger.error(&error, msg, &[("delay", &delay_fmt)]);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Runs `f` with exponentially backed-off retries.
pub async fn backoff<F, Fut>(logger: &dyn Logger, f: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Fault>>,
{
    let mut next = BACKOFF_MIN_DELAY;
    recover(
        logger,
        move || {
            let delay = next;
            next = (next * BACKOFF_FACTOR).min(BACKOFF_MAX_DELAY);
            delay
        },
        f,
    )
    .await
}

/// Runs `f` with a fixed retry delay.
pub async fn fixed<F, Fut>(logger: &dyn Logger, f: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Fault>>,
{
    recover(logger, || FIXED_DELAY, f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Discard;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Fails recoverably until the n-th call, which succeeds or fails fatally.
    fn count_calls(
        calls: &AtomicU32,
        n: u32,
        end_fatal: bool,
    ) -> impl FnMut() -> std::future::Ready<Result<(), Fault>> + '_ {
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(call <= n, "attempted more than {n} times");
            let outcome = if call < n {
                Err(Fault::recoverable(
                    Error::Protocol("transient".into()),
                    "recoverable",
                ))
            } else if end_fatal {
                Err(Fault::Fatal(Error::Cancelled))
            } else {
                Ok(())
            };
            std::future::ready(outcome)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_retries_until_success() {
        for n in 1..4 {
            let calls = AtomicU32::new(0);
            backoff(&Discard, count_calls(&calls, n, false)).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_retries_until_success() {
        for n in 1..4 {
            let calls = AtomicU32::new(0);
            fixed(&Discard, count_calls(&calls, n, false)).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_ends_the_loop() {
        let calls = AtomicU32::new(0);
        let err = backoff(&Discard, count_calls(&calls, 3, true))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delay_doubles_up_to_the_cap() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        backoff(&Discard, count_calls(&calls, 4, false)).await.unwrap();
        // 50ms + 100ms + 200ms of sleeping across the three retries.
        assert_eq!(start.elapsed(), Duration::from_millis(350));
    }
}
