//! Long polling of the update feed.

use crate::api::{Client, GetUpdatesRequest};
use crate::logging::{self, Logger};
use crate::retry::{self, Fault};
use crate::stream::UpdateDecoder;
use crate::Error;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for the long-poll driver. `limit` and `timeout` are the values
/// sent to the `getUpdates` method.
#[derive(Default)]
pub struct LongPollOptions {
    /// Updates per batch (1..=100). Zero selects [`DEFAULT_LIMIT`].
    pub limit: usize,
    /// Long-poll timeout. Zero selects [`DEFAULT_TIMEOUT`].
    pub timeout: Duration,
    /// Logger for recoverable failures. `None` logs through `tracing`.
    pub logger: Option<Arc<dyn Logger>>,
    /// Decides whether a failed poll is worth retrying. `None` selects
    /// [`Error::is_recoverable`]: transport faults and remote failures are
    /// retried, local parse and consumer failures abort the stream.
    pub recoverable: Option<fn(&Error) -> bool>,
}

/// Drives `getUpdates` in a loop, publishing decoded updates to a bounded
/// channel. The offset advances only after an update has been handed off,
/// so a slow reader throttles polling and an interrupted batch resumes from
/// the last delivered update.
pub struct LongPollStreamer<T, D> {
    client: Arc<Client>,
    decoder: D,
    limit: usize,
    timeout: Duration,
    logger: Arc<dyn Logger>,
    recoverable: fn(&Error) -> bool,
    _updates: PhantomData<fn() -> T>,
}

impl<T, D> LongPollStreamer<T, D>
where
    T: Send + 'static,
    D: UpdateDecoder<T> + Send + Sync + 'static,
{
    pub fn new(client: Arc<Client>, decoder: D, opts: LongPollOptions) -> Self {
        LongPollStreamer {
            client,
            decoder,
            limit: if opts.limit == 0 { DEFAULT_LIMIT } else { opts.limit },
            timeout: if opts.timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                opts.timeout
            },
            logger: logging::with_default(opts.logger),
            recoverable: opts.recoverable.unwrap_or(Error::is_recoverable),
            _updates: PhantomData,
        }
    }

    /// Starts the background polling task.
    ///
    /// Returns the bounded updates channel (capacity = `limit`) and a
    /// terminal signal carrying `None` after cancellation or `Some(error)`
    /// on a non-recoverable failure. Both channels close when the task
    /// stops.
    pub fn stream(
        self,
        shutdown: CancellationToken,
    ) -> (mpsc::Receiver<T>, oneshot::Receiver<Option<Error>>) {
        let (tx, rx) = mpsc::channel(self.limit);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.run(&shutdown, &tx).await;
            let _ = done_tx.send(outcome);
        });
        (rx, done_rx)
    }

    async fn run(&self, shutdown: &CancellationToken, tx: &mpsc::Sender<T>) -> Option<Error> {
        let mut offset = 0i64;
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            match self.poll(shutdown, offset, tx).await {
                Ok(next) => offset = next,
                // Cancellation is not a failure.
                Err(Error::Cancelled) => return None,
                Err(err) => return Some(err),
            }
        }
    }

    // One poll: retries recoverable failures with backoff and returns the
    // offset for the next request.
    async fn poll(
        &self,
        shutdown: &CancellationToken,
        offset: i64,
        tx: &mpsc::Sender<T>,
    ) -> Result<i64, Error> {
        let next_offset = AtomicI64::new(offset);
        retry::backoff(self.logger.as_ref(), || {
            self.attempt(shutdown, &next_offset, tx)
        })
        .await?;
        Ok(next_offset.load(Ordering::Acquire))
    }

    async fn attempt(
        &self,
        shutdown: &CancellationToken,
        next_offset: &AtomicI64,
        tx: &mpsc::Sender<T>,
    ) -> Result<(), Fault> {
        let offset = next_offset.load(Ordering::Acquire);
        let req = GetUpdatesRequest {
            offset: (offset != 0).then_some(offset),
            limit: Some(self.limit),
            timeout: Some(self.timeout.as_secs()),
            allowed_updates: None,
        };

        let mut batch: Vec<(i64, T)> = Vec::new();
        let request = self.client.get_updates(&req, |info, payload| {
            let update = self.decoder.decode(info, payload)?;
            batch.push((info.id, update));
            Ok(())
        });
        let result = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            result = request => result,
        };
        match result {
            Ok(()) => {}
            // The request or global deadline fired; the attempt is complete.
            Err(Error::Http(err)) if err.is_timeout() => {}
            Err(err) if (self.recoverable)(&err) => {
                return Err(Fault::recoverable(
                    err,
                    "failed to get updates via long polling",
                ));
            }
            Err(err) => return Err(Fault::Fatal(err)),
        }

        // Hand the batch off. The offset moves to id + 1 only once an
        // update is actually delivered, so an interrupted batch is resumed
        // from the right place by the next attempt.
        for (id, update) in batch {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                sent = tx.send(update) => {
                    if sent.is_err() {
                        // Receiver dropped: nobody is listening anymore.
                        return Err(Fault::Fatal(Error::Cancelled));
                    }
                    next_offset.store(id + 1, Ordering::Release);
                }
            }
        }
        Ok(())
    }
}
