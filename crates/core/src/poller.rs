//! Cooperative, cancellable fixed-interval polling.
//!
//! A poll task sleeps one interval, runs the poll function, and repeats until
//! the function reports [`PollStep::Done`], the attempt ceiling is reached, or
//! the task is cancelled. Polls never overlap: the next sleep starts only after
//! the previous poll future has resolved. Errors returned by the poll function
//! are treated as transient, logged, and still count as an attempt.

use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum PollStep<T> {
    Done(T),
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEnd<T> {
    Completed(T),
    TimedOut { attempts: u32 },
    Cancelled,
}

impl<T> PollEnd<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, PollEnd::Completed(_))
    }
}

/// Owner of a running poll task. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct PollHandle<T> {
    token: CancellationToken,
    task: Option<JoinHandle<PollEnd<T>>>,
}

impl<T> PollHandle<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Token that cancels this poll when triggered.
    pub fn canceller(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn join(mut self) -> PollEnd<T> {
        let Some(task) = self.task.take() else {
            return PollEnd::Cancelled;
        };
        match task.await {
            Ok(end) => end,
            Err(e) => {
                warn!(err = %e, "poller: task aborted");
                PollEnd::Cancelled
            }
        }
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.token.cancel();
        }
    }
}

/// Spawns a poll loop on the current runtime.
///
/// `poll_fn` receives the 1-based attempt number. A `max_attempts` of zero is
/// treated as one.
pub fn start<T, F, Fut>(mut poll_fn: F, interval: Duration, max_attempts: u32) -> PollHandle<T>
where
    T: Send + 'static,
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = Result<PollStep<T>>> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let max_attempts = max_attempts.max(1);

    let task = tokio::spawn(async move {
        let mut attempt = 0u32;
        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => return PollEnd::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }

            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancelled.cancelled() => return PollEnd::Cancelled,
                outcome = poll_fn(attempt) => outcome,
            };

            match outcome {
                Ok(PollStep::Done(value)) => {
                    debug!(attempt, "poller: done");
                    return PollEnd::Completed(value);
                }
                Ok(PollStep::Continue) => {}
                Err(e) => warn!(attempt, err = %e, "poller: transient failure"),
            }

            if attempt >= max_attempts {
                debug!(attempt, "poller: attempt ceiling reached");
                return PollEnd::TimedOut { attempts: attempt };
            }
        }
    });

    PollHandle {
        token,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::error::TubescopeError;

    const TICK: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_done() {
        let handle = start(
            |attempt| async move {
                Ok(if attempt == 3 {
                    PollStep::Done(attempt)
                } else {
                    PollStep::Continue
                })
            },
            TICK,
            10,
        );
        assert_eq!(handle.join().await, PollEnd::Completed(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handle = start(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(PollStep::<()>::Continue) }
            },
            TICK,
            4,
        );
        assert_eq!(handle.join().await, PollEnd::TimedOut { attempts: 4 });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_count_as_attempts() {
        let handle = start(
            |attempt| async move {
                if attempt < 3 {
                    Err(TubescopeError::Rejected {
                        status: 503,
                        detail: "busy".into(),
                    })
                } else {
                    Ok(PollStep::Done("ok"))
                }
            },
            TICK,
            5,
        );
        assert_eq!(handle.join().await, PollEnd::Completed("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handle = start(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(PollStep::<()>::Continue) }
            },
            TICK,
            100,
        );

        tokio::time::sleep(TICK * 2 + Duration::from_millis(1)).await;
        handle.cancel();
        assert_eq!(handle.join().await, PollEnd::Cancelled);

        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(TICK * 10).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
        assert_eq!(seen, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handle = start(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(PollStep::<()>::Continue) }
            },
            TICK,
            100,
        );
        let token = handle.canceller();
        drop(handle);
        assert!(token.is_cancelled());

        tokio::time::sleep(TICK * 5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
