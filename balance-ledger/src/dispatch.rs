//! Worker dispatch for store interactions
//!
//! ```text
//!   caller thread                 tokio runtime
//!  ┌──────────────┐  spawn   ┌──────────────────────────┐
//!  │ dispatch(f)  │─────────▶│ acquire worker permit     │
//!  │  returns     │          │ run f (store round trip)  │
//!  │  Deferred<T> │◀─ ─ ─ ─ ─│ send Result<T> (oneshot)  │
//!  └──────────────┘          └──────────────────────────┘
//! ```
//!
//! The caller never waits on the store. It observes completion by awaiting
//! the [`Deferred`], blocking on it from a plain thread, or registering a
//! callback.

use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tracing::error;

/// Bounded pool of worker slots on a tokio runtime
#[derive(Clone)]
pub struct Dispatcher {
    handle: Handle,
    permits: Arc<Semaphore>,
    worker_limit: usize,
}

impl Dispatcher {
    /// Dispatch onto `handle`, at most `worker_limit` units in flight
    ///
    /// `worker_limit` must be between 1 and [`Semaphore::MAX_PERMITS`].
    pub fn new(handle: Handle, worker_limit: usize) -> Result<Self> {
        if worker_limit == 0 || worker_limit > Semaphore::MAX_PERMITS {
            return Err(Error::InvalidArgument(format!(
                "worker_limit must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                worker_limit
            )));
        }

        Ok(Self {
            handle,
            permits: Arc::new(Semaphore::new(worker_limit)),
            worker_limit,
        })
    }

    /// Dispatch onto the runtime the caller is running in
    pub fn current(worker_limit: usize) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Concurrency(format!("No tokio runtime: {}", e)))?;
        Self::new(handle, worker_limit)
    }

    /// Configured number of worker slots
    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    /// Worker slots not currently held
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop handing out worker slots
    ///
    /// Work already running completes. Work still waiting for a slot fails
    /// with [`Error::Concurrency`].
    pub fn close(&self) {
        self.permits.close();
    }

    /// Run `work` on a worker and return its deferred result
    pub fn dispatch<T, F>(&self, work: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);

        self.handle.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => work.await,
                Err(_) => Err(Error::Concurrency("Worker pool closed".to_string())),
            };

            if let Err(e) = &result {
                if !matches!(e, Error::InvalidArgument(_)) {
                    error!(kind = e.kind(), "Ledger operation failed: {}", e);
                }
            }

            // Receiver may have been dropped; the work still ran
            let _ = tx.send(result);
        });

        Deferred::pending(rx)
    }
}

/// Outcome of an operation that completes exactly once
///
/// Implements [`Future`]; use [`Deferred::wait`] from threads outside the
/// runtime.
#[must_use = "a deferred result does nothing unless awaited or waited on"]
pub struct Deferred<T> {
    state: State<T>,
}

enum State<T> {
    Ready(Option<Result<T>>),
    Pending(oneshot::Receiver<Result<T>>),
}

impl<T> Unpin for Deferred<T> {}

impl<T> Deferred<T> {
    /// Already-successful result
    pub fn completed(value: T) -> Self {
        Self {
            state: State::Ready(Some(Ok(value))),
        }
    }

    /// Already-failed result
    pub fn failed(err: Error) -> Self {
        Self {
            state: State::Ready(Some(Err(err))),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self {
            state: State::Pending(rx),
        }
    }

    /// True if the result was known when the deferred value was created
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(Some(_)))
    }

    /// Block the current thread until the result arrives
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context;
    /// `.await` the deferred value there instead.
    pub fn wait(self) -> Result<T> {
        match self.state {
            State::Ready(slot) => slot.unwrap_or_else(consumed),
            State::Pending(rx) => rx.blocking_recv().unwrap_or_else(|_| dropped()),
        }
    }

    /// Invoke `callback` with the result once it arrives
    ///
    /// Ready results are delivered on the calling thread; pending ones on a
    /// task spawned onto `handle`.
    pub fn on_complete<F>(self, handle: &Handle, callback: F)
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        match self.state {
            State::Ready(slot) => callback(slot.unwrap_or_else(consumed)),
            State::Pending(rx) => {
                handle.spawn(async move {
                    callback(rx.await.unwrap_or_else(|_| dropped()));
                });
            }
        }
    }
}

fn consumed<T>() -> Result<T> {
    Err(Error::Concurrency(
        "Deferred result already consumed".to_string(),
    ))
}

fn dropped<T>() -> Result<T> {
    Err(Error::Concurrency(
        "Worker dropped the result channel".to_string(),
    ))
}

impl<T> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            State::Ready(slot) => Poll::Ready(slot.take().unwrap_or_else(consumed)),
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| dropped())),
        }
    }
}
