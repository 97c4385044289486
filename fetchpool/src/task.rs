//! This module provides the bounded worker pool.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, Future, FutureExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{resolve_capacity, Config};
use crate::fetch::{self, FetchOutcome, Fetcher};

/// A task is the address of a resource to fetch.
pub type Task = String;

/// Exactly one of an outcome or an error, per consumed task.
pub type TaskResult = Result<FetchOutcome, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("error occurred while getting response for `{address}`: {source}")]
    Fetch {
        address: Task,
        #[source]
        source: fetch::Error,
    },
    #[error("error while waiting for a task: operation cancelled")]
    Cancelled,
}

/// A bounded pool of workers fetching resources concurrently.
///
/// A pool is made of:
/// - a task queue, fed by a producer through the [`mpsc::Sender`] returned by [`Pool::new()`] and closed by dropping it,
/// - `capacity` workers, pulling tasks and pushing results,
/// - a result queue, drained by a consumer through the [`mpsc::Receiver`] returned by [`Pool::new()`] until it yields `None`.
///
/// Both queues are bounded to `capacity`, so a producer waits when workers lag behind and workers wait when the consumer does.
/// Results arrive in completion order.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use std::sync::Arc;
/// # use fetchpool::fetch::{Error, FetchOutcome, Fetcher};
/// # use fetchpool::task::Pool;
/// # use tokio_util::sync::CancellationToken;
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl Fetcher for Echo {
///     async fn fetch(&self, address: &str) -> Result<FetchOutcome, Error> {
///         Ok(FetchOutcome::new(address, fetchpool::fetch::digest(address)))
///     }
/// }
///
/// let (pool, tasks, mut results) = Pool::new(3);
///
/// tokio::spawn(fetchpool::source::feed(tasks, ["a.example".to_owned(), "b.example".to_owned()]));
/// tokio::spawn(pool.run(CancellationToken::new(), Arc::new(Echo)));
///
/// let mut count = 0;
/// while let Some(result) = results.recv().await {
///     assert!(result.is_ok());
///     count += 1;
/// }
/// assert_eq!(count, 2);
/// # })
/// ```
#[derive(Debug)]
pub struct Pool {
    capacity: NonZeroUsize,
    /// The receiving part of the task queue, shared by the workers.
    ///
    /// The next available worker locks it and waits for a task to be received through the channel.
    tasks: Arc<Mutex<mpsc::Receiver<Task>>>,
    /// The sending part of the result queue.
    ///
    /// Every worker owns a clone. This one is only dropped once all of them are joined, which closes the queue.
    results: mpsc::Sender<TaskResult>,
}

impl Pool {
    /// Create a pool of `capacity` workers, `0` meaning [`DEFAULT_CAPACITY`](crate::config::DEFAULT_CAPACITY).
    ///
    /// Return the pool together with the sending part of its task queue and the receiving part of its result queue.
    pub fn new(capacity: usize) -> (Pool, mpsc::Sender<Task>, mpsc::Receiver<TaskResult>) {
        let capacity = resolve_capacity(capacity);

        let (task_sender, task_receiver) = mpsc::channel(capacity.get());
        let (result_sender, result_receiver) = mpsc::channel(capacity.get());

        let pool = Pool {
            capacity,
            tasks: Arc::new(Mutex::new(task_receiver)),
            results: result_sender,
        };

        (pool, task_sender, result_receiver)
    }

    /// Create a pool sized by [`Config::resolved_capacity()`], see [`Pool::new()`].
    #[inline]
    pub fn from_config(config: &Config) -> (Pool, mpsc::Sender<Task>, mpsc::Receiver<TaskResult>) {
        Pool::new(config.resolved_capacity().get())
    }

    #[inline]
    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Run `capacity` workers until the task queue is exhausted or `cancel` is cancelled, then close the result queue.
    ///
    /// On cancellation, every worker still running emits a single [`Error::Cancelled`] and stops: tasks left in the task queue
    /// are dropped without any result. A fetch already in progress is not interrupted by the pool.
    pub async fn run(self, cancel: CancellationToken, fetcher: Arc<dyn Fetcher>) {
        static WORKER_ID: AtomicUsize = AtomicUsize::new(0);
        let size = self.capacity.get();
        let id = WORKER_ID.fetch_add(size, Ordering::Relaxed);

        let workers: Vec<_> = (0..size)
            .map(|i| {
                Worker::new(
                    id.wrapping_add(i),
                    Arc::clone(&self.tasks),
                    self.results.clone(),
                    cancel.clone(),
                    Arc::clone(&fetcher),
                )
            })
            .collect();

        let ids: Vec<_> = workers.iter().map(|worker| worker.id).collect();

        // join barrier: the result queue must outlive every worker
        for (worker, res) in ids.into_iter().zip(future::join_all(workers).await) {
            if let Err(err) = res {
                tracing::warn!("Worker {worker} terminated abnormally: {err}");
            }
        }

        tracing::debug!("All {size} workers stopped, closing result queue.");

        drop(self.results);
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    handle: tokio::task::JoinHandle<()>,
}

impl Worker {
    fn new(
        id: usize,
        tasks: Arc<Mutex<mpsc::Receiver<Task>>>,
        results: mpsc::Sender<TaskResult>,
        cancel: CancellationToken,
        fetcher: Arc<dyn Fetcher>,
    ) -> Worker {
        tracing::debug!("Starting worker {id}...");

        Worker {
            id,
            handle: tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        task = async { tasks.lock().await.recv().await } => Some(task),
                    };

                    let result = match message {
                        None => {
                            tracing::debug!("Cancellation observed, shutting down worker {id}.");

                            let _ = results.send(Err(Error::Cancelled)).await;
                            break;
                        }
                        Some(None) => {
                            tracing::debug!("All tasks exhausted, shutting down worker {id}.");
                            break;
                        }
                        Some(Some(address)) => {
                            tracing::trace!("Executing task `{address}` on worker {id}...");

                            let outcome = fetcher.fetch(&address).await;

                            outcome.map_err(|source| Error::Fetch { address, source })
                        }
                    };

                    if results.send(result).await.is_err() {
                        tracing::warn!("Result queue dropped by its consumer, shutting down worker {id}.");
                        break;
                    }
                }
            }),
        }
    }
}

impl Future for Worker {
    type Output = Result<(), tokio::task::JoinError>;

    #[inline]
    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        self.handle.poll_unpin(cx)
    }
}
