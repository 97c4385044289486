//! A simple crate fetching resources concurrently and digesting their content.
//!
//! It is made of:
//! - a [`Fetcher`](fetch::Fetcher) interface performing a single unit of work, with an HTTP implementation computing an MD5 digest
//!   of each response body,
//! - a bounded worker [`Pool`](task::Pool) running a fixed number of workers between a task queue and a result queue,
//! - a few task producers reading address lists.
//!
//! ```text
//!     producer ──> task queue ──> N workers (fetcher) ──> result queue ──> consumer
//!                                      ^
//!                               cancellation token
//! ```
//!
//! Both queues are bounded `mpsc` channels acting as backpressure valves: a producer waits once `capacity` tasks are buffered
//! and workers wait once `capacity` results are left undrained. The task receiver is shared by the workers behind an async `Mutex`,
//! the result sender is cloned into each of them. Dropping the task sender closes the task queue; the result queue is closed by the
//! pool once every worker has been joined, so a consumer just drains it until it yields `None`.
//!
//! Failures never cross the pool boundary: each one becomes a result naming the offending address. A failed task is reported,
//! not retried.
//!
//! Cancellation is a single [`CancellationToken`](tokio_util::sync::CancellationToken) shared by every worker. Once cancelled,
//! each still running worker reports one cancellation error and stops, leaving the remaining queued tasks unreported.

pub mod config;
pub use config::Config;

pub mod fetch;
pub mod source;
pub mod task;
