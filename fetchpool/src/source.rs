//! Task producers feeding a [`Pool`](crate::task::Pool).

use std::path::Path;

use tokio::sync::mpsc;

use crate::task::Task;

/// Split `input` into addresses.
///
/// Addresses are separated by any whitespace. Lines starting with `#` are comments.
///
/// ```
/// # use fetchpool::source::parse_addresses;
/// let input = "# news\nwww.reddit.com www.twitter.com\n\n  www.google.com\n";
///
/// assert_eq!(parse_addresses(input), ["www.reddit.com", "www.twitter.com", "www.google.com"]);
/// ```
pub fn parse_addresses(input: &str) -> Vec<Task> {
    input
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(str::split_whitespace)
        .map(str::to_owned)
        .collect()
}

/// Read addresses from the file at `path`, see [`parse_addresses()`].
pub async fn read_addresses(path: impl AsRef<Path>) -> std::io::Result<Vec<Task>> {
    let input = tokio::fs::read_to_string(path.as_ref()).await?;

    let addresses = parse_addresses(&input);

    tracing::debug!("Read {} addresses from `{}`", addresses.len(), path.as_ref().display());

    Ok(addresses)
}

/// Push every task to a pool's task queue, then close it.
///
/// Waits whenever the queue is full. Stops early if the pool is gone, and returns the number of tasks actually enqueued.
pub async fn feed(sender: mpsc::Sender<Task>, tasks: impl IntoIterator<Item = Task>) -> usize {
    let mut count = 0;

    for task in tasks {
        if let Err(mpsc::error::SendError(task)) = sender.send(task).await {
            tracing::debug!("Task queue closed, dropping `{task}` and the following ones.");
            break;
        }
        count += 1;
    }

    tracing::debug!("Enqueued {count} tasks, closing task queue.");

    count
}
