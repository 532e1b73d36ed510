//! Per-job log stream
//!
//! Consumers get the buffered history first, then the live tail. The stream
//! ends right after the `status=<Status>` marker that closes every job log.

use futures::Stream;
use std::sync::Arc;

use super::registry::Job;

/// Drain a job's log as a finite stream of lines
///
/// Wakes on the job's log-length watch instead of polling, so new lines are
/// delivered as soon as they are appended.
pub fn drain(job: Arc<Job>) -> impl Stream<Item = String> + Send + 'static {
    async_stream::stream! {
        let mut changes = job.subscribe_log();
        let mut cursor = 0usize;

        loop {
            // Mark the current length as seen before reading, so an append
            // racing with this read still triggers `changed()` below.
            changes.borrow_and_update();
            let (lines, closed) = job.read_log_from(cursor);
            cursor += lines.len();
            for line in lines {
                yield line;
            }

            // A closed log never grows again; its marker was just yielded.
            if closed {
                break;
            }

            if changes.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Collect the whole log once the job finishes
pub async fn collect(job: Arc<Job>) -> Vec<String> {
    use futures::StreamExt;
    drain(job).collect().await
}
