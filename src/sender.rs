//! Senders: the last stage of the pipeline. Each sender pulls a rendered [`TaskResult`] and
//! writes it back to the originating socket.

use crate::queue::WorkQueue;
use crate::task::TaskResult;
use log::warn;
use std::io::Write;
use std::sync::Arc;

/// Pull results from `results` until it is shut down and drained.
pub fn run_sender(results: Arc<WorkQueue<TaskResult>>) {
    while let Some(result) = results.take() {
        if let Err(e) = (&*result.socket).write_all(&result.bytes) {
            warn!("send failed: {e}");
        }
    }
}
