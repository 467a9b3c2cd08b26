//! The unit of work handed from a reader thread to a worker thread, and the unit handed
//! from a worker thread to a sender thread.

use std::net::TcpStream;
use std::sync::Arc;

#[derive(Debug)]
pub enum TaskDetail {
    Upload { filename: String, size: u64, payload: Vec<u8> },
    Download { filename: String },
    Delete { filename: String },
    List,
}

/// One dispatched request, queued by a reader and consumed by a worker.
pub struct Task {
    pub socket: Arc<TcpStream>,
    pub session_id: u64,
    pub username: String,
    pub detail: TaskDetail,
}

/// A fully rendered response, queued by a worker and consumed by a sender. `bytes` already
/// contains the complete wire response (`OK\n`, `ERR <reason>\n`, or a data payload) so the
/// sender never needs to branch on the outcome.
pub struct TaskResult {
    pub socket: Arc<TcpStream>,
    pub bytes: Vec<u8>,
}
