//! Request workers: the middle stage of the pipeline. Each worker pulls a [`Task`], performs
//! the filesystem/catalog work it describes, and hands the rendered response to the sender
//! queue.

use crate::error::ErrReason;
use crate::filelock::FileLockRegistry;
use crate::queue::WorkQueue;
use crate::task::{Task, TaskDetail, TaskResult};
use crate::users::UserRegistry;
use log::debug;
use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared state every worker thread needs: the account/catalog registry, the file-lock
/// registry, and a counter used to mint unique temp-file names.
pub struct WorkerContext {
    pub users: Arc<UserRegistry>,
    pub filelocks: Arc<FileLockRegistry>,
    nonce: AtomicU64,
}

impl WorkerContext {
    pub fn new(users: Arc<UserRegistry>, filelocks: Arc<FileLockRegistry>) -> Self {
        WorkerContext {
            users,
            filelocks,
            nonce: AtomicU64::new(0),
        }
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }
}

fn ok_bytes() -> Vec<u8> {
    b"OK\n".to_vec()
}

/// Pull tasks from `tasks` until it is shut down and drained, rendering each into a
/// [`TaskResult`] pushed onto `results`.
pub fn run_worker(ctx: Arc<WorkerContext>, tasks: Arc<WorkQueue<Task>>, results: Arc<WorkQueue<TaskResult>>) {
    while let Some(task) = tasks.take() {
        let socket = task.socket.clone();
        let session_id = task.session_id;
        let bytes = match &task.detail {
            TaskDetail::Upload { filename, size, payload } => {
                handle_upload(&ctx, &task.username, session_id, filename, *size, payload)
            }
            TaskDetail::Download { filename } => handle_download(&ctx, &task.username, filename),
            TaskDetail::Delete { filename } => handle_delete(&ctx, &task.username, filename),
            TaskDetail::List => handle_list(&ctx, &task.username),
        };
        debug!("session {session_id}: dispatched, {} response bytes", bytes.len());
        results.offer(TaskResult { socket, bytes });
    }
}

fn handle_upload(
    ctx: &WorkerContext,
    username: &str,
    session_id: u64,
    filename: &str,
    size: u64,
    payload: &[u8],
) -> Vec<u8> {
    let _lock = ctx.filelocks.acquire_write(username, filename);

    let user_dir = ctx.users.storage_root().join(username);
    let tmp_path = user_dir.join(format!(".tmp_{session_id}_{:x}", ctx.next_nonce()));

    let file = match fs::File::create(&tmp_path) {
        Ok(f) => f,
        Err(_) => {
            return ErrReason::CannotCreateTmp.to_line();
        }
    };
    if (&file).write_all(payload).is_err() {
        drop(file);
        let _ = fs::remove_file(&tmp_path);
        return ErrReason::UploadRecvFailed.to_line();
    }
    drop(file);

    let user = match ctx.users.find(username) {
        Some(u) => u,
        None => {
            let _ = fs::remove_file(&tmp_path);
            return ErrReason::UserNotFound.to_line();
        }
    };

    let final_path = user_dir.join(filename);
    match user.commit_upload(filename, size, &tmp_path, &final_path) {
        Ok(()) => ok_bytes(),
        Err(reason) => {
            let _ = fs::remove_file(&tmp_path);
            reason.to_line()
        }
    }
}

fn handle_download(ctx: &WorkerContext, username: &str, filename: &str) -> Vec<u8> {
    let _lock = ctx.filelocks.acquire_read(username, filename);
    let path = ctx.users.storage_root().join(username).join(filename);
    match fs::read(&path) {
        Ok(data) => {
            let mut out = format!("OK {}\n", data.len()).into_bytes();
            out.extend_from_slice(&data);
            out
        }
        Err(_) => ErrReason::NotFound.to_line(),
    }
}

fn handle_delete(ctx: &WorkerContext, username: &str, filename: &str) -> Vec<u8> {
    let _lock = ctx.filelocks.acquire_write(username, filename);
    let user = match ctx.users.find(username) {
        Some(u) => u,
        None => return ErrReason::UserNotFound.to_line(),
    };
    match user.remove_entry(filename) {
        None => ErrReason::NotFound.to_line(),
        Some(_) => {
            let path = ctx.users.storage_root().join(username).join(filename);
            let _ = fs::remove_file(&path);
            ok_bytes()
        }
    }
}

fn handle_list(ctx: &WorkerContext, username: &str) -> Vec<u8> {
    let user = match ctx.users.find(username) {
        Some(u) => u,
        None => return ErrReason::UserNotFound.to_line(),
    };
    let mut out = String::new();
    for entry in user.list() {
        out.push_str(&format!("{} {}\n", entry.name, entry.size));
    }
    out.push_str("END\n");
    out.into_bytes()
}
