//! Connection readers: the first stage of the pipeline. Each reader pulls an accepted
//! socket from the intake queue, assigns it a session id, and then repeatedly parses
//! command lines off it until the client disconnects.
//!
//! `UPLOAD`'s payload is read here, not by a worker: the declared byte count must be
//! consumed off the same stream before the next command line can be parsed, and only the
//! thread currently holding the socket's read side can do that without racing another
//! reader.

use crate::error::ErrReason;
use crate::protocol::{self, Command, MAX_LINE};
use crate::queue::WorkQueue;
use crate::task::{Task, TaskDetail};
use crate::users::UserRegistry;
use log::{debug, warn};
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct ReaderContext {
    pub intake: Arc<WorkQueue<Arc<TcpStream>>>,
    pub tasks: Arc<WorkQueue<Task>>,
    pub users: Arc<UserRegistry>,
    next_session: AtomicU64,
}

impl ReaderContext {
    pub fn new(intake: Arc<WorkQueue<Arc<TcpStream>>>, tasks: Arc<WorkQueue<Task>>, users: Arc<UserRegistry>) -> Self {
        ReaderContext {
            intake,
            tasks,
            users,
            next_session: AtomicU64::new(1),
        }
    }

    fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

/// Pull connections from `ctx.intake` until it is shut down and drained.
pub fn run_reader(ctx: Arc<ReaderContext>) {
    while let Some(stream) = ctx.intake.take() {
        let session_id = ctx.next_session_id();
        debug!("session {session_id}: accepted");
        handle_connection(&ctx, stream, session_id);
        debug!("session {session_id}: closed");
    }
}

fn handle_connection(ctx: &ReaderContext, stream: Arc<TcpStream>, session_id: u64) {
    let mut reader = BufReader::new(&*stream);
    loop {
        let raw_line = match recv_line(&mut reader, MAX_LINE) {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(LineError::TooLong) => {
                send_inline(&stream, ErrReason::UnknownCommand);
                continue;
            }
            Err(LineError::Io(e)) => {
                warn!("session {session_id}: read error: {e}");
                return;
            }
        };
        let line = String::from_utf8_lossy(&raw_line);
        match protocol::parse_command(line.trim_end_matches(['\r', '\n'])) {
            Err(reason) => send_inline(&stream, reason),
            Ok(Command::Signup { username }) => match ctx.users.create(&username) {
                Ok(()) => send_ok(&stream),
                Err(reason) => send_inline(&stream, reason),
            },
            Ok(Command::Login { username }) => {
                if ctx.users.find(&username).is_some() {
                    send_ok(&stream);
                } else {
                    send_inline(&stream, ErrReason::NoSuchUser);
                }
            }
            Ok(Command::Upload { username, filename, size }) => {
                let mut payload = vec![0u8; size as usize];
                match reader.read_exact(&mut payload) {
                    Ok(()) => {
                        ctx.tasks.offer(Task {
                            socket: stream.clone(),
                            session_id,
                            username,
                            detail: TaskDetail::Upload { filename, size, payload },
                        });
                    }
                    Err(_) => {
                        send_inline(&stream, ErrReason::UploadRecvFailed);
                        return;
                    }
                }
            }
            Ok(Command::Download { username, filename }) => {
                ctx.tasks.offer(Task {
                    socket: stream.clone(),
                    session_id,
                    username,
                    detail: TaskDetail::Download { filename },
                });
            }
            Ok(Command::Delete { username, filename }) => {
                ctx.tasks.offer(Task {
                    socket: stream.clone(),
                    session_id,
                    username,
                    detail: TaskDetail::Delete { filename },
                });
            }
            Ok(Command::List { username }) => {
                ctx.tasks.offer(Task {
                    socket: stream.clone(),
                    session_id,
                    username,
                    detail: TaskDetail::List,
                });
            }
        }
    }
}

#[derive(Debug)]
enum LineError {
    TooLong,
    Io(io::Error),
}

/// Read one newline-terminated line, one byte at a time so no bytes belonging to a
/// following `UPLOAD` payload are ever consumed past the delimiter. `Ok(None)` means the
/// peer closed the connection before sending anything.
fn recv_line<R: Read>(reader: &mut R, cap: usize) -> Result<Option<Vec<u8>>, LineError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                return if line.is_empty() { Ok(None) } else { Ok(Some(line)) };
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    return Ok(Some(line));
                }
                line.push(byte[0]);
                if line.len() > cap {
                    return Err(LineError::TooLong);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LineError::Io(e)),
        }
    }
}

fn send_ok(stream: &Arc<TcpStream>) {
    let _ = (&**stream).write_all(b"OK\n");
}

fn send_inline(stream: &Arc<TcpStream>, reason: ErrReason) {
    let _ = (&**stream).write_all(&reason.to_line());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_line_splits_on_newline() {
        let mut data: &[u8] = b"UPLOAD alice a.txt 5\nhello";
        let line = recv_line(&mut data, MAX_LINE).unwrap().unwrap();
        assert_eq!(line, b"UPLOAD alice a.txt 5");
        let mut rest = vec![0u8; 5];
        data.read_exact(&mut rest).unwrap();
        assert_eq!(rest, b"hello");
    }

    #[test]
    fn recv_line_empty_close_is_none() {
        let mut data: &[u8] = b"";
        assert!(matches!(recv_line(&mut data, MAX_LINE), Ok(None)));
    }

    #[test]
    fn recv_line_too_long_is_rejected() {
        let long = vec![b'a'; MAX_LINE + 10];
        let mut data: &[u8] = &long;
        assert!(matches!(recv_line(&mut data, MAX_LINE), Err(LineError::TooLong)));
    }
}
