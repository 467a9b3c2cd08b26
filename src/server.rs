//! Listener and lifecycle: binds the socket, spawns the three thread pools, and tears
//! everything down in order on shutdown.

use crate::config::ServerConfig;
use crate::filelock::FileLockRegistry;
use crate::queue::WorkQueue;
use crate::reader::{run_reader, ReaderContext};
use crate::sender::run_sender;
use crate::task::{Task, TaskResult};
use crate::users::UserRegistry;
use crate::worker::{run_worker, WorkerContext};
use log::{debug, error, info, warn};
use nix::sys::signal::{self, SigHandler, Signal};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static LISTENER_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handle_shutdown_signal(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    let fd = LISTENER_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Install the shutdown handlers and silence `SIGPIPE` so a client disconnecting mid-write
/// kills the write call, not the process. Safe to call more than once.
fn install_signal_handlers() {
    unsafe {
        let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn);
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(handle_shutdown_signal));
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(handle_shutdown_signal));
    }
}

/// All queues and registries shared by every pool thread.
struct Pipeline {
    intake: Arc<WorkQueue<Arc<TcpStream>>>,
    tasks: Arc<WorkQueue<Task>>,
    results: Arc<WorkQueue<TaskResult>>,
}

/// A running instance of the service. Drop joins nothing by itself; call
/// [`Server::shutdown_and_join`] for an orderly stop.
pub struct Server {
    listener: TcpListener,
    pipeline: Pipeline,
    reader_handles: Vec<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    sender_handles: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn bind(config: &ServerConfig) -> io::Result<Self> {
        install_signal_handlers();

        let listener = TcpListener::bind(&config.bind_addr)?;
        LISTENER_FD.store(listener.as_raw_fd(), Ordering::SeqCst);
        info!("listening on {}", config.bind_addr);

        let users = Arc::new(UserRegistry::new(config.storage_root.clone(), config.default_quota_bytes));
        if config.rehydrate {
            users.rehydrate()?;
        }
        let filelocks = FileLockRegistry::new();

        let pipeline = Pipeline {
            intake: Arc::new(WorkQueue::new(None)),
            tasks: Arc::new(WorkQueue::new(config.task_queue_capacity)),
            results: Arc::new(WorkQueue::new(None)),
        };

        let reader_ctx = Arc::new(ReaderContext::new(pipeline.intake.clone(), pipeline.tasks.clone(), users.clone()));
        let reader_handles = (0..config.reader_threads)
            .map(|i| {
                let ctx = reader_ctx.clone();
                thread::Builder::new()
                    .name(format!("reader-{i}"))
                    .spawn(move || run_reader(ctx))
                    .expect("failed to spawn reader thread")
            })
            .collect();

        let worker_ctx = Arc::new(WorkerContext::new(users.clone(), filelocks.clone()));
        let worker_handles = (0..config.worker_threads)
            .map(|i| {
                let ctx = worker_ctx.clone();
                let tasks = pipeline.tasks.clone();
                let results = pipeline.results.clone();
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || run_worker(ctx, tasks, results))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        let sender_handles = (0..config.sender_threads)
            .map(|i| {
                let results = pipeline.results.clone();
                thread::Builder::new()
                    .name(format!("sender-{i}"))
                    .spawn(move || run_sender(results))
                    .expect("failed to spawn sender thread")
            })
            .collect();

        Ok(Server {
            listener,
            pipeline,
            reader_handles,
            worker_handles,
            sender_handles,
        })
    }

    /// Accept connections until shutdown is requested (`SIGINT`/`SIGTERM`, or the listener
    /// is otherwise closed), then tear the pipeline down in order.
    pub fn run(self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {peer}");
                    self.pipeline.intake.offer(Arc::new(stream));
                }
                Err(e) => {
                    if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("accept error: {e}");
                }
            }
        }
        self.shutdown_and_join();
        Ok(())
    }

    /// Drain and join every pool, in reader -> worker -> sender order, so no stage outlives
    /// the queue that feeds it.
    pub fn shutdown_and_join(self) {
        info!("shutting down");
        self.pipeline.intake.shutdown();
        for h in self.reader_handles {
            if h.join().is_err() {
                error!("reader thread panicked");
            }
        }
        self.pipeline.tasks.shutdown();
        for h in self.worker_handles {
            if h.join().is_err() {
                error!("worker thread panicked");
            }
        }
        self.pipeline.results.shutdown();
        for h in self.sender_handles {
            if h.join().is_err() {
                error!("sender thread panicked");
            }
        }
        info!("shutdown complete");
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}
