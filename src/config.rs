//! Command-line configuration, parsed with `clap`'s builder API.

use clap::{crate_version, Arg, ArgAction, Command};
use log::LevelFilter;
use std::path::PathBuf;

pub struct ServerConfig {
    pub bind_addr: String,
    pub storage_root: PathBuf,
    pub default_quota_bytes: u64,
    pub reader_threads: usize,
    pub worker_threads: usize,
    pub sender_threads: usize,
    pub task_queue_capacity: Option<usize>,
    pub rehydrate: bool,
    pub log_level: LevelFilter,
}

impl ServerConfig {
    pub fn from_args() -> Self {
        Self::from_iter(std::env::args_os())
    }

    pub fn from_iter<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Command::new("vaultd")
            .version(crate_version!())
            .about("Multi-user quota-enforced file storage service")
            .arg(
                Arg::new("bind")
                    .long("bind")
                    .value_name("HOST:PORT")
                    .default_value("0.0.0.0:9000")
                    .help("address to listen on"),
            )
            .arg(
                Arg::new("data-dir")
                    .long("data-dir")
                    .value_name("PATH")
                    .default_value("storage")
                    .help("root directory under which each user's files are stored"),
            )
            .arg(
                Arg::new("quota")
                    .long("quota")
                    .value_name("BYTES")
                    .default_value("104857600")
                    .help("default per-user quota in bytes (100 MiB)"),
            )
            .arg(
                Arg::new("readers")
                    .long("readers")
                    .value_name("N")
                    .default_value("8")
                    .help("number of connection-reader threads"),
            )
            .arg(
                Arg::new("workers")
                    .long("workers")
                    .value_name("N")
                    .default_value("6")
                    .help("number of request-worker threads"),
            )
            .arg(
                Arg::new("senders")
                    .long("senders")
                    .value_name("N")
                    .default_value("4")
                    .help("number of response-sender threads"),
            )
            .arg(
                Arg::new("task-queue-capacity")
                    .long("task-queue-capacity")
                    .value_name("N")
                    .help("bound the worker queue to N tasks; unbounded if omitted"),
            )
            .arg(
                Arg::new("no-rehydrate")
                    .long("no-rehydrate")
                    .action(ArgAction::SetTrue)
                    .help("skip rebuilding the catalog from files already under the storage root"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .action(ArgAction::Count)
                    .help("increase log verbosity (-v, -vv, -vvv)"),
            )
            .get_matches_from(args);

        let verbosity = matches.get_count("verbose");
        let log_level = match verbosity {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        ServerConfig {
            bind_addr: matches.get_one::<String>("bind").unwrap().clone(),
            storage_root: PathBuf::from(matches.get_one::<String>("data-dir").unwrap()),
            default_quota_bytes: matches
                .get_one::<String>("quota")
                .unwrap()
                .parse()
                .expect("--quota must be a non-negative integer"),
            reader_threads: matches
                .get_one::<String>("readers")
                .unwrap()
                .parse()
                .expect("--readers must be a positive integer"),
            worker_threads: matches
                .get_one::<String>("workers")
                .unwrap()
                .parse()
                .expect("--workers must be a positive integer"),
            sender_threads: matches
                .get_one::<String>("senders")
                .unwrap()
                .parse()
                .expect("--senders must be a positive integer"),
            task_queue_capacity: matches
                .get_one::<String>("task-queue-capacity")
                .map(|v| v.parse().expect("--task-queue-capacity must be a positive integer")),
            rehydrate: !matches.get_flag("no-rehydrate"),
            log_level,
        }
    }
}
