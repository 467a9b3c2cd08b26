//! A multi-user, quota-enforced file storage service reachable over a line-oriented TCP
//! protocol.
//!
//! Requests flow through three thread pools connected by bounded queues: connection
//! readers parse command lines (and, for `UPLOAD`, the payload that follows one), request
//! workers perform the catalog and filesystem work each command describes, and senders
//! write the rendered response back to the client.

pub mod config;
pub mod error;
pub mod filelock;
pub mod protocol;
pub mod queue;
pub mod reader;
pub mod sender;
pub mod server;
pub mod task;
pub mod users;
pub mod worker;

pub use config::ServerConfig;
pub use server::Server;
