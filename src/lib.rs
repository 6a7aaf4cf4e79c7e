//! chunkfs library
//!
//! Chunked file synchronization between a client and a sandboxed HTTP store:
//! files are compared window by window and only differing chunks move.

pub mod catalog;
pub mod checksum;
pub mod chunk;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod delta;
pub mod error;
pub mod logger;
pub mod multipart;
pub mod protocol;
pub mod sandbox;
pub mod server;
pub mod store;
pub mod sync;
pub mod transport;

pub use error::{ErrorKind, FsError, Result};
