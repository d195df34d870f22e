//! target-stitch
//!
//! A streaming Singer target: consumes tagged Singer protocol messages on
//! standard input, batches records per stream, serializes each batch into
//! one or more JSON request bodies, and ships them to the Stitch import
//! Gate over HTTPS. Acknowledged `STATE` checkpoints are emitted on
//! standard output in input order, regardless of the order HTTP responses
//! actually arrive in.

pub mod batcher;
pub mod cli;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod message;
pub mod pending;
pub mod retry;
pub mod runtime;
pub mod serializer;
pub mod sink;

pub use batcher::{Batcher, BatcherConfig};
pub use config::Config;
pub use error::TargetStitchError;
pub use message::{parse_line, LineMessage, Message};
pub use runtime::Runtime;
pub use sink::{FileSink, HttpSink, Sink, ValidatingSink};
