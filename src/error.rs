//! Error types for dsync-core

use thiserror::Error;

/// Errors surfaced by the replication brain.
///
/// The quoter is infallible and has no variant here. The stream
/// adapter is a thin wrapper over a `Sink` whose own fallible
/// operations return `std::io::Result` directly, so it has no variant
/// here either.
#[derive(Error, Debug)]
pub enum Error {
    #[error("replication brain: {0}")]
    Brain(String),
}

pub type Result<T> = std::result::Result<T, Error>;
