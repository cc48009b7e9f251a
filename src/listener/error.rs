//! Error types for the listener.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from listener setup and operation.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to open notification channel: {reason}")]
    ChannelOpen { reason: String },

    #[error("Read buffer of {bytes} bytes is too small (need at least {minimum})")]
    BufferSize { bytes: usize, minimum: usize },

    #[error("Unable to allocate a read buffer of {bytes} bytes")]
    BufferAlloc { bytes: usize },

    #[error("Cannot watch directory {path}: {source}")]
    WatchFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot list directory {path}: {source}")]
    ListFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from notification channel: {source}")]
    ReadFailed {
        #[source]
        source: io::Error,
    },

    #[error("Failed to register notification channel with the runtime: {source}")]
    ReactorFailed {
        #[source]
        source: io::Error,
    },

    #[error("No root directory configured")]
    InvalidRoot,

    #[error("Listener is not running")]
    NotRunning,

    #[error("Listener is already initialized")]
    AlreadyInitialized,

    #[error("Listener has been stopped")]
    Stopped,
}

/// Why a directory entry could not be classified.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Unable to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported entry type ({kind}): {path}")]
    Unsupported { path: PathBuf, kind: &'static str },
}
