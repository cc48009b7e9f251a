//! adaapd: a recursive filesystem listener for a media library daemon.
//!
//! The [`listener`] module turns inotify's single-level directory events
//! into per-file NEW / CHG / REM notifications for a whole tree.

pub mod cli;
pub mod config;
pub mod listener;
pub mod logging;

pub use config::{LoggingConfig, Settings, WatchConfig};
pub use listener::{
    FileEvent, FileEventKind, Listener, ListenerBuilder, ListenerState, Subscriber, WatchError,
};
