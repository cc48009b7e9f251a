//! Recursive directory listener built on inotify.
//!
//! The kernel only reports changes one directory level deep. This module
//! keeps a mirror of the watched tree so that a single low-level event
//! (a directory moved away, say) fans out into one file event per file
//! beneath it.
//!
//! # Architecture
//!
//! ```text
//! Listener
//!   - inotify channel + read buffer
//!   - decodes raw events into actions
//!         |
//!    WatchTable
//!   - owns the root DirectoryNode
//!   - handle -> directory index
//!         |
//!    DirectoryNode (one per directory)
//!   - tracked files
//!   - owned child nodes
//!         |
//!    Subscriber  <- NEW / CHG / REM file events
//! ```

mod backend;
mod classify;
mod error;
mod event;
mod node;
mod reactor;
mod table;

pub use backend::{WatchBackend, directory_mask};
pub use classify::{Entry, EntryKind, classify, is_hidden};
pub use error::{ClassifyError, WatchError};
pub use event::{ChangeFlags, EventAction, FileEvent, FileEventKind, RawEvent, Subscriber};
pub use node::{DirectoryNode, TreeContext, WatchedDirs};
pub use reactor::{
    DEFAULT_BUFFER_EVENTS, EVENT_SLOT, Listener, ListenerBuilder, ListenerState, MIN_BUFFER_BYTES,
};
pub use table::WatchTable;
