//! Watch registration with the OS notification facility.

use std::fmt;
use std::hash::Hash;
use std::io;
use std::path::Path;

use inotify::{WatchDescriptor, WatchMask, Watches};

/// Registers and releases per-directory watches.
///
/// The tree only ever talks to the notification facility through this
/// trait, which keeps watch bookkeeping testable without a kernel.
pub trait WatchBackend {
    /// Opaque identifier handed back for every registered directory.
    type Handle: Clone + Eq + Hash + fmt::Debug;

    /// Start watching `path` for self-delete, create, delete, moves in and
    /// out, and modification of its direct entries.
    fn add_watch(&mut self, path: &Path) -> io::Result<Self::Handle>;

    /// Stop watching. Fails if the handle is already gone.
    fn remove_watch(&mut self, handle: Self::Handle) -> io::Result<()>;
}

/// Change classes registered for every directory.
pub fn directory_mask() -> WatchMask {
    WatchMask::DELETE_SELF
        | WatchMask::MOVED_TO
        | WatchMask::CREATE
        | WatchMask::MOVED_FROM
        | WatchMask::DELETE
        | WatchMask::MODIFY
        | WatchMask::ONLYDIR
}

impl WatchBackend for Watches {
    type Handle = WatchDescriptor;

    fn add_watch(&mut self, path: &Path) -> io::Result<WatchDescriptor> {
        self.add(path, directory_mask())
    }

    fn remove_watch(&mut self, handle: WatchDescriptor) -> io::Result<()> {
        self.remove(handle)
    }
}
