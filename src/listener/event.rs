//! Subscriber-facing file events and the raw notifications they come from.

use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;
use serde::Serialize;

/// Lifecycle change observed for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    /// File is new or was moved in.
    Created,
    /// Existing file was modified.
    Changed,
    /// File was deleted or moved away.
    Removed,
}

impl FileEventKind {
    /// Short tag used when announcing events on a terminal.
    pub fn tag(self) -> &'static str {
        match self {
            FileEventKind::Created => "NEW",
            FileEventKind::Changed => "CHG",
            FileEventKind::Removed => "REM",
        }
    }
}

/// A change to one file under the watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    /// Path of the file, joined onto the root as it was given.
    pub path: PathBuf,
    pub kind: FileEventKind,
    /// Modification time in seconds since the epoch. Always zero for removals.
    pub mtime: i64,
}

impl FileEvent {
    pub fn created(path: PathBuf, mtime: i64) -> Self {
        Self {
            path,
            kind: FileEventKind::Created,
            mtime,
        }
    }

    pub fn changed(path: PathBuf, mtime: i64) -> Self {
        Self {
            path,
            kind: FileEventKind::Changed,
            mtime,
        }
    }

    pub fn removed(path: PathBuf) -> Self {
        Self {
            path,
            kind: FileEventKind::Removed,
            mtime: 0,
        }
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.tag(), self.path.display())
    }
}

/// Receives file events synchronously, in the order they are produced.
///
/// Runs on the listener's thread, so implementations must not block for
/// long. Implemented for closures, channel senders and `Vec<FileEvent>`.
pub trait Subscriber {
    fn notify(&mut self, event: FileEvent);
}

impl<F> Subscriber for F
where
    F: FnMut(FileEvent),
{
    fn notify(&mut self, event: FileEvent) {
        (self)(event);
    }
}

impl Subscriber for Vec<FileEvent> {
    fn notify(&mut self, event: FileEvent) {
        self.push(event);
    }
}

impl Subscriber for tokio::sync::mpsc::UnboundedSender<FileEvent> {
    fn notify(&mut self, event: FileEvent) {
        if self.send(event).is_err() {
            crate::debug_event!("listener", "subscriber channel closed, event dropped");
        }
    }
}

impl Subscriber for crossbeam_channel::Sender<FileEvent> {
    fn notify(&mut self, event: FileEvent) {
        if self.send(event).is_err() {
            crate::debug_event!("listener", "subscriber channel closed, event dropped");
        }
    }
}

bitflags! {
    /// Change flags carried by a raw notification.
    ///
    /// Bit values match the kernel's inotify mask so a raw mask converts
    /// with [`ChangeFlags::from_bits_truncate`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeFlags: u32 {
        const MODIFY = 0x0000_0002;
        const MOVED_FROM = 0x0000_0040;
        const MOVED_TO = 0x0000_0080;
        const CREATE = 0x0000_0100;
        const DELETE = 0x0000_0200;
        const DELETE_SELF = 0x0000_0400;
        const MOVE_SELF = 0x0000_0800;
        const QUEUE_OVERFLOW = 0x0000_4000;
        const IGNORED = 0x0000_8000;
        const IS_DIR = 0x4000_0000;
    }
}

/// One undecoded notification: which watch fired, what happened, and the
/// entry name when the change concerns a child of the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent<'a, H> {
    pub handle: H,
    pub flags: ChangeFlags,
    pub name: Option<&'a OsStr>,
}

/// What the listener does with a raw notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    DirectorySelfDeleted,
    RemoveDirectory,
    AddDirectory,
    FileSelfDeleted,
    RemoveFile,
    AddFile,
    ChangeFile,
    /// The kernel dropped events; the tree may now be out of sync.
    Overflow,
    /// The kernel released a watch (after deletion or explicit removal).
    WatchReleased,
    Unknown,
}

impl<H> RawEvent<'_, H> {
    /// Decide the action for this event. Flags are a true bitmask, so the
    /// checks run in precedence order and the first match wins.
    pub fn action(&self) -> EventAction {
        let flags = self.flags;
        if flags.contains(ChangeFlags::QUEUE_OVERFLOW) {
            return EventAction::Overflow;
        }

        if flags.contains(ChangeFlags::IS_DIR) {
            if flags.contains(ChangeFlags::DELETE_SELF) {
                EventAction::DirectorySelfDeleted
            } else if flags.intersects(ChangeFlags::DELETE | ChangeFlags::MOVED_FROM) {
                EventAction::RemoveDirectory
            } else if flags.intersects(ChangeFlags::MOVED_TO | ChangeFlags::CREATE) {
                EventAction::AddDirectory
            } else {
                EventAction::Unknown
            }
        } else if flags.contains(ChangeFlags::DELETE_SELF) {
            // Also fires for the watched directory itself, without IS_DIR.
            EventAction::FileSelfDeleted
        } else if flags.intersects(ChangeFlags::MOVED_FROM | ChangeFlags::DELETE) {
            EventAction::RemoveFile
        } else if flags.intersects(ChangeFlags::MOVED_TO | ChangeFlags::CREATE) {
            EventAction::AddFile
        } else if flags.contains(ChangeFlags::MODIFY) {
            EventAction::ChangeFile
        } else if flags.contains(ChangeFlags::IGNORED) {
            EventAction::WatchReleased
        } else {
            EventAction::Unknown
        }
    }
}
