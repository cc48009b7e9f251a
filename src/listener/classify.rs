//! Directory entry classification.

use std::ffi::OsStr;
use std::fs::{self, FileType};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use super::error::ClassifyError;

/// The two entry types the listener tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Result of a successful classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    /// Modification time in seconds since the epoch.
    pub mtime: i64,
}

/// Stat `path` without following symlinks and classify it.
///
/// Anything that is not a regular file or a directory (symlinks, fifos,
/// sockets, devices) is rejected with [`ClassifyError::Unsupported`].
pub fn classify(path: &Path) -> Result<Entry, ClassifyError> {
    let metadata = fs::symlink_metadata(path).map_err(|source| ClassifyError::Stat {
        path: path.to_path_buf(),
        source,
    })?;

    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        return Err(ClassifyError::Unsupported {
            path: path.to_path_buf(),
            kind: describe(file_type),
        });
    };

    Ok(Entry {
        kind,
        mtime: metadata.mtime(),
    })
}

/// Whether `name` starts with the reserved hidden prefix.
///
/// An empty prefix hides nothing.
pub fn is_hidden(name: &OsStr, prefix: &str) -> bool {
    !prefix.is_empty() && name.as_bytes().starts_with(prefix.as_bytes())
}

fn describe(file_type: FileType) -> &'static str {
    if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else {
        "unknown"
    }
}
