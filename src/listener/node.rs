//! In-memory mirror of one watched directory.

use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::backend::WatchBackend;
use super::classify::{EntryKind, classify, is_hidden};
use super::error::WatchError;
use super::event::{FileEvent, Subscriber};

/// Watches registered or released by a cascade, with the directory each
/// one belongs to.
pub type WatchedDirs<H> = Vec<(H, PathBuf)>;

/// Everything a node mutation needs besides the node itself.
pub struct TreeContext<'a, B> {
    pub backend: &'a mut B,
    pub subscriber: &'a mut dyn Subscriber,
    pub hidden_prefix: &'a str,
}

/// One watched directory.
///
/// Tracks the plain files directly inside it and exclusively owns the
/// nodes of its subdirectories. The watch handle is present from a
/// successful [`initialize`](Self::initialize) until teardown.
#[derive(Debug)]
pub struct DirectoryNode<H> {
    path: PathBuf,
    files: HashSet<OsString>,
    children: HashMap<OsString, DirectoryNode<H>>,
    handle: Option<H>,
}

impl<H: Clone + std::fmt::Debug> DirectoryNode<H> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            files: HashSet::new(),
            children: HashMap::new(),
            handle: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    pub fn tracked_files(&self) -> impl Iterator<Item = &OsStr> {
        self.files.iter().map(OsString::as_os_str)
    }

    pub fn is_tracking(&self, name: &OsStr) -> bool {
        self.files.contains(name)
    }

    pub fn subdirectories(&self) -> impl Iterator<Item = &OsStr> {
        self.children.keys().map(OsString::as_os_str)
    }

    pub fn child(&self, name: &OsStr) -> Option<&DirectoryNode<H>> {
        self.children.get(name)
    }

    pub(crate) fn child_mut(&mut self, name: &OsStr) -> Option<&mut DirectoryNode<H>> {
        self.children.get_mut(name)
    }

    /// Register the watch for this directory, then scan it.
    ///
    /// Subdirectories are initialized depth-first and every plain file is
    /// reported as created, so the initial scan looks exactly like files
    /// appearing one by one. Returns this node's handle and the handles of
    /// every descendant created along the way.
    ///
    /// If the watch cannot be registered or the directory cannot be listed,
    /// nothing stays registered and the error is returned.
    pub fn initialize<B>(
        &mut self,
        cx: &mut TreeContext<'_, B>,
    ) -> Result<(H, WatchedDirs<H>), WatchError>
    where
        B: WatchBackend<Handle = H>,
    {
        let handle = cx
            .backend
            .add_watch(&self.path)
            .map_err(|source| WatchError::WatchFailed {
                path: self.path.clone(),
                source,
            })?;

        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(source) => {
                release_watch(cx.backend, &self.path, handle);
                return Err(WatchError::ListFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        crate::debug_event!("listener", "watching", "{}", self.path.display());
        self.handle = Some(handle.clone());

        let mut created = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("[listener] error reading {}: {e}", self.path.display());
                    continue;
                }
            };

            let name = entry.file_name();
            if is_hidden(&name, cx.hidden_prefix) {
                tracing::trace!("[listener] skipping hidden {}", entry.path().display());
                continue;
            }

            let info = match classify(&entry.path()) {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!("[listener] skipping entry: {e}");
                    continue;
                }
            };

            match info.kind {
                EntryKind::Directory => created.extend(self.add_directory(&name, cx)),
                EntryKind::File => self.track_new_file(name, info.mtime, cx.subscriber),
            }
        }

        Ok((handle, created))
    }

    /// A file appeared. Classify it, track it, and report it as created.
    pub fn add_file(&mut self, name: &OsStr, subscriber: &mut dyn Subscriber) {
        let path = self.path.join(name);
        let info = match classify(&path) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("[listener] ignoring new entry: {e}");
                return;
            }
        };

        if info.kind != EntryKind::File {
            tracing::warn!(
                "[listener] expected file {} in {}, got {:?}",
                name.to_string_lossy(),
                self.path.display(),
                info.kind
            );
            return;
        }

        self.track_new_file(name.to_os_string(), info.mtime, subscriber);
    }

    /// A file was deleted or moved away.
    ///
    /// The removal is reported even if the file was not tracked.
    pub fn remove_file(&mut self, name: &OsStr, subscriber: &mut dyn Subscriber) {
        if !self.files.remove(name) {
            tracing::warn!(
                "[listener] {} told to remove untracked file {}",
                self.path.display(),
                name.to_string_lossy()
            );
        }
        subscriber.notify(FileEvent::removed(self.path.join(name)));
    }

    /// A file was modified. Untracked files are picked up on the way.
    pub fn change_file(&mut self, name: &OsStr, subscriber: &mut dyn Subscriber) {
        if !self.files.contains(name) {
            tracing::warn!(
                "[listener] {} told to change untracked file {}",
                self.path.display(),
                name.to_string_lossy()
            );
            self.files.insert(name.to_os_string());
        }

        let path = self.path.join(name);
        let info = match classify(&path) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("[listener] ignoring change: {e}");
                return;
            }
        };

        if info.kind != EntryKind::File {
            tracing::warn!(
                "[listener] expected file {} in {}, got {:?}",
                name.to_string_lossy(),
                self.path.display(),
                info.kind
            );
            return;
        }

        subscriber.notify(FileEvent::changed(path, info.mtime));
    }

    /// A directory appeared. Builds and initializes its node, reporting
    /// every file beneath it, and returns the new watches.
    pub fn add_directory<B>(&mut self, name: &OsStr, cx: &mut TreeContext<'_, B>) -> WatchedDirs<H>
    where
        B: WatchBackend<Handle = H>,
    {
        if self.children.contains_key(name) {
            tracing::warn!(
                "[listener] {} is already tracking a directory named {}",
                self.path.display(),
                name.to_string_lossy()
            );
            return Vec::new();
        }

        let mut child = DirectoryNode::new(self.path.join(name));
        match child.initialize(cx) {
            Ok((handle, mut added)) => {
                added.push((handle, child.path.clone()));
                self.children.insert(name.to_os_string(), child);
                added
            }
            Err(e) => {
                tracing::warn!("[listener] not tracking new directory: {e}");
                Vec::new()
            }
        }
    }

    /// A directory was deleted or moved away. Detaches its node and tears
    /// the whole subtree down, reporting every file in it as removed.
    /// Returns the released watches, the detached directory included.
    pub fn remove_directory<B>(
        &mut self,
        name: &OsStr,
        cx: &mut TreeContext<'_, B>,
    ) -> WatchedDirs<H>
    where
        B: WatchBackend<Handle = H>,
    {
        let Some(mut child) = self.children.remove(name) else {
            tracing::warn!(
                "[listener] {} isn't tracking a directory named {}",
                self.path.display(),
                name.to_string_lossy()
            );
            return Vec::new();
        };

        let mut removed = Vec::new();
        child.tear_down(cx.backend, Some(&mut *cx.subscriber), &mut removed);
        removed
    }

    /// Tear this node and everything below it down without notifying
    /// anyone. Used at shutdown, where nothing was actually deleted.
    pub fn close<B>(&mut self, backend: &mut B) -> WatchedDirs<H>
    where
        B: WatchBackend<Handle = H>,
    {
        let mut removed = Vec::new();
        self.tear_down(backend, None, &mut removed);
        removed
    }

    fn track_new_file(&mut self, name: OsString, mtime: i64, subscriber: &mut dyn Subscriber) {
        let path = self.path.join(&name);
        if !self.files.insert(name) {
            tracing::warn!("[listener] already tracking file {}", path.display());
            return;
        }
        subscriber.notify(FileEvent::created(path, mtime));
    }

    fn tear_down<'s, B>(
        &mut self,
        backend: &mut B,
        mut subscriber: Option<&mut (dyn Subscriber + 's)>,
        removed: &mut WatchedDirs<H>,
    ) where
        B: WatchBackend<Handle = H>,
    {
        if let Some(subscriber) = subscriber.as_deref_mut() {
            for name in &self.files {
                subscriber.notify(FileEvent::removed(self.path.join(name)));
            }
        }
        self.files.clear();

        for (_, mut child) in self.children.drain() {
            child.tear_down(backend, subscriber.as_deref_mut(), removed);
        }

        if let Some(handle) = self.handle.take() {
            release_watch(backend, &self.path, handle.clone());
            removed.push((handle, self.path.clone()));
        }
    }
}

impl<H> Drop for DirectoryNode<H> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!(
                "[listener] dropping {} with its watch still open",
                self.path.display()
            );
        }
    }
}

/// Release a watch, tolerating watches the kernel already dropped.
fn release_watch<B: WatchBackend>(backend: &mut B, path: &Path, handle: B::Handle) {
    match backend.remove_watch(handle) {
        Ok(()) => crate::debug_event!("listener", "unwatched", "{}", path.display()),
        // EINVAL: the directory is gone and the kernel released the watch first.
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
            tracing::debug!("[listener] watch on {} already released", path.display());
        }
        Err(e) => tracing::warn!("[listener] couldn't remove watch on {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::backend::testing::MemoryBackend;
    use crate::listener::event::FileEventKind;
    use tempfile::TempDir;

    fn context<'a>(
        backend: &'a mut MemoryBackend,
        events: &'a mut Vec<FileEvent>,
    ) -> TreeContext<'a, MemoryBackend> {
        TreeContext {
            backend,
            subscriber: events,
            hidden_prefix: ".",
        }
    }

    #[test]
    fn test_initialize_reports_every_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.mp3"), b"a").unwrap();
        fs::create_dir_all(root.join("album/disc1")).unwrap();
        fs::write(root.join("album/disc1/b.mp3"), b"b").unwrap();
        fs::write(root.join(".hidden"), b"h").unwrap();
        fs::create_dir(root.join(".cache")).unwrap();
        fs::write(root.join(".cache/c.mp3"), b"c").unwrap();

        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();
        let mut node = DirectoryNode::new(root.to_path_buf());
        let (handle, descendants) = node.initialize(&mut context(&mut backend, &mut events)).unwrap();

        assert_eq!(node.handle(), Some(&handle));
        assert_eq!(descendants.len(), 2);
        assert_eq!(backend.live.len(), 3);

        let mut created: Vec<_> = events
            .iter()
            .inspect(|e| assert_eq!(e.kind, FileEventKind::Created))
            .map(|e| e.path.clone())
            .collect();
        created.sort();
        assert_eq!(
            created,
            vec![root.join("a.mp3"), root.join("album/disc1/b.mp3")]
        );

        assert!(node.is_tracking(OsStr::new("a.mp3")));
        assert!(!node.is_tracking(OsStr::new(".hidden")));
        assert!(node.child(OsStr::new(".cache")).is_none());

        node.close(&mut backend);
    }

    #[test]
    fn test_initialize_fails_without_registering() {
        let temp_dir = TempDir::new().unwrap();
        let mut backend = MemoryBackend::default();
        backend.refuse.insert(temp_dir.path().to_path_buf());
        let mut events = Vec::new();

        let mut node = DirectoryNode::new(temp_dir.path().to_path_buf());
        let result = node.initialize(&mut context(&mut backend, &mut events));

        assert!(matches!(result, Err(WatchError::WatchFailed { .. })));
        assert!(node.handle().is_none());
        assert!(backend.live.is_empty());
    }

    #[test]
    fn test_initialize_releases_watch_when_listing_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();

        let mut node = DirectoryNode::new(missing);
        let result = node.initialize(&mut context(&mut backend, &mut events));

        assert!(matches!(result, Err(WatchError::ListFailed { .. })));
        assert_eq!(backend.registered.len(), 1);
        assert!(backend.live.is_empty());
    }

    #[test]
    fn test_file_mutations() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();
        let mut node = DirectoryNode::new(root.to_path_buf());
        node.initialize(&mut context(&mut backend, &mut events)).unwrap();

        fs::write(root.join("song.ogg"), b"x").unwrap();
        node.add_file(OsStr::new("song.ogg"), &mut events);
        // Duplicate creation is suppressed.
        node.add_file(OsStr::new("song.ogg"), &mut events);
        node.change_file(OsStr::new("song.ogg"), &mut events);
        node.remove_file(OsStr::new("song.ogg"), &mut events);

        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FileEventKind::Created,
                FileEventKind::Changed,
                FileEventKind::Removed
            ]
        );
        assert!(events.iter().all(|e| e.path == root.join("song.ogg")));
        assert!(!node.is_tracking(OsStr::new("song.ogg")));

        node.close(&mut backend);
    }

    #[test]
    fn test_add_file_ignores_directories_and_missing_entries() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();
        let mut node = DirectoryNode::new(root.to_path_buf());
        node.initialize(&mut context(&mut backend, &mut events)).unwrap();

        fs::create_dir(root.join("dir")).unwrap();
        node.add_file(OsStr::new("dir"), &mut events);
        node.add_file(OsStr::new("vanished"), &mut events);

        assert!(events.is_empty());
        assert_eq!(node.tracked_files().count(), 0);

        node.close(&mut backend);
    }

    #[test]
    fn test_change_untracked_file_self_heals() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();
        let mut node = DirectoryNode::new(root.to_path_buf());
        node.initialize(&mut context(&mut backend, &mut events)).unwrap();

        fs::write(root.join("late.wav"), b"x").unwrap();
        node.change_file(OsStr::new("late.wav"), &mut events);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FileEventKind::Changed);
        assert!(node.is_tracking(OsStr::new("late.wav")));

        node.close(&mut backend);
    }

    #[test]
    fn test_remove_untracked_file_still_reports() {
        let temp_dir = TempDir::new().unwrap();
        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();
        let mut node = DirectoryNode::new(temp_dir.path().to_path_buf());
        node.initialize(&mut context(&mut backend, &mut events)).unwrap();

        node.remove_file(OsStr::new("ghost"), &mut events);

        assert_eq!(events, vec![FileEvent::removed(temp_dir.path().join("ghost"))]);
        node.close(&mut backend);
    }

    #[test]
    fn test_directory_cascade() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();
        let mut node = DirectoryNode::new(root.to_path_buf());
        node.initialize(&mut context(&mut backend, &mut events)).unwrap();

        fs::create_dir_all(root.join("artist/album")).unwrap();
        fs::write(root.join("artist/cover.jpg"), b"j").unwrap();
        fs::write(root.join("artist/album/01.flac"), b"f").unwrap();

        let added = node.add_directory(OsStr::new("artist"), &mut context(&mut backend, &mut events));
        assert_eq!(added.len(), 2);
        assert_eq!(events.len(), 2);
        assert_eq!(backend.live.len(), 3);

        // A second add of the same name is refused.
        let again = node.add_directory(OsStr::new("artist"), &mut context(&mut backend, &mut events));
        assert!(again.is_empty());
        assert_eq!(backend.live.len(), 3);

        events.clear();
        let removed =
            node.remove_directory(OsStr::new("artist"), &mut context(&mut backend, &mut events));
        assert_eq!(removed.len(), 2);
        assert_eq!(backend.live.len(), 1);
        assert!(node.child(OsStr::new("artist")).is_none());

        let mut gone: Vec<_> = events
            .iter()
            .inspect(|e| assert_eq!(e.kind, FileEventKind::Removed))
            .map(|e| e.path.clone())
            .collect();
        gone.sort();
        assert_eq!(
            gone,
            vec![root.join("artist/album/01.flac"), root.join("artist/cover.jpg")]
        );

        // Unknown directories are a no-op.
        let none = node.remove_directory(OsStr::new("artist"), &mut context(&mut backend, &mut events));
        assert!(none.is_empty());

        node.close(&mut backend);
    }

    #[test]
    fn test_close_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/track.mp3"), b"x").unwrap();

        let mut backend = MemoryBackend::default();
        let mut events = Vec::new();
        let mut node = DirectoryNode::new(root.to_path_buf());
        node.initialize(&mut context(&mut backend, &mut events)).unwrap();
        events.clear();

        let removed = node.close(&mut backend);

        assert_eq!(removed.len(), 2);
        assert!(events.is_empty());
        assert!(backend.live.is_empty());
        assert!(node.handle().is_none());
    }
}
