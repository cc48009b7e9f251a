//! Handle-indexed ownership of the watched directory tree.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use super::backend::WatchBackend;
use super::error::WatchError;
use super::event::Subscriber;
use super::node::{DirectoryNode, TreeContext};

/// Owns the root [`DirectoryNode`] and maps every live watch handle to the
/// directory it identifies.
///
/// Nodes own their children, so the index only stores paths and lookups
/// walk down from the root. It is also the only place watches are created
/// or destroyed, always as part of a single cascade.
pub struct WatchTable<B: WatchBackend> {
    backend: B,
    hidden_prefix: String,
    root: Option<DirectoryNode<B::Handle>>,
    index: HashMap<B::Handle, PathBuf>,
}

impl<B: WatchBackend> WatchTable<B> {
    pub fn new(backend: B, hidden_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            hidden_prefix: hidden_prefix.into(),
            root: None,
            index: HashMap::new(),
        }
    }

    /// Scan and watch `root_path` recursively, reporting every file in it.
    pub fn initialize_root(
        &mut self,
        root_path: PathBuf,
        subscriber: &mut dyn Subscriber,
    ) -> Result<(), WatchError> {
        if self.root.is_some() {
            return Err(WatchError::AlreadyInitialized);
        }

        let mut root = DirectoryNode::new(root_path);
        let mut cx = TreeContext {
            backend: &mut self.backend,
            subscriber,
            hidden_prefix: &self.hidden_prefix,
        };
        let (handle, descendants) = root.initialize(&mut cx)?;

        self.index.insert(handle, root.path().to_path_buf());
        self.insert_all(descendants);
        self.root = Some(root);

        crate::log_event!(
            "listener",
            "tracking",
            "{} directories",
            self.index.len()
        );
        Ok(())
    }

    pub fn dispatch_add_file(
        &mut self,
        handle: &B::Handle,
        name: &OsStr,
        subscriber: &mut dyn Subscriber,
    ) {
        if let Some(node) = self.lookup(handle) {
            node.add_file(name, subscriber);
        }
    }

    pub fn dispatch_remove_file(
        &mut self,
        handle: &B::Handle,
        name: &OsStr,
        subscriber: &mut dyn Subscriber,
    ) {
        if let Some(node) = self.lookup(handle) {
            node.remove_file(name, subscriber);
        }
    }

    pub fn dispatch_change_file(
        &mut self,
        handle: &B::Handle,
        name: &OsStr,
        subscriber: &mut dyn Subscriber,
    ) {
        if let Some(node) = self.lookup(handle) {
            node.change_file(name, subscriber);
        }
    }

    pub fn dispatch_add_directory(
        &mut self,
        handle: &B::Handle,
        name: &OsStr,
        subscriber: &mut dyn Subscriber,
    ) {
        let Some(path) = self.index.get(handle) else {
            tracing::warn!("[listener] unable to find directory for watch {handle:?}");
            return;
        };
        let Some(node) = descend(&mut self.root, path) else {
            tracing::warn!("[listener] watch {handle:?} points at untracked {}", path.display());
            return;
        };

        let mut cx = TreeContext {
            backend: &mut self.backend,
            subscriber,
            hidden_prefix: &self.hidden_prefix,
        };
        let added = node.add_directory(name, &mut cx);
        self.insert_all(added);
    }

    pub fn dispatch_remove_directory(
        &mut self,
        handle: &B::Handle,
        name: &OsStr,
        subscriber: &mut dyn Subscriber,
    ) {
        let Some(path) = self.index.get(handle) else {
            tracing::warn!("[listener] unable to find directory for watch {handle:?}");
            return;
        };
        let Some(node) = descend(&mut self.root, path) else {
            tracing::warn!("[listener] watch {handle:?} points at untracked {}", path.display());
            return;
        };

        let mut cx = TreeContext {
            backend: &mut self.backend,
            subscriber,
            hidden_prefix: &self.hidden_prefix,
        };
        let removed = node.remove_directory(name, &mut cx);
        for (handle, path) in removed {
            if self.index.remove(&handle).is_none() {
                tracing::warn!(
                    "[listener] told to remove non-existent entry {handle:?} -> {}",
                    path.display()
                );
            }
        }
    }

    /// Tear the whole tree down without notifying anyone.
    ///
    /// Idempotent: the second call finds no root and only clears the index.
    pub fn close(&mut self) {
        if let Some(mut root) = self.root.take() {
            let removed = root.close(&mut self.backend);
            if removed.len() != self.index.len() {
                tracing::warn!(
                    "[listener] closed {} directories, expected {}",
                    removed.len(),
                    self.index.len()
                );
            }
            crate::debug_event!("listener", "closed", "{} directories", removed.len());
        }
        self.index.clear();
    }

    /// Number of live watches, the root included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, handle: &B::Handle) -> bool {
        self.index.contains_key(handle)
    }

    pub fn hidden_prefix(&self) -> &str {
        &self.hidden_prefix
    }

    pub fn root(&self) -> Option<&DirectoryNode<B::Handle>> {
        self.root.as_ref()
    }

    /// Find the node for a directory by its path (as joined onto the root).
    pub fn node(&self, path: &Path) -> Option<&DirectoryNode<B::Handle>> {
        let root = self.root.as_ref()?;
        let relative = path.strip_prefix(root.path()).ok()?;
        relative.components().try_fold(root, |node, component| match component {
            Component::Normal(name) => node.child(name),
            _ => None,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lookup(&mut self, handle: &B::Handle) -> Option<&mut DirectoryNode<B::Handle>> {
        let Some(path) = self.index.get(handle) else {
            tracing::warn!("[listener] unable to find directory for watch {handle:?}");
            return None;
        };
        let node = descend(&mut self.root, path);
        if node.is_none() {
            tracing::warn!("[listener] watch {handle:?} points at untracked {}", path.display());
        }
        node
    }

    fn insert_all(&mut self, added: Vec<(B::Handle, PathBuf)>) {
        for (handle, path) in added {
            match self.index.entry(handle) {
                Entry::Occupied(existing) => tracing::warn!(
                    "[listener] told to add already-present entry {:?} -> {} (keeping {})",
                    existing.key(),
                    path.display(),
                    existing.get().display()
                ),
                Entry::Vacant(slot) => {
                    slot.insert(path);
                }
            }
        }
    }
}

impl<B: WatchBackend> Drop for WatchTable<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Walk from the root to the node at `path`.
fn descend<'a, H: Clone + std::fmt::Debug>(
    root: &'a mut Option<DirectoryNode<H>>,
    path: &Path,
) -> Option<&'a mut DirectoryNode<H>> {
    let root = root.as_mut()?;
    let relative = path.strip_prefix(root.path()).ok()?;
    relative
        .components()
        .try_fold(root, |node, component| match component {
            Component::Normal(name) => node.child_mut(name),
            _ => None,
        })
}
