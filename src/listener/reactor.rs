//! The listener: owns the notification channel and drives the watch table.

use std::ffi::OsStr;
use std::future::Future;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use inotify::{Inotify, Watches};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::backend::WatchBackend;
use super::classify::is_hidden;
use super::error::WatchError;
use super::event::{ChangeFlags, EventAction, RawEvent, Subscriber};
use super::table::WatchTable;
use crate::config::WatchConfig;

/// Size of a raw event header as delivered by the kernel.
const EVENT_HEADER: usize = 16;

/// Bytes budgeted per queued event: header plus a typical short name.
pub const EVENT_SLOT: usize = EVENT_HEADER + 16;

/// Smallest buffer guaranteed to hold one event with a maximal name.
pub const MIN_BUFFER_BYTES: usize = EVENT_HEADER + 255 + 1;

pub const DEFAULT_BUFFER_EVENTS: usize = 1024;

/// Lifecycle of a [`Listener`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Uninitialized,
    Running,
    Stopped,
}

/// Recursive watcher over one root directory.
///
/// Call [`init`](Self::init) to scan the tree and start watching, then
/// either [`run_until`](Self::run_until) on a tokio runtime or call
/// [`process_ready`](Self::process_ready) from your own loop whenever the
/// channel is readable.
pub struct Listener<S: Subscriber> {
    root: PathBuf,
    hidden_prefix: String,
    buffer_size: usize,
    subscriber: S,
    state: ListenerState,
    channel: Option<Inotify>,
    buffer: Vec<u8>,
    table: Option<WatchTable<Watches>>,
}

impl<S: Subscriber> Listener<S> {
    /// Listener for `root` with the default hidden prefix and buffer size.
    pub fn new(root: impl Into<PathBuf>, subscriber: S) -> Self {
        Self::with_parts(
            root.into(),
            ".".to_string(),
            DEFAULT_BUFFER_EVENTS * EVENT_SLOT,
            subscriber,
        )
    }

    fn with_parts(root: PathBuf, hidden_prefix: String, buffer_size: usize, subscriber: S) -> Self {
        Self {
            root,
            hidden_prefix,
            buffer_size,
            subscriber,
            state: ListenerState::Uninitialized,
            channel: None,
            buffer: Vec::new(),
            table: None,
        }
    }

    /// Open the channel, allocate the read buffer and scan the root.
    ///
    /// Every file found is reported as created before this returns. On
    /// failure everything opened so far is released and the listener stays
    /// uninitialized, so `init` may be retried.
    pub fn init(&mut self) -> Result<(), WatchError> {
        match self.state {
            ListenerState::Running => return Err(WatchError::AlreadyInitialized),
            ListenerState::Stopped => return Err(WatchError::Stopped),
            ListenerState::Uninitialized => {}
        }

        let channel = Inotify::init().map_err(|e| WatchError::ChannelOpen {
            reason: e.to_string(),
        })?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(self.buffer_size)
            .map_err(|_| WatchError::BufferAlloc {
                bytes: self.buffer_size,
            })?;
        buffer.resize(self.buffer_size, 0);

        let mut table = WatchTable::new(channel.watches(), self.hidden_prefix.clone());
        table.initialize_root(self.root.clone(), &mut self.subscriber)?;

        crate::log_event!(
            "listener",
            "started",
            "{} ({} directories)",
            self.root.display(),
            table.len()
        );

        self.channel = Some(channel);
        self.buffer = buffer;
        self.table = Some(table);
        self.state = ListenerState::Running;
        Ok(())
    }

    /// Read one buffer of pending notifications and dispatch them.
    ///
    /// Returns the number of raw events handled; zero means the channel had
    /// nothing to read. Never blocks.
    pub fn process_ready(&mut self) -> Result<usize, WatchError> {
        match self.state {
            ListenerState::Uninitialized => return Err(WatchError::NotRunning),
            ListenerState::Stopped => return Err(WatchError::Stopped),
            ListenerState::Running => {}
        }
        let (Some(channel), Some(table)) = (self.channel.as_mut(), self.table.as_mut()) else {
            return Err(WatchError::NotRunning);
        };

        let events = match channel.read_events(&mut self.buffer) {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(source) => return Err(WatchError::ReadFailed { source }),
        };

        let mut handled = 0;
        for event in events {
            let raw = RawEvent {
                handle: event.wd,
                flags: ChangeFlags::from_bits_truncate(event.mask.bits()),
                name: event.name,
            };
            handle_event(table, &raw, &mut self.subscriber);
            handled += 1;
        }
        Ok(handled)
    }

    /// Drive the listener on the current tokio runtime until `shutdown`
    /// resolves, then stop it.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), WatchError>
    where
        F: Future<Output = ()>,
    {
        let fd = match (&self.state, self.channel.as_ref()) {
            (ListenerState::Running, Some(channel)) => channel.as_raw_fd(),
            (ListenerState::Stopped, _) => return Err(WatchError::Stopped),
            _ => return Err(WatchError::NotRunning),
        };

        let async_fd = AsyncFd::with_interest(fd, Interest::READABLE)
            .map_err(|source| WatchError::ReactorFailed { source })?;
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    crate::debug_event!("listener", "shutdown requested");
                    break Ok(());
                }
                ready = async_fd.readable() => {
                    let mut guard = match ready {
                        Ok(guard) => guard,
                        Err(source) => break Err(WatchError::ReactorFailed { source }),
                    };
                    match self.process_ready() {
                        // Drained; wait for the next wake.
                        Ok(0) => guard.clear_ready(),
                        // A full buffer may have left more queued, so poll again.
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("[listener] {e}");
                            guard.clear_ready();
                        }
                    }
                }
            }
        };

        drop(async_fd);
        self.stop();
        result
    }

    /// Run until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("[listener] failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Release the channel, the buffer and every watch, in that order.
    ///
    /// No events are delivered for files still tracked. Idempotent.
    pub fn stop(&mut self) {
        if self.state == ListenerState::Stopped {
            return;
        }

        // The table keeps its own handle on the channel, so the descriptor
        // is only closed once the table is gone too.
        self.channel = None;
        self.buffer = Vec::new();
        if let Some(mut table) = self.table.take() {
            table.close();
        }

        if self.state == ListenerState::Running {
            crate::log_event!("listener", "stopped", "{}", self.root.display());
        }
        self.state = ListenerState::Stopped;
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hidden_prefix(&self) -> &str {
        &self.hidden_prefix
    }

    /// Read buffer size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The watch table while running.
    pub fn table(&self) -> Option<&WatchTable<Watches>> {
        self.table.as_ref()
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn subscriber_mut(&mut self) -> &mut S {
        &mut self.subscriber
    }
}

impl<S: Subscriber> Drop for Listener<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decode one raw notification and apply it to the table.
pub(crate) fn handle_event<B: WatchBackend>(
    table: &mut WatchTable<B>,
    event: &RawEvent<'_, B::Handle>,
    subscriber: &mut dyn Subscriber,
) {
    let action = event.action();
    match action {
        EventAction::Overflow => {
            tracing::warn!("[listener] notification queue overflowed, changes were lost");
            return;
        }
        EventAction::WatchReleased => {
            tracing::debug!("[listener] watch {:?} released", event.handle);
            return;
        }
        EventAction::DirectorySelfDeleted | EventAction::FileSelfDeleted => {
            let is_root = table
                .root()
                .and_then(|root| root.handle())
                .is_some_and(|handle| *handle == event.handle);
            if is_root {
                tracing::warn!("[listener] watched root was deleted");
            } else {
                crate::debug_event!("listener", "self-deleted", "watch {:?}", event.handle);
            }
            return;
        }
        EventAction::Unknown => {
            tracing::warn!(
                "[listener] unknown event {:?} on watch {:?}",
                event.flags,
                event.handle
            );
            return;
        }
        _ => {}
    }

    let Some(name) = event.name else {
        tracing::warn!(
            "[listener] {action:?} on watch {:?} without an entry name",
            event.handle
        );
        return;
    };
    if is_hidden(name, table.hidden_prefix()) {
        tracing::trace!("[listener] ignoring hidden entry {}", name.to_string_lossy());
        return;
    }

    dispatch(table, action, &event.handle, name, subscriber);
}

fn dispatch<B: WatchBackend>(
    table: &mut WatchTable<B>,
    action: EventAction,
    handle: &B::Handle,
    name: &OsStr,
    subscriber: &mut dyn Subscriber,
) {
    match action {
        EventAction::RemoveDirectory => table.dispatch_remove_directory(handle, name, subscriber),
        EventAction::AddDirectory => table.dispatch_add_directory(handle, name, subscriber),
        EventAction::RemoveFile => table.dispatch_remove_file(handle, name, subscriber),
        EventAction::AddFile => table.dispatch_add_file(handle, name, subscriber),
        EventAction::ChangeFile => table.dispatch_change_file(handle, name, subscriber),
        EventAction::DirectorySelfDeleted
        | EventAction::FileSelfDeleted
        | EventAction::Overflow
        | EventAction::WatchReleased
        | EventAction::Unknown => {}
    }
}

/// Builder for [`Listener`] with validated settings.
#[derive(Debug, Clone)]
pub struct ListenerBuilder {
    root: Option<PathBuf>,
    hidden_prefix: String,
    buffer_events: usize,
}

impl ListenerBuilder {
    pub fn new() -> Self {
        Self {
            root: None,
            hidden_prefix: ".".to_string(),
            buffer_events: DEFAULT_BUFFER_EVENTS,
        }
    }

    /// Start from the `[watch]` section of the settings.
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            root: config.root.clone(),
            hidden_prefix: config.hidden_prefix.clone(),
            buffer_events: config.buffer_events,
        }
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Entries whose names start with this prefix are ignored. Empty
    /// disables hiding.
    pub fn hidden_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.hidden_prefix = prefix.into();
        self
    }

    /// Size the read buffer for roughly this many queued events.
    pub fn buffer_events(mut self, events: usize) -> Self {
        self.buffer_events = events;
        self
    }

    pub fn build<S: Subscriber>(self, subscriber: S) -> Result<Listener<S>, WatchError> {
        let root = self.root.ok_or(WatchError::InvalidRoot)?;
        if root.as_os_str().is_empty() {
            return Err(WatchError::InvalidRoot);
        }

        let bytes = self.buffer_events.saturating_mul(EVENT_SLOT);
        if bytes < MIN_BUFFER_BYTES {
            return Err(WatchError::BufferSize {
                bytes,
                minimum: MIN_BUFFER_BYTES,
            });
        }

        Ok(Listener::with_parts(root, self.hidden_prefix, bytes, subscriber))
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
