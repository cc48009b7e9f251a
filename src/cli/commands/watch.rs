//! Watch command - run the listener and print every file event.

use std::io::{self, Write};

use anyhow::Context;

use crate::cli::WatchArgs;
use crate::config::{Settings, WatchConfig};
use crate::listener::{FileEvent, ListenerBuilder, Subscriber};

/// Writes one line per event: `NEW: path` style, or JSON.
pub struct EventPrinter<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> EventPrinter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, event: &FileEvent) -> io::Result<()> {
        if self.json {
            serde_json::to_writer(&mut self.out, event)?;
            writeln!(self.out)?;
        } else {
            writeln!(self.out, "{event}")?;
        }
        self.out.flush()
    }
}

impl<W: Write> Subscriber for EventPrinter<W> {
    fn notify(&mut self, event: FileEvent) {
        if let Err(e) = self.write_event(&event) {
            tracing::warn!("[watch] failed to print event for {}: {e}", event.path.display());
        }
    }
}

/// Apply command-line overrides on top of the `[watch]` settings.
pub fn effective_config(settings: &Settings, args: &WatchArgs) -> WatchConfig {
    let mut config = settings.watch.clone();
    if let Some(root) = &args.root {
        config.root = Some(root.clone());
    }
    if let Some(prefix) = &args.hidden_prefix {
        config.hidden_prefix = prefix.clone();
    }
    if let Some(events) = args.buffer_events {
        config.buffer_events = events;
    }
    config
}

/// Run watch command until Ctrl-C.
pub async fn run(settings: &Settings, args: WatchArgs) -> anyhow::Result<()> {
    let config = effective_config(settings, &args);
    let printer = EventPrinter::new(io::stdout(), args.json);

    let mut listener = ListenerBuilder::from_config(&config)
        .build(printer)
        .context("No directory to watch: pass one or set watch.root")?;
    listener
        .init()
        .with_context(|| format!("Failed to start watching {}", listener.root().display()))?;

    listener.run().await?;
    Ok(())
}
