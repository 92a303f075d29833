//! Configuration file watcher for hot reload.
//!
//! # Design Decisions
//! - The parent directory is watched, not the file: editors that save by
//!   rename would otherwise detach the watch after the first reload
//! - Events for other files in that directory are ignored
//! - A config that fails to load or validate is logged and skipped; the
//!   running engine keeps its current settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::EngineConfig;

/// Pushes a freshly loaded `EngineConfig` whenever the file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<EngineConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<EngineConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    fn touches_config(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }

    fn reload(&self) {
        match load_config(&self.path) {
            Ok(config) => {
                tracing::info!(
                    path = %self.path.display(),
                    cache = %config.caching.cache_name,
                    default_strategy = %config.caching.default_strategy,
                    "Engine config reloaded"
                );
                let _ = self.update_tx.send(config);
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Config reload rejected, keeping current settings");
            }
        }
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if self.touches_config(&event) => self.reload(),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}
