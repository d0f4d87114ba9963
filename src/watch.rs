//! Template file watching for `liquid-lint --watch`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Extension of template files
pub const TEMPLATE_EXTENSION: &str = "liquid";

/// Events from the file watcher
#[derive(Debug)]
pub enum WatchEvent {
    TemplateChanged(PathBuf),
    WatcherError(notify::Error),
}

pub fn is_template(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(TEMPLATE_EXTENSION)
}

/// Watches files and directories for template changes
pub struct TemplateWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl TemplateWatcher {
    /// Start watching; directories are watched recursively
    pub fn new(paths: &[PathBuf]) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let EventKind::Create(_) | EventKind::Modify(_) = event.kind {
                        for path in event.paths.into_iter().filter(|p| is_template(p)) {
                            let _ = tx.send(WatchEvent::TemplateChanged(path));
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(WatchEvent::WatcherError(e));
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .context("Failed to create file watcher")?;

        for path in paths {
            let mode = if path.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher
                .watch(path, mode)
                .with_context(|| format!("Failed to watch {}", path.display()))?;
            log::info!("Watching {}", path.display());
        }

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Next event; `None` once the watcher is gone
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}
