//! The development loop state machine.
//!
//! ```text
//! Idle --(matching change)--> Triggered --(run_pending)--> Running --> Idle
//! ```
//!
//! [`DevLoop`] knows nothing about the operating system watcher. It is fed
//! [`FileChange`]s, maps them onto tasks through the watch bindings, and runs
//! the affected part of the graph on demand. Changes observed before the next
//! [`DevLoop::run_pending`] are merged into a single trigger, so a burst of
//! edits produces one rebuild with the union of the affected tasks.

use std::collections::BTreeSet;
use std::sync::mpsc::Sender;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use serde::Serialize;

use crate::Pipeline;
use crate::engine::runner;
use crate::error::BuildError;

/// The kind of output a watch binding refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Script,
    Style,
    Markup,
    Image,
}

/// Maps a source glob, relative to the project root, onto the tasks that must
/// re-run when a matching file changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBinding {
    pub pattern: String,
    pub tasks: Vec<String>,
    pub category: Category,
}

/// What a live-reload client should do with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadAction {
    /// Reload the whole page.
    Full,
    /// Swap stylesheets in place.
    Styles,
}

/// Sent to live-reload clients after a successful watcher-driven run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub changed: BTreeSet<Category>,
    pub action: ReloadAction,
}

impl Notification {
    pub fn new(changed: BTreeSet<Category>) -> Self {
        let action = if !changed.is_empty() && changed.iter().all(|c| *c == Category::Style) {
            ReloadAction::Styles
        } else {
            ReloadAction::Full
        };

        Self { changed, action }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(Utf8PathBuf),
    Modified(Utf8PathBuf),
    Removed(Utf8PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Utf8Path {
        match self {
            FileChange::Created(path) | FileChange::Modified(path) | FileChange::Removed(path) => {
                path
            }
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, FileChange::Removed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Triggered,
    Running,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Nothing was pending.
    Idle,
    Rebuilt(Notification),
    /// The run failed. The failure has been logged and the loop keeps going.
    Failed(BuildError),
}

#[derive(Debug, Default)]
struct Trigger {
    tasks: BTreeSet<String>,
    categories: BTreeSet<Category>,
}

struct Matcher {
    pattern: Pattern,
    tasks: Vec<String>,
    category: Category,
}

pub struct DevLoop<'a> {
    pipeline: &'a Pipeline,
    matchers: Vec<Matcher>,
    pending: Option<Trigger>,
    state: WatchState,
    notify: Sender<Notification>,
}

impl<'a> DevLoop<'a> {
    pub fn new(pipeline: &'a Pipeline, notify: Sender<Notification>) -> Self {
        let root = Pattern::escape(pipeline.env.paths.root.as_str());

        let matchers = pipeline
            .bindings
            .iter()
            .filter_map(|binding| {
                match Pattern::new(&format!("{root}/{}", binding.pattern)) {
                    Ok(pattern) => Some(Matcher {
                        pattern,
                        tasks: binding.tasks.clone(),
                        category: binding.category,
                    }),
                    Err(e) => {
                        tracing::error!("invalid watch pattern {}: {e}", binding.pattern);
                        None
                    }
                }
            })
            .collect();

        Self {
            pipeline,
            matchers,
            pending: None,
            state: WatchState::Idle,
            notify,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Tasks waiting for the next run.
    pub fn pending(&self) -> BTreeSet<String> {
        self.pending
            .as_ref()
            .map(|trigger| trigger.tasks.clone())
            .unwrap_or_default()
    }

    /// Feeds one change into the loop. Returns whether any binding matched.
    ///
    /// A removed file is evicted from the cache of every bound task right
    /// away, so the next run no longer includes its contribution.
    pub fn observe(&mut self, change: &FileChange) -> bool {
        let path = change.path();
        let mut matched = false;

        for matcher in &self.matchers {
            if !matcher.pattern.matches_path(path.as_std_path()) {
                continue;
            }

            matched = true;

            if change.is_removal() {
                for task in &matcher.tasks {
                    self.pipeline.cache.forget(task, path);
                }
            }

            let trigger = self.pending.get_or_insert_with(Trigger::default);
            trigger.tasks.extend(matcher.tasks.iter().cloned());
            trigger.categories.insert(matcher.category);
        }

        if matched {
            tracing::debug!(%path, "change observed");
            self.state = WatchState::Triggered;
        }

        matched
    }

    /// Runs everything the pending trigger affects, together with the tasks
    /// that depend on them. Failures are logged, never propagated.
    pub fn run_pending(&mut self) -> RunOutcome {
        let Some(trigger) = self.pending.take() else {
            self.state = WatchState::Idle;
            return RunOutcome::Idle;
        };

        self.state = WatchState::Running;

        let affected = self.pipeline.registry.with_dependents(&trigger.tasks);
        tracing::info!(tasks = ?affected, "change detected, re-running tasks...");

        let result = self
            .pipeline
            .registry
            .resolve_many(&affected)
            .map_err(BuildError::from)
            .and_then(|plan| runner::run(self.pipeline, &plan));

        let outcome = match result {
            Ok(_) => {
                let notification = Notification::new(trigger.categories);
                if self.notify.send(notification.clone()).is_err() {
                    tracing::warn!("live-reload channel closed");
                }
                tracing::info!("rebuild complete, watching for changes...");
                RunOutcome::Rebuilt(notification)
            }
            Err(e) => {
                tracing::error!("{e}");
                RunOutcome::Failed(e)
            }
        };

        self.state = WatchState::Idle;
        outcome
    }
}

/// Browser side of the live-reload channel. Stylesheet-only changes swap the
/// stylesheets in place, everything else reloads the page.
pub fn live_reload_script(port: u16) -> String {
    format!(
        r#"(() => {{
  const socket = new WebSocket("ws://localhost:{port}");
  socket.addEventListener("message", event => {{
    const note = JSON.parse(event.data);
    if (note.action === "styles") {{
      for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
        const url = new URL(link.href);
        url.searchParams.set("t", Date.now());
        link.href = url.toString();
      }}
    }} else {{
      window.location.reload();
    }}
  }});
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json() {
        let note = Notification::new(BTreeSet::from([Category::Style]));
        assert_eq!(
            note.to_json().unwrap(),
            r#"{"changed":["style"],"action":"styles"}"#
        );

        let note = Notification::new(BTreeSet::from([Category::Style, Category::Image]));
        assert_eq!(note.action, ReloadAction::Full);
        assert_eq!(
            note.to_json().unwrap(),
            r#"{"changed":["style","image"],"action":"full"}"#
        );
    }

    #[test]
    fn test_live_reload_script_port() {
        let script = live_reload_script(4242);
        assert!(script.contains("ws://localhost:4242"));
        assert!(script.contains(r#"note.action === "styles""#));
    }
}
