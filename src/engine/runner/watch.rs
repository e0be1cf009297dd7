//! Watch mode maps filesystem changes to task runs.
//!
//! 1. **File watcher**: `notify` monitors the project recursively, events are
//!    debounced so that a burst of saves arrives as a single batch.
//! 2. **Rules**: every batch is matched against a set of [`WatchRule`]s, each
//!    naming the task that rebuilds its files, or none if a reload is enough.
//! 3. **Reload**: after the rebuilds of a batch finish, the reload task runs
//!    once, so connected browsers refresh exactly once per batch.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::{DebouncedEvent, new_debouncer};

use crate::engine::TaskGraph;
use crate::error::ServeError;
use crate::loader::glob::{MATCH_OPTIONS, compile, expand_braces, glob_base};

/// Files under these globs, and which task rebuilds them.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub globs: Vec<String>,
    /// `None` for files that are served as they are.
    pub rebuild: Option<&'static str>,
}

impl WatchRule {
    pub fn rebuild(task: &'static str, globs: &[&str]) -> Self {
        Self {
            globs: globs.iter().map(|g| g.to_string()).collect(),
            rebuild: Some(task),
        }
    }

    pub fn notify(globs: &[&str]) -> Self {
        Self {
            globs: globs.iter().map(|g| g.to_string()).collect(),
            rebuild: None,
        }
    }
}

/// Rules compiled for matching project-relative paths.
pub struct RuleSet {
    rules: Vec<(WatchRule, Vec<Pattern>)>,
    ignored: Vec<Pattern>,
}

impl RuleSet {
    /// Compiles `rules`. Paths matching any of `ignored` never trigger a rule,
    /// this keeps build outputs from feeding back into the watcher.
    pub fn new(rules: Vec<WatchRule>, ignored: &[String]) -> Result<Self, glob::PatternError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let patterns = compile(&rule.globs)?;
                Ok((rule, patterns))
            })
            .collect::<Result<_, glob::PatternError>>()?;

        Ok(Self {
            rules,
            ignored: compile(ignored)?,
        })
    }

    /// Rules matched by at least one of the paths.
    pub fn matching<'a>(&'a self, paths: &[Utf8PathBuf]) -> Vec<&'a WatchRule> {
        let paths: Vec<_> = paths
            .iter()
            .filter(|path| !self.ignored.iter().any(|p| p.matches_with(path.as_str(), MATCH_OPTIONS)))
            .collect();

        self.rules
            .iter()
            .filter(|(_, patterns)| {
                paths.iter().any(|path| {
                    patterns
                        .iter()
                        .any(|p| p.matches_with(path.as_str(), MATCH_OPTIONS))
                })
            })
            .map(|(rule, _)| rule)
            .collect()
    }

    /// Directories which need to be watched to see every rule's files.
    pub fn roots(&self, base: &Utf8Path) -> Vec<Utf8PathBuf> {
        let roots = self
            .rules
            .iter()
            .flat_map(|(rule, _)| &rule.globs)
            .flat_map(|glob| expand_braces(glob))
            .map(|glob| base.join(glob_base(glob.trim_start_matches("./"))))
            .filter(|root| root.is_dir())
            .collect();

        collapse_watch_paths(roots)
    }
}

/// What a single batch of changes caused.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rebuilt: Vec<&'static str>,
    pub failed: Vec<&'static str>,
    pub reloaded: bool,
}

/// Runs the rebuild tasks of every rule matched by `paths` concurrently, then
/// the `reload` task once if anything matched and at least one matched rule
/// succeeded. Failures are logged, never returned.
pub fn handle_batch(
    graph: &TaskGraph,
    rules: &RuleSet,
    paths: &[Utf8PathBuf],
    reload: &str,
) -> BatchOutcome {
    let matched = rules.matching(paths);
    if matched.is_empty() {
        return BatchOutcome::default();
    }

    let notify_only = matched.iter().any(|rule| rule.rebuild.is_none());
    let tasks: BTreeSet<&'static str> = matched.iter().filter_map(|rule| rule.rebuild).collect();

    tracing::info!(?tasks, "change detected, re-running tasks...");

    // Plain threads, a rebuild blocks until its own plan has finished.
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .iter()
            .map(|&task| (task, scope.spawn(move || graph.run(task))))
            .collect();

        handles
            .into_iter()
            .map(|(task, handle)| (task, handle.join()))
            .collect()
    });

    let mut outcome = BatchOutcome::default();
    for (task, result) in results {
        match result {
            Ok(Ok(_)) => outcome.rebuilt.push(task),
            Ok(Err(e)) => {
                tracing::error!("rebuild failed: {e}");
                outcome.failed.push(task);
            }
            Err(_) => {
                tracing::error!(task, "rebuild thread panicked");
                outcome.failed.push(task);
            }
        }
    }

    if notify_only || !outcome.rebuilt.is_empty() {
        match graph.run(reload) {
            Ok(_) => outcome.reloaded = true,
            Err(e) => tracing::error!("reload failed: {e}"),
        }
    }

    outcome
}

/// Watches the project and handles change batches until the watcher closes.
pub fn watch(
    graph: &TaskGraph,
    base: &Utf8Path,
    rules: &RuleSet,
    reload: &str,
) -> Result<(), ServeError> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    for path in rules.roots(base) {
        tracing::info!("watching {}", path);
        debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
    }

    tracing::info!("watching for changes...");

    while let Ok(events) = rx.recv() {
        let events = match events {
            Ok(events) => events,
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
                continue;
            }
        };

        let paths = changed_paths(base, &events);
        let outcome = handle_batch(graph, rules, &paths, reload);
        if outcome.reloaded {
            tracing::info!("rebuild complete, watching for changes...");
        }
    }

    Ok(())
}

/// Paths touched by a batch of events, relative to `base`, sorted and without
/// duplicates. Paths outside of `base` are dropped.
fn changed_paths(base: &Utf8Path, events: &[DebouncedEvent]) -> Vec<Utf8PathBuf> {
    let mut paths = BTreeSet::new();

    for de in events {
        for path in &de.event.paths {
            let Some(path) = Utf8Path::from_path(path) else {
                continue;
            };
            if let Ok(relative) = path.strip_prefix(base) {
                paths.insert(relative.to_path_buf());
            }
        }
    }

    paths.into_iter().collect()
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
