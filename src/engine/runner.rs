mod diagnostics;
#[cfg(all(feature = "server", feature = "live"))]
pub(crate) mod http;
#[cfg(feature = "live")]
pub(crate) mod reload;
#[cfg(feature = "live")]
pub(crate) mod watch;

use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::plan::Plan;
use crate::engine::{TaskContext, TaskGraph};
use crate::error::RunError;

pub use diagnostics::{Diagnostics, TaskExecution};

static STYLE_BAR: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("invalid progress bar template")
        .progress_chars("=>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .expect("invalid progress bar template")
});

type Completion = (NodeIndex, anyhow::Result<()>, Instant, Duration);

/// Executes the plan on the graph's thread pool. Every action is spawned as
/// soon as all of its predecessors completed.
///
/// 1. Actions without predecessors are spawned right away.
/// 2. The calling thread waits for completions on a channel.
/// 3. A completion decrements the predecessor count of each successor; a
///    successor whose count reaches zero is spawned immediately.
/// 4. After the first failure nothing new is spawned, the actions already in
///    flight are awaited and the failure is returned.
pub(crate) fn execute(graph: &TaskGraph, plan: &Plan, root: &str) -> Result<Diagnostics, RunError> {
    let total = plan.graph.node_count();
    if total == 0 {
        return Ok(Diagnostics::default());
    }

    let mut predecessors: HashMap<NodeIndex, usize> = plan
        .graph
        .node_indices()
        .map(|i| {
            let count = plan
                .graph
                .neighbors_directed(i, Direction::Incoming)
                .count();
            (i, count)
        })
        .collect();

    let root_span = tracing::span!(Level::INFO, "run", task = root);
    root_span.pb_set_style(&STYLE_BAR);
    root_span.pb_set_length(total as u64);
    root_span.pb_set_message(&format!("Running {root}"));
    let _enter = root_span.enter();

    let mut diagnostics = Diagnostics::default();
    let mut failure: Option<RunError> = None;

    graph.pool.in_place_scope(|s| {
        let (sender, receiver) = channel::<Completion>();

        let spawn = |index: NodeIndex| {
            let node = &plan.graph[index];
            let sender = sender.clone();
            let parent = root_span.clone();

            s.spawn(move |_| {
                let span = tracing::span!(parent: &parent, Level::INFO, "task", name = %node.name);
                span.pb_set_style(&STYLE_TASK);
                span.pb_set_message(&format!("Running {}", node.name));
                let _enter = span.enter();

                let lock = graph.lock_for(&node.name);
                let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

                let context = TaskContext {
                    name: &node.name,
                    graph,
                    span: span.clone(),
                };

                let start = Instant::now();
                tracing::debug!("starting");

                let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    (node.action)(&context)
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    }
                };

                // The receiver only goes away once every spawned action reported.
                let _ = sender.send((index, result, start, start.elapsed()));
            });
        };

        let mut in_flight = 0usize;
        for index in plan.graph.node_indices() {
            if predecessors[&index] == 0 {
                spawn(index);
                in_flight += 1;
            }
        }

        while in_flight > 0 {
            let Ok((index, result, start, duration)) = receiver.recv() else {
                break;
            };
            in_flight -= 1;
            root_span.pb_inc(1);

            let name = &plan.graph[index].name;
            diagnostics.executions.push(TaskExecution {
                name: name.clone(),
                start,
                duration,
            });

            match result {
                Ok(()) => {
                    tracing::info!(
                        task = %name,
                        "finished {}",
                        crate::io::as_overhead(start)
                    );
                }
                Err(error) => {
                    tracing::error!(task = %name, "failed: {error:#}");
                    if failure.is_none() {
                        failure = Some(RunError::Task {
                            name: name.clone(),
                            error,
                        });
                    }
                    continue;
                }
            }

            if failure.is_some() {
                continue;
            }

            for next in plan.graph.neighbors_directed(index, Direction::Outgoing) {
                if let Some(count) = predecessors.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        spawn(next);
                        in_flight += 1;
                    }
                }
            }
        }
    });

    match failure {
        Some(error) => Err(error),
        None => Ok(diagnostics),
    }
}
