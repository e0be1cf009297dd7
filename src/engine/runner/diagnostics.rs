use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Timing of one executed action.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub name: String,
    pub start: Instant,
    pub duration: Duration,
}

impl TaskExecution {
    pub fn end(&self) -> Instant {
        self.start + self.duration
    }
}

/// Build diagnostics of a single run, in order of completion.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub executions: Vec<TaskExecution>,
}

impl Diagnostics {
    /// First execution of the named action, if it ran.
    pub fn get(&self, name: &str) -> Option<&TaskExecution> {
        self.executions.iter().find(|e| e.name == name)
    }

    /// Wall time between the first start and the last completion.
    pub fn elapsed(&self) -> Duration {
        let start = self.executions.iter().map(|e| e.start).min();
        let end = self.executions.iter().map(TaskExecution::end).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut executions: Vec<_> = self.executions.iter().collect();
        executions.sort_by_key(|e| e.start);

        let width = executions.iter().map(|e| e.name.len()).max().unwrap_or(0);

        for e in executions {
            writeln!(f, "{:<width$}  {:>10.2?}", e.name, e.duration)?;
        }

        write!(f, "{:<width$}  {:>10.2?}", "total", self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_spans_first_start_to_last_end() {
        let now = Instant::now();
        let diagnostics = Diagnostics {
            executions: vec![
                TaskExecution {
                    name: "css-core".into(),
                    start: now,
                    duration: Duration::from_millis(30),
                },
                TaskExecution {
                    name: "plugins".into(),
                    start: now + Duration::from_millis(10),
                    duration: Duration::from_millis(50),
                },
            ],
        };

        assert_eq!(diagnostics.elapsed(), Duration::from_millis(60));
        assert!(diagnostics.get("plugins").is_some());
        assert!(diagnostics.get("js").is_none());

        let text = diagnostics.to_string();
        assert!(text.starts_with("css-core"));
        assert!(text.lines().last().unwrap().starts_with("total"));
    }

    #[test]
    fn empty_run_takes_no_time() {
        assert_eq!(Diagnostics::default().elapsed(), Duration::ZERO);
    }
}
