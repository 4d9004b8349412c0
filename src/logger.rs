//! Per-task logging facade handed to actions during prepare/execute.
//!
//! Actions receive a `&dyn Logger` rather than depending on `tracing`
//! directly, to keep action code backend-agnostic. The default
//! implementation forwards to `tracing`, tagging every line with the
//! owning task name.

use tracing::{debug, info, warn};

/// Progress and diagnostic sink for an action's prepare/execute pass.
pub trait Logger: Send + Sync {
    /// Reports a fractional progress update (0.0 - 1.0) with a message.
    fn progress(&self, value: f64, msg: &str);
    fn info(&self, msg: &str);
    fn debug(&self, msg: &str);
    fn warn(&self, msg: &str);
}

/// Forwards all log calls to `tracing`, scoped to a task name.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task: String,
}

impl TaskLogger {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }
}

impl Logger for TaskLogger {
    fn progress(&self, value: f64, msg: &str) {
        info!(task = %self.task, "progress {:.0}%: {}", value * 100.0, msg);
    }

    fn info(&self, msg: &str) {
        info!(task = %self.task, "{}", msg);
    }

    fn debug(&self, msg: &str) {
        debug!(task = %self.task, "{}", msg);
    }

    fn warn(&self, msg: &str) {
        warn!(task = %self.task, "{}", msg);
    }
}
