use std::time::Duration;

/// Lifecycle states reported for one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// A progress report emitted by the dispatcher: once when the invocation is
/// accepted, once on every heartbeat while the tool runs, and once with the
/// terminal status.
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub status: ToolStatus,
    pub tool_name: String,
    /// Time since the dispatcher accepted the call.
    pub elapsed: Duration,
    pub message: Option<String>,
}
