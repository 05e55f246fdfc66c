use crate::models::RunTrigger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

/// Longest summary kept from a run, in characters.
pub const MAX_SUMMARY_CHARS: usize = 200;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("Invalid ANSI escape regex"));

/// Scheduler-provided context for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to start task: {0}")]
    Spawn(String),

    #[error("task exited with status {code:?}: {message}")]
    ExitStatus { code: Option<i32>, message: String },
}

/// The unit of work run once per scheduling cycle.
///
/// Returns a short human-readable summary on success. The scheduler treats
/// the work itself as opaque.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, ctx: RunContext) -> Result<String, TaskError>;
}

/// Runs a shell command and reports its last line of output.
///
/// The command goes through `sh -c` (or `cmd /C` on Windows). The summary is
/// the last non-empty stdout line with terminal escapes stripped, truncated
/// to [`MAX_SUMMARY_CHARS`]. A non-zero exit is a failure carrying the last
/// stderr line.
pub struct CommandTaskRunner {
    command: String,
    timeout: Duration,
}

impl CommandTaskRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build(&self, ctx: &RunContext) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", &self.command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", &self.command]);
            c
        };

        cmd.env("SYNCDECK_RUN_ID", ctx.run_id.to_string())
            .env("SYNCDECK_RUN_TRIGGER", ctx.trigger.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskRunner for CommandTaskRunner {
    async fn run(&self, ctx: RunContext) -> Result<String, TaskError> {
        tracing::info!(run_id = %ctx.run_id, trigger = %ctx.trigger, "executing: {}", self.command);
        let start = Instant::now();

        let child = self
            .build(&ctx)
            .spawn()
            .map_err(|e| TaskError::Spawn(e.to_string()))?;

        // Dropping the child on timeout kills it
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("task command timed out after {:?}", self.timeout);
                TaskError::Timeout(self.timeout)
            })?
            .map_err(|e| TaskError::Failed(e.to_string()))?;

        tracing::debug!(
            "task command finished in {:.2}s with {}",
            start.elapsed().as_secs_f32(),
            output.status
        );

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = last_line(&stderr)
                .or_else(|| last_line(&stdout))
                .unwrap_or_else(|| "no output".to_string());
            return Err(TaskError::ExitStatus {
                code: output.status.code(),
                message,
            });
        }

        Ok(last_line(&stdout).unwrap_or_else(|| "completed".to_string()))
    }
}

/// Last non-empty line of `output`, escapes stripped and truncated.
pub fn last_line(output: &str) -> Option<String> {
    let cleaned = ANSI_ESCAPE.replace_all(output, "");
    cleaned
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(truncate_summary)
}

/// Cut `text` to [`MAX_SUMMARY_CHARS`], marking the cut with an ellipsis.
pub fn truncate_summary(text: &str) -> String {
    if text.chars().count() <= MAX_SUMMARY_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_SUMMARY_CHARS - 1).collect();
    cut.push('…');
    cut
}
