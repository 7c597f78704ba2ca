//! Run state — one explicit record per task execution.
//!
//! A `Run` is passed through and returned by every engine call and persisted
//! after each step, never held as a shared singleton. That keeps concurrent
//! runs independent and makes the awaiting-approval suspension a durable
//! state record rather than a blocked task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of task a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fetch → classify → maybe draft replies.
    Sync,
    /// Produce/overwrite the day's digest.
    DailySummary,
    /// Classify one already-stored item.
    Analyze,
    /// Re-draft replies for one item.
    Reply,
    /// Deliver an approved reply.
    Send,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::DailySummary => "daily_summary",
            Self::Analyze => "analyze",
            Self::Reply => "reply",
            Self::Send => "send",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "daily_summary" => Some(Self::DailySummary),
            "analyze" => Some(Self::Analyze),
            "reply" => Some(Self::Reply),
            "send" => Some(Self::Send),
            _ => None,
        }
    }
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Suspended at the approval gate — resumed only by an external call.
    WaitingApproval,
    Done,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "waiting_approval" => Self::WaitingApproval,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One execution of a task, with its accumulated step results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub task: TaskKind,
    pub current_step: String,
    pub status: RunStatus,
    /// Step name → result payload, accumulated as the run advances.
    /// Preserved on failure so partial progress is never silently dropped.
    pub context: serde_json::Map<String, Value>,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a new pending run.
    pub fn new(task: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task,
            current_step: "init".to_string(),
            status: RunStatus::Pending,
            context: serde_json::Map::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the run as running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.touch();
    }

    /// Record a completed step and its result payload.
    pub fn record_step(&mut self, step: &str, payload: Value) {
        self.current_step = step.to_string();
        self.context.insert(step.to_string(), payload);
        self.touch();
    }

    /// Record a non-fatal error (the run keeps going).
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.touch();
    }

    /// Suspend at the approval gate.
    pub fn await_approval(&mut self) {
        self.current_step = "awaiting_approval".to_string();
        self.status = RunStatus::WaitingApproval;
        self.touch();
    }

    /// Terminal success.
    pub fn finish(&mut self, step: &str) {
        self.current_step = step.to_string();
        self.status = RunStatus::Done;
        self.touch();
    }

    /// Terminal failure. Accumulated context stays intact.
    pub fn fail(&mut self, step: &str, error: impl Into<String>) {
        self.current_step = step.to_string();
        self.status = RunStatus::Failed;
        self.errors.push(error.into());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
