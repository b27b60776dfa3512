//! Out-of-band notifications
//!
//! Action-level problems never interrupt the chat response; they are
//! published here and streamed to `/events` subscribers instead.

use chrono::{DateTime, Utc};
use loom_actions::ExecutionEvent;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    SessionStarted,
    SessionFinished {
        segments: u32,
        switch_count: u32,
    },
    SessionFailed {
        error: String,
    },
    /// The finished message contained no artifact block
    ArtifactMissing,
    ActionSkipped {
        index: usize,
        reason: String,
    },
    ActionFailed {
        /// Action index, absent when the dev server failed to start
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        error: String,
    },
    /// A shell action has been running longer than the slow-command threshold
    ActionRunning {
        index: usize,
        command: String,
        elapsed_secs: u64,
    },
    ActionsCompleted {
        files_written: usize,
        commands_run: usize,
        errors: usize,
        /// A newer artifact or an abort stopped execution early
        cancelled: bool,
        summary: String,
    },
    PreviewReady {
        url: String,
    },
}

impl NotificationKind {
    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            NotificationKind::SessionStarted => "session_started",
            NotificationKind::SessionFinished { .. } => "session_finished",
            NotificationKind::SessionFailed { .. } => "session_failed",
            NotificationKind::ArtifactMissing => "artifact_missing",
            NotificationKind::ActionSkipped { .. } => "action_skipped",
            NotificationKind::ActionFailed { .. } => "action_failed",
            NotificationKind::ActionRunning { .. } => "action_running",
            NotificationKind::ActionsCompleted { .. } => "actions_completed",
            NotificationKind::PreviewReady { .. } => "preview_ready",
        }
    }
}

impl From<ExecutionEvent> for NotificationKind {
    fn from(event: ExecutionEvent) -> Self {
        match event {
            ExecutionEvent::ActionFailed { index, error } => {
                NotificationKind::ActionFailed { index, error }
            }
            ExecutionEvent::CommandRunning {
                index,
                command,
                elapsed,
            } => NotificationKind::ActionRunning {
                index,
                command,
                elapsed_secs: elapsed.as_secs(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(session_id: Uuid, kind: NotificationKind) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}
