//! Actions extracted from assistant messages

use serde::{Deserialize, Serialize};

/// One directive from an artifact block, executed in document order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Action {
    /// Write `content` to `path`, relative to the sandbox root
    File { path: String, content: String },
    /// Run `command` through the sandbox shell
    Shell { command: String },
}

impl Action {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Action::File {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Action::Shell {
            command: command.into(),
        }
    }

    /// Short label for logs and notifications
    pub fn describe(&self) -> String {
        match self {
            Action::File { path, .. } => format!("file {}", path),
            Action::Shell { command } => format!("shell `{}`", command),
        }
    }
}

/// An action element that could not be turned into an `Action`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAction {
    /// Position among the block's action elements
    pub index: usize,
    pub reason: String,
}

/// The ordered actions of one artifact block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedAction>,
}

impl Artifact {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::File { .. }))
            .count()
    }

    pub fn shell_count(&self) -> usize {
        self.actions.len() - self.file_count()
    }
}
