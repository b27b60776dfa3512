//! # loom-actions
//!
//! Turns a finished assistant message into work inside a sandbox.
//!
//! - `extract_artifact` pulls the ordered file/shell actions out of the first
//!   artifact block, ignoring the surrounding prose
//! - `ActionExecutor` runs them one by one against a `Sandbox`, then starts
//!   the dev server and reports the preview URL once it announces one, from
//!   a background watcher
//! - `LocalSandbox` is the directory-backed `Sandbox` used by the CLI and
//!   server; tests substitute an in-memory one

mod action;
mod executor;
mod extractor;
mod sandbox;

pub use action::{Action, Artifact, SkippedAction};
pub use executor::{
    ActionExecutor, CommandRun, ExecutionEvent, ExecutionEvents, ExecutionReport,
    PreviewDetector, PreviewSignal, PreviewWatch, DEFAULT_SLOW_COMMAND_AFTER, READY_PATTERN,
};
pub use extractor::{extract_artifact, find_artifact};
pub use sandbox::{
    validate_path, ExitSignal, LocalSandbox, OutputStream, ProcessHandle, Sandbox,
    SpawnedProcess,
};
