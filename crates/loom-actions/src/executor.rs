//! Action executor
//!
//! Runs an artifact's actions strictly in document order against a
//! `Sandbox`, then starts the project's dev server and watches its output
//! for the "Local: <url>" ready line. Execution is best-effort: a failed
//! write or spawn is recorded and the remaining actions still run, and a
//! shell command's exit status never blocks the next action.
//!
//! The dev server is watched by a background task, so execution never waits
//! on a server that keeps running without announcing a URL.

use crate::action::{Action, Artifact};
use crate::sandbox::{ProcessHandle, Sandbox, SpawnedProcess};
use futures::StreamExt;
use loom_core::{LoomError, Result, SandboxConfig};
use regex::Regex;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Ready line printed by Vite-style dev servers
pub const READY_PATTERN: &str = r"Local:\s+(https?://(?:localhost|127\.0\.0\.1):\d+)";

/// Terminal colour and cursor escapes
const ANSI_PATTERN: &str = r"\x1b\[[0-9;?]*[A-Za-z]";

/// How long a shell action runs before it is reported as still running
pub const DEFAULT_SLOW_COMMAND_AFTER: Duration = Duration::from_secs(30);

/// Where the running dev server can be previewed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewSignal {
    pub url: String,
}

/// One-shot scanner for the dev server ready line.
///
/// Chunks are reassembled into lines and stripped of ANSI escapes before
/// matching. Only the first match is reported.
#[derive(Debug, Clone)]
pub struct PreviewDetector {
    ready: Regex,
    ansi: Regex,
    pending: String,
    found: bool,
}

impl PreviewDetector {
    pub fn new() -> Result<Self> {
        Self::with_pattern(READY_PATTERN)
    }

    /// Use a custom ready pattern; capture group 1 must be the URL
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let ready = Regex::new(pattern)
            .map_err(|e| LoomError::Config(format!("Invalid ready pattern: {}", e)))?;
        let ansi = Regex::new(ANSI_PATTERN)
            .map_err(|e| LoomError::Other(format!("Invalid ANSI pattern: {}", e)))?;
        Ok(Self {
            ready,
            ansi,
            pending: String::new(),
            found: false,
        })
    }

    /// A detector with the same patterns and no state
    pub fn fresh(&self) -> Self {
        Self {
            ready: self.ready.clone(),
            ansi: self.ansi.clone(),
            pending: String::new(),
            found: false,
        }
    }

    /// URL announced by a single line, if any
    pub fn scan_line(&self, line: &str) -> Option<String> {
        let plain = self.ansi.replace_all(line, "");
        self.ready
            .captures(&plain)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Feed an output chunk; yields the signal the first time it is seen
    pub fn push(&mut self, chunk: &str) -> Option<PreviewSignal> {
        self.pending.push_str(chunk);

        let mut signal = None;
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if signal.is_none() {
                signal = self.check(&line);
            }
        }
        signal
    }

    /// Scan a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<PreviewSignal> {
        let line = std::mem::take(&mut self.pending);
        self.check(&line)
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    fn check(&mut self, line: &str) -> Option<PreviewSignal> {
        if self.found {
            return None;
        }
        let url = self.scan_line(line)?;
        self.found = true;
        Some(PreviewSignal { url })
    }
}

/// Progress published while an artifact executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// A write or spawn failed; the remaining actions still run
    ActionFailed { index: Option<usize>, error: String },
    /// A shell action is still running after the slow-command threshold
    CommandRunning {
        index: usize,
        command: String,
        elapsed: Duration,
    },
}

/// Receives `ExecutionEvent`s as they happen
pub type ExecutionEvents = mpsc::UnboundedSender<ExecutionEvent>;

/// Resolves once the dev server announces its URL.
///
/// Yields `None` if the server's output ends without a ready line.
#[derive(Debug)]
pub struct PreviewWatch(oneshot::Receiver<PreviewSignal>);

impl PreviewWatch {
    pub async fn wait(self) -> Option<PreviewSignal> {
        self.0.await.ok()
    }
}

/// A shell action that was started
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRun {
    pub command: String,
    /// `None` if the process was killed
    pub exit_code: Option<i32>,
}

/// Result of executing one artifact
#[derive(Debug, Default, Serialize)]
pub struct ExecutionReport {
    /// Files written, in order
    pub files_written: Vec<String>,
    /// Shell commands started, in order
    pub commands_run: Vec<CommandRun>,
    /// Errors encountered during execution
    pub errors: Vec<String>,
    /// Execution stopped early and the dev server was not started
    pub cancelled: bool,
    pub preview: Option<PreviewSignal>,
    /// The dev server started for this artifact
    #[serde(skip)]
    pub dev_server: Option<ProcessHandle>,
    /// Preview not yet announced by the dev server
    #[serde(skip)]
    pub pending_preview: Option<PreviewWatch>,
}

impl ExecutionReport {
    /// Generate a summary string
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.files_written.is_empty() {
            parts.push(format!("{} files written", self.files_written.len()));
        }
        if !self.commands_run.is_empty() {
            parts.push(format!("{} commands run", self.commands_run.len()));
        }
        if !self.errors.is_empty() {
            parts.push(format!("{} errors", self.errors.len()));
        }
        if self.cancelled {
            parts.push("cancelled".to_string());
        }
        if let Some(preview) = &self.preview {
            parts.push(format!("preview at {}", preview.url));
        }

        if parts.is_empty() {
            "no actions".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Check if there were any errors
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn record_error(&mut self, events: &ExecutionEvents, index: Option<usize>, error: String) {
        let _ = events.send(ExecutionEvent::ActionFailed {
            index,
            error: error.clone(),
        });
        self.errors.push(error);
    }
}

/// Runs artifacts and manages the dev server between turns
pub struct ActionExecutor {
    start_command: String,
    detector: PreviewDetector,
    slow_command_after: Duration,
    dev_server: Mutex<Option<ProcessHandle>>,
}

impl ActionExecutor {
    pub fn new(start_command: impl Into<String>) -> Result<Self> {
        Ok(Self {
            start_command: start_command.into(),
            detector: PreviewDetector::new()?,
            slow_command_after: DEFAULT_SLOW_COMMAND_AFTER,
            dev_server: Mutex::new(None),
        })
    }

    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        Ok(Self::new(config.start_command.clone())?
            .with_slow_command_after(Duration::from_secs(config.slow_command_secs)))
    }

    pub fn with_slow_command_after(mut self, after: Duration) -> Self {
        self.slow_command_after = after;
        self
    }

    pub fn start_command(&self) -> &str {
        &self.start_command
    }

    /// Execute `artifact`, then wait for the dev server's ready line.
    ///
    /// The wait lasts as long as the dev server keeps running without
    /// announcing a URL. Callers that must not block use `start`.
    pub async fn run(&self, artifact: &Artifact, sandbox: &dyn Sandbox) -> ExecutionReport {
        let (events, _) = mpsc::unbounded_channel();
        let mut report = self
            .start(artifact, sandbox, &CancellationToken::new(), &events)
            .await;
        if let Some(watch) = report.pending_preview.take() {
            report.preview = watch.wait().await;
        }
        report
    }

    /// Execute `artifact` and spawn the dev server without waiting for it.
    ///
    /// The preview URL arrives through `pending_preview`. Errors and slow
    /// commands are published on `events` as they happen. Cancelling
    /// `cancel` kills the running shell action and skips everything after
    /// it, dev server included.
    pub async fn start(
        &self,
        artifact: &Artifact,
        sandbox: &dyn Sandbox,
        cancel: &CancellationToken,
        events: &ExecutionEvents,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        tracing::info!(
            files = artifact.file_count(),
            commands = artifact.shell_count(),
            "Executing artifact"
        );

        for (index, action) in artifact.actions.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            match action {
                Action::File { path, content } => {
                    match sandbox.write_file(path, content).await {
                        Ok(()) => report.files_written.push(path.clone()),
                        Err(e) => {
                            tracing::warn!(action = index, "Failed to write {}: {}", path, e);
                            report.record_error(
                                events,
                                Some(index),
                                format!("Failed to write {}: {}", path, e),
                            );
                        }
                    }
                }
                Action::Shell { command } => {
                    match self.run_shell(index, command, sandbox, cancel, events).await {
                        Ok(exit_code) => report.commands_run.push(CommandRun {
                            command: command.clone(),
                            exit_code,
                        }),
                        Err(e) => {
                            tracing::warn!(action = index, "Failed to run `{}`: {}", command, e);
                            report.record_error(
                                events,
                                Some(index),
                                format!("Failed to run `{}`: {}", command, e),
                            );
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            tracing::info!("Artifact execution cancelled: {}", report.summary());
            return report;
        }

        self.stop_dev_server();

        tracing::info!("Starting development server: {}", self.start_command);
        match sandbox.spawn(&self.start_command).await {
            Ok(process) => {
                *self.dev_server_slot() = Some(process.handle.clone());
                report.dev_server = Some(process.handle.clone());
                report.pending_preview = Some(self.watch_for_preview(process));
            }
            Err(e) => {
                tracing::error!("Failed to start development server: {}", e);
                let error = format!("Failed to start `{}`: {}", self.start_command, e);
                report.record_error(events, None, error);
            }
        }

        tracing::info!("Artifact executed: {}", report.summary());
        report
    }

    /// Kill the dev server from the previous run. Returns `false` if none was running.
    pub fn stop_dev_server(&self) -> bool {
        match self.dev_server_slot().take() {
            Some(handle) => {
                tracing::debug!("Stopping previous development server");
                handle.kill();
                true
            }
            None => false,
        }
    }

    /// Drain the dev server's output in the background, reporting the first ready line
    fn watch_for_preview(&self, process: SpawnedProcess) -> PreviewWatch {
        let SpawnedProcess {
            mut output, exit, ..
        } = process;
        let mut detector = self.detector.fresh();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut ready = Some(tx);
            while let Some(chunk) = output.next().await {
                tracing::debug!("Server output: {}", chunk.trim_end());
                if let Some(signal) = detector.push(&chunk) {
                    announce(&mut ready, signal);
                }
            }
            if let Some(signal) = detector.finish() {
                announce(&mut ready, signal);
            }
            // Output is over, so a pending watch resolves to `None`
            drop(ready);

            let code = exit.wait().await;
            if detector.is_found() {
                tracing::info!(exit_code = ?code, "Development server exited");
            } else {
                tracing::warn!(
                    exit_code = ?code,
                    "Development server exited without reporting a local URL"
                );
            }
        });

        PreviewWatch(rx)
    }

    /// Run one shell action to completion, logging its output line by line
    async fn run_shell(
        &self,
        index: usize,
        command: &str,
        sandbox: &dyn Sandbox,
        cancel: &CancellationToken,
        events: &ExecutionEvents,
    ) -> Result<Option<i32>> {
        tracing::info!(action = index, "Executing shell command: {}", command);
        let SpawnedProcess {
            mut output,
            exit,
            handle,
        } = sandbox.spawn(command).await?;

        let started = Instant::now();
        let slow = tokio::time::sleep(self.slow_command_after);
        tokio::pin!(slow);
        let mut reported = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(action = index, "Killing `{}`: execution cancelled", command);
                    handle.kill();
                    return Ok(None);
                }
                chunk = output.next() => match chunk {
                    Some(chunk) => {
                        tracing::debug!(action = index, "Shell output: {}", chunk.trim_end());
                    }
                    None => break,
                },
                _ = &mut slow, if !reported => {
                    reported = true;
                    let elapsed = started.elapsed();
                    tracing::warn!(
                        action = index,
                        elapsed_secs = elapsed.as_secs(),
                        "Shell command `{}` is still running",
                        command
                    );
                    let _ = events.send(ExecutionEvent::CommandRunning {
                        index,
                        command: command.to_string(),
                        elapsed,
                    });
                }
            }
        }

        let code = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.kill();
                return Ok(None);
            }
            code = exit.wait() => code,
        };
        if code != Some(0) {
            // Exit status does not gate the next action
            tracing::warn!(action = index, exit_code = ?code, "Shell command `{}` did not succeed", command);
        }
        Ok(code)
    }

    fn dev_server_slot(&self) -> std::sync::MutexGuard<'_, Option<ProcessHandle>> {
        self.dev_server.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn announce(ready: &mut Option<oneshot::Sender<PreviewSignal>>, signal: PreviewSignal) {
    tracing::info!("Preview ready at {}", signal.url);
    if let Some(tx) = ready.take() {
        let _ = tx.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExitSignal;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::HashMap;

    /// In-memory sandbox recording every call
    #[derive(Default)]
    struct FakeSandbox {
        log: Mutex<Vec<String>>,
        files: Mutex<HashMap<String, String>>,
        outputs: HashMap<String, Vec<String>>,
        exit_codes: HashMap<String, i32>,
        /// Commands whose output never ends
        long_running: Vec<String>,
        failing_paths: Vec<String>,
        handles: Mutex<Vec<ProcessHandle>>,
    }

    impl FakeSandbox {
        fn with_output(mut self, command: &str, lines: &[&str]) -> Self {
            self.outputs.insert(
                command.to_string(),
                lines.iter().map(|l| l.to_string()).collect(),
            );
            self
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        async fn write_file(&self, path: &str, content: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("write {}", path));
            if self.failing_paths.iter().any(|p| p == path) {
                return Err(LoomError::Sandbox(format!("disk full: {}", path)));
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn spawn(&self, command: &str) -> Result<SpawnedProcess> {
            self.log.lock().unwrap().push(format!("spawn {}", command));

            let lines = self.outputs.get(command).cloned().unwrap_or_default();
            let output = if self.long_running.iter().any(|c| c == command) {
                stream::iter(lines).chain(stream::pending()).boxed()
            } else {
                stream::iter(lines).boxed()
            };

            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Some(*self.exit_codes.get(command).unwrap_or(&0)));

            let handle = ProcessHandle::new(CancellationToken::new());
            self.handles.lock().unwrap().push(handle.clone());

            Ok(SpawnedProcess {
                output,
                exit: ExitSignal::new(rx),
                handle,
            })
        }

        fn halt(&self) {
            for handle in self.handles.lock().unwrap().iter() {
                handle.kill();
            }
        }
    }

    fn executor() -> ActionExecutor {
        ActionExecutor::new("npm run dev").unwrap()
    }

    fn artifact(actions: Vec<Action>) -> Artifact {
        Artifact {
            actions,
            ..Artifact::default()
        }
    }

    #[test]
    fn test_detects_local_url() {
        let mut detector = PreviewDetector::new().unwrap();
        let signal = detector.push("  Local: http://localhost:5173\n");
        assert_eq!(
            signal,
            Some(PreviewSignal {
                url: "http://localhost:5173".to_string()
            })
        );
    }

    #[test]
    fn test_ignores_output_without_ready_line() {
        let mut detector = PreviewDetector::new().unwrap();
        assert!(detector.push("> vite\n\nready in 312 ms\n").is_none());
        assert!(detector.push("Network: use --host to expose\n").is_none());
        assert!(detector.finish().is_none());
        assert!(!detector.is_found());
    }

    #[test]
    fn test_strips_ansi_colours() {
        let detector = PreviewDetector::new().unwrap();
        let line = "  \x1b[32m➜\x1b[39m  \x1b[1mLocal\x1b[22m:   \x1b[36mhttp://localhost:\x1b[1m5173\x1b[22m/\x1b[39m";
        assert_eq!(
            detector.scan_line(line).as_deref(),
            Some("http://localhost:5173")
        );
    }

    #[test]
    fn test_reassembles_split_lines() {
        let mut detector = PreviewDetector::new().unwrap();
        assert!(detector.push("Loc").is_none());
        assert!(detector.push("al:   http://127.0.0.1:").is_none());
        let signal = detector.push("3000/\nmore output\n").unwrap();
        assert_eq!(signal.url, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_signal_is_one_shot() {
        let mut detector = PreviewDetector::new().unwrap();
        assert!(detector.push("Local: http://localhost:5173\n").is_some());
        assert!(detector.push("Local: http://localhost:5174\n").is_none());
        assert!(detector.is_found());
    }

    #[test]
    fn test_remote_hosts_do_not_match() {
        let detector = PreviewDetector::new().unwrap();
        assert!(detector.scan_line("Local: http://example.com:80").is_none());
        assert!(detector.scan_line("Network: http://192.168.1.4:5173").is_none());
    }

    #[test]
    fn test_invalid_custom_pattern() {
        assert!(matches!(
            PreviewDetector::with_pattern("("),
            Err(LoomError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_runs_actions_in_order_then_dev_server() {
        let sandbox = FakeSandbox::default()
            .with_output("npm run dev", &["> vite\n", "  Local:   http://localhost:5173/\n"]);
        let executor = executor();

        let report = executor
            .run(
                &artifact(vec![
                    Action::file("package.json", "{}"),
                    Action::shell("npm install"),
                    Action::file("src/main.js", "console.log(1)"),
                ]),
                &sandbox,
            )
            .await;

        assert_eq!(
            sandbox.log(),
            vec![
                "write package.json",
                "spawn npm install",
                "write src/main.js",
                "spawn npm run dev",
            ]
        );
        assert_eq!(report.files_written, vec!["package.json", "src/main.js"]);
        assert_eq!(report.commands_run.len(), 1);
        assert_eq!(
            report.preview,
            Some(PreviewSignal {
                url: "http://localhost:5173".to_string()
            })
        );
        assert!(report.dev_server.is_some());
        assert!(!report.has_errors());
        assert_eq!(
            sandbox.files.lock().unwrap().get("src/main.js").map(String::as_str),
            Some("console.log(1)")
        );
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_remaining_actions() {
        let sandbox = FakeSandbox {
            failing_paths: vec!["broken.txt".to_string()],
            ..FakeSandbox::default()
        };

        let report = executor()
            .run(
                &artifact(vec![
                    Action::file("broken.txt", "x"),
                    Action::file("ok.txt", "y"),
                ]),
                &sandbox,
            )
            .await;

        assert_eq!(report.files_written, vec!["ok.txt"]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("broken.txt"));
        assert_eq!(sandbox.log().last().map(String::as_str), Some("spawn npm run dev"));
    }

    #[tokio::test]
    async fn test_failing_shell_command_does_not_gate_next_action() {
        let sandbox = FakeSandbox {
            exit_codes: HashMap::from([("npm test".to_string(), 1)]),
            ..FakeSandbox::default()
        };

        let report = executor()
            .run(
                &artifact(vec![Action::shell("npm test"), Action::file("after.txt", "z")]),
                &sandbox,
            )
            .await;

        assert_eq!(report.commands_run[0].exit_code, Some(1));
        assert_eq!(report.files_written, vec!["after.txt"]);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_dev_server_without_ready_line_yields_no_preview() {
        let sandbox =
            FakeSandbox::default().with_output("npm run dev", &["Error: missing script: dev\n"]);

        let report = executor().run(&Artifact::default(), &sandbox).await;
        assert!(report.preview.is_none());
        assert_eq!(report.summary(), "no actions");
    }

    #[tokio::test]
    async fn test_preview_returns_while_server_keeps_running() {
        let sandbox = FakeSandbox {
            long_running: vec!["npm run dev".to_string()],
            ..FakeSandbox::default()
        }
        .with_output("npm run dev", &["Local: http://localhost:4000\n"]);

        let report = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            executor().run(&Artifact::default(), &sandbox),
        )
        .await
        .unwrap();

        assert_eq!(report.preview.unwrap().url, "http://localhost:4000");
    }

    #[tokio::test]
    async fn test_previous_dev_server_is_stopped() {
        let sandbox = FakeSandbox::default();
        let executor = executor();

        let first = executor.run(&Artifact::default(), &sandbox).await;
        let first_server = first.dev_server.unwrap();
        assert!(!first_server.is_killed());

        let second = executor.run(&Artifact::default(), &sandbox).await;
        assert!(first_server.is_killed());
        assert!(!second.dev_server.unwrap().is_killed());
    }

    #[tokio::test]
    async fn test_start_does_not_wait_for_silent_dev_server() {
        let sandbox = FakeSandbox {
            long_running: vec!["npm run dev".to_string()],
            ..FakeSandbox::default()
        }
        .with_output("npm run dev", &["Server listening on port 3000\n"]);
        let (events, _rx) = mpsc::unbounded_channel();

        let mut report = tokio::time::timeout(
            Duration::from_secs(5),
            executor().start(
                &artifact(vec![Action::file("a.txt", "a")]),
                &sandbox,
                &CancellationToken::new(),
                &events,
            ),
        )
        .await
        .unwrap();

        assert_eq!(report.files_written, vec!["a.txt"]);
        assert!(report.dev_server.is_some());
        let watch = report.pending_preview.take().unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(100), watch.wait())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_preview_arrives_after_start_returns() {
        let sandbox = FakeSandbox {
            long_running: vec!["npm run dev".to_string()],
            ..FakeSandbox::default()
        }
        .with_output("npm run dev", &["> vite\n", "  Local:   http://localhost:5173/\n"]);
        let (events, _rx) = mpsc::unbounded_channel();

        let mut report = executor()
            .start(&Artifact::default(), &sandbox, &CancellationToken::new(), &events)
            .await;
        let preview = tokio::time::timeout(
            Duration::from_secs(5),
            report.pending_preview.take().unwrap().wait(),
        )
        .await
        .unwrap();
        assert_eq!(preview.unwrap().url, "http://localhost:5173");
    }

    #[tokio::test]
    async fn test_failures_are_published_as_they_happen() {
        let sandbox = FakeSandbox {
            failing_paths: vec!["broken.txt".to_string()],
            ..FakeSandbox::default()
        };
        let (events, mut rx) = mpsc::unbounded_channel();

        executor()
            .start(
                &artifact(vec![Action::file("ok.txt", "y"), Action::file("broken.txt", "x")]),
                &sandbox,
                &CancellationToken::new(),
                &events,
            )
            .await;

        match rx.try_recv().unwrap() {
            ExecutionEvent::ActionFailed { index, error } => {
                assert_eq!(index, Some(1));
                assert!(error.contains("broken.txt"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_command_is_reported_and_cancellable() {
        let sandbox = FakeSandbox {
            long_running: vec!["tail -f server.log".to_string()],
            ..FakeSandbox::default()
        };
        let executor = executor().with_slow_command_after(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let (events, mut rx) = mpsc::unbounded_channel();
        let hanging = artifact(vec![
            Action::shell("tail -f server.log"),
            Action::file("after.txt", "z"),
        ]);

        let cancel_when_slow = async {
            let event = rx.recv().await;
            cancel.cancel();
            event
        };
        let (report, event) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                executor.start(&hanging, &sandbox, &cancel, &events),
                cancel_when_slow
            )
        })
        .await
        .unwrap();

        assert!(matches!(
            event,
            Some(ExecutionEvent::CommandRunning { index: 0, ref command, .. }) if command == "tail -f server.log"
        ));
        assert!(report.cancelled);
        assert_eq!(report.commands_run[0].exit_code, None);
        assert!(report.files_written.is_empty());
        assert!(report.dev_server.is_none());
        assert_eq!(sandbox.log(), vec!["spawn tail -f server.log"]);
        assert!(sandbox.handles.lock().unwrap()[0].is_killed());
        assert!(report.summary().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let sandbox = FakeSandbox::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (events, _rx) = mpsc::unbounded_channel();

        let report = executor()
            .start(&artifact(vec![Action::file("a.txt", "a")]), &sandbox, &cancel, &events)
            .await;

        assert!(report.cancelled);
        assert!(sandbox.log().is_empty());
    }

    #[test]
    fn test_report_summary() {
        let mut report = ExecutionReport::default();
        assert_eq!(report.summary(), "no actions");

        report.files_written.push("a.rs".to_string());
        report.files_written.push("b.rs".to_string());
        assert_eq!(report.summary(), "2 files written");

        report.errors.push("boom".to_string());
        report.preview = Some(PreviewSignal {
            url: "http://localhost:5173".to_string(),
        });
        assert_eq!(
            report.summary(),
            "2 files written, 1 errors, preview at http://localhost:5173"
        );
    }
}
