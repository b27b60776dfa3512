//! Sandbox capability
//!
//! Everything the executor needs from an execution environment: write a
//! file, spawn a command with a live output stream and an exit signal, and
//! halt whatever is still running. `LocalSandbox` implements it on top of a
//! directory and `tokio::process`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use loom_core::{LoomError, Result, SandboxConfig};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Protected file patterns that should never be overwritten
const PROTECTED_FILES: &[&str] = &[".git", ".env", ".secrets", ".loom"];

/// Output lines buffered per process before the reader waits
const OUTPUT_BUFFER: usize = 256;

/// Text output of a spawned process, stdout and stderr merged
pub type OutputStream = BoxStream<'static, String>;

/// Resolves with the exit code once the process ends
pub struct ExitSignal(oneshot::Receiver<Option<i32>>);

impl ExitSignal {
    pub fn new(rx: oneshot::Receiver<Option<i32>>) -> Self {
        Self(rx)
    }

    /// `None` when the process was killed or its status is unknown
    pub async fn wait(self) -> Option<i32> {
        self.0.await.ok().flatten()
    }
}

/// Kill switch for one spawned process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    token: CancellationToken,
}

impl ProcessHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A running process
pub struct SpawnedProcess {
    pub output: OutputStream,
    pub exit: ExitSignal,
    pub handle: ProcessHandle,
}

/// Execution environment for extracted actions
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Write `content` to `path` relative to the sandbox root
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Start `command` and return its live output and exit signal
    async fn spawn(&self, command: &str) -> Result<SpawnedProcess>;

    /// Kill every process started so far
    fn halt(&self);
}

/// Validate that a path is safe to write to
pub fn validate_path(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);

    if path.as_os_str().is_empty() {
        return Err(LoomError::PathValidation("Empty path".to_string()));
    }

    // Reject absolute paths
    if path.is_absolute() || path.has_root() {
        return Err(LoomError::PathValidation(format!(
            "Absolute paths not allowed: {}",
            path.display()
        )));
    }

    // Check for path traversal
    for component in path.components() {
        if let Component::ParentDir = component {
            return Err(LoomError::PathValidation(format!(
                "Path traversal not allowed: {}",
                path.display()
            )));
        }
    }

    // Check protected files at any depth
    for component in path.components() {
        if let Component::Normal(name) = component {
            let name = name.to_string_lossy();
            if PROTECTED_FILES.iter().any(|p| name == *p) {
                return Err(LoomError::PathValidation(format!(
                    "Cannot write to protected file: {}",
                    path.display()
                )));
            }
        }
    }

    Ok(path.to_path_buf())
}

/// Sandbox rooted in a local directory
pub struct LocalSandbox {
    root: PathBuf,
    shell: String,
    processes: Mutex<CancellationToken>,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shell: "sh".to_string(),
            processes: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_config(config: &SandboxConfig, base: &Path) -> Self {
        Self::new(base.join(&config.root)).with_shell(config.shell.clone())
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn process_token(&self) -> CancellationToken {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let relative = validate_path(path)?;
        let full = self.root.join(&relative);
        let created = !tokio::fs::try_exists(&full).await.unwrap_or(false);

        // Create parent directories if needed
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LoomError::Sandbox(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&full, content).await.map_err(|e| {
            LoomError::Sandbox(format!("Failed to write file {}: {}", relative.display(), e))
        })?;

        if created {
            tracing::info!("Created file: {}", relative.display());
        } else {
            tracing::info!("Modified file: {}", relative.display());
        }
        Ok(())
    }

    async fn spawn(&self, command: &str) -> Result<SpawnedProcess> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            LoomError::Sandbox(format!(
                "Failed to create sandbox root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a kill reaches everything the shell started
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| LoomError::Sandbox(format!("Failed to spawn `{}`: {}", command, e)))?;

        let pid = child.id();
        tracing::debug!(pid = ?pid, "Spawned `{}`", command);

        let (line_tx, line_rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let token = self.process_token();
        let handle = ProcessHandle::new(token.clone());
        let (exit_tx, exit_rx) = oneshot::channel();
        let label = command.to_string();

        tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = token.cancelled() => None,
            };

            let code = match finished {
                Some(Ok(status)) => status.code(),
                Some(Err(e)) => {
                    tracing::warn!("Failed to wait for `{}`: {}", label, e);
                    None
                }
                None => {
                    tracing::debug!("Killing `{}`", label);
                    kill_process_group(pid);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill `{}`: {}", label, e);
                    }
                    None
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedProcess {
            output: ReceiverStream::new(line_rx).boxed(),
            exit: ExitSignal::new(exit_rx),
            handle,
        })
    }

    fn halt(&self) {
        let mut processes = self.processes.lock().unwrap_or_else(PoisonError::into_inner);
        processes.cancel();
        *processes = CancellationToken::new();
        tracing::info!("Halted sandbox processes in {}", self.root.display());
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // Negative pid addresses the whole process group
    let result = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        tracing::debug!("Failed to kill process group {}: {}", pid, err);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Forward complete lines (newline restored) until EOF or the receiver is gone
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(format!("{}\n", line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Process output ended: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_validate_path_absolute() {
        assert!(validate_path("/etc/passwd").is_err());
    }

    #[test]
    fn test_validate_path_traversal() {
        assert!(validate_path("../../../etc/passwd").is_err());
        assert!(validate_path("src/../../escape").is_err());
    }

    #[test]
    fn test_validate_path_protected() {
        assert!(validate_path(".git/config").is_err());
        assert!(validate_path(".env").is_err());
        assert!(validate_path("nested/.env").is_err());
    }

    #[test]
    fn test_validate_path_valid() {
        assert!(validate_path("src/main.rs").is_ok());
        assert!(validate_path("./index.html").is_ok());
        assert!(validate_path(".envrc.example").is_ok());
        assert!(validate_path("").is_err());
    }

    #[tokio::test]
    async fn test_write_file_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(temp_dir.path());

        sandbox.write_file("a/b/c/test.txt", "nested content").await.unwrap();

        let content = std::fs::read_to_string(temp_dir.path().join("a/b/c/test.txt")).unwrap();
        assert_eq!(content, "nested content");
    }

    #[tokio::test]
    async fn test_write_file_rejects_unsafe_path() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(temp_dir.path());

        let result = sandbox.write_file("../outside.txt", "x").await;
        assert!(matches!(result, Err(LoomError::PathValidation(_))));
    }

    #[tokio::test]
    async fn test_spawn_streams_output_and_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(temp_dir.path());

        let process = sandbox.spawn("echo out; echo err 1>&2; exit 3").await.unwrap();
        let mut lines: Vec<String> = process.output.collect().await;
        lines.sort();

        assert_eq!(lines, vec!["err\n", "out\n"]);
        assert_eq!(process.exit.wait().await, Some(3));
    }

    #[tokio::test]
    async fn test_spawn_runs_in_root() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(temp_dir.path());
        sandbox.write_file("marker.txt", "here").await.unwrap();

        let process = sandbox.spawn("cat marker.txt").await.unwrap();
        let lines: Vec<String> = process.output.collect().await;
        assert_eq!(lines, vec!["here\n"]);
    }

    #[tokio::test]
    async fn test_halt_kills_running_process() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(temp_dir.path());

        // `sleep` runs as a child of the shell and holds the output pipe
        let process = sandbox.spawn("sleep 30; echo done").await.unwrap();
        sandbox.halt();

        let code = tokio::time::timeout(Duration::from_secs(5), process.exit.wait())
            .await
            .unwrap();
        assert_eq!(code, None);
        assert!(process.handle.is_killed());

        let lines: Vec<String> =
            tokio::time::timeout(Duration::from_secs(5), process.output.collect())
                .await
                .unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_halt_kills_background_children() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(temp_dir.path());

        let mut process = sandbox
            .spawn("sleep 30 & echo started; wait")
            .await
            .unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), process.output.next())
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("started\n"));

        sandbox.halt();

        // The pipe only closes once the backgrounded sleep is gone too
        let rest = tokio::time::timeout(Duration::from_secs(5), process.output.next())
            .await
            .unwrap();
        assert_eq!(rest, None);
        assert_eq!(process.exit.wait().await, None);
    }

    #[tokio::test]
    async fn test_handle_kills_single_process() {
        let temp_dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(temp_dir.path());

        let process = sandbox.spawn("sleep 30; echo done").await.unwrap();
        process.handle.kill();
        let code = tokio::time::timeout(Duration::from_secs(5), process.exit.wait())
            .await
            .unwrap();
        assert_eq!(code, None);

        let lines: Vec<String> =
            tokio::time::timeout(Duration::from_secs(5), process.output.collect())
                .await
                .unwrap();
        assert!(lines.is_empty());

        // The sandbox itself is still usable
        let process = sandbox.spawn("echo again").await.unwrap();
        assert_eq!(process.exit.wait().await, Some(0));
    }
}
