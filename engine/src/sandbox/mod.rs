//! Sandboxed code execution
//!
//! `SandboxExecutor` runs untrusted code in a separate interpreter process:
//!
//! 1. Textual safety pre-filter against a case-insensitive denylist. A match
//!    returns [`SandboxOutcome::SafetyRejected`] before anything touches disk
//!    or spawns.
//! 2. The code is written to a uniquely named scratch file owned by this call.
//! 3. The interpreter runs in its own process group with stdin closed and
//!    stdout/stderr captured.
//! 4. A wall-clock limit is enforced. On expiry the whole process group is
//!    killed and [`SandboxOutcome::TimedOut`] is returned without output.
//! 5. stdout and stderr are each capped at `max_output_chars` characters.
//!    Streams are drained in chunks and only enough bytes for the cap are
//!    kept, so a chatty program cannot grow engine memory.
//! 6. The scratch file is removed on every exit path (it is a `TempPath`,
//!    deleted on drop).
//!
//! The denylist is a guard against obviously destructive input, not an
//! isolation boundary: it is bypassable by string building or alternate import
//! spellings. Anything beyond local use needs a restricted user, namespace or
//! container around the interpreter.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;

/// Substrings rejected before execution (matched case-insensitively)
pub const DEFAULT_DENYLIST: &[&str] = &[
    "import os",
    "import sys",
    "import subprocess",
    "import shutil",
    "from os",
    "from sys",
    "from subprocess",
    "eval(",
    "exec(",
    "__import__",
    "open(",
    "input(",
];

/// Appended to a stream that exceeded the output cap
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

const READ_CHUNK: usize = 8 * 1024;

/// Internal failures while preparing or supervising a run
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to create scratch file: {0}")]
    Scratch(std::io::Error),

    #[error("Failed to start interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        source: std::io::Error,
    },

    #[error("Failed to collect process output: {0}")]
    Wait(std::io::Error),
}

/// Captured output of a run that finished within the limit
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

impl ExecutionOutput {
    /// A run is clean when it wrote nothing to stderr
    pub fn is_clean(&self) -> bool {
        self.stderr.is_empty()
    }
}

/// Distinct outcomes of a sandbox call
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxOutcome {
    /// The denylist matched; no process was spawned
    SafetyRejected { pattern: String },

    /// The limit expired and the process group was killed
    TimedOut { limit: Duration, pid: Option<u32> },

    /// The interpreter could not be started
    SpawnFailed { reason: String },

    /// The process exited on its own
    Completed(ExecutionOutput),
}

impl SandboxOutcome {
    /// Diagnostic text for non-completed outcomes
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            SandboxOutcome::SafetyRejected { pattern } => Some(format!(
                "Code rejected by safety filter: contains forbidden pattern '{}'",
                pattern
            )),
            SandboxOutcome::TimedOut { limit, .. } => Some(format!(
                "Code execution timeout (>{}s)",
                limit.as_secs_f64()
            )),
            SandboxOutcome::SpawnFailed { reason } => Some(format!("Execution error: {}", reason)),
            SandboxOutcome::Completed(_) => None,
        }
    }

    /// Flatten into the `(stdout, stderr)` pair; failures report their
    /// diagnostic on stderr
    pub fn into_streams(self) -> (String, String) {
        match self {
            SandboxOutcome::Completed(output) => (output.stdout, output.stderr),
            other => (String::new(), other.diagnostic().unwrap_or_default()),
        }
    }
}

/// Runs code in an isolated interpreter subprocess
#[derive(Debug)]
pub struct SandboxExecutor {
    interpreter: String,
    timeout: Duration,
    max_output_chars: usize,
    denylist: Vec<String>,
    scratch_dir: Option<PathBuf>,
    spawned: AtomicUsize,
}

impl SandboxExecutor {
    /// Create an executor for the given interpreter with the default denylist
    pub fn new(interpreter: impl Into<String>, timeout: Duration, max_output_chars: usize) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            max_output_chars,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            scratch_dir: None,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Create an executor from the `[sandbox]` config section
    pub fn from_config(config: &SandboxConfig) -> Self {
        let mut executor = Self::new(
            config.interpreter.clone(),
            Duration::from_secs(config.timeout_secs),
            config.max_output_chars,
        );
        for pattern in &config.extra_denylist {
            executor.deny(pattern.clone());
        }
        executor
    }

    /// Add a pattern to the denylist
    pub fn deny(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into().to_lowercase();
        if !pattern.is_empty() && !self.denylist.contains(&pattern) {
            self.denylist.push(pattern);
        }
    }

    /// Place scratch files in `dir` instead of the system temp directory
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Configured wall-clock limit
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_output_chars(&self) -> usize {
        self.max_output_chars
    }

    /// Number of interpreter processes started so far
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Returns the first denylist pattern contained in `code`
    pub fn check_denylist(&self, code: &str) -> Option<&str> {
        let lowered = code.to_lowercase();
        self.denylist
            .iter()
            .find(|pattern| lowered.contains(pattern.as_str()))
            .map(String::as_str)
    }

    /// Run `code` with the configured limit
    pub async fn run(&self, code: &str) -> SandboxOutcome {
        self.execute(code, self.timeout).await
    }

    /// Run `code` with an explicit wall-clock limit
    pub async fn execute(&self, code: &str, timeout: Duration) -> SandboxOutcome {
        if let Some(pattern) = self.check_denylist(code) {
            warn!("Sandbox rejected code containing '{}'", pattern);
            return SandboxOutcome::SafetyRejected {
                pattern: pattern.to_string(),
            };
        }

        match self.execute_isolated(code, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Sandbox execution failed: {}", e);
                SandboxOutcome::SpawnFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn execute_isolated(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<SandboxOutcome, SandboxError> {
        // Removed when `scratch` drops, on every return path below
        let scratch = self.write_scratch_file(code)?;
        debug!("Scratch file created at {}", scratch.display());

        let mut command = Command::new(&self.interpreter);
        command
            .arg(scratch.as_os_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // New process group so a timeout can take down any children too
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            interpreter: self.interpreter.clone(),
            source,
        })?;
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let pid = child.id();
        info!("Sandbox process {:?} started ({})", pid, self.interpreter);

        // Kills the whole group if this future is dropped mid-run
        let mut group = ProcessGroupGuard::new(pid);

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let byte_cap = self.max_output_chars.saturating_add(1).saturating_mul(4);

        let run = tokio::time::timeout(timeout, async {
            tokio::join!(
                child.wait(),
                read_capped(stdout.as_mut(), byte_cap),
                read_capped(stderr.as_mut(), byte_cap)
            )
        })
        .await;

        match run {
            Ok((status, out, err)) => {
                group.disarm();
                let status = status.map_err(SandboxError::Wait)?;
                let (out, out_overflow) = out.map_err(SandboxError::Wait)?;
                let (err, err_overflow) = err.map_err(SandboxError::Wait)?;

                let (stdout, stdout_truncated) =
                    truncate_output(&String::from_utf8_lossy(&out), self.max_output_chars);
                let (stderr, stderr_truncated) =
                    truncate_output(&String::from_utf8_lossy(&err), self.max_output_chars);

                let duration = start.elapsed();
                debug!(
                    "Sandbox process {:?} exited with {:?} after {}ms",
                    pid,
                    status.code(),
                    duration.as_millis()
                );

                Ok(SandboxOutcome::Completed(ExecutionOutput {
                    stdout,
                    stderr,
                    exit_code: status.code(),
                    stdout_truncated: stdout_truncated || out_overflow,
                    stderr_truncated: stderr_truncated || err_overflow,
                    duration,
                }))
            }
            Err(_) => {
                warn!(
                    "Sandbox process {:?} exceeded {:.1}s limit, killing",
                    pid,
                    timeout.as_secs_f64()
                );
                group.kill();
                if let Err(e) = child.kill().await {
                    debug!("Process already gone after group kill: {}", e);
                }
                Ok(SandboxOutcome::TimedOut {
                    limit: timeout,
                    pid,
                })
            }
        }
    }

    fn write_scratch_file(&self, code: &str) -> Result<tempfile::TempPath, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("taskmesh-").suffix(".py");

        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(SandboxError::Scratch)?;

        file.write_all(code.as_bytes())
            .and_then(|_| file.flush())
            .map_err(SandboxError::Scratch)?;

        // Close our handle; the path still deletes the file on drop
        Ok(file.into_temp_path())
    }
}

/// Drain `stream` to EOF, keeping at most `limit` bytes. The flag reports
/// whether anything past the limit was discarded.
async fn read_capped<R: AsyncRead + Unpin>(
    stream: Option<&mut R>,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut overflowed = false;
    let Some(stream) = stream else {
        return Ok((kept, overflowed));
    };

    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        if n > room {
            overflowed = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((kept, overflowed))
}

/// Sends `SIGKILL` to the child's process group on drop unless disarmed
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn kill(&mut self) {
        kill_process_group(self.pid.take());
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if self.pid.is_some() {
            debug!("Sandbox run dropped, killing process group {:?}", self.pid);
            self.kill();
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Cap `text` at `max_chars` characters, appending [`TRUNCATION_MARKER`] when
/// anything was cut. Returns the capped text and whether it was truncated.
pub fn truncate_output(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut capped = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            capped.push_str(&text[..byte_idx]);
            capped.push_str(TRUNCATION_MARKER);
            (capped, true)
        }
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell_executor(timeout: Duration) -> SandboxExecutor {
        SandboxExecutor::new("sh", timeout, 50)
    }

    fn scratch_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_truncate_output_under_cap_untouched() {
        let (text, truncated) = truncate_output("hello", 5);
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_output_over_cap() {
        let (text, truncated) = truncate_output("hello world", 5);
        assert_eq!(text, format!("hello{}", TRUNCATION_MARKER));
        assert!(truncated);
    }

    #[test]
    fn test_truncate_output_counts_characters() {
        let (text, truncated) = truncate_output("ééééé", 3);
        assert_eq!(text, format!("ééé{}", TRUNCATION_MARKER));
        assert!(truncated);
    }

    #[test]
    fn test_denylist_case_insensitive() {
        let executor = SandboxExecutor::new("python3", Duration::from_secs(1), 100);
        assert_eq!(executor.check_denylist("IMPORT OS\nprint(1)"), Some("import os"));
        assert_eq!(executor.check_denylist("x = Eval('1')"), Some("eval("));
        assert_eq!(executor.check_denylist("print(1 + 1)"), None);
    }

    #[test]
    fn test_extra_denylist_from_config() {
        let config = SandboxConfig {
            extra_denylist: vec!["Socket".to_string()],
            ..Default::default()
        };
        let executor = SandboxExecutor::from_config(&config);
        assert_eq!(executor.check_denylist("import socket"), Some("socket"));
    }

    #[tokio::test]
    async fn test_safety_rejection_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        let executor = shell_executor(Duration::from_secs(5)).with_scratch_dir(dir.path());

        let outcome = executor
            .execute("import os\nprint(1)", Duration::from_secs(5))
            .await;

        assert!(matches!(outcome, SandboxOutcome::SafetyRejected { .. }));
        assert_eq!(executor.spawn_count(), 0);
        assert_eq!(scratch_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_completed_run_captures_streams() {
        let dir = TempDir::new().unwrap();
        let executor = shell_executor(Duration::from_secs(10)).with_scratch_dir(dir.path());

        let outcome = executor.run("echo out; echo err 1>&2").await;

        match outcome {
            SandboxOutcome::Completed(output) => {
                assert_eq!(output.stdout, "out\n");
                assert_eq!(output.stderr, "err\n");
                assert_eq!(output.exit_code, Some(0));
                assert!(!output.is_clean());
            }
            other => panic!("Expected completed run, got {:?}", other),
        }
        assert_eq!(executor.spawn_count(), 1);
        assert_eq!(scratch_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_output_capped_independently() {
        let dir = TempDir::new().unwrap();
        let executor = shell_executor(Duration::from_secs(10)).with_scratch_dir(dir.path());

        let code = "i=0; while [ $i -lt 100 ]; do printf x; i=$((i+1)); done; printf short 1>&2";
        let outcome = executor.run(code).await;

        match outcome {
            SandboxOutcome::Completed(output) => {
                assert_eq!(output.stdout, format!("{}{}", "x".repeat(50), TRUNCATION_MARKER));
                assert!(output.stdout_truncated);
                assert_eq!(output.stderr, "short");
                assert!(!output.stderr_truncated);
            }
            other => panic!("Expected completed run, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_capped_drains_but_keeps_limit() {
        let mut reader = tokio::io::repeat(b'x').take(64 * 1024 * 1024);

        let (kept, overflowed) = read_capped(Some(&mut reader), 200).await.unwrap();

        assert_eq!(kept.len(), 200);
        assert!(kept.capacity() < 200 + READ_CHUNK);
        assert!(overflowed);
        assert_eq!(reader.limit(), 0);
    }

    #[tokio::test]
    async fn test_read_capped_exact_fit_not_overflowed() {
        let mut reader: &[u8] = b"abcd";
        let (kept, overflowed) = read_capped(Some(&mut reader), 4).await.unwrap();
        assert_eq!(kept, b"abcd");
        assert!(!overflowed);
    }

    #[tokio::test]
    async fn test_huge_output_is_capped_while_streaming() {
        let dir = TempDir::new().unwrap();
        let executor = shell_executor(Duration::from_secs(60)).with_scratch_dir(dir.path());

        let outcome = executor
            .run("head -c 50000000 /dev/zero | tr '\\0' x")
            .await;

        match outcome {
            SandboxOutcome::Completed(output) => {
                assert_eq!(output.stdout, format!("{}{}", "x".repeat(50), TRUNCATION_MARKER));
                assert!(output.stdout_truncated);
                assert_eq!(output.exit_code, Some(0));
            }
            other => panic!("Expected completed run, got {:?}", other),
        }
    }

    #[cfg(target_os = "linux")]
    fn process_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // Field 3 is the state; a zombie has already been killed
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map(|state| state != "Z")
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropped_run_kills_background_children() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("child.pid");
        let executor = std::sync::Arc::new(
            shell_executor(Duration::from_secs(60)).with_scratch_dir(dir.path()),
        );

        let code = format!("sleep 60 &\necho $! > {}\nwait\n", pid_file.display());
        let run = {
            let executor = std::sync::Arc::clone(&executor);
            tokio::spawn(async move { executor.run(&code).await })
        };

        let mut grandchild = None;
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = text.trim().parse::<i32>() {
                    grandchild = Some(pid);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let grandchild = grandchild.expect("background pid written");
        assert!(process_alive(grandchild));

        run.abort();
        assert!(run.await.unwrap_err().is_cancelled());

        let mut alive = true;
        for _ in 0..40 {
            alive = process_alive(grandchild);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "background process {} survived the dropped run", grandchild);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let executor = shell_executor(Duration::from_secs(30)).with_scratch_dir(dir.path());

        let limit = Duration::from_secs(1);
        let start = Instant::now();
        let outcome = executor.execute("sleep 5", limit).await;
        let elapsed = start.elapsed();

        assert!(elapsed < limit + Duration::from_secs(2), "took {:?}", elapsed);
        match &outcome {
            SandboxOutcome::TimedOut { limit: reported, pid } => {
                assert_eq!(*reported, limit);
                #[cfg(unix)]
                {
                    use nix::sys::signal::kill;
                    use nix::unistd::Pid;
                    let pid = pid.expect("pid recorded");
                    assert!(kill(Pid::from_raw(pid as i32), None).is_err());
                }
                #[cfg(not(unix))]
                let _ = pid;
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert_eq!(
            outcome.diagnostic().unwrap(),
            "Code execution timeout (>1s)"
        );
        assert_eq!(scratch_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let executor = SandboxExecutor::new(
            "taskmesh-no-such-interpreter",
            Duration::from_secs(5),
            100,
        )
        .with_scratch_dir(dir.path());

        let outcome = executor.run("print('hi')").await;

        assert!(matches!(outcome, SandboxOutcome::SpawnFailed { .. }));
        assert_eq!(executor.spawn_count(), 0);
        assert_eq!(scratch_files(&dir), 0);
    }

    #[test]
    fn test_into_streams_reports_diagnostic_on_stderr() {
        let outcome = SandboxOutcome::SafetyRejected {
            pattern: "open(".to_string(),
        };
        let (stdout, stderr) = outcome.into_streams();
        assert!(stdout.is_empty());
        assert!(stderr.contains("open("));
    }
}
