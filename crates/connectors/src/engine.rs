//! Agent execution engine.
//!
//! Runs one agent CLI invocation per command inside the caller's workspace,
//! bounded by a timeout measured from spawn. A run that overstays has its
//! whole process group killed, and the agent reaped, before the engine
//! reports back.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::workspace::{SessionInfo, SessionKey, WorkspaceRouter};
use crate::{BackendKind, ConnectorError};

/// Instruction sent to the agent after a timed-out run.
pub const SUMMARY_PROMPT: &str = "The previous task was interrupted because it ran too long. \
Briefly summarize what you have done so far, what is still unfinished, and what the next steps would be.";

/// Lines containing any of these are runtime chatter, not agent output.
const NOISE_MARKERS: &[&str] = &[
    "ExperimentalWarning",
    "This feature could change at any time",
    "--trace-warnings",
];

/// How one agent invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Exit status zero; `output` is cleaned and may be empty.
    Succeeded { output: String },
    /// Non-zero exit, or the process could not be started or awaited.
    Failed {
        output: String,
        exit_code: Option<i32>,
    },
    /// The deadline passed; the process has been killed and reaped.
    TimedOut { timeout: Duration },
    /// The agent executable does not exist.
    NotInstalled { program: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: BackendKind,
    /// Explicit executable; `None` looks up the backend's default on `PATH`.
    pub program: Option<PathBuf>,
    /// Arguments placed before the backend's own arguments.
    pub leading_args: Vec<String>,
    pub command_timeout: Duration,
    pub summary_timeout: Duration,
}

impl EngineConfig {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            program: None,
            leading_args: Vec::new(),
            command_timeout: Duration::from_secs(600),
            summary_timeout: Duration::from_secs(120),
        }
    }
}

pub struct ExecutionEngine {
    config: EngineConfig,
    router: WorkspaceRouter,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, router: WorkspaceRouter) -> Self {
        Self { config, router }
    }

    pub fn backend(&self) -> BackendKind {
        self.config.backend
    }

    pub fn router(&self) -> &WorkspaceRouter {
        &self.router
    }

    fn program(&self, backend: BackendKind) -> PathBuf {
        self.config
            .program
            .clone()
            .unwrap_or_else(|| PathBuf::from(backend.default_program()))
    }

    /// Session key for `user_id` on the configured backend.
    pub fn session_key(&self, user_id: &str) -> SessionKey {
        SessionKey::new(user_id, self.config.backend)
    }

    /// Run `command` for `user_id` under the configured command timeout.
    pub async fn execute(&self, user_id: &str, command: &str) -> RunOutcome {
        self.run(&self.session_key(user_id), command, self.config.command_timeout)
            .await
    }

    /// Ask the agent, in the same workspace, to summarize an interrupted run.
    pub async fn summarize(&self, user_id: &str) -> RunOutcome {
        self.run(&self.session_key(user_id), SUMMARY_PROMPT, self.config.summary_timeout)
            .await
    }

    /// Run one instruction in the user's workspace, bounded by `timeout`.
    pub async fn run(&self, key: &SessionKey, instruction: &str, timeout: Duration) -> RunOutcome {
        let workspace = match self.router.resolve_or_create(key).await {
            Ok(path) => path,
            Err(e) => {
                error!(
                    component = "engine",
                    event = "engine.workspace_failed",
                    user_id = %key.user_id,
                    error = %e,
                    "Could not prepare workspace"
                );
                return RunOutcome::Failed {
                    output: format!("Workspace unavailable: {e}"),
                    exit_code: None,
                };
            }
        };
        self.spawn_and_wait(key.backend, &workspace, instruction, timeout)
            .await
    }

    /// Discard the user's conversation history. The next run starts fresh.
    pub async fn create_session(&self, user_id: &str) -> Result<PathBuf, ConnectorError> {
        self.router.reset(&self.session_key(user_id)).await
    }

    pub async fn session_info(&self, user_id: &str) -> SessionInfo {
        self.router.info(&self.session_key(user_id)).await
    }

    /// No agent process outlives its run, so closing only records the shutdown.
    pub async fn close(&self) {
        info!(
            component = "engine",
            event = "engine.closed",
            backend = %self.config.backend,
            "Execution engine closed"
        );
    }

    async fn spawn_and_wait(
        &self,
        backend: BackendKind,
        workspace: &Path,
        instruction: &str,
        timeout: Duration,
    ) -> RunOutcome {
        let program = self.program(backend);
        let mut args = self.config.leading_args.clone();
        args.extend(backend.build_args(instruction, workspace));

        info!(
            component = "engine",
            event = "engine.spawn",
            backend = %backend,
            program = %program.display(),
            cwd = %workspace.display(),
            timeout_secs = timeout.as_secs(),
            "Starting agent"
        );

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down anything the agent started.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(
                    component = "engine",
                    event = "engine.not_installed",
                    program = %program.display(),
                    "Agent executable not found"
                );
                return RunOutcome::NotInstalled {
                    program: program.display().to_string(),
                };
            }
            Err(e) => {
                error!(
                    component = "engine",
                    event = "engine.spawn_failed",
                    program = %program.display(),
                    error = %e,
                    "Failed to start agent"
                );
                return RunOutcome::Failed {
                    output: format!("Failed to start {}: {e}", program.display()),
                    exit_code: None,
                };
            }
        };
        let pid = child.id();

        let mut stdout = tokio::spawn(read_to_end("stdout", child.stdout.take()));
        let mut stderr = tokio::spawn(read_to_end("stderr", child.stderr.take()));

        // The deadline covers draining the pipes too: a background process
        // that inherited them can keep them open after the agent exits.
        let collected = tokio::time::timeout_at(deadline, async {
            let status = child.wait().await;
            let (out, err) = tokio::join!(&mut stdout, &mut stderr);
            (status, out.unwrap_or_default(), err.unwrap_or_default())
        })
        .await;

        let (status, mut raw, err) = match collected {
            Ok((Ok(status), out, err)) => (status, out, err),
            Ok((Err(e), _, _)) => {
                kill_process_group(pid);
                return RunOutcome::Failed {
                    output: format!("Failed waiting for agent: {e}"),
                    exit_code: None,
                };
            }
            Err(_) => {
                kill_process_group(pid);
                // id() is None once the agent itself has been reaped.
                if child.id().is_some() {
                    if let Err(e) = child.kill().await {
                        warn!(
                            component = "engine",
                            event = "engine.kill_failed",
                            error = %e,
                            "Failed to kill timed-out agent"
                        );
                    }
                    // kill() reaps on success; this covers the case where it did not.
                    let _ = child.wait().await;
                }
                stdout.abort();
                stderr.abort();
                warn!(
                    component = "engine",
                    event = "engine.timed_out",
                    backend = %backend,
                    cwd = %workspace.display(),
                    timeout_secs = timeout.as_secs(),
                    "Agent run timed out and was terminated"
                );
                return RunOutcome::TimedOut { timeout };
            }
        };

        raw.extend(err);
        let output = clean_output(&String::from_utf8_lossy(&raw));
        let duration_ms = start.elapsed().as_millis() as u64;

        if status.success() {
            info!(
                component = "engine",
                event = "engine.succeeded",
                duration_ms,
                output_bytes = output.len(),
                "Agent run finished"
            );
            RunOutcome::Succeeded { output }
        } else {
            warn!(
                component = "engine",
                event = "engine.failed",
                duration_ms,
                exit_code = ?status.code(),
                "Agent exited with failure"
            );
            RunOutcome::Failed {
                output,
                exit_code: status.code(),
            }
        }
    }
}

/// SIGKILL the agent's process group. Errors (group already gone) are ignored.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
        unsafe {
            libc::killpg(pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn read_to_end<R: AsyncRead + Unpin>(stream: &'static str, reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            warn!(
                component = "engine",
                event = "engine.output_read_failed",
                stream,
                captured_bytes = buf.len(),
                error = %e,
                "Agent output truncated by read error"
            );
        }
    }
    buf
}

/// Drop runtime warning lines and surrounding whitespace.
pub fn clean_output(raw: &str) -> String {
    raw.lines()
        .filter(|line| !NOISE_MARKERS.iter().any(|m| line.contains(m)))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        engine: ExecutionEngine,
    }

    /// Engine whose "agent" is `/bin/sh <script>`. For qwen the instruction
    /// arrives as `$3`.
    fn fixture(script: &str, command_timeout: Duration) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let script_path = root.join("agent.sh");
        std::fs::write(&script_path, script).unwrap();

        let config = EngineConfig {
            program: Some(PathBuf::from("/bin/sh")),
            leading_args: vec![script_path.to_string_lossy().into_owned()],
            command_timeout,
            summary_timeout: Duration::from_secs(5),
            ..EngineConfig::new(BackendKind::Qwen)
        };
        let engine = ExecutionEngine::new(config, WorkspaceRouter::new(root.join("ws")));
        Fixture {
            _tmp: tmp,
            root,
            engine,
        }
    }

    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => (unsafe { libc::kill(pid, 0) }) == 0,
        }
    }

    #[test]
    fn clean_output_drops_runtime_noise() {
        let raw = "(node:42) ExperimentalWarning: Fetch API\n\
                   (Use `node --trace-warnings ...` to show where)\n\
                   \n  real answer\nsecond line  \n";
        assert_eq!(clean_output(raw), "real answer\nsecond line");
        assert_eq!(clean_output("This feature could change at any time\n"), "");
    }

    /// Yields `data` once, then fails.
    struct FailingReader {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    std::task::Poll::Ready(Ok(()))
                }
                None => std::task::Poll::Ready(Err(std::io::Error::other("pipe broke"))),
            }
        }
    }

    #[tokio::test]
    async fn read_error_keeps_captured_prefix() {
        let reader = FailingReader {
            data: Some(b"partial"),
        };
        assert_eq!(read_to_end("stdout", Some(reader)).await, b"partial");
        assert!(read_to_end::<FailingReader>("stderr", None).await.is_empty());
    }

    #[tokio::test]
    async fn success_returns_cleaned_output() {
        let f = fixture(
            "echo '(node:1) ExperimentalWarning: x' >&2\necho \"answer: $3\"\n",
            Duration::from_secs(10),
        );
        let outcome = f.engine.execute("alice", "hello world").await;
        assert_eq!(
            outcome,
            RunOutcome::Succeeded {
                output: "answer: hello world".to_string()
            }
        );
    }

    #[tokio::test]
    async fn runs_inside_the_users_workspace() {
        let f = fixture("pwd\n", Duration::from_secs(10));
        let RunOutcome::Succeeded { output } = f.engine.execute("alice", "where").await else {
            panic!("expected success");
        };
        let expected = f
            .engine
            .router()
            .path_for(&SessionKey::new("alice", BackendKind::Qwen));
        assert_eq!(
            PathBuf::from(output).canonicalize().unwrap(),
            expected.canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_output() {
        let f = fixture("echo oops >&2\nexit 3\n", Duration::from_secs(10));
        assert_eq!(
            f.engine.execute("alice", "x").await,
            RunOutcome::Failed {
                output: "oops".to_string(),
                exit_code: Some(3)
            }
        );
    }

    #[tokio::test]
    async fn empty_success_is_still_success() {
        let f = fixture("exit 0\n", Duration::from_secs(10));
        assert_eq!(
            f.engine.execute("alice", "x").await,
            RunOutcome::Succeeded {
                output: String::new()
            }
        );
    }

    #[tokio::test]
    async fn timeout_kills_the_agent() {
        let f = fixture(
            "echo $$ > agent.pid\nexec sleep 30\n",
            Duration::from_millis(1500),
        );
        let start = Instant::now();
        let outcome = f.engine.execute("alice", "long task").await;
        assert_eq!(
            outcome,
            RunOutcome::TimedOut {
                timeout: Duration::from_millis(1500)
            }
        );
        assert!(start.elapsed() < Duration::from_secs(10));

        let workspace = f
            .engine
            .router()
            .path_for(&SessionKey::new("alice", BackendKind::Qwen));
        let pid: i32 = std::fs::read_to_string(workspace.join("agent.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // Reaped: the pid no longer names a live process or a zombie.
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive, "agent process {pid} still exists after timeout");
    }

    #[tokio::test]
    async fn background_process_holding_output_does_not_outlast_timeout() {
        let f = fixture("sleep 8 &\necho answer\nexit 0\n", Duration::from_secs(1));
        let start = Instant::now();
        let outcome = f.engine.execute("alice", "x").await;
        assert_eq!(
            outcome,
            RunOutcome::TimedOut {
                timeout: Duration::from_secs(1)
            }
        );
        assert!(
            start.elapsed() < Duration::from_secs(4),
            "run took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn timeout_kills_processes_the_agent_started() {
        let f = fixture(
            "sleep 30 &\necho $! > worker.pid\nwait\n",
            Duration::from_millis(800),
        );
        assert!(matches!(
            f.engine.execute("alice", "x").await,
            RunOutcome::TimedOut { .. }
        ));

        let workspace = f
            .engine
            .router()
            .path_for(&SessionKey::new("alice", BackendKind::Qwen));
        let pid: i32 = std::fs::read_to_string(workspace.join("worker.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // The worker is not our child; whoever inherits it reaps it later, so
        // a zombie counts as dead.
        let mut alive = true;
        for _ in 0..50 {
            alive = is_running(pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!alive, "worker {pid} survived the agent's timeout");
    }

    #[tokio::test]
    async fn summary_runs_in_the_same_workspace() {
        let f = fixture(
            "echo \"$3\" >> calls.log\ncase \"$3\" in slow) exec sleep 30;; esac\necho done\n",
            Duration::from_millis(500),
        );
        assert!(matches!(
            f.engine.execute("alice", "slow").await,
            RunOutcome::TimedOut { .. }
        ));
        assert_eq!(
            f.engine.summarize("alice").await,
            RunOutcome::Succeeded {
                output: "done".to_string()
            }
        );

        let info = f.engine.session_info("alice").await;
        let log = std::fs::read_to_string(info.path.join("calls.log")).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines, vec!["slow", SUMMARY_PROMPT]);
    }

    #[tokio::test]
    async fn missing_executable_is_not_installed() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            program: Some(tmp.path().join("no-such-agent")),
            ..EngineConfig::new(BackendKind::IFlow)
        };
        let engine = ExecutionEngine::new(config, WorkspaceRouter::new(tmp.path().join("ws")));
        assert!(matches!(
            engine.execute("alice", "hi").await,
            RunOutcome::NotInstalled { .. }
        ));
    }

    #[tokio::test]
    async fn users_do_not_share_state() {
        let f = fixture("echo \"$3\" >> history\ncat history\n", Duration::from_secs(10));
        f.engine.execute("alice", "a1").await;
        let bob = f.engine.execute("bob", "b1").await;
        let alice = f.engine.execute("alice", "a2").await;

        assert_eq!(bob, RunOutcome::Succeeded { output: "b1".into() });
        assert_eq!(
            alice,
            RunOutcome::Succeeded {
                output: "a1\na2".into()
            }
        );
        assert!(f.root.join("ws").join("qwen").join("user_bob").is_dir());
    }

    #[tokio::test]
    async fn create_session_clears_history() {
        let f = fixture("echo \"$3\" >> history\ncat history\n", Duration::from_secs(10));
        f.engine.execute("alice", "first").await;
        f.engine.create_session("alice").await.unwrap();
        assert_eq!(
            f.engine.execute("alice", "second").await,
            RunOutcome::Succeeded {
                output: "second".into()
            }
        );
    }
}
