//! Execution engine: run one resolved invocation through the host shell with a hard timeout.
//!
//! Runs are bounded by a small worker pool (a semaphore); callers beyond the pool size wait
//! for a permit instead of being dropped. On unix each child leads its own process group, and
//! a timed-out or aborted run kills the whole group, so pipelines and background jobs started
//! by the shell do not outlive the permit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;

use crate::auth::Principal;
use crate::catalog::{Catalog, CommandKey};
use crate::platform::HostPlatform;

/// Stdout of a sandboxed `logs` request when none of the fallback files can be read.
pub const LOG_UNAVAILABLE: &str = "ℹ️ No log file available in this environment.";

/// Bytes read from the end of a log file when tailing it.
const LOG_TAIL_BYTES: u64 = 64 * 1024;

/// Timeouts, pool size and log tail length for the engine.
#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    pub command_timeout: Duration,
    /// Budget for internal host-identity probes (local IP lookup).
    pub probe_timeout: Duration,
    pub workers: usize,
    pub log_tail_lines: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
            workers: 2,
            log_tail_lines: 30,
        }
    }
}

/// One authorized request, ready to run. Consumed once.
#[derive(Debug, Clone)]
pub struct Job {
    /// Correlates log lines for one request.
    pub id: String,
    pub principal: Principal,
    /// `None` for operator-supplied custom invocations.
    pub key: Option<CommandKey>,
    pub invocation: String,
}

impl Job {
    pub fn new(principal: Principal, key: Option<CommandKey>, invocation: impl Into<String>) -> Self {
        Self {
            id: format!("req-{}", uuid::Uuid::new_v4()),
            principal,
            key,
            invocation: invocation.into(),
        }
    }
}

/// What happened to one invocation, whether it ran as a child process or was read from a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The invocation ran to completion. A non-zero `status` is still a completion.
    Completed {
        stdout: String,
        stderr: String,
        /// `None` when the process was ended by a signal or the data came from a file.
        status: Option<i32>,
    },
    Timeout {
        after: Duration,
    },
    Fault {
        detail: String,
    },
}

/// Shared handle to the engine. Cheap to clone; all clones share one worker pool.
#[derive(Clone)]
pub struct Executor {
    catalog: Arc<Catalog>,
    base_dir: Arc<PathBuf>,
    limits: ExecLimits,
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(catalog: Arc<Catalog>, base_dir: PathBuf, limits: ExecLimits) -> Self {
        let workers = limits.workers.max(1);
        Self {
            catalog,
            base_dir: Arc::new(base_dir),
            limits,
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn limits(&self) -> ExecLimits {
        self.limits
    }

    /// Run a job. The `logs` key reads fallback files directly when the catalog was built sandboxed.
    pub async fn execute(&self, job: &Job) -> ExecutionOutcome {
        if job.key == Some(CommandKey::Logs) {
            if let Some(paths) = self.catalog.log_fallbacks() {
                log::debug!("{}: sandboxed log request, reading fallback files", job.id);
                return tail_first_readable(&self.base_dir, paths, self.limits.log_tail_lines).await;
            }
        }
        log::debug!(
            "{}: principal {} running {:?}",
            job.id,
            job.principal,
            job.invocation
        );
        let outcome = self
            .run_shell(&job.invocation, self.limits.command_timeout)
            .await;
        match &outcome {
            ExecutionOutcome::Completed { status, .. } => {
                log::debug!("{}: completed with status {:?}", job.id, status)
            }
            ExecutionOutcome::Timeout { after } => {
                log::warn!("{}: timed out after {}s", job.id, after.as_secs_f32())
            }
            ExecutionOutcome::Fault { detail } => {
                log::error!("{}: execution fault running {:?}: {}", job.id, job.invocation, detail)
            }
        }
        outcome
    }

    /// Primary local IPv4 address of the host, using the short probe budget.
    /// Runs outside the worker pool, so a busy pool never delays it.
    pub async fn probe_local_ip(&self) -> Option<String> {
        let probe = self.catalog.ip_probe();
        match self.spawn_and_wait(probe, self.limits.probe_timeout).await {
            ExecutionOutcome::Completed { stdout, .. } => stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string),
            other => {
                log::debug!("local ip probe failed: {:?}", other);
                None
            }
        }
    }

    async fn run_shell(&self, invocation: &str, timeout: Duration) -> ExecutionOutcome {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                return ExecutionOutcome::Fault {
                    detail: "worker pool closed".to_string(),
                }
            }
        };
        self.spawn_and_wait(invocation, timeout).await
    }

    async fn spawn_and_wait(&self, invocation: &str, timeout: Duration) -> ExecutionOutcome {
        let mut cmd = shell_command(self.catalog.platform(), invocation);
        cmd.current_dir(self.base_dir.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ExecutionOutcome::Fault {
                    detail: format!("exec failed: {}", e),
                }
            }
        };
        let mut group = ProcessGroup::of(&child);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let waited = tokio::time::timeout(timeout, async {
            tokio::join!(read_pipe(stdout), read_pipe(stderr), child.wait())
        })
        .await;
        match waited {
            Ok((stdout, stderr, Ok(status))) => {
                group.disarm();
                ExecutionOutcome::Completed {
                    stdout,
                    stderr,
                    status: status.code(),
                }
            }
            Ok((_, _, Err(e))) => {
                reap(&mut group, &mut child).await;
                ExecutionOutcome::Fault {
                    detail: format!("waiting for child failed: {}", e),
                }
            }
            Err(_) => {
                reap(&mut group, &mut child).await;
                ExecutionOutcome::Timeout { after: timeout }
            }
        }
    }
}

/// The process group led by a spawned shell. Killed on drop unless the shell exited normally,
/// which also covers runs whose task is aborted mid-flight.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    fn disarm(&mut self) {
        self.leader = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.leader.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        log::debug!("killpg {} failed: {}", pgid, e);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Kill the group, then the shell itself, and wait for the shell so it is not left a zombie.
async fn reap(group: &mut ProcessGroup, child: &mut Child) {
    group.kill();
    if let Err(e) = child.kill().await {
        log::debug!("reaping timed-out child failed: {}", e);
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            log::debug!("reading child output failed: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn shell_command(platform: HostPlatform, invocation: &str) -> Command {
    match platform {
        HostPlatform::Posix => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(invocation);
            cmd
        }
        HostPlatform::Windows => {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            // cmd.exe does its own parsing; quoting by the std escaper would mangle it.
            #[cfg(windows)]
            cmd.raw_arg(invocation);
            #[cfg(not(windows))]
            cmd.arg(invocation);
            cmd
        }
    }
}

/// Last `lines` lines of the first readable candidate, or [`LOG_UNAVAILABLE`].
async fn tail_first_readable(base_dir: &Path, candidates: &[PathBuf], lines: usize) -> ExecutionOutcome {
    for candidate in candidates {
        let path = base_dir.join(candidate);
        match read_file_end(&path, LOG_TAIL_BYTES).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                return ExecutionOutcome::Completed {
                    stdout: tail_lines(&text, lines),
                    stderr: String::new(),
                    status: None,
                };
            }
            Err(e) => log::debug!("log fallback {} not readable: {}", path.display(), e),
        }
    }
    ExecutionOutcome::Completed {
        stdout: LOG_UNAVAILABLE.to_string(),
        stderr: String::new(),
        status: None,
    }
}

/// Up to `max` trailing bytes of a file. When the read starts mid-file, the partial first line
/// is dropped.
async fn read_file_end(path: &Path, max: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(max);
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await?;
    if start > 0 {
        match buf.iter().position(|b| *b == b'\n') {
            Some(nl) => {
                buf.drain(..=nl);
            }
            None => buf.clear(),
        }
    }
    Ok(buf)
}

fn tail_lines(text: &str, n: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(n);
    let mut out = all[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HostEnvironment;

    fn executor(sandboxed: bool, base_dir: PathBuf, limits: ExecLimits) -> Executor {
        let env = HostEnvironment {
            platform: HostPlatform::current(),
            sandboxed,
        };
        let catalog = Catalog::for_host(
            &env,
            vec![PathBuf::from("missing.log"), PathBuf::from("bot.log")],
        );
        Executor::new(Arc::new(catalog), base_dir, limits)
    }

    fn custom(invocation: &str) -> Job {
        Job::new(Principal(1), None, invocation)
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\nb\nc\n", 2), "b\nc\n");
        assert_eq!(tail_lines("a\nb", 5), "a\nb\n");
        assert_eq!(tail_lines("", 5), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echo_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let ex = executor(false, dir.path().to_path_buf(), ExecLimits::default());
        let outcome = ex.execute(&custom("echo hi")).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                stdout: "hi\n".to_string(),
                stderr: String::new(),
                status: Some(0),
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_still_completed() {
        let dir = tempfile::tempdir().unwrap();
        let ex = executor(false, dir.path().to_path_buf(), ExecLimits::default());
        match ex.execute(&custom("echo oops >&2; exit 3")).await {
            ExecutionOutcome::Completed { stdout, stderr, status } => {
                assert!(stdout.is_empty());
                assert_eq!(stderr, "oops\n");
                assert_eq!(status, Some(3));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ExecLimits {
            command_timeout: Duration::from_millis(200),
            ..ExecLimits::default()
        };
        let ex = executor(false, dir.path().to_path_buf(), limits);
        let started = std::time::Instant::now();
        let outcome = ex.execute(&custom("sleep 5")).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Timeout {
                after: Duration::from_millis(200)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn working_directory_is_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let ex = executor(false, base.clone(), ExecLimits::default());
        match ex.execute(&custom("pwd -P")).await {
            ExecutionOutcome::Completed { stdout, .. } => {
                assert_eq!(stdout.trim(), base.to_string_lossy())
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sandboxed_logs_read_first_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=50).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(dir.path().join("bot.log"), body).unwrap();
        let limits = ExecLimits {
            log_tail_lines: 3,
            ..ExecLimits::default()
        };
        let ex = executor(true, dir.path().to_path_buf(), limits);
        let job = Job::new(Principal(1), Some(CommandKey::Logs), "journalctl -n 30 --no-pager");
        assert_eq!(
            ex.execute(&job).await,
            ExecutionOutcome::Completed {
                stdout: "line 48\nline 49\nline 50\n".to_string(),
                stderr: String::new(),
                status: None,
            }
        );
    }

    #[tokio::test]
    async fn sandboxed_logs_read_only_the_end_of_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=20_000).map(|i| format!("line {}\n", i)).collect();
        assert!(body.len() as u64 > LOG_TAIL_BYTES);
        std::fs::write(dir.path().join("bot.log"), body).unwrap();
        let limits = ExecLimits {
            log_tail_lines: 2,
            ..ExecLimits::default()
        };
        let ex = executor(true, dir.path().to_path_buf(), limits);
        let job = Job::new(Principal(1), Some(CommandKey::Logs), "journalctl -n 30 --no-pager");
        match ex.execute(&job).await {
            ExecutionOutcome::Completed { stdout, .. } => assert_eq!(stdout, "line 19999\nline 20000\n"),
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn file_end_drops_partial_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        std::fs::write(&path, "aaaa\nbb\ncc\n").unwrap();
        assert_eq!(read_file_end(&path, 5).await.unwrap(), b"cc\n");
        assert_eq!(read_file_end(&path, 100).await.unwrap(), b"aaaa\nbb\ncc\n");
    }

    #[tokio::test]
    async fn sandboxed_logs_without_files_give_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let ex = executor(true, dir.path().to_path_buf(), ExecLimits::default());
        let job = Job::new(Principal(1), Some(CommandKey::Logs), "journalctl -n 30 --no-pager");
        match ex.execute(&job).await {
            ExecutionOutcome::Completed { stdout, .. } => assert_eq!(stdout, LOG_UNAVAILABLE),
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pool_bounds_parallel_runs() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ExecLimits {
            workers: 1,
            ..ExecLimits::default()
        };
        let ex = executor(false, dir.path().to_path_buf(), limits);
        let started = std::time::Instant::now();
        let ja = custom("sleep 0.4");
        let jb = custom("sleep 0.4");
        let (ra, rb) = tokio::join!(ex.execute(&ja), ex.execute(&jb));
        assert!(matches!(ra, ExecutionOutcome::Completed { .. }));
        assert!(matches!(rb, ExecutionOutcome::Completed { .. }));
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .map(|state| state != 'Z' && state != 'X')
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: &str) -> bool {
        for _ in 0..40 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_background_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ExecLimits {
            command_timeout: Duration::from_millis(300),
            ..ExecLimits::default()
        };
        let ex = executor(false, dir.path().to_path_buf(), limits);
        let outcome = ex
            .execute(&custom("sleep 30 & echo $! > bg.pid; sleep 20; true"))
            .await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Timeout {
                after: Duration::from_millis(300)
            }
        );
        let pid = std::fs::read_to_string(dir.path().join("bg.pid")).unwrap();
        let pid = pid.trim();
        assert!(wait_until_gone(pid).await, "descendant {} survived the timeout", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropped_run_kills_its_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let ex = executor(false, dir.path().to_path_buf(), ExecLimits::default());
        let job = custom("sleep 30 & echo $! > bg.pid; wait");
        let aborted = tokio::time::timeout(Duration::from_millis(300), ex.execute(&job)).await;
        assert!(aborted.is_err());
        let pid = std::fs::read_to_string(dir.path().join("bg.pid")).unwrap();
        let pid = pid.trim();
        assert!(wait_until_gone(pid).await, "descendant {} survived the abort", pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn local_ip_lookup_is_not_queued_behind_busy_workers() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ExecLimits {
            workers: 1,
            probe_timeout: Duration::from_millis(500),
            ..ExecLimits::default()
        };
        let ex = executor(false, dir.path().to_path_buf(), limits);
        let busy = ex.clone();
        let holder = tokio::spawn(async move { busy.execute(&custom("sleep 3")).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let _ = ex.probe_local_ip().await;
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "ip lookup took {:?}",
            started.elapsed()
        );
        holder.abort();
    }
}
