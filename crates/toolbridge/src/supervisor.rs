//! Worker supervisor - owns the worker subprocess and its stdio channel.
//!
//! Flow:
//! 1. Spawn worker subprocess (stdin/stdout/stderr piped)
//! 2. Install a line writer on stdin, spawn a reader task on stdout
//! 3. Reader hands every decoded response to the correlator
//! 4. On unexpected exit: respawn with backoff until the restart budget runs out
//! 5. On stop: SIGTERM, grace period, then kill
//!
//! Pending calls are never failed here. A worker that dies takes its
//! in-flight requests with it and those calls run into their timeout.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::bridge::codec::{DEFAULT_MAX_LINE_BYTES, Frame, JsonLineCodec};
use crate::bridge::protocol::{RpcRequest, RpcResponse};
use crate::correlator::Correlator;
use crate::health::{WorkerInfo, WorkerStatus};

pub const DEFAULT_WORKER_PROGRAM: &str = "python3";
pub const DEFAULT_WORKER_SCRIPT: &str = "mcp-server/server.py";

const WORKER_LOG_TARGET: &str = "toolbridge::worker";
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type LineWriter = FramedWrite<BoxedWriter, JsonLineCodec<RpcRequest>>;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to launch worker: {0}")]
    Launch(#[from] SpawnError),
    #[error("worker is already running")]
    AlreadyRunning,
    #[error("no live worker")]
    NotRunning,
    #[error("failed to write to worker: {0}")]
    Write(#[source] std::io::Error),
}

/// Extension point for different worker spawn strategies.
///
/// The returned child must have stdin and stdout piped; stderr is forwarded
/// to the log if piped.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> Result<Child, SpawnError>;

    /// Human-readable command line, for logs and the health check.
    fn describe(&self) -> String;
}

/// Spawns `program args...` as the worker.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl Default for CommandSpawner {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_PROGRAM, [DEFAULT_WORKER_SCRIPT])
    }
}

impl CommandSpawner {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerSpawner for CommandSpawner {
    fn spawn(&self) -> Result<Child, SpawnError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How often an unexpectedly exited worker is respawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Respawns allowed per `start()`. 0 disables restarts.
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RestartPolicy {
    pub fn never() -> Self {
        Self {
            max_restarts: 0,
            ..Self::default()
        }
    }

    pub fn with_max_restarts(mut self, n: u32) -> Self {
        self.max_restarts = n;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Delay before restart number `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub struct SupervisorConfig {
    pub spawner: Arc<dyn WorkerSpawner>,
    pub restart: RestartPolicy,
    pub max_line_bytes: usize,
    /// Time between SIGTERM and kill on stop.
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new(Arc::new(CommandSpawner::default()))
    }
}

impl SupervisorConfig {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            spawner,
            restart: RestartPolicy::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            stop_grace: Duration::from_secs(2),
        }
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

/// A worker channel not backed by a child process.
pub struct WorkerIo {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl WorkerIo {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

struct Instance {
    pid: Option<u32>,
    started_at: String,
}

struct Inner {
    config: SupervisorConfig,
    correlator: Arc<Correlator>,
    writer: tokio::sync::Mutex<Option<LineWriter>>,
    status: watch::Sender<WorkerStatus>,
    instance: StdMutex<Option<Instance>>,
    run: StdMutex<Option<CancellationToken>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Supervises at most one live worker. Cheap to clone.
#[derive(Clone)]
pub struct WorkerSupervisor {
    inner: Arc<Inner>,
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig, correlator: Arc<Correlator>) -> Self {
        let (status, _) = watch::channel(WorkerStatus::Stopped);
        Self {
            inner: Arc::new(Inner {
                config,
                correlator,
                writer: tokio::sync::Mutex::new(None),
                status,
                instance: StdMutex::new(None),
                run: StdMutex::new(None),
            }),
        }
    }

    /// Launch the worker.
    ///
    /// A launch failure is logged, leaves the status `Failed`, and is returned;
    /// it is not retried. Calls made afterwards time out.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let token = self.inner.begin()?;
        let command = self.inner.config.spawner.describe();
        tracing::info!(worker = %command, "Spawning worker subprocess");

        match self.inner.spawn_child().await {
            Ok((child, reader)) => {
                tokio::spawn(supervise(Arc::clone(&self.inner), token, child, reader));
                Ok(())
            }
            Err(e) => {
                tracing::error!(worker = %command, error = %e, "Failed to launch worker");
                self.inner.set_status(WorkerStatus::Failed);
                Err(e.into())
            }
        }
    }

    /// Adopt an already-connected channel instead of spawning a process.
    ///
    /// There is nothing to respawn: when the channel closes the status
    /// becomes `Failed`.
    pub async fn attach(&self, io: WorkerIo) -> Result<(), SupervisorError> {
        let token = self.inner.begin()?;
        let reader = self.inner.install(io).await;
        self.inner.mark_running(None);
        tokio::spawn(supervise_attached(Arc::clone(&self.inner), token, reader));
        Ok(())
    }

    /// Terminate the worker. No-op if it was never started or is already stopped.
    pub async fn stop(&self) {
        let Some(token) = lock(&self.inner.run).take() else {
            return;
        };
        tracing::info!("Stopping worker");
        token.cancel();
        let mut status = self.inner.status.subscribe();
        let _ = status.wait_for(|s| !s.is_live()).await;
        self.inner.set_status(WorkerStatus::Stopped);
    }

    /// Write one request line to the worker. No acknowledgement.
    ///
    /// A write blocked on a worker that stopped reading gives way to `stop()`.
    pub async fn send(&self, request: RpcRequest) -> Result<(), SupervisorError> {
        let Some(run) = lock(&self.inner.run).clone() else {
            return Err(SupervisorError::NotRunning);
        };
        let write = async {
            let mut guard = self.inner.writer.lock().await;
            let writer = guard.as_mut().ok_or(SupervisorError::NotRunning)?;
            writer.send(request).await.map_err(SupervisorError::Write)
        };
        tokio::select! {
            biased;
            _ = run.cancelled() => Err(SupervisorError::NotRunning),
            result = write => result,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.inner.status.subscribe()
    }

    pub fn info(&self) -> WorkerInfo {
        let status = self.status();
        match lock(&self.inner.instance).as_ref() {
            Some(instance) if status == WorkerStatus::Running => WorkerInfo {
                status,
                pid: instance.pid,
                started_at: Some(instance.started_at.clone()),
            },
            _ => WorkerInfo {
                status,
                ..WorkerInfo::default()
            },
        }
    }

    pub fn describe(&self) -> String {
        self.inner.config.spawner.describe()
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.correlator
    }
}

impl Inner {
    /// Claim the run slot and move to `Starting`.
    fn begin(&self) -> Result<CancellationToken, SupervisorError> {
        let mut run = lock(&self.run);
        if run.is_some() && self.status.borrow().is_live() {
            return Err(SupervisorError::AlreadyRunning);
        }
        if let Some(stale) = run.take() {
            stale.cancel();
        }
        let token = CancellationToken::new();
        *run = Some(token.clone());
        self.set_status(WorkerStatus::Starting);
        Ok(token)
    }

    fn set_status(&self, status: WorkerStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(?previous, ?status, "Worker status changed");
        }
    }

    fn mark_running(&self, pid: Option<u32>) {
        *lock(&self.instance) = Some(Instance {
            pid,
            started_at: chrono::Utc::now().to_rfc3339(),
        });
        self.set_status(WorkerStatus::Running);
    }

    async fn spawn_child(self: &Arc<Self>) -> Result<(Child, JoinHandle<()>), SpawnError> {
        let mut child = self.config.spawner.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpawnError::Other("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError::Other("stdout not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let pid = child.id();
        let reader = self.install(WorkerIo::new(stdout, stdin)).await;
        self.mark_running(pid);
        tracing::info!(pid, "Worker started");
        Ok((child, reader))
    }

    /// Make `io` the live channel and start reading from it.
    async fn install(self: &Arc<Self>, io: WorkerIo) -> JoinHandle<()> {
        let codec = JsonLineCodec::<RpcRequest>::with_max_line_bytes(self.config.max_line_bytes);
        *self.writer.lock().await = Some(FramedWrite::new(io.writer, codec));

        let codec = JsonLineCodec::<RpcResponse>::with_max_line_bytes(self.config.max_line_bytes);
        let reader = FramedRead::new(io.reader, codec);
        tokio::spawn(read_responses(Arc::clone(self), reader))
    }

    /// Drop the writer, closing the worker's stdin.
    async fn detach(&self) {
        self.writer.lock().await.take();
    }
}

async fn read_responses(inner: Arc<Inner>, mut reader: FramedRead<BoxedReader, JsonLineCodec<RpcResponse>>) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Frame::Message(response)) => {
                inner.correlator.resolve(response);
            }
            Ok(Frame::Malformed(line)) => {
                inner.correlator.stats().record_malformed_line();
                tracing::warn!(
                    reason = %line.reason,
                    line = %line.excerpt,
                    "Discarding malformed line from worker"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Worker stdout read failed");
                break;
            }
        }
    }
    tracing::debug!("Worker stdout closed");
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::info!(target: WORKER_LOG_TARGET, "{}", line);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Worker stderr read failed");
                break;
            }
        }
    }
}

/// Let the reader deliver what is already buffered, then give up on it.
async fn drain_reader(reader: JoinHandle<()>) {
    let abort = reader.abort_handle();
    if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
        tracing::debug!("Worker stdout still open after exit; abandoning reader");
        abort.abort();
    }
}

#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid, error = %e, "Failed to send SIGTERM to worker");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

async fn terminate(child: &mut Child, grace: Duration) {
    if request_exit(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(%status, "Worker exited");
                return;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for worker"),
            Err(_) => tracing::warn!(?grace, "Worker ignored SIGTERM, killing"),
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill worker");
    }
}

/// Watches one `start()`: exit detection, respawns, and shutdown.
async fn supervise(
    inner: Arc<Inner>,
    token: CancellationToken,
    mut child: Child,
    mut reader: JoinHandle<()>,
) {
    let policy = inner.config.restart;
    let mut restarts = 0u32;

    loop {
        let exited = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            status = child.wait() => Some(status),
        };

        inner.detach().await;

        let Some(exit) = exited else {
            terminate(&mut child, inner.config.stop_grace).await;
            drain_reader(reader).await;
            inner.set_status(WorkerStatus::Stopped);
            return;
        };

        match exit {
            Ok(status) => tracing::warn!(%status, "Worker exited unexpectedly"),
            Err(e) => tracing::warn!(error = %e, "Lost track of worker process"),
        }
        drain_reader(reader).await;

        loop {
            if restarts >= policy.max_restarts {
                tracing::error!(
                    restarts,
                    max_restarts = policy.max_restarts,
                    "Worker restart budget exhausted; tool calls will time out"
                );
                inner.set_status(WorkerStatus::Failed);
                return;
            }
            restarts += 1;
            inner.set_status(WorkerStatus::Restarting);

            let delay = policy.backoff(restarts);
            tracing::info!(attempt = restarts, ?delay, "Restarting worker");
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    inner.set_status(WorkerStatus::Stopped);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            inner.correlator.stats().record_restart();
            match inner.spawn_child().await {
                Ok((next_child, next_reader)) => {
                    child = next_child;
                    reader = next_reader;
                    break;
                }
                Err(e) => {
                    tracing::error!(attempt = restarts, error = %e, "Failed to respawn worker");
                }
            }
        }
    }
}

async fn supervise_attached(inner: Arc<Inner>, token: CancellationToken, mut reader: JoinHandle<()>) {
    let closed = tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = &mut reader => true,
    };
    inner.detach().await;

    if closed {
        tracing::warn!("Worker channel closed");
        inner.set_status(WorkerStatus::Failed);
    } else {
        drain_reader(reader).await;
        inner.set_status(WorkerStatus::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::RequestId;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn supervisor() -> WorkerSupervisor {
        WorkerSupervisor::new(SupervisorConfig::default(), Arc::new(Correlator::default()))
    }

    /// Attach an in-memory worker; returns its (stdin reader, stdout writer) ends.
    async fn attach_fake(sup: &WorkerSupervisor) -> (BufReader<DuplexStream>, DuplexStream) {
        let (bridge_out, worker_in) = tokio::io::duplex(64 * 1024);
        let (worker_out, bridge_in) = tokio::io::duplex(64 * 1024);
        sup.attach(WorkerIo::new(bridge_in, bridge_out)).await.unwrap();
        (BufReader::new(worker_in), worker_out)
    }

    async fn wait_for_status(sup: &WorkerSupervisor, want: WorkerStatus) {
        let mut rx = sup.subscribe();
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == want))
            .await
            .expect("status wait timed out")
            .unwrap();
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
        assert_eq!(policy.backoff(100), Duration::from_secs(8));
    }

    #[test]
    fn command_spawner_describes_command_line() {
        assert_eq!(CommandSpawner::default().describe(), "python3 mcp-server/server.py");
        assert_eq!(CommandSpawner::new("worker", Vec::<String>::new()).describe(), "worker");
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let sup = supervisor();
        sup.stop().await;
        sup.stop().await;
        assert_eq!(sup.status(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn send_without_worker_fails() {
        let sup = supervisor();
        let err = sup
            .send(RpcRequest::list_tools(RequestId::new(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning));
    }

    #[tokio::test]
    async fn send_writes_one_line() {
        let sup = supervisor();
        let (mut worker_in, _worker_out) = attach_fake(&sup).await;
        assert_eq!(sup.status(), WorkerStatus::Running);

        sup.send(RpcRequest::list_tools(RequestId::new(1))).await.unwrap();
        let mut line = String::new();
        worker_in.read_line(&mut line).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "method": "list_tools"}));
    }

    #[tokio::test]
    async fn responses_reach_correlator_and_garbage_is_counted() {
        let sup = supervisor();
        let correlator = Arc::clone(sup.correlator());
        let (_worker_in, mut worker_out) = attach_fake(&sup).await;

        let id = correlator.allocate_id();
        let rx = correlator.register(id).unwrap();
        worker_out
            .write_all(b"not json\n{\"id\":1,\"result\":{\"output\":\"hi\"}}\n")
            .await
            .unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.into_outcome().unwrap(), json!({"output": "hi"}));
        assert_eq!(correlator.snapshot().malformed_lines, 1);
    }

    #[tokio::test]
    async fn attach_twice_is_rejected() {
        let sup = supervisor();
        let _fake = attach_fake(&sup).await;
        let (a, b) = tokio::io::duplex(16);
        let err = sup.attach(WorkerIo::new(a, b)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning));
    }

    #[tokio::test]
    async fn closed_channel_marks_failed() {
        let sup = supervisor();
        let (worker_in, worker_out) = attach_fake(&sup).await;
        drop(worker_out);
        drop(worker_in);
        wait_for_status(&sup, WorkerStatus::Failed).await;
        assert!(matches!(
            sup.send(RpcRequest::list_tools(RequestId::new(1))).await,
            Err(SupervisorError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sup = supervisor();
        let _fake = attach_fake(&sup).await;
        sup.stop().await;
        assert_eq!(sup.status(), WorkerStatus::Stopped);
        sup.stop().await;
        assert_eq!(sup.status(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let spawner = CommandSpawner::new("/nonexistent/toolbridge-worker", Vec::<String>::new());
        let sup = WorkerSupervisor::new(
            SupervisorConfig::new(Arc::new(spawner)),
            Arc::new(Correlator::default()),
        );
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Launch(SpawnError::Spawn(_))));
        assert_eq!(sup.status(), WorkerStatus::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_worker_round_trip_and_stop() {
        // `cat` echoes each request back; a request parses as a response with
        // the same id and no result.
        let sup = WorkerSupervisor::new(
            SupervisorConfig::new(Arc::new(CommandSpawner::new("cat", Vec::<String>::new()))),
            Arc::new(Correlator::default()),
        );
        sup.start().await.unwrap();
        assert!(sup.info().pid.is_some());

        let correlator = Arc::clone(sup.correlator());
        let id = correlator.allocate_id();
        let rx = correlator.register(id).unwrap();
        sup.send(RpcRequest::list_tools(id)).await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.id, Some(id));

        sup.stop().await;
        assert_eq!(sup.status(), WorkerStatus::Stopped);
        assert_eq!(correlator.snapshot().restarts, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_does_not_wait_for_blocked_write() {
        // `sleep` never reads stdin, so a request larger than the pipe buffer
        // stalls inside `send`.
        let sup = WorkerSupervisor::new(
            SupervisorConfig::new(Arc::new(CommandSpawner::new("sleep", ["1000"]))),
            Arc::new(Correlator::default()),
        );
        sup.start().await.unwrap();

        let mut arguments = serde_json::Map::new();
        arguments.insert("blob".to_string(), json!("x".repeat(512 * 1024)));
        let writer = sup.clone();
        let blocked = tokio::spawn(async move {
            writer
                .send(RpcRequest::call_tool(RequestId::new(1), "echo", arguments))
                .await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!blocked.is_finished());

        tokio::time::timeout(Duration::from_secs(5), sup.stop())
            .await
            .expect("stop waited on a stalled write");
        assert_eq!(sup.status(), WorkerStatus::Stopped);
        assert!(matches!(
            blocked.await.unwrap(),
            Err(SupervisorError::NotRunning)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_stderr_never_reaches_correlator() {
        // Every request is echoed to stderr before being answered on stdout.
        let script = r#"echo diag-line >&2
while IFS= read -r line; do
  printf '%s\n' "$line" >&2
  printf '%s\n' "$line"
done"#;
        let sup = WorkerSupervisor::new(
            SupervisorConfig::new(Arc::new(CommandSpawner::new("sh", ["-c", script]))),
            Arc::new(Correlator::default()),
        );
        sup.start().await.unwrap();

        let correlator = Arc::clone(sup.correlator());
        let id = correlator.allocate_id();
        let rx = correlator.register(id).unwrap();
        sup.send(RpcRequest::list_tools(id)).await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.id, Some(id));

        // Give a leaked stderr copy time to show up as an unmatched response.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = correlator.snapshot();
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unmatched_responses, 0);
        assert_eq!(stats.malformed_lines, 0);

        sup.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn respawned_worker_serves_calls() {
        // First instance exits at once; the respawn finds the marker and echoes.
        let marker =
            std::env::temp_dir().join(format!("toolbridge-respawn-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        let script = r#"if [ -e "$CRASH_MARKER" ]; then exec cat; fi
touch "$CRASH_MARKER"
exit 1"#;
        let spawner = CommandSpawner::new("sh", ["-c", script])
            .with_env("CRASH_MARKER", marker.to_string_lossy());
        let policy = RestartPolicy::default().with_initial_backoff(Duration::from_millis(10));
        let sup = WorkerSupervisor::new(
            SupervisorConfig::new(Arc::new(spawner)).with_restart_policy(policy),
            Arc::new(Correlator::default()),
        );
        sup.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while sup.correlator().snapshot().restarts < 1 || sup.status() != WorkerStatus::Running
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("worker was not respawned");

        let correlator = Arc::clone(sup.correlator());
        let id = correlator.allocate_id();
        let rx = correlator.register(id).unwrap();
        sup.send(RpcRequest::list_tools(id)).await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.id, Some(id));
        assert_eq!(correlator.snapshot().restarts, 1);
        assert_eq!(sup.status(), WorkerStatus::Running);

        sup.stop().await;
        let _ = std::fs::remove_file(&marker);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashing_worker_is_respawned_within_budget() {
        let spawner = CommandSpawner::new("sh", ["-c", "exit 3"]);
        let policy = RestartPolicy::default()
            .with_max_restarts(2)
            .with_initial_backoff(Duration::from_millis(10));
        let sup = WorkerSupervisor::new(
            SupervisorConfig::new(Arc::new(spawner)).with_restart_policy(policy),
            Arc::new(Correlator::default()),
        );
        sup.start().await.unwrap();
        wait_for_status(&sup, WorkerStatus::Failed).await;
        assert_eq!(sup.correlator().snapshot().restarts, 2);

        // A failed supervisor can be started again.
        sup.start().await.unwrap();
        sup.stop().await;
        assert_eq!(sup.status(), WorkerStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn no_restart_policy_fails_immediately() {
        let sup = WorkerSupervisor::new(
            SupervisorConfig::new(Arc::new(CommandSpawner::new("sh", ["-c", "exit 0"])))
                .with_restart_policy(RestartPolicy::never()),
            Arc::new(Correlator::default()),
        );
        sup.start().await.unwrap();
        wait_for_status(&sup, WorkerStatus::Failed).await;
        assert_eq!(sup.correlator().snapshot().restarts, 0);
    }
}
