//! Worker process supervisor.
//!
//! Each spawn is a *generation*: a process, the endpoint it listens on and the
//! channel connected to it. At most one generation is live at a time. The
//! process itself is owned by a watcher task which reports its exit; if the
//! exiting generation is still the live one the exit is a crash and a restart
//! is scheduled with linear backoff, up to `max_restarts` in a row. A restart
//! that stays up for `stable_after` ends the streak.

use std::{
  process::{ExitStatus, Stdio},
  sync::{
    Arc, PoisonError, Weak,
    atomic::{AtomicU32, AtomicU64, Ordering},
  },
  time::Duration,
};

use tokio::{
  io::{AsyncBufReadExt, AsyncRead, BufReader},
  process::{Child, Command},
  sync::{Mutex, oneshot, watch},
  time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{WorkerError, WorkerState, client};
use crate::{
  domain::config::WorkerConfig,
  ipc::{Endpoint, EndpointResolver, MessageChannel, RequestKind},
};

/// Delay before the `attempt`-th consecutive restart (1-based).
pub fn restart_delay(attempt: u32, backoff: Duration) -> Duration {
  backoff.saturating_mul(attempt)
}

/// Snapshot of the live generation, readable without the lifecycle lock.
#[derive(Debug)]
struct Live {
  generation: u64,
  pid: Option<u32>,
  endpoint: Endpoint,
  channel: MessageChannel,
}

/// A spawned process and the handles needed to tear it down.
struct Process {
  generation: u64,
  pid: Option<u32>,
  endpoint: Endpoint,
  terminate_tx: Option<oneshot::Sender<()>>,
  exit_rx: watch::Receiver<Option<String>>,
}

impl Process {
  /// Terminate (SIGTERM, then kill after the grace period), wait for exit and
  /// remove the endpoint artifact.
  async fn shutdown(mut self) {
    if let Some(tx) = self.terminate_tx.take() {
      let _ = tx.send(());
    }
    let _ = self.exit_rx.wait_for(Option::is_some).await;

    if let Err(e) = self.endpoint.cleanup().await {
      warn!(endpoint = %self.endpoint, "Failed to remove worker endpoint: {e}");
    }
  }
}

struct Generation {
  process: Process,
  channel: MessageChannel,
}

struct Inner {
  config: WorkerConfig,
  resolver: EndpointResolver,
  /// Serializes start/stop/crash handling
  slot: Mutex<Option<Generation>>,
  live: watch::Sender<Option<Live>>,
  state: watch::Sender<WorkerState>,
  restart_count: AtomicU32,
  generations: AtomicU64,
  /// Cancels the currently scheduled restart, if any
  restart: std::sync::Mutex<CancellationToken>,
}

/// Cloneable handle to one supervised worker.
#[derive(Clone)]
pub struct Supervisor {
  inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Supervisor")
      .field("state", &self.state())
      .field("restart_count", &self.restart_count())
      .finish()
  }
}

impl Supervisor {
  pub fn new(config: WorkerConfig) -> Self {
    let resolver = EndpointResolver::from_config(&config);
    let (live, _) = watch::channel(None);
    let (state, _) = watch::channel(WorkerState::Stopped);

    Self {
      inner: Arc::new(Inner {
        config,
        resolver,
        slot: Mutex::new(None),
        live,
        state,
        restart_count: AtomicU32::new(0),
        generations: AtomicU64::new(0),
        restart: std::sync::Mutex::new(CancellationToken::new()),
      }),
    }
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.inner.config
  }

  /// Start the worker, or return the live endpoint if it is already running.
  ///
  /// A caller-initiated start cancels any pending restart and resets the
  /// restart counter once the worker is up.
  pub async fn start(&self) -> Result<Endpoint, WorkerError> {
    self.inner.cancel_restart();

    match self.inner.start_generation(None).await {
      Ok(endpoint) => {
        self.inner.restart_count.store(0, Ordering::SeqCst);
        Ok(endpoint)
      }
      Err(e) => {
        self.inner.set_state(WorkerState::Stopped);
        Err(e)
      }
    }
  }

  /// Stop the worker and remove its endpoint. Safe to call at any time.
  pub async fn stop(&self) {
    self.inner.cancel_restart();

    let mut slot = self.inner.slot.lock().await;
    if let Some(generation) = slot.take() {
      let number = generation.process.generation;
      self.inner.live.send_replace(None);
      generation.channel.close();
      generation.process.shutdown().await;
      info!(generation = number, "Worker stopped");
    }
    self.inner.restart_count.store(0, Ordering::SeqCst);
    self.inner.set_state(WorkerState::Stopped);
  }

  pub fn state(&self) -> WorkerState {
    *self.inner.state.borrow()
  }

  /// Running with an open channel
  pub fn is_running(&self) -> bool {
    self.state() == WorkerState::Running
      && self
        .inner
        .live
        .borrow()
        .as_ref()
        .is_some_and(|live| !live.channel.is_closed())
  }

  /// Consecutive crash-driven restarts since the last caller-initiated start
  pub fn restart_count(&self) -> u32 {
    self.inner.restart_count.load(Ordering::SeqCst)
  }

  pub fn endpoint(&self) -> Option<Endpoint> {
    self.inner.live.borrow().as_ref().map(|live| live.endpoint.clone())
  }

  pub fn pid(&self) -> Option<u32> {
    self.inner.live.borrow().as_ref().and_then(|live| live.pid)
  }

  pub fn generation(&self) -> Option<u64> {
    self.inner.live.borrow().as_ref().map(|live| live.generation)
  }

  /// Watch lifecycle state changes
  pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
    self.inner.state.subscribe()
  }

  /// Channel to the live generation.
  pub fn channel(&self) -> Result<MessageChannel, WorkerError> {
    if self.state() == WorkerState::PermanentlyDown {
      return Err(WorkerError::PermanentlyDown {
        restarts: self.restart_count(),
      });
    }

    match &*self.inner.live.borrow() {
      Some(live) if !live.channel.is_closed() => Ok(live.channel.clone()),
      _ => Err(WorkerError::NotRunning),
    }
  }

  /// Channel to the live generation, waiting out a restart in progress.
  pub async fn wait_ready(&self, timeout: Duration) -> Result<MessageChannel, WorkerError> {
    let mut state_rx = self.subscribe();

    let wait = async {
      loop {
        let state = *state_rx.borrow_and_update();
        match state {
          WorkerState::Running => return self.channel(),
          WorkerState::Stopped => return Err(WorkerError::NotRunning),
          WorkerState::PermanentlyDown => {
            return Err(WorkerError::PermanentlyDown {
              restarts: self.restart_count(),
            });
          }
          WorkerState::Starting | WorkerState::Crashed => {
            if state_rx.changed().await.is_err() {
              return Err(WorkerError::NotRunning);
            }
          }
        }
      }
    };

    tokio::time::timeout(timeout, wait)
      .await
      .map_err(|_| WorkerError::NotRunning)?
  }

  /// Round-trip a `health` request; returns the worker's status string.
  pub async fn health(&self) -> Result<String, WorkerError> {
    let channel = self.channel()?;
    let reply = client::exchange(
      &channel,
      RequestKind::Health,
      serde_json::json!({}),
      Some(self.inner.config.startup_timeout()),
      |_| {},
    )
    .await?;

    Ok(
      reply
        .payload
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("unknown")
        .to_string(),
    )
  }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl Inner {
  fn set_state(&self, state: WorkerState) {
    let previous = self.state.send_replace(state);
    if previous != state {
      debug!(from = %previous, to = %state, "Worker state changed");
    }
  }

  fn cancel_restart(&self) {
    self.restart.lock().unwrap_or_else(PoisonError::into_inner).cancel();
  }

  /// Bring up a generation unless a healthy one is already live.
  ///
  /// `restart` is the token of the restart that triggered this start, if any;
  /// a cancelled restart never spawns.
  async fn start_generation(self: &Arc<Self>, restart: Option<&CancellationToken>) -> Result<Endpoint, WorkerError> {
    let mut slot = self.slot.lock().await;

    if let Some(token) = restart
      && token.is_cancelled()
    {
      return Err(WorkerError::NotRunning);
    }

    if let Some(current) = slot.as_ref() {
      if !current.channel.is_closed() {
        return Ok(current.process.endpoint.clone());
      }

      warn!(
        generation = current.process.generation,
        "Worker channel lost while the process is alive; replacing it"
      );
      if let Some(stale) = slot.take() {
        self.live.send_replace(None);
        stale.process.shutdown().await;
      }
    }

    self.set_state(WorkerState::Starting);

    let number = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
    let endpoint = self.resolver.resolve(number).await?;
    let process = self.spawn(number, endpoint)?;

    match self.connect(&process).await {
      Ok(channel) => {
        let endpoint = process.endpoint.clone();
        info!(
          generation = number,
          pid = process.pid,
          %endpoint,
          "Worker running"
        );

        self.live.send_replace(Some(Live {
          generation: number,
          pid: process.pid,
          endpoint: endpoint.clone(),
          channel: channel.clone(),
        }));
        *slot = Some(Generation { process, channel });
        self.set_state(WorkerState::Running);

        Ok(endpoint)
      }
      Err(e) => {
        warn!(generation = number, "Worker failed to start: {e}");
        process.shutdown().await;
        Err(e)
      }
    }
  }

  fn spawn(self: &Arc<Self>, number: u64, endpoint: Endpoint) -> Result<Process, WorkerError> {
    let mut cmd = Command::new(&self.config.program);
    cmd
      .args(&self.config.args)
      .args(endpoint.spawn_args())
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    if let Some(dir) = &self.config.working_dir {
      cmd.current_dir(dir);
    }

    trace!(program = %self.config.program, args = ?self.config.args, %endpoint, "Spawning worker");

    let mut child = cmd
      .spawn()
      .map_err(|e| WorkerError::Spawn(format!("{}: {e}", self.config.program)))?;
    let pid = child.id();

    if let Some(stdout) = child.stdout.take() {
      tokio::spawn(forward_output(stdout, pid, "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
      tokio::spawn(forward_output(stderr, pid, "stderr"));
    }

    let (terminate_tx, terminate_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(watch_process(
      child,
      terminate_rx,
      exit_tx,
      self.config.shutdown_grace(),
      Arc::downgrade(self),
      number,
    ));

    debug!(generation = number, pid, "Worker spawned");

    Ok(Process {
      generation: number,
      pid,
      endpoint,
      terminate_tx: Some(terminate_tx),
      exit_rx,
    })
  }

  /// Poll for a connection until the worker accepts, exits, or the startup timeout passes.
  async fn connect(&self, process: &Process) -> Result<MessageChannel, WorkerError> {
    let timeout = self.config.startup_timeout();
    let deadline = Instant::now() + timeout;
    let mut exit_rx = process.exit_rx.clone();

    loop {
      if let Some(status) = exit_rx.borrow_and_update().clone() {
        return Err(WorkerError::ExitedDuringStartup { status });
      }

      match MessageChannel::connect(&process.endpoint, self.config.max_frame_bytes).await {
        Ok(channel) => return Ok(channel),
        Err(e) => trace!(endpoint = %process.endpoint, "Worker not accepting yet: {e}"),
      }

      if Instant::now() >= deadline {
        return Err(WorkerError::StartupTimeout(timeout));
      }

      tokio::select! {
        _ = exit_rx.changed() => {}
        _ = tokio::time::sleep(self.config.poll_interval()) => {}
      }
    }
  }

  /// Called by the process watcher once a generation's process has exited.
  async fn handle_exit(self: Arc<Self>, number: u64, status: String) {
    let mut slot = self.slot.lock().await;

    let is_live = slot.as_ref().is_some_and(|g| g.process.generation == number);
    if !is_live {
      debug!(generation = number, %status, "Worker exit was expected");
      return;
    }

    let Some(generation) = slot.take() else {
      return;
    };
    self.live.send_replace(None);
    generation.channel.close();
    if let Err(e) = generation.process.endpoint.cleanup().await {
      warn!(endpoint = %generation.process.endpoint, "Failed to remove worker endpoint: {e}");
    }
    drop(slot);

    warn!(generation = number, %status, "Worker exited unexpectedly");
    self.set_state(WorkerState::Crashed);
    self.schedule_restart();
  }

  fn schedule_restart(self: &Arc<Self>) {
    let token = CancellationToken::new();
    {
      let mut current = self.restart.lock().unwrap_or_else(PoisonError::into_inner);
      current.cancel();
      *current = token.clone();
    }

    tokio::spawn(Arc::clone(self).restart_loop(token));
  }

  /// Clear the restart counter once the restarted generation has stayed up
  /// for `stable_after`. A new crash or a caller start/stop cancels `token`
  /// first, so crash loops keep accumulating.
  async fn settle(&self, token: &CancellationToken) {
    let generation = self.live_generation();
    tokio::select! {
      _ = token.cancelled() => {}
      _ = tokio::time::sleep(self.config.stable_after()) => {
        if generation.is_some()
          && self.live_generation() == generation
          && *self.state.borrow() == WorkerState::Running
        {
          self.restart_count.store(0, Ordering::SeqCst);
          info!(?generation, "Restarted worker is stable; restart counter cleared");
        }
      }
    }
  }

  fn live_generation(&self) -> Option<u64> {
    self.live.borrow().as_ref().map(|live| live.generation)
  }

  async fn restart_loop(self: Arc<Self>, token: CancellationToken) {
    loop {
      let count = self.restart_count.load(Ordering::SeqCst);
      if count >= self.config.max_restarts {
        error!(
          restarts = count,
          "Worker crashed too many times in a row; giving up until it is started again"
        );
        self.set_state(WorkerState::PermanentlyDown);
        return;
      }

      let attempt = count + 1;
      self.restart_count.store(attempt, Ordering::SeqCst);
      let delay = restart_delay(attempt, self.config.restart_backoff());
      info!(attempt, delay_ms = delay.as_millis() as u64, "Restarting worker");

      tokio::select! {
        _ = token.cancelled() => {
          debug!("Pending restart cancelled");
          return;
        }
        _ = tokio::time::sleep(delay) => {}
      }

      match self.start_generation(Some(&token)).await {
        Ok(_) => {
          self.settle(&token).await;
          return;
        }
        Err(_) if token.is_cancelled() => return,
        Err(e) => {
          warn!(attempt, "Worker restart failed: {e}");
          self.set_state(WorkerState::Crashed);
        }
      }
    }
  }
}

// ============================================================================
// Process plumbing
// ============================================================================

/// Own the child until it exits, terminating it on request.
async fn watch_process(
  mut child: Child,
  terminate_rx: oneshot::Receiver<()>,
  exit_tx: watch::Sender<Option<String>>,
  grace: Duration,
  supervisor: Weak<Inner>,
  number: u64,
) {
  let pid = child.id();

  // A dropped sender (supervisor gone) also terminates
  let result = tokio::select! {
    status = child.wait() => status,
    _ = terminate_rx => terminate(&mut child, grace).await,
  };

  let status = match result {
    Ok(status) => describe(status),
    Err(e) => format!("unknown ({e})"),
  };
  debug!(generation = number, pid, %status, "Worker process exited");
  exit_tx.send_replace(Some(status.clone()));

  if let Some(inner) = supervisor.upgrade() {
    inner.handle_exit(number, status).await;
  }
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
  #[cfg(unix)]
  {
    if let Some(pid) = child.id() {
      // SAFETY: pid is our own unreaped child, so it cannot have been recycled
      let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
      if rc == 0 {
        match tokio::time::timeout(grace, child.wait()).await {
          Ok(status) => return status,
          Err(_) => warn!(pid, "Worker ignored SIGTERM; killing"),
        }
      }
    }
  }
  #[cfg(not(unix))]
  let _ = grace;

  child.kill().await?;
  child.wait().await
}

fn describe(status: ExitStatus) -> String {
  match status.code() {
    Some(code) => format!("exit code {code}"),
    None => status.to_string(),
  }
}

/// Re-emit worker output line by line through tracing.
async fn forward_output<R>(reader: R, pid: Option<u32>, stream: &'static str)
where
  R: AsyncRead + Unpin,
{
  let mut lines = BufReader::new(reader).lines();
  loop {
    match lines.next_line().await {
      Ok(Some(line)) => info!(target: "editmind::worker", pid, stream, "{line}"),
      Ok(None) => break,
      Err(e) => {
        debug!(pid, stream, "Stopped reading worker output: {e}");
        break;
      }
    }
  }
}
