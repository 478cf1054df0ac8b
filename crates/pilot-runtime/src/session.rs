//! Per-device session supervision.
//!
//! Each session owns at most one live child process and walks the
//! `Idle -> Running -> Stopping -> Idle` cycle. A detached monitor task
//! owns the child: it forwards output lines, observes the exit, and hands
//! the session back to Idle. `stop` signals the monitor, bounds its wait,
//! and always finishes with a best-effort device-side helper cleanup.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, wrappers::LinesStream};
use tracing::{info, warn};

use crate::bridge::{Bridge, DEFAULT_AGENT};
use crate::error::{Error, Result};
use crate::process::{ScriptProcess, ScriptSpec};

/// Observer invoked with `(device, line)` for every stdout line of a
/// running script.
pub type LineObserver = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Lifecycle phase of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

/// Tunables for session supervision.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a script gets to exit after a graceful stop request before
    /// it is force-killed.
    pub stop_grace: Duration,
    /// Device-side helper service killed after a stop.
    pub agent_name: String,
    /// Bridge used for the helper cleanup.
    pub bridge: Bridge,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
            agent_name: DEFAULT_AGENT.to_string(),
            bridge: Bridge::default(),
        }
    }
}

/// Supervises at most one running automation program for one device.
pub struct DeviceSession {
    shared: Arc<Shared>,
    config: SessionConfig,
    observer: LineObserver,
    state_rx: watch::Receiver<SessionState>,
}

struct Shared {
    device: String,
    state_tx: watch::Sender<SessionState>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: SessionState,
    /// Bumped on every start so a late monitor from a previous run can
    /// never touch the current one.
    epoch: u64,
    run: Option<ActiveRun>,
}

struct ActiveRun {
    stop_tx: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

impl DeviceSession {
    /// A session whose output lines go to the log, tagged with the device.
    pub fn new(device: impl Into<String>, config: SessionConfig) -> Self {
        Self::with_observer(device, config, log_observer())
    }

    pub fn with_observer(
        device: impl Into<String>,
        config: SessionConfig,
        observer: LineObserver,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                device: device.into(),
                state_tx,
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    epoch: 0,
                    run: None,
                }),
            }),
            config,
            observer,
            state_rx,
        }
    }

    pub fn device(&self) -> &str {
        &self.shared.device
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Starts `spec` on this device. Valid only from Idle; a session that
    /// is Running or Stopping reports [`Error::AlreadyRunning`] and is left
    /// unchanged. A spawn failure also leaves the session Idle.
    pub async fn start(&self, spec: &ScriptSpec) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state != SessionState::Idle {
            return Err(Error::AlreadyRunning {
                device: self.shared.device.clone(),
            });
        }

        let process = ScriptProcess::spawn(spec, &self.shared.device)?;
        let (stop_tx, stop_rx) = oneshot::channel();

        inner.epoch += 1;
        let monitor = tokio::spawn(monitor_run(
            Arc::clone(&self.shared),
            inner.epoch,
            process,
            self.observer.clone(),
            stop_rx,
            self.config.stop_grace,
        ));

        set_state(&self.shared, &mut inner, SessionState::Running);
        inner.run = Some(ActiveRun { stop_tx, monitor });

        info!(
            target = "pilot.session",
            device = %self.shared.device,
            script = %spec.name(),
            "script started"
        );
        Ok(())
    }

    /// Stops the running script, if any. From Idle this is a no-op. The
    /// session always ends up Idle, whether or not the child cooperated or
    /// the helper cleanup succeeded.
    pub async fn stop(&self) {
        let run = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::Idle => return,
                // Another stop is already driving the transition.
                SessionState::Stopping => return,
                SessionState::Running => {
                    set_state(&self.shared, &mut inner, SessionState::Stopping);
                    inner.run.take()
                }
            }
        };

        if let Some(ActiveRun { stop_tx, monitor }) = run {
            let _ = stop_tx.send(());

            // The monitor's own wait is bounded by the grace period; give
            // it that long plus a margin before abandoning the join.
            let join_bound = self.config.stop_grace + Duration::from_secs(2);
            if tokio::time::timeout(join_bound, monitor).await.is_err() {
                warn!(
                    target = "pilot.session",
                    device = %self.shared.device,
                    "monitor did not settle before the stop deadline"
                );
            }
        }

        // Helper cleanup runs no matter how the script exited.
        if let Err(err) = self
            .config
            .bridge
            .kill_agent(&self.shared.device, &self.config.agent_name)
            .await
        {
            warn!(
                target = "pilot.session",
                device = %self.shared.device,
                error = %err,
                "helper cleanup failed"
            );
        }

        let mut inner = self.shared.inner.lock().await;
        inner.run = None;
        set_state(&self.shared, &mut inner, SessionState::Idle);
        info!(target = "pilot.session", device = %self.shared.device, "session stopped");
    }

    /// Resolves once the session is Idle: immediately if nothing is
    /// running, otherwise when the current run has fully wound down.
    pub async fn wait_idle(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|state| *state == SessionState::Idle).await;
    }
}

fn set_state(shared: &Shared, inner: &mut Inner, state: SessionState) {
    inner.state = state;
    shared.state_tx.send_replace(state);
}

fn log_observer() -> LineObserver {
    Arc::new(|device: &str, line: &str| {
        info!(target = "pilot.script", device = %device, "{line}");
    })
}

#[derive(Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

async fn monitor_run(
    shared: Arc<Shared>,
    epoch: u64,
    mut process: ScriptProcess,
    observer: LineObserver,
    mut stop_rx: oneshot::Receiver<()>,
    stop_grace: Duration,
) {
    let device = shared.device.clone();
    let stdout = process.stdout_lines();
    let stderr = process.stderr_lines();
    let out_task = spawn_forwarder(stdout, device.clone(), StreamKind::Stdout, observer.clone());
    let err_task = spawn_forwarder(stderr, device.clone(), StreamKind::Stderr, observer);

    let status = tokio::select! {
        status = process.wait() => status,
        _ = &mut stop_rx => process.terminate(stop_grace).await,
    };

    // Drain the forwarders so trailing lines are not lost.
    if let Some(task) = out_task {
        let _ = task.await;
    }
    if let Some(task) = err_task {
        let _ = task.await;
    }

    match status {
        Ok(status) if status.success() => {
            info!(target = "pilot.session", device = %device, "script finished");
        }
        Ok(status) => {
            warn!(
                target = "pilot.session",
                device = %device,
                code = ?status.code(),
                "script finished with failure"
            );
        }
        Err(err) => {
            warn!(
                target = "pilot.session",
                device = %device,
                error = %err,
                "failed waiting for script"
            );
        }
    }

    // An exit observed here (not via stop) hands the session back to Idle.
    // During a stop the Stopping state belongs to the stopping caller, and
    // a newer run owns a newer epoch; leave both alone.
    let mut inner = shared.inner.lock().await;
    if inner.epoch == epoch && inner.state == SessionState::Running {
        inner.run = None;
        set_state(&shared, &mut inner, SessionState::Idle);
    }
}

fn spawn_forwarder<R>(
    lines: Option<LinesStream<BufReader<R>>>,
    device: String,
    kind: StreamKind,
    observer: LineObserver,
) -> Option<JoinHandle<()>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut lines = lines?;
    Some(tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => match kind {
                    StreamKind::Stdout => observer(&device, &line),
                    StreamKind::Stderr => {
                        warn!(target = "pilot.script", device = %device, "stderr: {line}");
                    }
                },
                Err(err) => {
                    warn!(
                        target = "pilot.session",
                        device = %device,
                        error = %err,
                        "output stream error"
                    );
                    break;
                }
            }
        }
    }))
}
