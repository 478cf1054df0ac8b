//! Concurrent fan-out of one script across many device sessions.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Error;
use crate::process::ScriptSpec;
use crate::session::{DeviceSession, LineObserver, SessionConfig};

/// Result of one launch attempt during a fan-out.
#[derive(Debug)]
pub struct LaunchOutcome {
    pub device: String,
    pub result: Result<(), Error>,
}

impl LaunchOutcome {
    pub fn launched(&self) -> bool {
        self.result.is_ok()
    }

    pub fn already_running(&self) -> bool {
        matches!(self.result, Err(Error::AlreadyRunning { .. }))
    }
}

/// Owns one [`DeviceSession`] per device and fans launches out across them.
pub struct Fleet {
    config: SessionConfig,
    observer: Option<LineObserver>,
    sessions: Mutex<HashMap<String, Arc<DeviceSession>>>,
}

impl Fleet {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            observer: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Routes every session's output lines to `observer` instead of the log.
    pub fn with_observer(config: SessionConfig, observer: LineObserver) -> Self {
        Self {
            config,
            observer: Some(observer),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The session for `device`, created on first use.
    pub async fn session(&self, device: &str) -> Arc<DeviceSession> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(device.to_string())
            .or_insert_with(|| {
                let session = match &self.observer {
                    Some(observer) => DeviceSession::with_observer(
                        device,
                        self.config.clone(),
                        observer.clone(),
                    ),
                    None => DeviceSession::new(device, self.config.clone()),
                };
                Arc::new(session)
            })
            .clone()
    }

    /// Launches `spec` on every selected device concurrently and returns
    /// once every launch *attempt* has resolved. Launched scripts keep
    /// running; their completion is observed through each session. A failed
    /// or refused launch never cancels the others, and no ordering is
    /// guaranteed between launches.
    pub async fn run_on_selected(
        &self,
        spec: &ScriptSpec,
        devices: &[String],
    ) -> Vec<LaunchOutcome> {
        let mut launches = Vec::with_capacity(devices.len());
        for device in devices {
            let session = self.session(device).await;
            let spec = spec.clone();
            let device = device.clone();
            launches.push(async move {
                let result = session.start(&spec).await;
                match &result {
                    Ok(()) => info!(target = "pilot.fleet", device = %device, "launched"),
                    Err(err) => {
                        warn!(target = "pilot.fleet", device = %device, error = %err, "launch failed");
                    }
                }
                LaunchOutcome { device, result }
            });
        }
        join_all(launches).await
    }

    /// Stops every session so no child outlives the controller. Used on
    /// operator interrupt and shutdown.
    pub async fn stop_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        join_all(sessions.iter().map(|session| session.stop())).await;
    }

    /// Resolves once every session is Idle.
    pub async fn wait_idle(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        join_all(sessions.iter().map(|session| session.wait_idle())).await;
    }
}
