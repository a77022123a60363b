//! Start/stop/status state machine for the monitor

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::classifier::Classifier;
use crate::config::MonitorConfig;
use crate::dispatch::{Dispatcher, WorkerPool};
use crate::error::Result;
use crate::label_manager::LabelManager;
use crate::monitor::ChangeDetectionLoop;
use crate::state::{MonitorPhase, MonitorState, StatsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub monitoring: bool,
    pub authenticated: bool,
    pub last_history_id: Option<String>,
    pub phase: MonitorPhase,
    pub session_id: Option<Uuid>,
    pub stats: StatsSnapshot,
}

/// Owns the monitor state and the task running the polling loop
pub struct MonitorController {
    state: Arc<MonitorState>,
    authenticator: Arc<dyn Authenticator>,
    classifier: Arc<dyn Classifier>,
    config: MonitorConfig,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorController {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        classifier: Arc<dyn Classifier>,
        config: MonitorConfig,
    ) -> Self {
        Self::with_state(Arc::new(MonitorState::new()), authenticator, classifier, config)
    }

    pub fn with_state(
        state: Arc<MonitorState>,
        authenticator: Arc<dyn Authenticator>,
        classifier: Arc<dyn Classifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            state,
            authenticator,
            classifier,
            config,
            loop_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<MonitorState> {
        &self.state
    }

    /// Start monitoring
    ///
    /// Reuses the authenticated session of an earlier run when there is one.
    /// An authentication failure leaves the monitor stopped and is returned to
    /// the caller.
    pub async fn start(&self) -> Result<StartOutcome> {
        if !self.state.begin_start().await {
            info!("Monitoring is already active");
            return Ok(StartOutcome::AlreadyRunning);
        }

        // The loop of an earlier run finishes its tick before a new loop takes over the cursor
        let previous = self.loop_task.lock().await.take();
        if let Some(handle) = previous {
            if let Err(e) = handle.await {
                error!("Previous monitoring loop panicked: {}", e);
            }
        }

        let gateway = match self.state.gateway().await {
            Some(gateway) => gateway,
            None => match self.authenticator.authenticate().await {
                Ok(gateway) => gateway,
                Err(e) => {
                    self.state.abort_start().await;
                    error!("Failed to start monitoring: {}", e);
                    return Err(e);
                }
            },
        };

        if !self.state.cursor().is_set().await {
            match gateway.get_current_cursor().await {
                Ok(cursor) => {
                    info!("Initial history ID: {}", cursor);
                    self.state.cursor().set(cursor).await;
                }
                Err(e) => warn!("Could not fetch the initial history ID: {}", e),
            }
        }

        let session_id = Uuid::new_v4();
        self.state
            .mark_running(Arc::clone(&gateway), session_id)
            .await;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.classifier),
            LabelManager::new(Arc::clone(&gateway)),
        ));
        let pool = WorkerPool::spawn(
            dispatcher,
            self.config.workers,
            self.config.queue_capacity,
            self.state.stats(),
        );
        let monitor =
            ChangeDetectionLoop::new(Arc::clone(&self.state), gateway, session_id, &self.config);

        let handle = tokio::spawn(monitor.run(pool));
        *self.loop_task.lock().await = Some(handle);

        info!("Monitoring started (session {})", session_id);
        Ok(StartOutcome::Started)
    }

    /// Stop monitoring. Always succeeds; the cursor and session are kept.
    pub async fn stop(&self) {
        self.state.mark_stopped().await;
        info!("Monitoring stopped");
    }

    /// Stop monitoring and wait for the polling loop and its workers to finish
    pub async fn shutdown(&self) {
        self.stop().await;
        let handle = self.loop_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Monitoring loop panicked: {}", e);
            }
        }
    }

    pub async fn status(&self) -> MonitorStatus {
        let phase = self.state.phase().await;
        MonitorStatus {
            monitoring: phase == MonitorPhase::Running,
            authenticated: self.state.is_authenticated().await,
            last_history_id: self.state.cursor().get().await.map(|c| c.to_string()),
            phase,
            session_id: self.state.session_id().await,
            stats: self.state.stats().snapshot(),
        }
    }
}
