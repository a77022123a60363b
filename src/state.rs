//! In-memory monitor state shared by the controller, the polling loop and the workers

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::client::MailGateway;
use crate::models::{Cursor, ItemOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Stopped,
    Starting,
    Running,
}

/// Last seen history position
///
/// Lives only as long as the process. Written by the polling loop (and by the
/// controller before the loop is spawned); the lock exists so status
/// requests can read it.
#[derive(Debug, Default)]
pub struct CursorStore {
    current: RwLock<Option<Cursor>>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<Cursor> {
        self.current.read().await.clone()
    }

    pub async fn set(&self, cursor: Cursor) {
        *self.current.write().await = Some(cursor);
    }

    pub async fn is_set(&self) -> bool {
        self.current.read().await.is_some()
    }
}

/// Counters reported on the status endpoint
#[derive(Debug, Default)]
pub struct MonitorStats {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    cursor_resets: AtomicU64,
    items_detected: AtomicU64,
    items_labeled: AtomicU64,
    labels_created: AtomicU64,
    classification_failures: AtomicU64,
    label_failures: AtomicU64,
    fetch_failures: AtomicU64,
    duplicates_skipped: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub cursor_resets: u64,
    pub items_detected: u64,
    pub items_labeled: u64,
    pub labels_created: u64,
    pub classification_failures: u64,
    pub label_failures: u64,
    pub fetch_failures: u64,
    pub duplicates_skipped: u64,
}

impl MonitorStats {
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_tick(&self) {
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cursor_reset(&self) {
        self.cursor_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detected(&self) {
        self.items_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Labeled { created, .. } => {
                if *created {
                    self.labels_created.fetch_add(1, Ordering::Relaxed);
                }
                &self.items_labeled
            }
            ItemOutcome::ClassificationFailed { .. } => &self.classification_failures,
            ItemOutcome::LabelFailed { .. } => &self.label_failures,
            ItemOutcome::FetchFailed { .. } => &self.fetch_failures,
            ItemOutcome::Duplicate => &self.duplicates_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            cursor_resets: self.cursor_resets.load(Ordering::Relaxed),
            items_detected: self.items_detected.load(Ordering::Relaxed),
            items_labeled: self.items_labeled.load(Ordering::Relaxed),
            labels_created: self.labels_created.load(Ordering::Relaxed),
            classification_failures: self.classification_failures.load(Ordering::Relaxed),
            label_failures: self.label_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
        }
    }
}

struct Lifecycle {
    phase: MonitorPhase,
    session_id: Option<Uuid>,
    gateway: Option<Arc<dyn MailGateway>>,
}

/// Phase, authenticated session, cursor and counters of the monitor
///
/// A monitoring run is identified by its session id. The polling loop of a
/// run keeps going only while the phase is `Running` and the session id is
/// still its own, so a loop left over from an earlier run exits on its own.
pub struct MonitorState {
    lifecycle: RwLock<Lifecycle>,
    cursor: CursorStore,
    stats: Arc<MonitorStats>,
    wake: Notify,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle {
                phase: MonitorPhase::Stopped,
                session_id: None,
                gateway: None,
            }),
            cursor: CursorStore::new(),
            stats: Arc::new(MonitorStats::default()),
            wake: Notify::new(),
        }
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        Arc::clone(&self.stats)
    }

    pub async fn phase(&self) -> MonitorPhase {
        self.lifecycle.read().await.phase
    }

    pub async fn session_id(&self) -> Option<Uuid> {
        self.lifecycle.read().await.session_id
    }

    /// Authenticated gateway kept from an earlier start, if any
    pub async fn gateway(&self) -> Option<Arc<dyn MailGateway>> {
        self.lifecycle.read().await.gateway.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.lifecycle.read().await.gateway.is_some()
    }

    /// Whether the loop of `session_id` should keep running
    pub async fn is_current(&self, session_id: Uuid) -> bool {
        let lifecycle = self.lifecycle.read().await;
        lifecycle.phase == MonitorPhase::Running && lifecycle.session_id == Some(session_id)
    }

    /// Move from `Stopped` to `Starting`. Returns false when a run is already
    /// starting or running.
    pub async fn begin_start(&self) -> bool {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.phase != MonitorPhase::Stopped {
            return false;
        }
        lifecycle.phase = MonitorPhase::Starting;
        true
    }

    /// Return to `Stopped` after a start that could not complete
    pub async fn abort_start(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.phase == MonitorPhase::Starting {
            lifecycle.phase = MonitorPhase::Stopped;
        }
    }

    pub async fn mark_running(&self, gateway: Arc<dyn MailGateway>, session_id: Uuid) {
        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.phase = MonitorPhase::Running;
        lifecycle.session_id = Some(session_id);
        lifecycle.gateway = Some(gateway);
    }

    /// Stop the current run. The cursor and the authenticated session are kept.
    pub async fn mark_stopped(&self) {
        self.lifecycle.write().await.phase = MonitorPhase::Stopped;
        self.wake.notify_waiters();
    }

    /// Stop the run of `session_id` and forget its credentials
    ///
    /// No-op when another run has replaced it in the meantime.
    pub async fn drop_session(&self, session_id: Uuid) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.session_id != Some(session_id) {
            return;
        }
        // A restart may already be underway; only a running session is stopped
        if lifecycle.phase == MonitorPhase::Running {
            lifecycle.phase = MonitorPhase::Stopped;
        }
        lifecycle.gateway = None;
        drop(lifecycle);
        self.wake.notify_waiters();
    }

    /// Sleep for `duration`, returning early once the run of `session_id` ends
    pub async fn sleep_while_current(&self, session_id: Uuid, duration: Duration) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_current(session_id).await {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = notified => {}
        }
    }
}
