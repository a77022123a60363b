//! History polling loop
//!
//! Each tick asks the gateway for everything that happened since the stored
//! cursor, queues a summary of every newly added message and then moves the
//! cursor forward. When Gmail no longer has history for the cursor, the loop
//! jumps to the current position; messages that arrived in the gap are not
//! labeled.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::client::MailGateway;
use crate::config::MonitorConfig;
use crate::dispatch::{ItemSink, WorkerPool};
use crate::error::{LabelerError, Result};
use crate::models::{Cursor, ItemOutcome};
use crate::state::MonitorState;

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No cursor was stored; the current one was fetched and nothing dispatched
    Initialized { cursor: Cursor },
    /// Changes were read and new messages queued
    Processed {
        dispatched: usize,
        skipped: usize,
        failed: usize,
        next_cursor: Cursor,
    },
    /// The stored cursor had expired and was replaced by the current one
    CursorReset { cursor: Cursor },
}

pub struct ChangeDetectionLoop {
    state: Arc<MonitorState>,
    gateway: Arc<dyn MailGateway>,
    session_id: Uuid,
    poll_interval: Duration,
    error_backoff: Duration,
    recent: LruCache<String, ()>,
}

impl ChangeDetectionLoop {
    pub fn new(
        state: Arc<MonitorState>,
        gateway: Arc<dyn MailGateway>,
        session_id: Uuid,
        config: &MonitorConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.recent_ids).unwrap_or(NonZeroUsize::MIN);

        Self {
            state,
            gateway,
            session_id,
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            recent: LruCache::new(capacity),
        }
    }

    /// Run one poll against the gateway
    ///
    /// Messages are queued in the order Gmail reports them, each at most once
    /// per run, and the cursor only moves after all of them are queued.
    pub async fn tick(&mut self, sink: &dyn ItemSink) -> Result<TickOutcome> {
        let stats = self.state.stats();

        let Some(cursor) = self.state.cursor().get().await else {
            let cursor = self.gateway.get_current_cursor().await?;
            info!("Initialized history cursor at {}", cursor);
            self.state.cursor().set(cursor.clone()).await;
            return Ok(TickOutcome::Initialized { cursor });
        };

        let batch = match self.gateway.list_changes_since(&cursor).await {
            Ok(batch) => batch,
            Err(LabelerError::CursorExpired { .. }) => {
                warn!("History ID {} expired, fetching the current one", cursor);
                let fresh = self.gateway.get_current_cursor().await?;
                self.state.cursor().set(fresh.clone()).await;
                stats.record_cursor_reset();
                return Ok(TickOutcome::CursorReset { cursor: fresh });
            }
            Err(e) => return Err(e),
        };

        if batch.is_empty() {
            debug!("No new history since {}", cursor);
        }

        let mut dispatched = 0;
        let mut skipped = 0;
        let mut failed = 0;

        for item_id in batch.added_ids() {
            if self.recent.contains(&item_id) {
                debug!("Message {} already dispatched in this run", item_id);
                stats.record_outcome(&ItemOutcome::Duplicate);
                skipped += 1;
                continue;
            }

            stats.record_detected();
            match self.gateway.get_item_summary(&item_id).await {
                Ok(summary) => {
                    sink.submit(summary).await?;
                    self.recent.put(item_id, ());
                    dispatched += 1;
                }
                Err(e) if e.is_auth_failure() => return Err(e),
                Err(e) => {
                    warn!("Could not fetch message {}: {}", item_id, e);
                    stats.record_outcome(&ItemOutcome::FetchFailed {
                        reason: e.to_string(),
                    });
                    failed += 1;
                }
            }
        }

        self.state.cursor().set(batch.next_cursor.clone()).await;

        Ok(TickOutcome::Processed {
            dispatched,
            skipped,
            failed,
            next_cursor: batch.next_cursor,
        })
    }

    /// Poll until the run ends, then drain the worker pool
    pub async fn run(mut self, pool: WorkerPool) {
        let span = info_span!("monitor", session = %self.session_id);

        async move {
            info!("Started monitoring for new emails");
            let stats = self.state.stats();

            while self.state.is_current(self.session_id).await {
                let wait = match self.tick(&pool).await {
                    Ok(outcome) => {
                        stats.record_tick();
                        if let TickOutcome::Processed { dispatched, .. } = &outcome {
                            if *dispatched > 0 {
                                info!("Queued {} new messages", dispatched);
                            }
                        }
                        debug!("Tick finished: {:?}", outcome);
                        self.poll_interval
                    }
                    Err(e) if e.is_auth_failure() => {
                        error!("Gmail session is no longer authorized, stopping: {}", e);
                        self.state.drop_session(self.session_id).await;
                        break;
                    }
                    Err(e) => {
                        stats.record_failed_tick();
                        error!("Error in monitoring loop: {}", e);
                        self.error_backoff
                    }
                };

                self.state
                    .sleep_while_current(self.session_id, wait)
                    .await;
            }

            pool.shutdown().await;
            info!("Monitoring loop exited");
        }
        .instrument(span)
        .await
    }
}
