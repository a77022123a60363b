//! Classification and labeling of detected messages on a bounded worker pool

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::classifier::Classifier;
use crate::error::{LabelerError, Result};
use crate::label_manager::LabelManager;
use crate::models::{ItemOutcome, ItemSummary};
use crate::state::MonitorStats;

/// Destination for messages found by the polling loop
#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Queue a message for classification. Waits while the queue is full.
    async fn submit(&self, summary: ItemSummary) -> Result<()>;
}

/// Runs the classify-then-label pipeline for one message
pub struct Dispatcher {
    classifier: Arc<dyn Classifier>,
    labels: LabelManager,
}

impl Dispatcher {
    pub fn new(classifier: Arc<dyn Classifier>, labels: LabelManager) -> Self {
        Self { classifier, labels }
    }

    /// Classify `text` and label the message with the predicted category
    ///
    /// Never fails: every error ends up in the returned outcome.
    pub async fn classify_and_label(&self, item_id: &str, text: &str) -> ItemOutcome {
        let category = match self.classifier.classify(text).await {
            Ok(category) => category,
            Err(e) => {
                error!("Error classifying message {}: {}", item_id, e);
                return ItemOutcome::ClassificationFailed {
                    reason: e.to_string(),
                };
            }
        };

        match self.labels.apply_category(item_id, &category).await {
            Ok(resolved) => {
                info!(
                    "Applied label '{}' to message {}",
                    resolved.label.name, item_id
                );
                ItemOutcome::Labeled {
                    label_id: resolved.label.id,
                    label_name: resolved.label.name,
                    created: resolved.created,
                }
            }
            Err(e) => {
                error!("Error applying label '{}' to message {}: {}", category, item_id, e);
                ItemOutcome::LabelFailed {
                    category,
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn process(&self, summary: &ItemSummary) -> ItemOutcome {
        info!(
            "New message {} from {}: {}",
            summary.id, summary.sender, summary.subject
        );
        self.classify_and_label(&summary.id, &summary.classification_text())
            .await
    }
}

/// Fixed number of workers draining a bounded queue of detected messages
pub struct WorkerPool {
    sender: mpsc::Sender<ItemSummary>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing a queue of `capacity` messages
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        workers: usize,
        capacity: usize,
        stats: Arc<MonitorStats>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let dispatcher = Arc::clone(&dispatcher);
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(summary) = next else { break };

                        let outcome = dispatcher.process(&summary).await;
                        debug!(
                            "Worker {} finished message {}: {:?}",
                            worker_id, summary.id, outcome
                        );
                        stats.record_outcome(&outcome);
                    }
                    debug!("Worker {} exiting", worker_id);
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Close the queue and wait until every queued message has been handled
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Dispatch worker panicked: {}", e);
            }
        }
    }
}

#[async_trait]
impl ItemSink for WorkerPool {
    async fn submit(&self, summary: ItemSummary) -> Result<()> {
        self.sender
            .send(summary)
            .await
            .map_err(|e| LabelerError::Unknown(format!("Dispatch queue closed, dropped {}", e.0.id)))
    }
}
