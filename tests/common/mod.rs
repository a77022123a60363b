//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use gmail_labeler::auth::Authenticator;
use gmail_labeler::classifier::Classifier;
use gmail_labeler::client::MailGateway;
use gmail_labeler::config::MonitorConfig;
use gmail_labeler::error::{LabelerError, Result};
use gmail_labeler::models::{
    ChangeBatch, ChangeRecord, Cursor, ItemSummary, LabelInfo, LabelVisibility,
};
use mockall::mock;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Create a test message summary with default values
pub fn create_test_summary(id: &str, excerpt: &str, subject: &str) -> ItemSummary {
    ItemSummary {
        id: id.to_string(),
        thread_id: format!("thread_{}", id),
        excerpt: excerpt.to_string(),
        sender: "Test Sender <sender@example.com>".to_string(),
        subject: subject.to_string(),
        received_at: Some(Utc::now()),
        detected_at: Utc::now(),
    }
}

pub fn create_test_label_info(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// Monitor settings with the shortest allowed intervals
pub fn fast_monitor_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval_secs: 1,
        error_backoff_secs: 1,
        ..MonitorConfig::default()
    }
}

/// Poll `condition` every 20ms until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition().await
}

/// A gateway call as seen by [`FakeGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    GetCurrentCursor,
    ListChangesSince(String),
    GetItemSummary(String),
    ListLabels,
    CreateLabel(String),
    ApplyLabel(String, String),
}

/// In-memory mailbox with scripted history responses
///
/// History batches are handed out in the order they were pushed; once the
/// script runs out every poll reports no changes.
pub struct FakeGateway {
    current_cursor: Mutex<Cursor>,
    batches: Mutex<VecDeque<Result<ChangeBatch>>>,
    summaries: Mutex<HashMap<String, ItemSummary>>,
    labels: Mutex<Vec<LabelInfo>>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl FakeGateway {
    pub fn new(current_cursor: &str) -> Self {
        Self {
            current_cursor: Mutex::new(Cursor::new(current_cursor)),
            batches: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(HashMap::new()),
            labels: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_current_cursor(&self, cursor: &str) {
        *self.current_cursor.lock().unwrap() = Cursor::new(cursor);
    }

    /// Script a batch of added messages; a summary is registered for each
    pub fn push_added(&self, ids: &[&str], next_cursor: &str) {
        for id in ids {
            self.add_summary(create_test_summary(id, "Snippet for ", id));
        }
        self.push_batch(ChangeBatch {
            records: ids.iter().map(|id| ChangeRecord::added(*id)).collect(),
            next_cursor: Cursor::new(next_cursor),
        });
    }

    pub fn push_batch(&self, batch: ChangeBatch) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_error(&self, error: LabelerError) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub fn add_summary(&self, summary: ItemSummary) {
        self.summaries
            .lock()
            .unwrap()
            .insert(summary.id.clone(), summary);
    }

    pub fn remove_summary(&self, id: &str) {
        self.summaries.lock().unwrap().remove(id);
    }

    pub fn add_label(&self, id: &str, name: &str) {
        self.labels
            .lock()
            .unwrap()
            .push(create_test_label_info(id, name));
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&GatewayCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn created_labels(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::CreateLabel(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn applied_labels(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::ApplyLabel(item, label) => Some((item, label)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MailGateway for FakeGateway {
    async fn get_current_cursor(&self) -> Result<Cursor> {
        self.record(GatewayCall::GetCurrentCursor);
        Ok(self.current_cursor.lock().unwrap().clone())
    }

    async fn list_changes_since(&self, cursor: &Cursor) -> Result<ChangeBatch> {
        self.record(GatewayCall::ListChangesSince(cursor.to_string()));
        let next = self.batches.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ChangeBatch {
                records: vec![],
                next_cursor: cursor.clone(),
            })
        })
    }

    async fn get_item_summary(&self, id: &str) -> Result<ItemSummary> {
        self.record(GatewayCall::GetItemSummary(id.to_string()));
        self.summaries
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| LabelerError::NotFound(format!("message {}", id)))
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.record(GatewayCall::ListLabels);
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, name: &str, _visibility: &LabelVisibility) -> Result<LabelInfo> {
        self.record(GatewayCall::CreateLabel(name.to_string()));
        let mut labels = self.labels.lock().unwrap();
        let label = create_test_label_info(&format!("Label_{}", labels.len() + 100), name);
        labels.push(label.clone());
        Ok(label)
    }

    async fn apply_label(&self, item_id: &str, label_id: &str) -> Result<()> {
        self.record(GatewayCall::ApplyLabel(
            item_id.to_string(),
            label_id.to_string(),
        ));
        Ok(())
    }
}

/// Classifier that always predicts the same category and records the texts it saw
pub struct StaticClassifier {
    prediction: String,
    texts: Mutex<Vec<String>>,
}

impl StaticClassifier {
    pub fn new(prediction: &str) -> Self {
        Self {
            prediction: prediction.to_string(),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn classify(&self, text: &str) -> Result<String> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(self.prediction.clone())
    }
}

/// Authenticator handing out a shared gateway, or failing every time
pub struct StaticAuthenticator {
    gateway: Option<Arc<dyn MailGateway>>,
    calls: AtomicUsize,
}

impl StaticAuthenticator {
    pub fn succeeding(gateway: Arc<dyn MailGateway>) -> Self {
        Self {
            gateway: Some(gateway),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            gateway: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self) -> Result<Arc<dyn MailGateway>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gateway.clone().ok_or_else(|| {
            LabelerError::AuthError("No cached token. Run `gmail-labeler auth`".to_string())
        })
    }
}

// Mock implementation of MailGateway for testing
mock! {
    pub MailGateway {}

    #[async_trait::async_trait]
    impl MailGateway for MailGateway {
        async fn get_current_cursor(&self) -> Result<Cursor>;
        async fn list_changes_since(&self, cursor: &Cursor) -> Result<ChangeBatch>;
        async fn get_item_summary(&self, id: &str) -> Result<ItemSummary>;
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<LabelInfo>;
        async fn apply_label(&self, item_id: &str, label_id: &str) -> Result<()>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_summary() {
        let summary = create_test_summary("msg1", "Hello ", "World");
        assert_eq!(summary.id, "msg1");
        assert_eq!(summary.thread_id, "thread_msg1");
        assert_eq!(summary.classification_text(), "Hello World");
    }

    #[tokio::test]
    async fn test_fake_gateway_replays_script_then_idles() {
        let gateway = FakeGateway::new("10");
        gateway.push_added(&["m1"], "11");

        let first = gateway.list_changes_since(&Cursor::new("10")).await.unwrap();
        assert_eq!(first.added_ids(), vec!["m1".to_string()]);

        let second = gateway.list_changes_since(&Cursor::new("11")).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(second.next_cursor, Cursor::new("11"));
    }
}
