//! Gmail gateway: history polling, message summaries and label operations with
//! timeouts and retry logic

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::api::{History, Label, Message, ModifyMessageRequest};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{LabelerError, Result};
use crate::models::{ChangeBatch, ChangeKind, ChangeRecord, Cursor, ItemSummary, LabelInfo, LabelVisibility};

const SCOPE_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
const SCOPE_LABELS: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Operations the monitor needs from the mailbox provider
///
/// Implementations must be safe to share between the polling loop and the
/// dispatch workers; every method is a stateless request.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Current position of the mailbox's change history
    async fn get_current_cursor(&self) -> Result<Cursor>;

    /// All changes since `cursor`, or `LabelerError::CursorExpired` when the
    /// provider no longer keeps history that far back
    async fn list_changes_since(&self, cursor: &Cursor) -> Result<ChangeBatch>;

    /// Headers and excerpt of one message
    async fn get_item_summary(&self, id: &str) -> Result<ItemSummary>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label
    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<LabelInfo>;

    /// Add a label to a message. Adding a label the message already carries is a no-op.
    async fn apply_label(&self, item_id: &str, label_id: &str) -> Result<()>;
}

/// Production Gmail gateway
///
/// Every call is bounded by `request_timeout` and retried with exponential
/// backoff when the failure is transient (5xx, 429, network).
pub struct ProductionGmailClient {
    hub: GmailHub,
    request_timeout: Duration,
    max_retries: u32,
}

impl ProductionGmailClient {
    /// Create a new production Gmail client
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `request_timeout` - Upper bound for a single API call
    /// * `max_retries` - Retries after the first attempt for transient failures
    pub fn new(hub: GmailHub, request_timeout: Duration, max_retries: u32) -> Self {
        Self {
            hub,
            request_timeout,
            max_retries,
        }
    }

    /// Check if an error is retryable
    fn should_retry(error: &LabelerError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bound a single API call by `timeout`
    async fn with_timeout<T, Fut>(operation_name: &str, timeout: Duration, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation_name, timeout);
                Err(LabelerError::NetworkError(format!(
                    "API call timed out after {:?}",
                    timeout
                )))
            }
        }
    }

    /// Timeout plus retry around one logical operation
    async fn call<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.request_timeout;
        Self::with_retry(operation_name, self.max_retries, || {
            Self::with_timeout(operation_name, timeout, operation())
        })
        .await
    }

    async fn fetch_history_page(
        &self,
        start: u64,
        page_token: Option<&str>,
    ) -> Result<google_gmail1::api::ListHistoryResponse> {
        let mut call = self
            .hub
            .users()
            .history_list("me")
            .start_history_id(start)
            .add_history_types("messageAdded");

        if let Some(token) = page_token {
            call = call.page_token(token);
        }

        let (_, response) = call.add_scope(SCOPE_MODIFY).doit().await?;
        Ok(response)
    }
}

#[async_trait]
impl MailGateway for ProductionGmailClient {
    async fn get_current_cursor(&self) -> Result<Cursor> {
        self.call("get_profile", || async {
            let (_, profile) = self
                .hub
                .users()
                .get_profile("me")
                .add_scope(SCOPE_MODIFY)
                .doit()
                .await?;

            profile
                .history_id
                .map(Cursor::from)
                .ok_or_else(|| LabelerError::ApiError("Profile has no history ID".to_string()))
        })
        .await
    }

    async fn list_changes_since(&self, cursor: &Cursor) -> Result<ChangeBatch> {
        let start = cursor.as_str().parse::<u64>().map_err(|_| {
            LabelerError::BadRequest(format!("History cursor '{}' is not numeric", cursor))
        })?;

        let mut records = Vec::new();
        let mut next_cursor = None;
        let mut page_token: Option<String> = None;

        loop {
            let token = page_token.clone();
            let response = self
                .call("list_history", || self.fetch_history_page(start, token.as_deref()))
                .await
                .map_err(|e| match e {
                    LabelerError::NotFound(_) => LabelerError::CursorExpired {
                        cursor: cursor.to_string(),
                    },
                    other => other,
                })?;

            if let Some(history) = response.history {
                records.extend(history_to_records(history));
            }

            if let Some(id) = response.history_id {
                next_cursor = Some(Cursor::from(id));
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!("History since {} returned {} records", cursor, records.len());

        Ok(ChangeBatch {
            records,
            next_cursor: next_cursor.unwrap_or_else(|| cursor.clone()),
        })
    }

    async fn get_item_summary(&self, id: &str) -> Result<ItemSummary> {
        let message = self
            .call("get_message", || async {
                let (_, msg) = self
                    .hub
                    .users()
                    .messages_get("me", id)
                    .format("metadata")
                    .add_metadata_headers("From")
                    .add_metadata_headers("Subject")
                    .add_metadata_headers("Date")
                    .add_scope(SCOPE_MODIFY)
                    .doit()
                    .await?;
                Ok(msg)
            })
            .await?;

        parse_item_summary(id, message)
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.call("list_labels", || async {
            let (_, response) = self
                .hub
                .users()
                .labels_list("me")
                .add_scope(SCOPE_LABELS)
                .doit()
                .await?;

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<LabelInfo> {
        self.call("create_label", || async {
            let label = Label {
                name: Some(name.to_string()),
                label_list_visibility: Some(visibility.label_list.clone()),
                message_list_visibility: Some(visibility.message_list.clone()),
                ..Default::default()
            };

            let (_, created) = self
                .hub
                .users()
                .labels_create(label, "me")
                .add_scope(SCOPE_LABELS)
                .doit()
                .await?;

            let id = created
                .id
                .ok_or_else(|| LabelerError::LabelError("Created label has no ID".to_string()))?;

            Ok(LabelInfo {
                id,
                name: created.name.unwrap_or_else(|| name.to_string()),
            })
        })
        .await
    }

    async fn apply_label(&self, item_id: &str, label_id: &str) -> Result<()> {
        self.call("modify_message", || async {
            let modify_request = ModifyMessageRequest {
                add_label_ids: Some(vec![label_id.to_string()]),
                remove_label_ids: None,
            };

            self.hub
                .users()
                .messages_modify(modify_request, "me", item_id)
                .add_scope(SCOPE_MODIFY)
                .doit()
                .await?;

            Ok(())
        })
        .await
    }
}

/// Flatten Gmail history records into change records, keeping the reported order
fn history_to_records(history: Vec<History>) -> Vec<ChangeRecord> {
    let mut records = Vec::new();

    for entry in history {
        let added = entry
            .messages_added
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.message.and_then(|msg| msg.id))
            .map(|id| (id, ChangeKind::Added));

        let deleted = entry
            .messages_deleted
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.message.and_then(|msg| msg.id))
            .map(|id| (id, ChangeKind::Deleted));

        let labels_added = entry
            .labels_added
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.message.and_then(|msg| msg.id));
        let labels_removed = entry
            .labels_removed
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.message.and_then(|msg| msg.id));
        let relabeled = labels_added
            .chain(labels_removed)
            .map(|id| (id, ChangeKind::LabelsChanged));

        records.extend(
            added
                .chain(deleted)
                .chain(relabeled)
                .map(|(item_id, kind)| ChangeRecord { item_id, kind }),
        );
    }

    records
}

/// Parse Gmail API Message into an ItemSummary
fn parse_item_summary(requested_id: &str, msg: Message) -> Result<ItemSummary> {
    let id = msg.id.unwrap_or_else(|| requested_id.to_string());

    let thread_id = msg
        .thread_id
        .ok_or_else(|| LabelerError::InvalidMessageFormat("Missing thread ID".to_string()))?;

    let mut sender = String::new();
    let mut subject = String::new();
    let mut date_str = String::new();

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();

    for header in headers {
        if let (Some(name), Some(value)) = (header.name, header.value) {
            match name.to_lowercase().as_str() {
                "from" => sender = value,
                "subject" => subject = value,
                "date" => date_str = value,
                _ => {}
            }
        }
    }

    let received_at = parse_date(&date_str)
        .ok()
        .or_else(|| msg.internal_date.and_then(DateTime::from_timestamp_millis));

    Ok(ItemSummary {
        id,
        thread_id,
        excerpt: msg.snippet.unwrap_or_default(),
        sender,
        subject,
        received_at,
        detected_at: Utc::now(),
    })
}

/// Parse RFC 2822 date string
fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(date_str).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| LabelerError::InvalidMessageFormat(format!("Invalid date format: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{
        HistoryLabelAdded, HistoryMessageAdded, HistoryMessageDeleted, MessagePart,
        MessagePartHeader,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn message_ref(id: &str) -> Option<Message> {
        Some(Message {
            id: Some(id.to_string()),
            ..Default::default()
        })
    }

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn test_should_retry_server_error() {
        let error = LabelerError::ServerError {
            status: 500,
            message: "Internal error".to_string(),
        };
        assert!(ProductionGmailClient::should_retry(&error));
    }

    #[test]
    fn test_should_not_retry_expired_cursor() {
        let error = LabelerError::CursorExpired {
            cursor: "1".to_string(),
        };
        assert!(!ProductionGmailClient::should_retry(&error));
    }

    #[test]
    fn test_should_not_retry_auth_error() {
        let error = LabelerError::AuthError("invalid token".to_string());
        assert!(!ProductionGmailClient::should_retry(&error));
    }

    #[test]
    fn test_history_to_records_keeps_order_and_kinds() {
        let history = vec![
            History {
                messages_added: Some(vec![
                    HistoryMessageAdded {
                        message: message_ref("m1"),
                    },
                    HistoryMessageAdded {
                        message: message_ref("m2"),
                    },
                ]),
                ..Default::default()
            },
            History {
                messages_deleted: Some(vec![HistoryMessageDeleted {
                    message: message_ref("m0"),
                }]),
                labels_added: Some(vec![HistoryLabelAdded {
                    message: message_ref("m1"),
                    label_ids: Some(vec!["STARRED".to_string()]),
                }]),
                ..Default::default()
            },
            History {
                messages_added: Some(vec![HistoryMessageAdded { message: None }]),
                ..Default::default()
            },
        ];

        let records = history_to_records(history);
        assert_eq!(
            records,
            vec![
                ChangeRecord::added("m1"),
                ChangeRecord::added("m2"),
                ChangeRecord {
                    item_id: "m0".to_string(),
                    kind: ChangeKind::Deleted
                },
                ChangeRecord {
                    item_id: "m1".to_string(),
                    kind: ChangeKind::LabelsChanged
                },
            ]
        );
    }

    #[test]
    fn test_parse_item_summary() {
        let msg = Message {
            id: Some("m1".to_string()),
            thread_id: Some("t1".to_string()),
            snippet: Some("Applications for the summer programme close".to_string()),
            payload: Some(MessagePart {
                headers: Some(vec![
                    header("From", "Careers Office <careers@uni.example>"),
                    header("Subject", "Internship drive"),
                    header("Date", "Mon, 24 Nov 2025 10:30:00 +0000"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let summary = parse_item_summary("m1", msg).unwrap();
        assert_eq!(summary.id, "m1");
        assert_eq!(summary.thread_id, "t1");
        assert_eq!(summary.sender, "Careers Office <careers@uni.example>");
        assert_eq!(summary.subject, "Internship drive");
        assert_eq!(
            summary.received_at.unwrap().to_rfc3339(),
            "2025-11-24T10:30:00+00:00"
        );
        assert_eq!(
            summary.classification_text(),
            "Applications for the summer programme closeInternship drive"
        );
    }

    #[test]
    fn test_parse_item_summary_falls_back_to_internal_date() {
        let msg = Message {
            thread_id: Some("t9".to_string()),
            internal_date: Some(1_704_124_800_000),
            payload: Some(MessagePart {
                headers: Some(vec![header("Date", "not a date")]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let summary = parse_item_summary("m9", msg).unwrap();
        assert_eq!(summary.id, "m9");
        assert_eq!(summary.excerpt, "");
        assert_eq!(summary.subject, "");
        assert_eq!(summary.received_at.unwrap().timestamp(), 1_704_124_800);
    }

    #[test]
    fn test_parse_item_summary_requires_thread() {
        let msg = Message {
            id: Some("m1".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            parse_item_summary("m1", msg),
            Err(LabelerError::InvalidMessageFormat(_))
        ));
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("Mon, 24 Nov 2025 10:30:00 +0000").is_ok());
        assert!(parse_date("2025-11-24T10:30:00Z").is_ok());
        assert!(parse_date("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = ProductionGmailClient::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                let current = count.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    Err(LabelerError::NetworkError("Connection timeout".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_on_permanent_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = ProductionGmailClient::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(LabelerError::NotFound("history".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_zero_retries_attempts_once() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = ProductionGmailClient::with_retry("test_op", 0, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(LabelerError::RateLimitExceeded { retry_after: 1 })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_to_network_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, LabelerError>(())
        };

        let result =
            ProductionGmailClient::with_timeout("slow_op", Duration::from_millis(20), slow).await;
        assert!(matches!(result, Err(LabelerError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let fast = async { Ok::<_, LabelerError>(7) };
        let result =
            ProductionGmailClient::with_timeout("fast_op", Duration::from_millis(200), fast).await;
        assert_eq!(result.unwrap(), 7);
    }
}
