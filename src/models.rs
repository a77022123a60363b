use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque position in the mailbox's change history (Gmail `historyId`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Deleted,
    LabelsChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub item_id: String,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn added(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            kind: ChangeKind::Added,
        }
    }
}

/// Everything the mailbox reported since a cursor, plus the cursor to resume from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub records: Vec<ChangeRecord>,
    pub next_cursor: Cursor,
}

impl ChangeBatch {
    /// Ids of newly added items in the order the mailbox reported them.
    /// An id that appears in several records is returned once.
    pub fn added_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|record| record.kind == ChangeKind::Added)
            .filter(|record| seen.insert(record.item_id.as_str()))
            .map(|record| record.item_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One message at the moment it was detected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub thread_id: String,
    pub excerpt: String,
    pub sender: String,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

impl ItemSummary {
    /// Text sent to the classifier: the excerpt immediately followed by the subject
    pub fn classification_text(&self) -> String {
        format!("{}{}", self.excerpt, self.subject)
    }
}

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Where a newly created label is shown in the Gmail UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelVisibility {
    pub label_list: String,
    pub message_list: String,
}

impl Default for LabelVisibility {
    fn default() -> Self {
        Self {
            label_list: "labelShow".to_string(),
            message_list: "show".to_string(),
        }
    }
}

/// How the pipeline for a single detected message ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    Labeled {
        label_id: String,
        label_name: String,
        created: bool,
    },
    ClassificationFailed {
        reason: String,
    },
    LabelFailed {
        category: String,
        reason: String,
    },
    FetchFailed {
        reason: String,
    },
    /// Already dispatched earlier in this monitoring run
    Duplicate,
}
