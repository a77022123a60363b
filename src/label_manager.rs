//! Resolves predicted category names to Gmail labels, creating them on first use
use crate::client::MailGateway;
use crate::error::{LabelerError, Result};
use crate::models::{LabelInfo, LabelVisibility};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A label that was found or created for a category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLabel {
    pub label: LabelInfo,
    pub created: bool,
}

/// Finds or creates the label for a category and applies it to messages
///
/// Lookups always list the account's labels so that labels renamed or
/// deleted in the Gmail UI are picked up. Resolve-or-create runs under a
/// mutex shared by all workers.
pub struct LabelManager {
    gateway: Arc<dyn MailGateway>,
    visibility: LabelVisibility,
    resolve_lock: Mutex<()>,
}

impl LabelManager {
    /// Creates a new LabelManager instance
    pub fn new(gateway: Arc<dyn MailGateway>) -> Self {
        Self::with_visibility(gateway, LabelVisibility::default())
    }

    pub fn with_visibility(gateway: Arc<dyn MailGateway>, visibility: LabelVisibility) -> Self {
        Self {
            gateway,
            visibility,
            resolve_lock: Mutex::new(()),
        }
    }

    /// Find the label named exactly `name`, creating it if the account has none
    pub async fn resolve_or_create(&self, name: &str) -> Result<ResolvedLabel> {
        if name.trim().is_empty() {
            return Err(LabelerError::LabelError(
                "Category name is empty".to_string(),
            ));
        }

        let _guard = self.resolve_lock.lock().await;

        if let Some(label) = self.find_label(name).await? {
            debug!("Label '{}' already exists with ID {}", name, label.id);
            return Ok(ResolvedLabel {
                label,
                created: false,
            });
        }

        info!("Creating label: {}", name);
        match self.gateway.create_label(name, &self.visibility).await {
            Ok(label) => Ok(ResolvedLabel {
                label,
                created: true,
            }),
            Err(LabelerError::Conflict(_)) => {
                warn!("Label '{}' was created concurrently, looking it up again", name);
                let label = self.find_label(name).await?.ok_or_else(|| {
                    LabelerError::LabelError(format!(
                        "Label '{}' reported as existing but not listed",
                        name
                    ))
                })?;
                Ok(ResolvedLabel {
                    label,
                    created: false,
                })
            }
            Err(e) => Err(LabelerError::LabelError(format!(
                "Failed to create label '{}': {}",
                name, e
            ))),
        }
    }

    /// Resolve the label for `category` and add it to the message
    pub async fn apply_category(&self, item_id: &str, category: &str) -> Result<ResolvedLabel> {
        let resolved = self.resolve_or_create(category).await?;

        self.gateway
            .apply_label(item_id, &resolved.label.id)
            .await
            .map_err(|e| {
                LabelerError::LabelError(format!(
                    "Failed to apply label '{}' to message {}: {}",
                    resolved.label.name, item_id, e
                ))
            })?;

        debug!(
            "Applied label '{}' ({}) to message {}",
            resolved.label.name, resolved.label.id, item_id
        );
        Ok(resolved)
    }

    async fn find_label(&self, name: &str) -> Result<Option<LabelInfo>> {
        let labels = self.gateway.list_labels().await?;
        Ok(labels.into_iter().find(|label| label.name == name))
    }
}
