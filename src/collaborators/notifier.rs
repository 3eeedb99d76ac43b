use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewBid,
    BidWithdrawn,
    BidSelected,
    BidRejected,
    BidExpired,
    PickupConfirmed,
    StatusChanged,
    PackageCanceled,
    DeadlineWarning,
    DeadlineExtended,
    DeadlineExpired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub package_id: Uuid,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        kind: NotificationKind,
        package_id: Uuid,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            message: message.into(),
            package_id,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError>;
}

/// Publishes notifications onto a broadcast channel that websocket clients
/// subscribe to. Having no subscriber is not a failure.
pub struct ChannelNotifier {
    tx: broadcast::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(tx: broadcast::Sender<Notification>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        info!(
            user_id = %notification.user_id,
            package_id = %notification.package_id,
            kind = ?notification.kind,
            "notification published"
        );
        let _ = self.tx.send(notification);
        Ok(())
    }
}
