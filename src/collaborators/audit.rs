use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub action: &'static str,
    /// `None` for actions taken by the deadline scheduler.
    pub actor_id: Option<Uuid>,
    pub resource_id: Uuid,
    pub details: Value,
}

impl AuditEntry {
    pub fn new(action: &'static str, actor_id: Option<Uuid>, resource_id: Uuid, details: Value) -> Self {
        Self {
            action,
            actor_id,
            resource_id,
            details,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), CollaboratorError>;
}

/// Writes audit entries to the structured log under the `audit` target.
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<(), CollaboratorError> {
        info!(
            target: "audit",
            action = entry.action,
            actor_id = ?entry.actor_id,
            resource_id = %entry.resource_id,
            details = %entry.details,
            "audit"
        );
        Ok(())
    }
}
