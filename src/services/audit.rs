use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{EventSender, SettlementEvent};

pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure { kind: String, message: String },
}

/// One completed create, return or invoice call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub resource: String,
    pub resource_id: Option<Uuid>,
    pub action: String,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn success(resource: &str, action: &str, resource_id: Uuid) -> Self {
        Self {
            resource: resource.to_string(),
            resource_id: Some(resource_id),
            action: action.to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            outcome: AuditOutcome::Success,
            occurred_at: Utc::now(),
        }
    }

    pub fn failure(
        resource: &str,
        action: &str,
        resource_id: Option<Uuid>,
        err: &ServiceError,
    ) -> Self {
        Self {
            resource: resource.to_string(),
            resource_id,
            action: action.to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            outcome: AuditOutcome::Failure {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
            occurred_at: Utc::now(),
        }
    }
}

/// Best-effort audit trail. Implementations must not fail the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Forwards audit events into the settlement event channel without waiting
/// for capacity. A full or closed channel drops the event with a warning.
#[derive(Debug, Clone)]
pub struct EventAuditSink {
    sender: EventSender,
}

impl EventAuditSink {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AuditSink for EventAuditSink {
    async fn record(&self, event: AuditEvent) {
        let resource_id = event.resource_id;
        let action = event.action.clone();
        if let Err(e) = self.sender.try_send(SettlementEvent::Audit(event)) {
            warn!(?resource_id, %action, error = %e, "dropping audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn forwards_events_into_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventAuditSink::new(EventSender::new(tx));
        let id = Uuid::new_v4();

        sink.record(AuditEvent::success("consignment", "create", id)).await;

        match rx.recv().await {
            Some(SettlementEvent::Audit(event)) => {
                assert_eq!(event.resource_id, Some(id));
                assert_eq!(event.outcome, AuditOutcome::Success);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn full_channel_is_swallowed() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = EventAuditSink::new(EventSender::new(tx));

        sink.record(AuditEvent::success("invoice", "issue", Uuid::new_v4())).await;
        // Second event finds the channel full and is dropped without error.
        sink.record(AuditEvent::success("invoice", "issue", Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn closed_channel_is_swallowed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventAuditSink::new(EventSender::new(tx));
        let err = ServiceError::NotFound("x".into());
        sink.record(AuditEvent::failure("quotation", "create", None, &err)).await;
    }
}
