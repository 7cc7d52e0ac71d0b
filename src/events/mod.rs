use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::audit::{AuditEvent, AuditOutcome};

/// Events emitted by the settlement engine after a unit of work commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SettlementEvent {
    QuotationStatusChanged {
        quotation_id: Uuid,
        old_status: String,
        new_status: String,
    },
    QuotationsExpired {
        count: u64,
        swept_at: DateTime<Utc>,
    },
    ConsignmentClosed {
        consignment_id: Uuid,
        closed_at: DateTime<Utc>,
    },
    LowMarginWarning {
        reference_id: Uuid,
        product_id: Uuid,
        margin_percent: Decimal,
    },
    InvoiceIssued {
        invoice_id: Uuid,
        sale_id: Uuid,
        invoice_type: String,
        number: String,
        total: Decimal,
    },
    Audit(AuditEvent),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<SettlementEvent>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<SettlementEvent>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: SettlementEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event only if the channel has room right now
    pub fn try_send(&self, event: SettlementEvent) -> Result<(), String> {
        self.sender
            .try_send(event)
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget variant used after commits; never fails the caller.
    pub fn emit(&self, event: SettlementEvent) {
        if let Err(e) = self.try_send(event) {
            warn!("{}", e);
        }
    }
}

/// Creates the bounded settlement event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<SettlementEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel into structured logs.
pub async fn process_events(mut rx: mpsc::Receiver<SettlementEvent>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            SettlementEvent::QuotationStatusChanged {
                quotation_id,
                old_status,
                new_status,
            } => {
                info!(%quotation_id, %old_status, %new_status, "quotation status changed");
            }
            SettlementEvent::QuotationsExpired { count, swept_at } => {
                info!(count, %swept_at, "quotations expired");
            }
            SettlementEvent::ConsignmentClosed {
                consignment_id,
                closed_at,
            } => {
                info!(%consignment_id, %closed_at, "consignment closed");
            }
            SettlementEvent::LowMarginWarning {
                reference_id,
                product_id,
                margin_percent,
            } => {
                warn!(%reference_id, %product_id, %margin_percent, "low margin line invoiced");
            }
            SettlementEvent::InvoiceIssued {
                invoice_id,
                sale_id,
                invoice_type,
                number,
                total,
            } => {
                info!(%invoice_id, %sale_id, %invoice_type, %number, %total, "invoice issued");
            }
            SettlementEvent::Audit(event) => match &event.outcome {
                AuditOutcome::Success => info!(
                    target: "audit",
                    resource = %event.resource,
                    resource_id = ?event.resource_id,
                    action = %event.action,
                    actor = %event.actor,
                    "operation succeeded"
                ),
                AuditOutcome::Failure { kind, message } => warn!(
                    target: "audit",
                    resource = %event.resource,
                    resource_id = ?event.resource_id,
                    action = %event.action,
                    actor = %event.actor,
                    %kind,
                    %message,
                    "operation failed"
                ),
            },
        }
    }

    warn!("Event processing loop has ended");
}
