use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use entity::audit_events;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use tracing::error;

use crate::AuditEvent;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);

    /// Events that could not be persisted since startup.
    fn failed_writes(&self) -> u64 {
        0
    }
}

/// Synchronous append to `audit_events`.
#[derive(Clone, Debug)]
pub struct DbAuditSink {
    db: DatabaseConnection,
    failed_writes: Arc<AtomicU64>,
}

impl DbAuditSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            failed_writes: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl AuditSink for DbAuditSink {
    async fn record(&self, event: AuditEvent) {
        let row = audit_events::ActiveModel {
            event_id: Set(event.event_id),
            occurred_at: Set(event.occurred_at.fixed_offset()),
            user_id: Set(event.user_id),
            org_id: Set(event.org_id),
            role: Set(event.role.map(|role| role.as_str().to_string())),
            decision: Set(event.outcome.as_str().to_string()),
            resource: Set(event.resource.clone()),
            reason: Set(event.reason.clone()),
            details: Set(event.details.clone()),
        };
        if let Err(err) = row.insert(&self.db).await {
            self.failed_writes.fetch_add(1, Ordering::Relaxed);
            let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{event:?}"));
            error!(target: "audit", error = %err, event = %payload, "audit write failed");
        }
    }

    fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }
}

/// Keeps events in memory for inspection in tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
