use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Submit,
    Approve,
    Reject,
    Escalate,
    Cancel,
    Recall,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub actor: String,
    pub summary: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        actor: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            actor: actor.into(),
            summary: summary.into(),
            old_value: None,
            new_value: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_change(
        mut self,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }
}

/// Best-effort audit consumer. Implementations must not propagate failures
/// into the caller; a lost audit record never fails a transition.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Emits audit events to the tracing pipeline instead of a store.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            event_name = "audit.recorded",
            action = ?event.action,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            actor = %event.actor,
            "{}",
            event.summary,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};

    #[test]
    fn in_memory_sink_records_events_with_entity_fields() {
        let sink = InMemoryAuditSink::default();
        sink.record(
            AuditEvent::new(
                AuditAction::Submit,
                "workflow_instance",
                "WI-42",
                "EXP-20260301120000-0042",
                "U-7",
                "Workflow instance submitted",
            )
            .with_change(None, Some(serde_json::json!({ "status": "pending" }))),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Submit);
        assert_eq!(events[0].entity_id, "WI-42");
        assert!(events[0].new_value.is_some());
    }
}
