use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::actor::{Actor, UserId};
use crate::domain::instance::InstanceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Submitted,
    Approved,
    Rejected,
    Escalated,
    Cancelled,
    Recalled,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Cancelled => "cancelled",
            Self::Recalled => "recalled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            "cancelled" => Some(Self::Cancelled),
            "recalled" => Some(Self::Recalled),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Interactive,
    Email,
    System,
}

impl ActionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Email => "email",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "interactive" => Some(Self::Interactive),
            "email" => Some(Self::Email),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Append-only record of one committed transition. Never mutated; the audit
/// trail of the state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalHistoryEntry {
    pub id: String,
    pub instance_id: InstanceId,
    pub actor_id: Option<UserId>,
    pub actor_name: String,
    pub actor_email: String,
    pub level: u32,
    pub action: HistoryAction,
    pub comments: Option<String>,
    pub source: ActionSource,
    pub occurred_at: DateTime<Utc>,
}

impl ApprovalHistoryEntry {
    pub fn record(
        instance_id: InstanceId,
        actor: &Actor,
        level: u32,
        action: HistoryAction,
        comments: Option<String>,
        source: ActionSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id,
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            actor_email: actor.email.clone(),
            level,
            action,
            comments,
            source,
            occurred_at: Utc::now(),
        }
    }
}
