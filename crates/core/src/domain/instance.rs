use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::UserId;
use crate::domain::approver::ApproverEntryId;
use crate::domain::workflow::WorkflowId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Escalated,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Approved, Rejected and Cancelled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// States in which an approver action (approve/reject/escalate) is legal.
    pub fn is_awaiting_action(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }
}

/// One submission of a workflow. Invariant: `current_approver` is Some iff
/// the status is awaiting action; `current_level` is 0 while Draft and only
/// a recall resets it. `state_version` guards every transition commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow_id: WorkflowId,
    pub reference_number: String,
    pub title: Option<String>,
    pub status: InstanceStatus,
    pub initiator: UserId,
    pub initiator_name: String,
    pub initiator_email: String,
    pub current_level: u32,
    pub current_approver: Option<ApproverEntryId>,
    pub amount: Option<Decimal>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored value of a single field on an instance, keyed by field name for
/// validation lookups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub instance_id: InstanceId,
    pub field_name: String,
    pub field_label: String,
    pub value: Option<String>,
    pub display_value: Option<String>,
}

impl FieldValue {
    pub fn is_blank(&self) -> bool {
        self.value.as_deref().map(|value| value.trim().is_empty()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldValue, InstanceId, InstanceStatus};

    #[test]
    fn status_round_trips_from_storage_encoding() {
        let cases = [
            InstanceStatus::Draft,
            InstanceStatus::Pending,
            InstanceStatus::Approved,
            InstanceStatus::Rejected,
            InstanceStatus::Escalated,
            InstanceStatus::Cancelled,
        ];

        for status in cases {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_and_awaiting_states_do_not_overlap() {
        for status in [InstanceStatus::Pending, InstanceStatus::Escalated] {
            assert!(status.is_awaiting_action());
            assert!(!status.is_terminal());
        }
        for status in
            [InstanceStatus::Approved, InstanceStatus::Rejected, InstanceStatus::Cancelled]
        {
            assert!(status.is_terminal());
            assert!(!status.is_awaiting_action());
        }
        assert!(!InstanceStatus::Draft.is_terminal());
        assert!(!InstanceStatus::Draft.is_awaiting_action());
    }

    #[test]
    fn whitespace_only_field_value_counts_as_blank() {
        let value = FieldValue {
            instance_id: InstanceId("WI-1".to_string()),
            field_name: "justification".to_string(),
            field_label: "Justification".to_string(),
            value: Some("   ".to_string()),
            display_value: None,
        };

        assert!(value.is_blank());
    }
}
