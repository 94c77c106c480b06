use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::UserId;
use crate::domain::workflow::WorkflowId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApproverEntryId(pub String);

/// One configured approver slot in a workflow's chain: who may act at a
/// given level and up to what monetary ceiling. Multiple entries may share a
/// level; `display_order` fixes the iteration order within it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApproverEntry {
    pub id: ApproverEntryId,
    pub workflow_id: WorkflowId,
    pub user_id: Option<UserId>,
    pub approver_name: String,
    pub approver_email: String,
    pub level: u32,
    pub approval_limit: Option<Decimal>,
    pub is_unlimited: bool,
    pub can_escalate: bool,
    pub escalation_timeout_hours: Option<u32>,
    pub notify_on_pending: bool,
    pub notify_on_approval: bool,
    pub notify_on_rejection: bool,
    pub display_order: u32,
}

impl ApproverEntry {
    /// Whether this entry's ceiling covers the given amount.
    pub fn covers(&self, amount: Decimal) -> bool {
        self.is_unlimited || self.approval_limit.map(|limit| limit >= amount).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{ApproverEntry, ApproverEntryId};
    use crate::domain::workflow::WorkflowId;

    fn entry(limit: Option<Decimal>, unlimited: bool) -> ApproverEntry {
        ApproverEntry {
            id: ApproverEntryId("AP-1".to_string()),
            workflow_id: WorkflowId("WF-1".to_string()),
            user_id: None,
            approver_name: "Dana Lee".to_string(),
            approver_email: "dana@example.com".to_string(),
            level: 1,
            approval_limit: limit,
            is_unlimited: unlimited,
            can_escalate: true,
            escalation_timeout_hours: None,
            notify_on_pending: true,
            notify_on_approval: true,
            notify_on_rejection: true,
            display_order: 0,
        }
    }

    #[test]
    fn unlimited_entry_covers_any_amount() {
        assert!(entry(None, true).covers(Decimal::new(10_000_000, 2)));
    }

    #[test]
    fn limited_entry_covers_up_to_its_ceiling() {
        let approver = entry(Some(Decimal::new(10_000, 2)), false);
        assert!(approver.covers(Decimal::new(10_000, 2)));
        assert!(!approver.covers(Decimal::new(10_001, 2)));
    }

    #[test]
    fn entry_without_limit_or_unlimited_flag_covers_nothing() {
        assert!(!entry(None, false).covers(Decimal::ONE));
    }
}
