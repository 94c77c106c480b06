use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::history::HistoryAction;

/// Links embedded in a pending-approval email. The action links are only
/// present when email approvals are enabled for the installation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLinks {
    pub review_url: String,
    pub approve_url: Option<String>,
    pub reject_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub approver_email: String,
    pub approver_name: String,
    pub workflow_name: String,
    pub reference_number: String,
    pub initiator_name: String,
    pub amount: Option<String>,
    pub links: ActionLinks,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeNotification {
    pub initiator_email: String,
    pub initiator_name: String,
    pub workflow_name: String,
    pub reference_number: String,
    pub action: HistoryAction,
    pub actor_name: String,
    pub comments: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification dispatch failed: {0}")]
pub struct NotifyError(pub String);

/// Best-effort outbound notification channel. Dispatch happens after a
/// transition commits; errors are logged by the caller and never fail the
/// transition.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_approval_pending(
        &self,
        notification: PendingNotification,
    ) -> Result<(), NotifyError>;

    async fn notify_outcome(&self, notification: OutcomeNotification) -> Result<(), NotifyError>;
}

/// Discards all notifications. Used when no mail transport is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify_approval_pending(&self, _: PendingNotification) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_outcome(&self, _: OutcomeNotification) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    pending: Arc<Mutex<Vec<PendingNotification>>>,
    outcomes: Arc<Mutex<Vec<OutcomeNotification>>>,
    fail: Arc<Mutex<bool>>,
}

impl InMemoryNotificationSink {
    pub fn pending(&self) -> Vec<PendingNotification> {
        self.pending.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn outcomes(&self) -> Vec<OutcomeNotification> {
        self.outcomes.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Makes every subsequent dispatch fail, for testing that transitions
    /// survive notification outages.
    pub fn fail_all(&self) {
        if let Ok(mut fail) = self.fail.lock() {
            *fail = true;
        }
    }

    fn should_fail(&self) -> bool {
        self.fail.lock().map(|fail| *fail).unwrap_or(false)
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify_approval_pending(
        &self,
        notification: PendingNotification,
    ) -> Result<(), NotifyError> {
        if self.should_fail() {
            return Err(NotifyError("mail transport unavailable".to_string()));
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(notification);
        }
        Ok(())
    }

    async fn notify_outcome(&self, notification: OutcomeNotification) -> Result<(), NotifyError> {
        if self.should_fail() {
            return Err(NotifyError("mail transport unavailable".to_string()));
        }
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push(notification);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ActionLinks, InMemoryNotificationSink, NotificationSink, PendingNotification,
    };

    #[tokio::test]
    async fn in_memory_sink_captures_pending_notifications() {
        let sink = InMemoryNotificationSink::default();
        sink.notify_approval_pending(PendingNotification {
            approver_email: "dana@example.com".to_string(),
            approver_name: "Dana Lee".to_string(),
            workflow_name: "Expense Approval".to_string(),
            reference_number: "EXP-20260301120000-0042".to_string(),
            initiator_name: "Sam Ortiz".to_string(),
            amount: Some("$120.50".to_string()),
            links: ActionLinks::default(),
        })
        .await
        .expect("dispatch");

        assert_eq!(sink.pending().len(), 1);
        assert_eq!(sink.pending()[0].approver_email, "dana@example.com");
    }

    #[tokio::test]
    async fn failing_sink_reports_error_without_panicking() {
        let sink = InMemoryNotificationSink::default();
        sink.fail_all();

        let result = sink
            .notify_approval_pending(PendingNotification {
                approver_email: "dana@example.com".to_string(),
                approver_name: "Dana Lee".to_string(),
                workflow_name: "Expense Approval".to_string(),
                reference_number: "EXP-1".to_string(),
                initiator_name: "Sam Ortiz".to_string(),
                amount: None,
                links: ActionLinks::default(),
            })
            .await;

        assert!(result.is_err());
        assert!(sink.pending().is_empty());
    }
}
