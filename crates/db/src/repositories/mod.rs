use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use flowgate_core::domain::actor::UserId;
use flowgate_core::domain::approver::{ApproverEntry, ApproverEntryId};
use flowgate_core::domain::history::ApprovalHistoryEntry;
use flowgate_core::domain::instance::{FieldValue, InstanceId, WorkflowInstance};
use flowgate_core::domain::token::EmailActionToken;
use flowgate_core::domain::workflow::{WorkflowDefinition, WorkflowId};

pub mod chain;
pub mod instance;
pub mod memory;
pub mod token;
pub mod workflow;

pub use chain::SqlApproverChainStore;
pub use instance::SqlInstanceStore;
pub use memory::{
    InMemoryApproverChainStore, InMemoryInstanceStore, InMemoryTokenStore, InMemoryWorkflowStore,
};
pub use token::SqlTokenStore;
pub use workflow::SqlWorkflowStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// A guarded write matched no row: either a unique constraint fired or
    /// the expected state version was stale.
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Which email action tokens a transition commit revokes, inside the same
/// transaction as the state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenInvalidation {
    None,
    Level(u32),
    All,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn workflow_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError>;

    async fn workflow_by_code(
        &self,
        code: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError>;

    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApproverChainStore: Send + Sync {
    /// Entries configured for one level, in display order.
    async fn entries_for(
        &self,
        workflow_id: &WorkflowId,
        level: u32,
    ) -> Result<Vec<ApproverEntry>, RepositoryError>;

    /// Highest configured level, or None for a workflow with no chain.
    async fn max_level(&self, workflow_id: &WorkflowId) -> Result<Option<u32>, RepositoryError>;

    async fn entry_by_id(
        &self,
        id: &ApproverEntryId,
    ) -> Result<Option<ApproverEntry>, RepositoryError>;

    async fn entry_for_user(
        &self,
        workflow_id: &WorkflowId,
        user_id: &UserId,
    ) -> Result<Option<ApproverEntry>, RepositoryError>;

    async fn save_entry(&self, entry: ApproverEntry) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn find_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError>;

    async fn find_by_reference(
        &self,
        reference_number: &str,
    ) -> Result<Option<WorkflowInstance>, RepositoryError>;

    /// Inserts a new instance row. Fails with `Conflict` when the reference
    /// number is already taken (the caller retries with a fresh one).
    async fn insert(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError>;

    /// The single commit point for state transitions: updates the instance
    /// row guarded by `expected_version`, appends the history entries and
    /// applies the token invalidation, all in one transaction. A stale
    /// version yields `Conflict` and leaves everything untouched. Most
    /// transitions append one entry; an auto-approved submit appends two.
    async fn apply_transition(
        &self,
        instance: &WorkflowInstance,
        expected_version: u32,
        history: &[ApprovalHistoryEntry],
        tokens: TokenInvalidation,
    ) -> Result<(), RepositoryError>;

    /// Version-guarded update of a draft's mutable columns (title, amount)
    /// without a history entry.
    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: u32,
    ) -> Result<(), RepositoryError>;

    async fn upsert_field_values(
        &self,
        instance_id: &InstanceId,
        values: &[FieldValue],
    ) -> Result<(), RepositoryError>;

    async fn field_values_for(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<FieldValue>, RepositoryError>;

    /// History entries for an instance, oldest first.
    async fn history_for(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ApprovalHistoryEntry>, RepositoryError>;

    /// Active instances currently awaiting an approver action, for the
    /// escalation-timeout sweep.
    async fn list_awaiting_action(&self) -> Result<Vec<WorkflowInstance>, RepositoryError>;

    async fn set_active(
        &self,
        id: &InstanceId,
        is_active: bool,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &EmailActionToken) -> Result<(), RepositoryError>;

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<EmailActionToken>, RepositoryError>;

    async fn mark_used(
        &self,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn invalidate_for_level(
        &self,
        instance_id: &InstanceId,
        level: u32,
    ) -> Result<u64, RepositoryError>;

    async fn invalidate_all(&self, instance_id: &InstanceId) -> Result<u64, RepositoryError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
