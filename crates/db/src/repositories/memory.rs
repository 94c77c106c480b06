//! In-memory store implementations backing engine unit tests and small
//! deployments without a database file. The instance store enforces the same
//! version-guarded commit semantics as the SQL store, so concurrency
//! behavior can be exercised without SQLite.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use flowgate_core::domain::actor::UserId;
use flowgate_core::domain::approver::{ApproverEntry, ApproverEntryId};
use flowgate_core::domain::history::ApprovalHistoryEntry;
use flowgate_core::domain::instance::{FieldValue, InstanceId, WorkflowInstance};
use flowgate_core::domain::token::EmailActionToken;
use flowgate_core::domain::workflow::{WorkflowDefinition, WorkflowId};

use super::{
    ApproverChainStore, InstanceStore, RepositoryError, TokenInvalidation, TokenStore,
    WorkflowStore,
};

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
}

#[async_trait::async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn workflow_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn workflow_by_code(
        &self,
        code: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.values().find(|workflow| workflow.code == code).cloned())
    }

    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.0.clone(), workflow);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApproverChainStore {
    entries: RwLock<Vec<ApproverEntry>>,
}

#[async_trait::async_trait]
impl ApproverChainStore for InMemoryApproverChainStore {
    async fn entries_for(
        &self,
        workflow_id: &WorkflowId,
        level: u32,
    ) -> Result<Vec<ApproverEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<ApproverEntry> = entries
            .iter()
            .filter(|entry| &entry.workflow_id == workflow_id && entry.level == level)
            .cloned()
            .collect();
        matching.sort_by_key(|entry| (entry.display_order, entry.id.0.clone()));
        Ok(matching)
    }

    async fn max_level(&self, workflow_id: &WorkflowId) -> Result<Option<u32>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|entry| &entry.workflow_id == workflow_id)
            .map(|entry| entry.level)
            .max())
    }

    async fn entry_by_id(
        &self,
        id: &ApproverEntryId,
    ) -> Result<Option<ApproverEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|entry| &entry.id == id).cloned())
    }

    async fn entry_for_user(
        &self,
        workflow_id: &WorkflowId,
        user_id: &UserId,
    ) -> Result<Option<ApproverEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<&ApproverEntry> = entries
            .iter()
            .filter(|entry| {
                &entry.workflow_id == workflow_id && entry.user_id.as_ref() == Some(user_id)
            })
            .collect();
        matching.sort_by_key(|entry| (entry.level, entry.display_order));
        Ok(matching.first().map(|entry| (*entry).clone()))
    }

    async fn save_entry(&self, entry: ApproverEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter_mut().find(|candidate| candidate.id == entry.id) {
            *existing = entry;
        } else {
            entries.push(entry);
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, EmailActionToken>>>,
}

impl InMemoryTokenStore {
    pub async fn all(&self) -> Vec<EmailActionToken> {
        let tokens = self.tokens.read().await;
        let mut all: Vec<EmailActionToken> = tokens.values().cloned().collect();
        all.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
        all
    }
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, token: &EmailActionToken) -> Result<(), RepositoryError> {
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<EmailActionToken>, RepositoryError> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(token).cloned())
    }

    async fn mark_used(
        &self,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tokens = self.tokens.write().await;
        if let Some(stored) = tokens.get_mut(token) {
            stored.is_used = true;
            stored.used_at = Some(used_at);
        }
        Ok(())
    }

    async fn invalidate_for_level(
        &self,
        instance_id: &InstanceId,
        level: u32,
    ) -> Result<u64, RepositoryError> {
        let mut tokens = self.tokens.write().await;
        Ok(invalidate(&mut tokens, |token| {
            &token.instance_id == instance_id && token.level == level
        }))
    }

    async fn invalidate_all(&self, instance_id: &InstanceId) -> Result<u64, RepositoryError> {
        let mut tokens = self.tokens.write().await;
        Ok(invalidate(&mut tokens, |token| &token.instance_id == instance_id))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired(now));
        Ok((before - tokens.len()) as u64)
    }
}

fn invalidate(
    tokens: &mut HashMap<String, EmailActionToken>,
    matches: impl Fn(&EmailActionToken) -> bool,
) -> u64 {
    let now = Utc::now();
    let mut count = 0;
    for token in tokens.values_mut() {
        if !token.is_used && matches(token) {
            token.is_used = true;
            token.used_at = Some(now);
            count += 1;
        }
    }
    count
}

pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<String, WorkflowInstance>>,
    field_values: RwLock<HashMap<String, Vec<FieldValue>>>,
    history: RwLock<Vec<ApprovalHistoryEntry>>,
    tokens: InMemoryTokenStore,
}

impl InMemoryInstanceStore {
    /// Shares the token map with the given store so transition commits can
    /// invalidate tokens the way the SQL store does in its transaction.
    pub fn new(tokens: InMemoryTokenStore) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            field_values: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            tokens,
        }
    }
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::new(InMemoryTokenStore::default())
    }
}

#[async_trait::async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn find_by_id(
        &self,
        id: &InstanceId,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances.get(&id.0).cloned())
    }

    async fn find_by_reference(
        &self,
        reference_number: &str,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances.values().find(|i| i.reference_number == reference_number).cloned())
    }

    async fn insert(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        if instances.values().any(|i| i.reference_number == instance.reference_number) {
            return Err(RepositoryError::Conflict(format!(
                "reference number `{}` is already taken",
                instance.reference_number
            )));
        }
        instances.insert(instance.id.0.clone(), instance.clone());
        Ok(())
    }

    async fn apply_transition(
        &self,
        instance: &WorkflowInstance,
        expected_version: u32,
        history: &[ApprovalHistoryEntry],
        tokens: TokenInvalidation,
    ) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        let stored = instances.get_mut(&instance.id.0).ok_or_else(|| {
            RepositoryError::Conflict(format!("instance `{}` does not exist", instance.id.0))
        })?;

        if stored.state_version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "instance `{}` was modified concurrently (expected version {expected_version})",
                instance.id.0
            )));
        }

        *stored = instance.clone();
        self.history.write().await.extend(history.iter().cloned());

        match tokens {
            TokenInvalidation::None => {}
            TokenInvalidation::Level(level) => {
                self.tokens.invalidate_for_level(&instance.id, level).await?;
            }
            TokenInvalidation::All => {
                self.tokens.invalidate_all(&instance.id).await?;
            }
        }

        Ok(())
    }

    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        let stored = instances.get_mut(&instance.id.0).ok_or_else(|| {
            RepositoryError::Conflict(format!("instance `{}` does not exist", instance.id.0))
        })?;

        if stored.state_version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "instance `{}` was modified concurrently (expected version {expected_version})",
                instance.id.0
            )));
        }

        *stored = instance.clone();
        Ok(())
    }

    async fn upsert_field_values(
        &self,
        instance_id: &InstanceId,
        values: &[FieldValue],
    ) -> Result<(), RepositoryError> {
        let mut stored = self.field_values.write().await;
        let existing = stored.entry(instance_id.0.clone()).or_default();
        for value in values {
            if let Some(slot) =
                existing.iter_mut().find(|candidate| candidate.field_name == value.field_name)
            {
                *slot = value.clone();
            } else {
                existing.push(value.clone());
            }
        }
        Ok(())
    }

    async fn field_values_for(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<FieldValue>, RepositoryError> {
        let stored = self.field_values.read().await;
        Ok(stored.get(&instance_id.0).cloned().unwrap_or_default())
    }

    async fn history_for(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ApprovalHistoryEntry>, RepositoryError> {
        let history = self.history.read().await;
        Ok(history.iter().filter(|entry| &entry.instance_id == instance_id).cloned().collect())
    }

    async fn list_awaiting_action(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        let mut awaiting: Vec<WorkflowInstance> = instances
            .values()
            .filter(|instance| instance.is_active && instance.status.is_awaiting_action())
            .cloned()
            .collect();
        awaiting.sort_by_key(|instance| instance.submitted_at);
        Ok(awaiting)
    }

    async fn set_active(
        &self,
        id: &InstanceId,
        is_active: bool,
    ) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        if let Some(instance) = instances.get_mut(&id.0) {
            instance.is_active = is_active;
            instance.updated_at = Utc::now();
        }
        Ok(())
    }
}
