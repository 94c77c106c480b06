//! The approval routing state machine. Every operation loads the instance,
//! validates authorization and business rules against the workflow
//! definition and approver chain, then commits the new state through the
//! instance store's version-guarded transaction. Two racing transitions
//! serialize there: the loser observes the post-transition state and fails
//! with an invalid-state error instead of double-advancing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use flowgate_core::audit::{AuditAction, AuditEvent, AuditSink};
use flowgate_core::config::AppConfig;
use flowgate_core::domain::actor::{Actor, UserId};
use flowgate_core::domain::approver::ApproverEntry;
use flowgate_core::domain::history::{ActionSource, ApprovalHistoryEntry, HistoryAction};
use flowgate_core::domain::instance::{FieldValue, InstanceId, InstanceStatus, WorkflowInstance};
use flowgate_core::domain::token::{EmailActionToken, TokenAction};
use flowgate_core::domain::workflow::WorkflowDefinition;
use flowgate_core::errors::EngineError;
use flowgate_core::notify::{
    ActionLinks, NotificationSink, OutcomeNotification, PendingNotification,
};
use flowgate_core::routing;
use flowgate_db::repositories::{
    ApproverChainStore, InstanceStore, RepositoryError, TokenInvalidation, TokenStore,
    WorkflowStore,
};

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub email_approvals_enabled: bool,
    pub base_url: String,
    pub token_expiry_hours: u32,
    pub reference_retry_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            email_approvals_enabled: true,
            base_url: "http://localhost:9500".to_string(),
            token_expiry_hours: 48,
            reference_retry_attempts: 5,
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            email_approvals_enabled: config.email.approvals_enabled,
            base_url: config.email.base_url.clone(),
            token_expiry_hours: config.email.token_expiry_hours,
            reference_retry_attempts: config.workflow.reference_retry_attempts,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionAction {
    Approve,
    Reject,
    Escalate { escalate_to: Option<UserId> },
}

impl DecisionAction {
    fn history_action(&self) -> HistoryAction {
        match self {
            Self::Approve => HistoryAction::Approved,
            Self::Reject => HistoryAction::Rejected,
            Self::Escalate { .. } => HistoryAction::Escalated,
        }
    }
}

/// One approver decision on a pending instance, as received from an
/// interactive session, an email-token redemption, or the timeout sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub action: DecisionAction,
    pub comments: Option<String>,
    pub source: ActionSource,
}

pub struct ApprovalEngine {
    workflows: Arc<dyn WorkflowStore>,
    chain: Arc<dyn ApproverChainStore>,
    instances: Arc<dyn InstanceStore>,
    tokens: Arc<dyn TokenStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
    settings: EngineSettings,
}

impl ApprovalEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        chain: Arc<dyn ApproverChainStore>,
        instances: Arc<dyn InstanceStore>,
        tokens: Arc<dyn TokenStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        settings: EngineSettings,
    ) -> Self {
        Self { workflows, chain, instances, tokens, audit, notifier, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn instances(&self) -> &Arc<dyn InstanceStore> {
        &self.instances
    }

    pub(crate) fn chain(&self) -> &Arc<dyn ApproverChainStore> {
        &self.chain
    }

    pub(crate) fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Creates a new draft owned by `actor` with the given field values.
    pub async fn create_draft(
        &self,
        workflow_code: &str,
        actor: &Actor,
        field_values: &HashMap<String, String>,
    ) -> Result<WorkflowInstance, EngineError> {
        let workflow = self
            .workflows
            .workflow_by_code(workflow_code)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_code))?;

        if !workflow.is_available() {
            return Err(EngineError::validation("workflow is not available"));
        }

        let initiator =
            actor.id.clone().ok_or_else(|| EngineError::Authorization("unknown user".into()))?;

        let values = collect_field_values(&workflow, field_values, &InstanceId(String::new()));
        let now = Utc::now();
        let mut instance = WorkflowInstance {
            id: InstanceId(Uuid::new_v4().to_string()),
            workflow_id: workflow.id.clone(),
            reference_number: String::new(),
            title: routing::derive_title(workflow.fields(), &values),
            status: InstanceStatus::Draft,
            initiator,
            initiator_name: actor.name.clone(),
            initiator_email: actor.email.clone(),
            current_level: 0,
            current_approver: None,
            amount: amount_from_values(&workflow, &values),
            submitted_at: None,
            completed_at: None,
            is_active: true,
            state_version: 1,
            created_at: now,
            updated_at: now,
        };

        self.insert_with_unique_reference(&mut instance, &workflow.code).await?;

        let values = rekey_values(values, &instance.id);
        self.instances
            .upsert_field_values(&instance.id, &values)
            .await
            .map_err(EngineError::persistence)?;

        self.audit.record(AuditEvent::new(
            AuditAction::Create,
            "workflow_instance",
            instance.id.0.clone(),
            instance.reference_number.clone(),
            actor.name.clone(),
            format!("Workflow instance created: {}", instance.reference_number),
        ));

        Ok(instance)
    }

    /// Updates the field values of a draft. Submitted instances are
    /// immutable until recalled.
    pub async fn update_draft(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
        field_values: &HashMap<String, String>,
    ) -> Result<WorkflowInstance, EngineError> {
        let mut instance = self.load_instance(instance_id).await?;
        if instance.status != InstanceStatus::Draft {
            return Err(EngineError::invalid_state(
                instance.status,
                "cannot update a submitted workflow instance",
            ));
        }
        self.require_initiator(&instance, actor, "only the initiator can edit this draft")?;

        let workflow = self.load_workflow(&instance).await?;
        let values = collect_field_values(&workflow, field_values, &instance.id);
        self.instances
            .upsert_field_values(&instance.id, &values)
            .await
            .map_err(EngineError::persistence)?;

        let stored = self
            .instances
            .field_values_for(&instance.id)
            .await
            .map_err(EngineError::persistence)?;
        let expected_version = instance.state_version;
        instance.amount = amount_from_values(&workflow, &stored);
        instance.title = routing::derive_title(workflow.fields(), &stored);
        instance.state_version += 1;
        instance.updated_at = Utc::now();

        match self.instances.update_instance(&instance, expected_version).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return self.conflict(&instance.id).await;
            }
            Err(error) => return Err(EngineError::persistence(error)),
        }

        self.audit.record(AuditEvent::new(
            AuditAction::Update,
            "workflow_instance",
            instance.id.0.clone(),
            instance.reference_number.clone(),
            actor.name.clone(),
            format!("Workflow instance updated: {}", instance.reference_number),
        ));

        Ok(instance)
    }

    /// Submits a draft into the approval chain. Fails without any write when
    /// a mandatory field is blank.
    pub async fn submit(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
    ) -> Result<WorkflowInstance, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        if instance.status != InstanceStatus::Draft {
            return Err(EngineError::invalid_state(
                instance.status,
                "workflow instance already submitted",
            ));
        }
        self.do_submit(instance, actor).await
    }

    /// Re-enters the submit path for a draft or a rejected instance.
    pub async fn resubmit(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
    ) -> Result<WorkflowInstance, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        if !matches!(instance.status, InstanceStatus::Draft | InstanceStatus::Rejected) {
            return Err(EngineError::invalid_state(
                instance.status,
                "can only resubmit rejected or draft submissions",
            ));
        }
        self.do_submit(instance, actor).await
    }

    async fn do_submit(
        &self,
        mut instance: WorkflowInstance,
        actor: &Actor,
    ) -> Result<WorkflowInstance, EngineError> {
        let workflow = self.load_workflow(&instance).await?;
        let values = self
            .instances
            .field_values_for(&instance.id)
            .await
            .map_err(EngineError::persistence)?;

        let missing = routing::missing_mandatory_fields(workflow.fields(), &values);
        if !missing.is_empty() {
            return Err(EngineError::missing_fields(missing));
        }

        let expected_version = instance.state_version;
        let now = Utc::now();
        instance.amount = amount_from_values(&workflow, &values);
        instance.submitted_at = Some(now);
        instance.completed_at = None;
        instance.state_version += 1;
        instance.updated_at = now;

        let submitted = ApprovalHistoryEntry::record(
            instance.id.clone(),
            actor,
            0,
            HistoryAction::Submitted,
            None,
            ActionSource::Interactive,
        );

        let level_one = if workflow.requires_approval {
            self.resolve_level_at_or_above(&instance, 1).await?
        } else {
            None
        };

        let history;
        match level_one {
            Some((level, entry)) => {
                instance.status = InstanceStatus::Pending;
                instance.current_level = level;
                instance.current_approver = Some(entry.id.clone());
                history = vec![submitted];

                self.commit(&instance, expected_version, &history, TokenInvalidation::All)
                    .await?;

                self.audit_transition(&instance, actor, AuditAction::Submit, None);
                self.dispatch_pending(&workflow, &instance, &entry).await;
            }
            None => {
                // No approver chain to route through: the submission
                // completes immediately rather than pending on nobody.
                instance.status = InstanceStatus::Approved;
                instance.current_level = 0;
                instance.current_approver = None;
                instance.completed_at = Some(now);
                let approved = ApprovalHistoryEntry::record(
                    instance.id.clone(),
                    &Actor::system(),
                    0,
                    HistoryAction::Approved,
                    Some("Auto-approved: workflow requires no approval chain".to_string()),
                    ActionSource::System,
                );
                history = vec![submitted, approved];

                self.commit(&instance, expected_version, &history, TokenInvalidation::All)
                    .await?;

                self.audit_transition(&instance, actor, AuditAction::Submit, None);
                self.dispatch_outcome(&workflow, &instance, HistoryAction::Approved, actor, None)
                    .await;
            }
        }

        info!(
            event_name = "engine.instance_submitted",
            reference = %instance.reference_number,
            status = instance.status.as_str(),
            level = instance.current_level,
            "workflow instance submitted"
        );

        Ok(instance)
    }

    pub async fn approve(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
        comments: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        self.process_decision(
            instance_id,
            actor,
            ApprovalDecision {
                action: DecisionAction::Approve,
                comments,
                source: ActionSource::Interactive,
            },
        )
        .await
    }

    pub async fn reject(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
        comments: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        self.process_decision(
            instance_id,
            actor,
            ApprovalDecision {
                action: DecisionAction::Reject,
                comments,
                source: ActionSource::Interactive,
            },
        )
        .await
    }

    pub async fn escalate(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
        comments: Option<String>,
        escalate_to: Option<UserId>,
    ) -> Result<WorkflowInstance, EngineError> {
        self.process_decision(
            instance_id,
            actor,
            ApprovalDecision {
                action: DecisionAction::Escalate { escalate_to },
                comments,
                source: ActionSource::Interactive,
            },
        )
        .await
    }

    /// The single entry point for approver decisions. Email-token
    /// redemptions and the timeout sweep funnel through here as well, so
    /// every path competes for the same optimistic lock.
    pub async fn process_decision(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
        decision: ApprovalDecision,
    ) -> Result<WorkflowInstance, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        if !instance.status.is_awaiting_action() {
            return Err(EngineError::invalid_state(instance.status, "instance is not pending"));
        }

        let workflow = self.load_workflow(&instance).await?;
        let current_entry = match &instance.current_approver {
            Some(id) => self.chain.entry_by_id(id).await.map_err(EngineError::persistence)?,
            None => None,
        };

        self.authorize_decision(current_entry.as_ref(), actor, decision.source)?;
        routing::check_comments(
            &workflow.comment_policy,
            decision.action.history_action(),
            decision.comments.as_deref(),
        )?;

        let ApprovalDecision { action, comments, source } = decision;
        match action {
            DecisionAction::Approve => {
                self.handle_approval(workflow, instance, actor, comments, source).await
            }
            DecisionAction::Reject => {
                self.handle_rejection(workflow, instance, actor, comments, source).await
            }
            DecisionAction::Escalate { escalate_to } => {
                self.handle_escalation(
                    workflow,
                    instance,
                    current_entry,
                    actor,
                    comments,
                    source,
                    escalate_to,
                )
                .await
            }
        }
    }

    async fn handle_approval(
        &self,
        workflow: WorkflowDefinition,
        mut instance: WorkflowInstance,
        actor: &Actor,
        comments: Option<String>,
        source: ActionSource,
    ) -> Result<WorkflowInstance, EngineError> {
        let expected_version = instance.state_version;
        let pre_level = instance.current_level;
        let now = Utc::now();

        let max_level =
            self.chain.max_level(&instance.workflow_id).await.map_err(EngineError::persistence)?;
        let next = if pre_level >= max_level.unwrap_or(pre_level) {
            None
        } else {
            self.resolve_level_at_or_above(&instance, pre_level + 1).await?
        };

        let history = ApprovalHistoryEntry::record(
            instance.id.clone(),
            actor,
            pre_level,
            HistoryAction::Approved,
            comments.clone(),
            source,
        );

        instance.state_version += 1;
        instance.updated_at = now;

        match next {
            Some((level, entry)) => {
                instance.status = InstanceStatus::Pending;
                instance.current_level = level;
                instance.current_approver = Some(entry.id.clone());

                self.commit(
                    &instance,
                    expected_version,
                    std::slice::from_ref(&history),
                    TokenInvalidation::Level(pre_level),
                )
                .await?;

                self.audit_transition(&instance, actor, AuditAction::Approve, comments.as_deref());
                self.dispatch_pending(&workflow, &instance, &entry).await;
            }
            None => {
                instance.status = InstanceStatus::Approved;
                instance.current_approver = None;
                instance.completed_at = Some(now);

                self.commit(
                    &instance,
                    expected_version,
                    std::slice::from_ref(&history),
                    TokenInvalidation::All,
                )
                .await?;

                self.audit_transition(&instance, actor, AuditAction::Approve, comments.as_deref());
                self.dispatch_outcome(
                    &workflow,
                    &instance,
                    HistoryAction::Approved,
                    actor,
                    comments.clone(),
                )
                .await;
            }
        }

        Ok(instance)
    }

    async fn handle_rejection(
        &self,
        workflow: WorkflowDefinition,
        mut instance: WorkflowInstance,
        actor: &Actor,
        comments: Option<String>,
        source: ActionSource,
    ) -> Result<WorkflowInstance, EngineError> {
        let expected_version = instance.state_version;
        let now = Utc::now();

        let history = ApprovalHistoryEntry::record(
            instance.id.clone(),
            actor,
            instance.current_level,
            HistoryAction::Rejected,
            comments.clone(),
            source,
        );

        instance.status = InstanceStatus::Rejected;
        instance.current_approver = None;
        instance.completed_at = Some(now);
        instance.state_version += 1;
        instance.updated_at = now;

        self.commit(
            &instance,
            expected_version,
            std::slice::from_ref(&history),
            TokenInvalidation::All,
        )
        .await?;

        self.audit_transition(&instance, actor, AuditAction::Reject, comments.as_deref());
        self.dispatch_outcome(
            &workflow,
            &instance,
            HistoryAction::Rejected,
            actor,
            comments.clone(),
        )
        .await;

        Ok(instance)
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_escalation(
        &self,
        workflow: WorkflowDefinition,
        mut instance: WorkflowInstance,
        current_entry: Option<ApproverEntry>,
        actor: &Actor,
        comments: Option<String>,
        source: ActionSource,
        escalate_to: Option<UserId>,
    ) -> Result<WorkflowInstance, EngineError> {
        if let Some(entry) = &current_entry {
            if !entry.can_escalate {
                return Err(EngineError::Authorization(
                    "the assigned approver may not escalate this workflow".into(),
                ));
            }
        }

        let expected_version = instance.state_version;
        let pre_level = instance.current_level;
        let now = Utc::now();

        let target = match escalate_to {
            Some(user_id) => {
                let entry = self
                    .chain
                    .entry_for_user(&instance.workflow_id, &user_id)
                    .await
                    .map_err(EngineError::persistence)?
                    .ok_or_else(|| EngineError::not_found("approver", user_id.0.clone()))?;
                // Explicit targets take over at the current level.
                (pre_level, entry)
            }
            None => self
                .resolve_level_at_or_above(&instance, pre_level + 1)
                .await?
                .ok_or_else(|| {
                    EngineError::invalid_state(
                        instance.status,
                        "no higher approval level to escalate to",
                    )
                })?,
        };

        let history = ApprovalHistoryEntry::record(
            instance.id.clone(),
            actor,
            pre_level,
            HistoryAction::Escalated,
            comments.clone(),
            source,
        );

        let (level, entry) = target;
        instance.status = InstanceStatus::Escalated;
        instance.current_level = level;
        instance.current_approver = Some(entry.id.clone());
        instance.state_version += 1;
        instance.updated_at = now;

        self.commit(
            &instance,
            expected_version,
            std::slice::from_ref(&history),
            TokenInvalidation::Level(pre_level),
        )
        .await?;

        self.audit_transition(&instance, actor, AuditAction::Escalate, comments.as_deref());
        self.dispatch_pending(&workflow, &instance, &entry).await;

        Ok(instance)
    }

    /// Cancels a non-terminal instance. Unlike recall this is not
    /// initiator-restricted.
    pub async fn cancel(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        let mut instance = self.load_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Err(EngineError::invalid_state(
                instance.status,
                "cannot cancel a completed workflow instance",
            ));
        }

        let expected_version = instance.state_version;
        let now = Utc::now();
        let history = ApprovalHistoryEntry::record(
            instance.id.clone(),
            actor,
            instance.current_level,
            HistoryAction::Cancelled,
            reason.clone(),
            ActionSource::Interactive,
        );

        instance.status = InstanceStatus::Cancelled;
        instance.current_approver = None;
        instance.completed_at = Some(now);
        instance.state_version += 1;
        instance.updated_at = now;

        self.commit(
            &instance,
            expected_version,
            std::slice::from_ref(&history),
            TokenInvalidation::All,
        )
        .await?;

        self.audit_transition(&instance, actor, AuditAction::Cancel, reason.as_deref());
        Ok(instance)
    }

    /// Pulls a pending submission back to an editable draft.
    pub async fn recall(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        let mut instance = self.load_instance(instance_id).await?;
        self.require_initiator(&instance, actor, "only the initiator can recall this submission")?;
        if instance.status != InstanceStatus::Pending {
            return Err(EngineError::invalid_state(
                instance.status,
                "can only recall pending submissions",
            ));
        }

        let expected_version = instance.state_version;
        let now = Utc::now();
        let history = ApprovalHistoryEntry::record(
            instance.id.clone(),
            actor,
            instance.current_level,
            HistoryAction::Recalled,
            reason.clone(),
            ActionSource::Interactive,
        );

        instance.status = InstanceStatus::Draft;
        instance.current_level = 0;
        instance.current_approver = None;
        instance.submitted_at = None;
        instance.state_version += 1;
        instance.updated_at = now;

        self.commit(
            &instance,
            expected_version,
            std::slice::from_ref(&history),
            TokenInvalidation::All,
        )
        .await?;

        self.audit_transition(&instance, actor, AuditAction::Recall, reason.as_deref());
        Ok(instance)
    }

    /// Copies an instance's field values into a fresh draft owned by
    /// `actor`. Approval history does not carry over.
    pub async fn clone_instance(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
    ) -> Result<WorkflowInstance, EngineError> {
        let original = self.load_instance(instance_id).await?;
        let workflow = self.load_workflow(&original).await?;
        let initiator =
            actor.id.clone().ok_or_else(|| EngineError::Authorization("unknown user".into()))?;

        let now = Utc::now();
        let mut clone = WorkflowInstance {
            id: InstanceId(Uuid::new_v4().to_string()),
            workflow_id: original.workflow_id.clone(),
            reference_number: String::new(),
            title: original.title.as_ref().map(|title| format!("{title} (Copy)")),
            status: InstanceStatus::Draft,
            initiator,
            initiator_name: actor.name.clone(),
            initiator_email: actor.email.clone(),
            current_level: 0,
            current_approver: None,
            amount: original.amount,
            submitted_at: None,
            completed_at: None,
            is_active: true,
            state_version: 1,
            created_at: now,
            updated_at: now,
        };

        self.insert_with_unique_reference(&mut clone, &workflow.code).await?;

        let values = self
            .instances
            .field_values_for(&original.id)
            .await
            .map_err(EngineError::persistence)?;
        let values = rekey_values(values, &clone.id);
        self.instances
            .upsert_field_values(&clone.id, &values)
            .await
            .map_err(EngineError::persistence)?;

        self.audit.record(AuditEvent::new(
            AuditAction::Create,
            "workflow_instance",
            clone.id.0.clone(),
            clone.reference_number.clone(),
            actor.name.clone(),
            format!(
                "Workflow instance cloned from {}: {}",
                original.reference_number, clone.reference_number
            ),
        ));

        Ok(clone)
    }

    /// Soft delete. Only drafts and cancelled instances may go, and only by
    /// the initiator or a super-user.
    pub async fn delete(
        &self,
        instance_id: &InstanceId,
        actor: &Actor,
    ) -> Result<WorkflowInstance, EngineError> {
        let mut instance = self.load_instance(instance_id).await?;
        if !matches!(instance.status, InstanceStatus::Draft | InstanceStatus::Cancelled) {
            return Err(EngineError::invalid_state(
                instance.status,
                "only draft or cancelled instances can be deleted",
            ));
        }
        self.require_initiator(&instance, actor, "you can only delete your own submissions")?;

        self.instances
            .set_active(&instance.id, false)
            .await
            .map_err(EngineError::persistence)?;
        instance.is_active = false;

        self.audit.record(AuditEvent::new(
            AuditAction::Delete,
            "workflow_instance",
            instance.id.0.clone(),
            instance.reference_number.clone(),
            actor.name.clone(),
            format!("Workflow instance deleted: {}", instance.reference_number),
        ));

        Ok(instance)
    }

    pub async fn instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<WorkflowInstance, EngineError> {
        self.load_instance(instance_id).await
    }

    pub async fn instance_by_reference(
        &self,
        reference_number: &str,
    ) -> Result<WorkflowInstance, EngineError> {
        self.instances
            .find_by_reference(reference_number)
            .await
            .map_err(EngineError::persistence)?
            .filter(|instance| instance.is_active)
            .ok_or_else(|| EngineError::not_found("workflow instance", reference_number))
    }

    pub async fn history(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ApprovalHistoryEntry>, EngineError> {
        self.load_instance(instance_id).await?;
        self.instances.history_for(instance_id).await.map_err(EngineError::persistence)
    }

    async fn load_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<WorkflowInstance, EngineError> {
        self.instances
            .find_by_id(instance_id)
            .await
            .map_err(EngineError::persistence)?
            .filter(|instance| instance.is_active)
            .ok_or_else(|| EngineError::not_found("workflow instance", instance_id.0.clone()))
    }

    async fn load_workflow(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowDefinition, EngineError> {
        self.workflows
            .workflow_by_id(&instance.workflow_id)
            .await
            .map_err(EngineError::persistence)?
            .ok_or_else(|| EngineError::not_found("workflow", instance.workflow_id.0.clone()))
    }

    /// Walks levels upward from `from_level` to the first one with a
    /// configured entry, resolving monetary eligibility within it. Gaps in
    /// the chain are skipped so a pending instance always has an approver.
    async fn resolve_level_at_or_above(
        &self,
        instance: &WorkflowInstance,
        from_level: u32,
    ) -> Result<Option<(u32, ApproverEntry)>, EngineError> {
        let Some(max_level) =
            self.chain.max_level(&instance.workflow_id).await.map_err(EngineError::persistence)?
        else {
            return Ok(None);
        };

        for level in from_level..=max_level {
            let entries = self
                .chain
                .entries_for(&instance.workflow_id, level)
                .await
                .map_err(EngineError::persistence)?;
            if let Some(entry) = routing::resolve_eligible(&entries, instance.amount) {
                return Ok(Some((level, entry.clone())));
            }
        }

        Ok(None)
    }

    fn authorize_decision(
        &self,
        current_entry: Option<&ApproverEntry>,
        actor: &Actor,
        source: ActionSource,
    ) -> Result<(), EngineError> {
        if actor.is_super_user {
            return Ok(());
        }

        let Some(entry) = current_entry else {
            return Err(EngineError::Authorization(
                "no approver is assigned to this workflow".into(),
            ));
        };

        let authorized = match source {
            // Possession of a valid token was established by the gateway;
            // the token's email must still match the assigned approver.
            ActionSource::Email => entry.approver_email.eq_ignore_ascii_case(&actor.email),
            _ => match &entry.user_id {
                Some(user_id) => actor.is_user(user_id),
                None => entry.approver_email.eq_ignore_ascii_case(&actor.email),
            },
        };

        if authorized {
            Ok(())
        } else {
            Err(EngineError::Authorization(
                "you are not authorized to act on this workflow".into(),
            ))
        }
    }

    fn require_initiator(
        &self,
        instance: &WorkflowInstance,
        actor: &Actor,
        message: &str,
    ) -> Result<(), EngineError> {
        if actor.is_super_user || actor.is_user(&instance.initiator) {
            Ok(())
        } else {
            Err(EngineError::Authorization(message.to_string()))
        }
    }

    async fn commit(
        &self,
        instance: &WorkflowInstance,
        expected_version: u32,
        history: &[ApprovalHistoryEntry],
        tokens: TokenInvalidation,
    ) -> Result<(), EngineError> {
        match self.instances.apply_transition(instance, expected_version, history, tokens).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::Conflict(_)) => self.conflict(&instance.id).await.map(|_| ()),
            Err(error) => Err(EngineError::persistence(error)),
        }
    }

    /// A lost race: surface the post-transition state to the caller.
    async fn conflict(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, EngineError> {
        let current = self.load_instance(instance_id).await?;
        Err(EngineError::invalid_state(current.status, "instance is not pending"))
    }

    async fn insert_with_unique_reference(
        &self,
        instance: &mut WorkflowInstance,
        workflow_code: &str,
    ) -> Result<(), EngineError> {
        for _attempt in 0..self.settings.reference_retry_attempts {
            instance.reference_number = make_reference(workflow_code);
            match self.instances.insert(instance).await {
                Ok(()) => return Ok(()),
                Err(RepositoryError::Conflict(_)) => {
                    warn!(
                        reference = %instance.reference_number,
                        "reference number collision, retrying"
                    );
                }
                Err(error) => return Err(EngineError::persistence(error)),
            }
        }

        Err(EngineError::persistence("could not allocate a unique reference number"))
    }

    fn audit_transition(
        &self,
        instance: &WorkflowInstance,
        actor: &Actor,
        action: AuditAction,
        comments: Option<&str>,
    ) {
        let mut summary = format!(
            "Workflow instance {}: {}",
            instance.status.as_str(),
            instance.reference_number
        );
        if let Some(comments) = comments {
            summary.push_str(". Comments: ");
            summary.push_str(comments);
        }

        self.audit.record(
            AuditEvent::new(
                action,
                "workflow_instance",
                instance.id.0.clone(),
                instance.reference_number.clone(),
                actor.name.clone(),
                summary,
            )
            .with_change(
                None,
                Some(serde_json::json!({
                    "status": instance.status.as_str(),
                    "level": instance.current_level,
                })),
            ),
        );
    }

    /// Pending notification to a newly assigned approver, with single-use
    /// action links when email approvals are on. Best-effort: failures are
    /// logged and the committed transition stands.
    async fn dispatch_pending(
        &self,
        workflow: &WorkflowDefinition,
        instance: &WorkflowInstance,
        entry: &ApproverEntry,
    ) {
        if !entry.notify_on_pending {
            return;
        }

        let links = self.issue_action_links(instance, entry).await;
        let notification = PendingNotification {
            approver_email: entry.approver_email.clone(),
            approver_name: entry.approver_name.clone(),
            workflow_name: workflow.name.clone(),
            reference_number: instance.reference_number.clone(),
            initiator_name: instance.initiator_name.clone(),
            amount: instance.amount.map(|amount| format!("${amount}")),
            links,
        };

        if let Err(error) = self.notifier.notify_approval_pending(notification).await {
            warn!(
                reference = %instance.reference_number,
                approver = %entry.approver_email,
                %error,
                "pending notification failed"
            );
        }
    }

    async fn dispatch_outcome(
        &self,
        workflow: &WorkflowDefinition,
        instance: &WorkflowInstance,
        action: HistoryAction,
        actor: &Actor,
        comments: Option<String>,
    ) {
        let notification = OutcomeNotification {
            initiator_email: instance.initiator_email.clone(),
            initiator_name: instance.initiator_name.clone(),
            workflow_name: workflow.name.clone(),
            reference_number: instance.reference_number.clone(),
            action,
            actor_name: actor.name.clone(),
            comments,
        };

        if let Err(error) = self.notifier.notify_outcome(notification).await {
            warn!(
                reference = %instance.reference_number,
                %error,
                "outcome notification failed"
            );
        }
    }

    async fn issue_action_links(
        &self,
        instance: &WorkflowInstance,
        entry: &ApproverEntry,
    ) -> ActionLinks {
        let mut links = ActionLinks {
            review_url: format!("{}/approvals/{}", self.settings.base_url, instance.id.0),
            approve_url: None,
            reject_url: None,
        };

        if !self.settings.email_approvals_enabled {
            return links;
        }

        let now = Utc::now();
        let expires_at = now + Duration::hours(i64::from(self.settings.token_expiry_hours));

        for action in [TokenAction::Approve, TokenAction::Reject] {
            let token = EmailActionToken::issue(
                instance.id.clone(),
                entry.approver_email.clone(),
                entry.approver_name.clone(),
                instance.current_level,
                action,
                now,
                expires_at,
            );

            match self.tokens.insert(&token).await {
                Ok(()) => {
                    let url = crate::gateway::action_url(
                        &self.settings.base_url,
                        &token.token,
                        action,
                    );
                    match action {
                        TokenAction::Approve => links.approve_url = Some(url),
                        TokenAction::Reject => links.reject_url = Some(url),
                    }
                }
                Err(error) => {
                    warn!(
                        reference = %instance.reference_number,
                        action = action.as_str(),
                        %error,
                        "could not issue email action token"
                    );
                }
            }
        }

        links
    }
}

fn make_reference(workflow_code: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let random: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{workflow_code}-{timestamp}-{random:04}")
}

/// Keeps only values for fields the workflow defines, labelled from the
/// definition. Unknown field names are dropped.
fn collect_field_values(
    workflow: &WorkflowDefinition,
    input: &HashMap<String, String>,
    instance_id: &InstanceId,
) -> Vec<FieldValue> {
    workflow
        .fields()
        .filter_map(|field| {
            input.get(&field.name).map(|raw| FieldValue {
                instance_id: instance_id.clone(),
                field_name: field.name.clone(),
                field_label: field.label.clone(),
                value: Some(raw.clone()),
                display_value: Some(raw.clone()),
            })
        })
        .collect()
}

fn rekey_values(values: Vec<FieldValue>, instance_id: &InstanceId) -> Vec<FieldValue> {
    values
        .into_iter()
        .map(|mut value| {
            value.instance_id = instance_id.clone();
            value
        })
        .collect()
}

fn amount_from_values(
    workflow: &WorkflowDefinition,
    values: &[FieldValue],
) -> Option<rust_decimal::Decimal> {
    let amount_field = workflow.fields().find(|field| field.is_amount_field())?;
    let stored = values.iter().find(|value| value.field_name == amount_field.name)?;
    routing::parse_amount(stored.value.as_deref()?)
}

#[cfg(test)]
mod tests {
    use super::make_reference;

    #[test]
    fn reference_numbers_carry_code_timestamp_and_random_suffix() {
        let reference = make_reference("EXP");
        let parts: Vec<&str> = reference.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "EXP");
        assert_eq!(parts[1].len(), 14);
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }
}
