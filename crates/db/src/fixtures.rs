//! Seed data for tests and local smoke runs: a two-level financial
//! expense-approval workflow with a limited level-1 approver and an
//! unlimited level-2 approver.

use rust_decimal::Decimal;

use flowgate_core::domain::actor::UserId;
use flowgate_core::domain::approver::{ApproverEntry, ApproverEntryId};
use flowgate_core::domain::workflow::{
    CommentPolicy, FieldSpec, FieldType, WorkflowCategory, WorkflowDefinition, WorkflowForm,
    WorkflowId,
};

use crate::repositories::{
    ApproverChainStore, RepositoryError, SqlApproverChainStore, SqlWorkflowStore, WorkflowStore,
};
use crate::DbPool;

pub struct SeededWorkflow {
    pub workflow: WorkflowDefinition,
    pub level_one: ApproverEntry,
    pub level_two: ApproverEntry,
}

pub fn expense_workflow_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        id: WorkflowId("WF-EXP".to_string()),
        name: "Expense Approval".to_string(),
        code: "EXP".to_string(),
        description: Some("Employee reimbursement requests".to_string()),
        category: WorkflowCategory::Financial,
        requires_approval: true,
        is_published: true,
        is_active: true,
        version_number: 1,
        comment_policy: CommentPolicy { always: false, on_reject: true, on_escalate: true },
        forms: vec![WorkflowForm {
            name: "Expense Details".to_string(),
            display_order: 0,
            fields: vec![
                FieldSpec {
                    name: "amount".to_string(),
                    label: "Amount".to_string(),
                    field_type: FieldType::Number,
                    is_mandatory: true,
                    is_amount: true,
                    is_title: false,
                    min_length: None,
                    max_length: None,
                    display_order: 0,
                    group: None,
                },
                FieldSpec {
                    name: "purpose".to_string(),
                    label: "Purpose".to_string(),
                    field_type: FieldType::Text,
                    is_mandatory: true,
                    is_amount: false,
                    is_title: true,
                    min_length: Some(3),
                    max_length: Some(120),
                    display_order: 1,
                    group: None,
                },
                FieldSpec {
                    name: "notes".to_string(),
                    label: "Notes".to_string(),
                    field_type: FieldType::TextArea,
                    is_mandatory: false,
                    is_amount: false,
                    is_title: false,
                    min_length: None,
                    max_length: Some(2000),
                    display_order: 2,
                    group: None,
                },
            ],
        }],
    }
}

pub fn expense_approver_entries() -> (ApproverEntry, ApproverEntry) {
    let level_one = ApproverEntry {
        id: ApproverEntryId("AP-MANAGER".to_string()),
        workflow_id: WorkflowId("WF-EXP".to_string()),
        user_id: Some(UserId("U-MANAGER".to_string())),
        approver_name: "Dana Lee".to_string(),
        approver_email: "dana@example.com".to_string(),
        level: 1,
        approval_limit: Some(Decimal::new(1_000_00, 2)),
        is_unlimited: false,
        can_escalate: true,
        escalation_timeout_hours: Some(24),
        notify_on_pending: true,
        notify_on_approval: false,
        notify_on_rejection: true,
        display_order: 0,
    };

    let level_two = ApproverEntry {
        id: ApproverEntryId("AP-DIRECTOR".to_string()),
        workflow_id: WorkflowId("WF-EXP".to_string()),
        user_id: Some(UserId("U-DIRECTOR".to_string())),
        approver_name: "Ravi Kumar".to_string(),
        approver_email: "ravi@example.com".to_string(),
        level: 2,
        approval_limit: None,
        is_unlimited: true,
        can_escalate: false,
        escalation_timeout_hours: None,
        notify_on_pending: true,
        notify_on_approval: true,
        notify_on_rejection: true,
        display_order: 0,
    };

    (level_one, level_two)
}

/// Seeds the demo workflow and its approver chain through the SQL stores.
pub async fn seed_expense_workflow(pool: &DbPool) -> Result<SeededWorkflow, RepositoryError> {
    let workflow = expense_workflow_definition();
    let (level_one, level_two) = expense_approver_entries();

    SqlWorkflowStore::new(pool.clone()).save_workflow(workflow.clone()).await?;
    let chain = SqlApproverChainStore::new(pool.clone());
    chain.save_entry(level_one.clone()).await?;
    chain.save_entry(level_two.clone()).await?;

    Ok(SeededWorkflow { workflow, level_one, level_two })
}

/// Minimal workflow row for repository tests that only need the FK target.
#[cfg(test)]
pub(crate) async fn seed_bare_workflow(pool: &DbPool, id: &str, code: &str) {
    sqlx::query(
        "INSERT INTO workflow (id, name, code, is_published, is_active)
         VALUES (?, ?, ?, 1, 1)",
    )
    .bind(id)
    .bind(format!("Workflow {code}"))
    .bind(code)
    .execute(pool)
    .await
    .expect("insert workflow fixture");
}

/// Minimal instance row for repository tests that only need the FK target.
#[cfg(test)]
pub(crate) async fn seed_bare_instance(pool: &DbPool, id: &str, workflow_id: &str, reference: &str) {
    let timestamp = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO workflow_instance (
            id, workflow_id, reference_number, status, initiator_id, initiator_name,
            initiator_email, current_level, is_active, state_version, created_at, updated_at
         ) VALUES (?, ?, ?, 'draft', 'U-1', 'Sam Ortiz', 'sam@example.com', 0, 1, 1, ?, ?)",
    )
    .bind(id)
    .bind(workflow_id)
    .bind(reference)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(pool)
    .await
    .expect("insert instance fixture");
}
