//! State-machine behavior against the in-memory stores: routing, terminal
//! transitions, authorization, comment policy, concurrency, and the email
//! token lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use flowgate_core::audit::InMemoryAuditSink;
use flowgate_core::domain::actor::{Actor, UserId};
use flowgate_core::domain::approver::{ApproverEntry, ApproverEntryId};
use flowgate_core::domain::history::HistoryAction;
use flowgate_core::domain::instance::{InstanceStatus, WorkflowInstance};
use flowgate_core::domain::token::TokenAction;
use flowgate_core::domain::workflow::{
    CommentPolicy, FieldSpec, FieldType, WorkflowCategory, WorkflowDefinition, WorkflowForm,
    WorkflowId,
};
use flowgate_core::errors::EngineError;
use flowgate_core::notify::InMemoryNotificationSink;
use flowgate_db::repositories::{
    ApproverChainStore, InMemoryApproverChainStore, InMemoryInstanceStore, InMemoryTokenStore,
    InMemoryWorkflowStore, WorkflowStore,
};
use flowgate_engine::{ApprovalEngine, EmailActionGateway, EngineSettings};

struct Harness {
    engine: Arc<ApprovalEngine>,
    gateway: EmailActionGateway,
    tokens: InMemoryTokenStore,
    notifier: InMemoryNotificationSink,
    audit: InMemoryAuditSink,
}

fn initiator() -> Actor {
    Actor::user("U-INIT", "Sam Ortiz", "sam@example.com")
}

fn manager() -> Actor {
    Actor::user("U-MANAGER", "Dana Lee", "dana@example.com")
}

fn director() -> Actor {
    Actor::user("U-DIRECTOR", "Ravi Kumar", "ravi@example.com")
}

fn field(name: &str, label: &str, mandatory: bool, is_amount: bool) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        label: label.to_string(),
        field_type: if is_amount { FieldType::Number } else { FieldType::Text },
        is_mandatory: mandatory,
        is_amount,
        is_title: false,
        min_length: None,
        max_length: None,
        display_order: 0,
        group: None,
    }
}

fn workflow(comment_policy: CommentPolicy, requires_approval: bool) -> WorkflowDefinition {
    WorkflowDefinition {
        id: WorkflowId("WF-EXP".to_string()),
        name: "Expense Approval".to_string(),
        code: "EXP".to_string(),
        description: None,
        category: WorkflowCategory::Financial,
        requires_approval,
        is_published: true,
        is_active: true,
        version_number: 1,
        comment_policy,
        forms: vec![WorkflowForm {
            name: "Details".to_string(),
            display_order: 0,
            fields: vec![
                field("amount", "Amount", true, true),
                field("purpose", "Purpose", true, false),
                field("notes", "Notes", false, false),
            ],
        }],
    }
}

fn entry(
    id: &str,
    user: &Actor,
    level: u32,
    order: u32,
    limit: Option<Decimal>,
    can_escalate: bool,
) -> ApproverEntry {
    ApproverEntry {
        id: ApproverEntryId(id.to_string()),
        workflow_id: WorkflowId("WF-EXP".to_string()),
        user_id: user.id.clone(),
        approver_name: user.name.clone(),
        approver_email: user.email.clone(),
        level,
        approval_limit: limit,
        is_unlimited: limit.is_none(),
        can_escalate,
        escalation_timeout_hours: None,
        notify_on_pending: true,
        notify_on_approval: true,
        notify_on_rejection: true,
        display_order: order,
    }
}

async fn harness(
    workflow_def: WorkflowDefinition,
    entries: Vec<ApproverEntry>,
) -> Harness {
    let workflows = Arc::new(InMemoryWorkflowStore::default());
    workflows.save_workflow(workflow_def).await.expect("save workflow");

    let chain = Arc::new(InMemoryApproverChainStore::default());
    for entry in entries {
        chain.save_entry(entry).await.expect("save entry");
    }

    let tokens = InMemoryTokenStore::default();
    let instances = Arc::new(InMemoryInstanceStore::new(tokens.clone()));
    let notifier = InMemoryNotificationSink::default();
    let audit = InMemoryAuditSink::default();

    let engine = Arc::new(ApprovalEngine::new(
        workflows,
        chain,
        instances,
        Arc::new(tokens.clone()),
        Arc::new(audit.clone()),
        Arc::new(notifier.clone()),
        EngineSettings::default(),
    ));
    let gateway = EmailActionGateway::new(engine.clone());

    Harness { engine, gateway, tokens, notifier, audit }
}

async fn two_level_harness() -> Harness {
    harness(
        workflow(CommentPolicy::default(), true),
        vec![
            entry("AP-MANAGER", &manager(), 1, 0, Some(Decimal::new(1_000_00, 2)), true),
            entry("AP-DIRECTOR", &director(), 2, 0, None, false),
        ],
    )
    .await
}

fn expense_values(amount: &str) -> HashMap<String, String> {
    HashMap::from([
        ("amount".to_string(), amount.to_string()),
        ("purpose".to_string(), "Team offsite".to_string()),
    ])
}

async fn submitted_instance(harness: &Harness, amount: &str) -> WorkflowInstance {
    let draft = harness
        .engine
        .create_draft("EXP", &initiator(), &expense_values(amount))
        .await
        .expect("create draft");
    harness.engine.submit(&draft.id, &initiator()).await.expect("submit")
}

#[tokio::test]
async fn full_chain_approval_reaches_terminal_state() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "120.50").await;

    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.current_level, 1);
    assert_eq!(instance.current_approver, Some(ApproverEntryId("AP-MANAGER".to_string())));
    assert_eq!(instance.amount, Some(Decimal::new(120_50, 2)));
    assert!(instance.submitted_at.is_some());

    let after_first = harness
        .engine
        .approve(&instance.id, &manager(), Some("within budget".to_string()))
        .await
        .expect("level 1 approve");
    assert_eq!(after_first.status, InstanceStatus::Pending);
    assert_eq!(after_first.current_level, 2);
    assert_eq!(after_first.current_approver, Some(ApproverEntryId("AP-DIRECTOR".to_string())));

    let after_second = harness
        .engine
        .approve(&instance.id, &director(), None)
        .await
        .expect("level 2 approve");
    assert_eq!(after_second.status, InstanceStatus::Approved);
    assert_eq!(after_second.current_approver, None);
    assert!(after_second.completed_at.is_some());

    // One more approve on the finished instance must fail.
    let error = harness
        .engine
        .approve(&instance.id, &director(), None)
        .await
        .expect_err("approve after terminal");
    assert!(matches!(error, EngineError::InvalidState { .. }));

    let history = harness.engine.history(&instance.id).await.expect("history");
    let actions: Vec<HistoryAction> = history.iter().map(|entry| entry.action).collect();
    assert_eq!(
        actions,
        vec![HistoryAction::Submitted, HistoryAction::Approved, HistoryAction::Approved]
    );
    // Approvals are recorded at the level they happened on.
    assert_eq!(history[1].level, 1);
    assert_eq!(history[2].level, 2);

    // Initiator heard about the outcome.
    let outcomes = harness.notifier.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, HistoryAction::Approved);
    assert_eq!(outcomes[0].initiator_email, "sam@example.com");
}

#[tokio::test]
async fn rejection_is_terminal_for_every_follow_up_action() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "50").await;

    let rejected = harness
        .engine
        .reject(&instance.id, &manager(), Some("not justified".to_string()))
        .await
        .expect("reject");
    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert!(rejected.completed_at.is_some());
    assert_eq!(rejected.current_approver, None);

    for result in [
        harness.engine.approve(&instance.id, &manager(), None).await,
        harness.engine.reject(&instance.id, &manager(), Some("again".to_string())).await,
        harness.engine.escalate(&instance.id, &manager(), None, None).await,
    ] {
        assert!(matches!(result, Err(EngineError::InvalidState { .. })));
    }
}

#[tokio::test]
async fn amount_above_level_one_limit_routes_to_covering_approver() {
    // Two approvers at level 1: a limited one first, an unlimited one after.
    let harness = harness(
        workflow(CommentPolicy::default(), true),
        vec![
            entry("AP-LIMITED", &manager(), 1, 0, Some(Decimal::new(100_00, 2)), true),
            entry("AP-UNLIMITED", &director(), 1, 1, None, true),
        ],
    )
    .await;

    let over_limit = submitted_instance(&harness, "150").await;
    assert_eq!(over_limit.current_approver, Some(ApproverEntryId("AP-UNLIMITED".to_string())));

    let within_limit = submitted_instance(&harness, "50").await;
    assert_eq!(within_limit.current_approver, Some(ApproverEntryId("AP-LIMITED".to_string())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_serialize_to_one_winner() {
    // Single-level chain: the winning approve finalizes the instance.
    let harness = harness(
        workflow(CommentPolicy::default(), true),
        vec![entry("AP-MANAGER", &manager(), 1, 0, None, true)],
    )
    .await;
    let instance = submitted_instance(&harness, "75").await;

    let first = {
        let engine = harness.engine.clone();
        let id = instance.id.clone();
        tokio::spawn(async move { engine.approve(&id, &manager(), None).await })
    };
    let second = {
        let engine = harness.engine.clone();
        let id = instance.id.clone();
        tokio::spawn(async move { engine.approve(&id, &manager(), None).await })
    };

    let (first, second) = tokio::join!(first, second);
    let results = [first.expect("task"), second.expect("task")];

    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1, "exactly one approve must win");
    let loser = results.iter().find(|result| result.is_err()).expect("one loser");
    assert!(matches!(loser, Err(EngineError::InvalidState { .. })));

    let stored = harness.engine.instance(&instance.id).await.expect("reload");
    assert_eq!(stored.status, InstanceStatus::Approved);

    // The winner appended exactly one approval entry.
    let history = harness.engine.history(&instance.id).await.expect("history");
    let approvals =
        history.iter().filter(|entry| entry.action == HistoryAction::Approved).count();
    assert_eq!(approvals, 1);
}

#[tokio::test]
async fn blank_mandatory_field_blocks_submit_without_writes() {
    let harness = two_level_harness().await;
    let draft = harness
        .engine
        .create_draft(
            "EXP",
            &initiator(),
            &HashMap::from([("amount".to_string(), "90".to_string())]),
        )
        .await
        .expect("create draft");

    let error = harness.engine.submit(&draft.id, &initiator()).await.expect_err("submit");
    match error {
        EngineError::Validation { missing_fields, .. } => {
            assert_eq!(missing_fields, vec!["Purpose".to_string()]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let stored = harness.engine.instance(&draft.id).await.expect("reload");
    assert_eq!(stored.status, InstanceStatus::Draft);
    assert_eq!(stored.current_level, 0);
    assert!(stored.submitted_at.is_none());
    assert!(harness.engine.history(&draft.id).await.expect("history").is_empty());
}

#[tokio::test]
async fn recall_returns_a_pending_instance_to_draft() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "80").await;

    // A third party cannot recall.
    let error = harness
        .engine
        .recall(&instance.id, &manager(), Some("mine now".to_string()))
        .await
        .expect_err("non-initiator recall");
    assert!(matches!(error, EngineError::Authorization(_)));

    let recalled = harness
        .engine
        .recall(&instance.id, &initiator(), Some("typo in amount".to_string()))
        .await
        .expect("recall");
    assert_eq!(recalled.status, InstanceStatus::Draft);
    assert_eq!(recalled.current_level, 0);
    assert_eq!(recalled.current_approver, None);
    assert!(recalled.submitted_at.is_none());

    // Recall invalidated the outstanding approval links.
    assert!(harness.tokens.all().await.iter().all(|token| token.is_used));

    // The draft can go through the chain again.
    let resubmitted = harness.engine.resubmit(&instance.id, &initiator()).await.expect("resubmit");
    assert_eq!(resubmitted.status, InstanceStatus::Pending);
    assert_eq!(resubmitted.current_level, 1);
}

#[tokio::test]
async fn email_token_redeems_once_and_only_once() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;

    let approve_token = harness
        .tokens
        .all()
        .await
        .into_iter()
        .find(|token| token.action == TokenAction::Approve)
        .expect("approve token issued");

    let redeemed = harness
        .gateway
        .redeem(&approve_token.token, TokenAction::Approve, None)
        .await
        .expect("first redemption");
    assert_eq!(redeemed.current_level, 2);
    assert_eq!(redeemed.status, InstanceStatus::Pending);

    let error = harness
        .gateway
        .redeem(&approve_token.token, TokenAction::Approve, None)
        .await
        .expect_err("second redemption");
    assert!(matches!(error, EngineError::Token));

    // The email-sourced approval is attributed in history.
    let history = harness.engine.history(&instance.id).await.expect("history");
    let approval = history.iter().find(|entry| entry.action == HistoryAction::Approved).expect("approval entry");
    assert_eq!(approval.source, flowgate_core::domain::history::ActionSource::Email);
    assert_eq!(approval.comments.as_deref(), Some("Approved via email"));
}

#[tokio::test]
async fn stale_level_token_is_rejected_after_interactive_advance() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;

    let level_one_token = harness
        .tokens
        .all()
        .await
        .into_iter()
        .find(|token| token.action == TokenAction::Approve && token.level == 1)
        .expect("level 1 token");

    // The manager approves interactively; the emailed link must now be dead.
    harness.engine.approve(&instance.id, &manager(), None).await.expect("approve");

    let error = harness
        .gateway
        .redeem(&level_one_token.token, TokenAction::Approve, None)
        .await
        .expect_err("stale token");
    assert!(matches!(error, EngineError::Token));

    let stored = harness.engine.instance(&instance.id).await.expect("reload");
    assert_eq!(stored.current_level, 2, "stale token must not double-advance");
}

#[tokio::test]
async fn reject_token_requires_comments() {
    let harness = two_level_harness().await;
    let _instance = submitted_instance(&harness, "40").await;

    let reject_token = harness
        .tokens
        .all()
        .await
        .into_iter()
        .find(|token| token.action == TokenAction::Reject)
        .expect("reject token");

    let error = harness
        .gateway
        .redeem(&reject_token.token, TokenAction::Reject, None)
        .await
        .expect_err("blank comments");
    assert!(matches!(error, EngineError::Validation { .. }));

    let rejected = harness
        .gateway
        .redeem(&reject_token.token, TokenAction::Reject, Some("over budget".to_string()))
        .await
        .expect("redeem with comments");
    assert_eq!(rejected.status, InstanceStatus::Rejected);
}

#[tokio::test]
async fn comment_policy_gates_reject_and_escalate() {
    let harness = harness(
        workflow(
            CommentPolicy { always: false, on_reject: true, on_escalate: true },
            true,
        ),
        vec![
            entry("AP-MANAGER", &manager(), 1, 0, None, true),
            entry("AP-DIRECTOR", &director(), 2, 0, None, false),
        ],
    )
    .await;
    let instance = submitted_instance(&harness, "40").await;

    let error =
        harness.engine.reject(&instance.id, &manager(), None).await.expect_err("blank reject");
    assert!(matches!(error, EngineError::Validation { .. }));

    let error = harness
        .engine
        .escalate(&instance.id, &manager(), Some("  ".to_string()), None)
        .await
        .expect_err("blank escalate");
    assert!(matches!(error, EngineError::Validation { .. }));

    // Approval needs no comment under this policy.
    harness.engine.approve(&instance.id, &manager(), None).await.expect("approve");
}

#[tokio::test]
async fn escalation_reassigns_without_recording_an_approval() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;

    let escalated = harness
        .engine
        .escalate(&instance.id, &manager(), Some("on leave next week".to_string()), None)
        .await
        .expect("escalate");
    assert_eq!(escalated.status, InstanceStatus::Escalated);
    assert_eq!(escalated.current_level, 2);
    assert_eq!(escalated.current_approver, Some(ApproverEntryId("AP-DIRECTOR".to_string())));

    let history = harness.engine.history(&instance.id).await.expect("history");
    let actions: Vec<HistoryAction> = history.iter().map(|entry| entry.action).collect();
    assert_eq!(actions, vec![HistoryAction::Submitted, HistoryAction::Escalated]);

    // The director can finalize from the escalated state.
    let approved =
        harness.engine.approve(&instance.id, &director(), None).await.expect("approve");
    assert_eq!(approved.status, InstanceStatus::Approved);
}

#[tokio::test]
async fn escalation_to_a_named_approver_stays_at_the_same_level() {
    let alternate = Actor::user("U-ALT", "Noor Haddad", "noor@example.com");
    let harness = harness(
        workflow(CommentPolicy::default(), true),
        vec![
            entry("AP-MANAGER", &manager(), 1, 0, None, true),
            entry("AP-ALT", &alternate, 1, 1, None, true),
            entry("AP-DIRECTOR", &director(), 2, 0, None, false),
        ],
    )
    .await;
    let instance = submitted_instance(&harness, "40").await;

    let escalated = harness
        .engine
        .escalate(
            &instance.id,
            &manager(),
            Some("handing over".to_string()),
            Some(UserId("U-ALT".to_string())),
        )
        .await
        .expect("escalate to user");
    assert_eq!(escalated.status, InstanceStatus::Escalated);
    assert_eq!(escalated.current_level, 1);
    assert_eq!(escalated.current_approver, Some(ApproverEntryId("AP-ALT".to_string())));

    // Unknown escalation targets are rejected.
    let error = harness
        .engine
        .escalate(
            &instance.id,
            &alternate,
            Some("try again".to_string()),
            Some(UserId("U-NOBODY".to_string())),
        )
        .await
        .expect_err("unknown target");
    assert!(matches!(error, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn approver_without_escalation_rights_cannot_escalate() {
    let harness = harness(
        workflow(CommentPolicy::default(), true),
        vec![
            entry("AP-MANAGER", &manager(), 1, 0, None, false),
            entry("AP-DIRECTOR", &director(), 2, 0, None, false),
        ],
    )
    .await;
    let instance = submitted_instance(&harness, "40").await;

    let error = harness
        .engine
        .escalate(&instance.id, &manager(), Some("help".to_string()), None)
        .await
        .expect_err("escalate without rights");
    assert!(matches!(error, EngineError::Authorization(_)));
}

#[tokio::test]
async fn only_the_assigned_approver_may_act() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;

    // The level-2 director is not the assigned level-1 approver.
    let error = harness
        .engine
        .approve(&instance.id, &director(), None)
        .await
        .expect_err("wrong approver");
    assert!(matches!(error, EngineError::Authorization(_)));

    // A super-user may act on anything.
    let admin = Actor::super_user("U-ADMIN", "Alex Admin", "admin@example.com");
    let approved = harness.engine.approve(&instance.id, &admin, None).await.expect("super-user");
    assert_eq!(approved.current_level, 2);
}

#[tokio::test]
async fn workflow_without_approval_chain_auto_approves_on_submit() {
    let harness = harness(workflow(CommentPolicy::default(), true), Vec::new()).await;
    let instance = submitted_instance(&harness, "40").await;

    assert_eq!(instance.status, InstanceStatus::Approved);
    assert_eq!(instance.current_approver, None);
    assert!(instance.completed_at.is_some());

    let history = harness.engine.history(&instance.id).await.expect("history");
    let actions: Vec<HistoryAction> = history.iter().map(|entry| entry.action).collect();
    assert_eq!(actions, vec![HistoryAction::Submitted, HistoryAction::Approved]);
    assert_eq!(history[1].source, flowgate_core::domain::history::ActionSource::System);
}

#[tokio::test]
async fn cancel_is_terminal_and_open_to_non_initiators() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;

    let cancelled = harness
        .engine
        .cancel(&instance.id, &manager(), Some("duplicate request".to_string()))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, InstanceStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    let error = harness
        .engine
        .cancel(&instance.id, &manager(), None)
        .await
        .expect_err("cancel a cancelled instance");
    assert!(matches!(error, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn delete_only_applies_to_drafts_and_cancelled_instances() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;

    let error =
        harness.engine.delete(&instance.id, &initiator()).await.expect_err("delete pending");
    assert!(matches!(error, EngineError::InvalidState { .. }));

    harness.engine.cancel(&instance.id, &initiator(), None).await.expect("cancel");

    let error = harness.engine.delete(&instance.id, &manager()).await.expect_err("not the owner");
    assert!(matches!(error, EngineError::Authorization(_)));

    let deleted = harness.engine.delete(&instance.id, &initiator()).await.expect("delete");
    assert!(!deleted.is_active);

    // Soft-deleted instances are gone from the engine's point of view.
    let error = harness.engine.instance(&instance.id).await.expect_err("load deleted");
    assert!(matches!(error, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn clone_copies_field_values_but_not_history() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;
    harness.engine.approve(&instance.id, &manager(), None).await.expect("approve");

    let clone = harness.engine.clone_instance(&instance.id, &manager()).await.expect("clone");
    assert_eq!(clone.status, InstanceStatus::Draft);
    assert_eq!(clone.amount, Some(Decimal::new(40, 0)));
    assert_ne!(clone.reference_number, instance.reference_number);
    assert_eq!(clone.initiator, UserId("U-MANAGER".to_string()));

    assert!(harness.engine.history(&clone.id).await.expect("history").is_empty());
}

#[tokio::test]
async fn notification_failure_never_blocks_a_transition() {
    let harness = two_level_harness().await;
    harness.notifier.fail_all();

    let instance = submitted_instance(&harness, "40").await;
    assert_eq!(instance.status, InstanceStatus::Pending);

    let approved = harness
        .engine
        .approve(&instance.id, &manager(), None)
        .await
        .expect("approve despite notification outage");
    assert_eq!(approved.current_level, 2);
    assert!(harness.notifier.pending().is_empty());
}

#[tokio::test]
async fn timeout_sweep_escalates_overdue_instances_as_the_system() {
    let mut overdue_entry = entry("AP-MANAGER", &manager(), 1, 0, None, true);
    // Zero-hour timeout: due the moment anything has elapsed.
    overdue_entry.escalation_timeout_hours = Some(0);

    let harness = harness(
        workflow(CommentPolicy::default(), true),
        vec![overdue_entry, entry("AP-DIRECTOR", &director(), 2, 0, None, false)],
    )
    .await;
    let instance = submitted_instance(&harness, "40").await;

    let escalated = harness.engine.run_escalation_sweep(chrono::Utc::now()).await;
    assert_eq!(escalated, 1);

    let stored = harness.engine.instance(&instance.id).await.expect("reload");
    assert_eq!(stored.status, InstanceStatus::Escalated);
    assert_eq!(stored.current_level, 2);

    let history = harness.engine.history(&instance.id).await.expect("history");
    let escalation = history
        .iter()
        .find(|entry| entry.action == HistoryAction::Escalated)
        .expect("escalation entry");
    assert_eq!(escalation.source, flowgate_core::domain::history::ActionSource::System);

    // Nothing left to escalate on the next pass: the director entry has no
    // timeout configured.
    assert_eq!(harness.engine.run_escalation_sweep(chrono::Utc::now()).await, 0);
}

#[tokio::test]
async fn successful_transitions_are_audited() {
    let harness = two_level_harness().await;
    let instance = submitted_instance(&harness, "40").await;
    harness.engine.approve(&instance.id, &manager(), None).await.expect("approve");

    let events = harness.audit.events();
    let kinds: Vec<_> = events.iter().map(|event| event.action).collect();
    assert!(kinds.contains(&flowgate_core::audit::AuditAction::Create));
    assert!(kinds.contains(&flowgate_core::audit::AuditAction::Submit));
    assert!(kinds.contains(&flowgate_core::audit::AuditAction::Approve));
}
