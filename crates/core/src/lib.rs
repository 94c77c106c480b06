pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod routing;

pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::actor::{Actor, UserId};
pub use domain::approver::{ApproverEntry, ApproverEntryId};
pub use domain::history::{ActionSource, ApprovalHistoryEntry, HistoryAction};
pub use domain::instance::{FieldValue, InstanceId, InstanceStatus, WorkflowInstance};
pub use domain::token::{EmailActionToken, TokenAction};
pub use domain::workflow::{
    CommentPolicy, FieldSpec, FieldType, WorkflowCategory, WorkflowDefinition, WorkflowForm,
    WorkflowId,
};
pub use errors::EngineError;
pub use notify::{
    ActionLinks, InMemoryNotificationSink, NoopNotificationSink, NotificationSink, NotifyError,
    OutcomeNotification, PendingNotification,
};

pub use chrono;
pub use rust_decimal;
