//! Background maintenance: auto-escalation of instances that sat too long
//! at one level, and garbage collection of expired email tokens. Both run
//! through the same public entry points as interactive callers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use flowgate_core::domain::actor::Actor;
use flowgate_core::domain::history::ActionSource;
use flowgate_core::domain::instance::WorkflowInstance;
use flowgate_db::repositories::{ApproverChainStore, InstanceStore};

use crate::engine::{ApprovalDecision, ApprovalEngine, DecisionAction};
use crate::gateway::EmailActionGateway;

impl ApprovalEngine {
    /// Escalates every awaiting instance whose current approver configured
    /// an escalation timeout that has elapsed. Attributed to the system
    /// actor; per-instance failures are logged and skipped.
    pub async fn run_escalation_sweep(&self, now: DateTime<Utc>) -> u64 {
        let awaiting = match self.instances().list_awaiting_action().await {
            Ok(instances) => instances,
            Err(error) => {
                warn!(%error, "escalation sweep could not list pending instances");
                return 0;
            }
        };

        let mut escalated = 0;
        for instance in awaiting {
            match self.escalation_due(&instance, now).await {
                Ok(Some(timeout_hours)) => {
                    let decision = ApprovalDecision {
                        action: DecisionAction::Escalate { escalate_to: None },
                        comments: Some(format!(
                            "Escalated automatically after {timeout_hours} hours without action"
                        )),
                        source: ActionSource::System,
                    };

                    match self.process_decision(&instance.id, &Actor::system(), decision).await {
                        Ok(_) => {
                            escalated += 1;
                            info!(
                                event_name = "engine.timeout_escalated",
                                reference = %instance.reference_number,
                                "instance auto-escalated after timeout"
                            );
                        }
                        Err(error) => {
                            warn!(
                                reference = %instance.reference_number,
                                %error,
                                "timeout escalation failed"
                            );
                        }
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        reference = %instance.reference_number,
                        %error,
                        "could not evaluate escalation timeout"
                    );
                }
            }
        }

        escalated
    }

    /// Returns the configured timeout when the instance has been waiting at
    /// its current assignment longer than allowed.
    async fn escalation_due(
        &self,
        instance: &WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, flowgate_core::errors::EngineError> {
        use flowgate_core::errors::EngineError;

        let Some(approver_id) = &instance.current_approver else {
            return Ok(None);
        };
        let Some(entry) =
            self.chain().entry_by_id(approver_id).await.map_err(EngineError::persistence)?
        else {
            return Ok(None);
        };
        let Some(timeout_hours) = entry.escalation_timeout_hours else {
            return Ok(None);
        };

        // The wait starts at the latest history entry (the action that
        // assigned this approver), falling back to the submit time.
        let history =
            self.instances().history_for(&instance.id).await.map_err(EngineError::persistence)?;
        let assigned_at = history
            .last()
            .map(|entry| entry.occurred_at)
            .or(instance.submitted_at)
            .unwrap_or(instance.updated_at);

        if now - assigned_at > Duration::hours(i64::from(timeout_hours)) {
            Ok(Some(timeout_hours))
        } else {
            Ok(None)
        }
    }
}

/// Drives both sweeps on a fixed interval until the task is aborted.
pub fn spawn_sweeps(
    engine: Arc<ApprovalEngine>,
    gateway: Arc<EmailActionGateway>,
    escalation_interval: std::time::Duration,
    cleanup_interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut escalation_tick = tokio::time::interval(escalation_interval);
        let mut cleanup_tick = tokio::time::interval(cleanup_interval);

        loop {
            tokio::select! {
                _ = escalation_tick.tick() => {
                    engine.run_escalation_sweep(Utc::now()).await;
                }
                _ = cleanup_tick.tick() => {
                    if let Err(error) = gateway.purge_expired(Utc::now()).await {
                        warn!(%error, "token cleanup sweep failed");
                    }
                }
            }
        }
    })
}
