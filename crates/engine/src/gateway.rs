//! Redemption side of email action links. A token stands in for an
//! interactive session: it authenticates the approver named in it, but the
//! transition itself runs through the engine's usual transactional entry
//! point, so a redemption and a concurrent interactive action contend for
//! the same lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use flowgate_core::domain::actor::Actor;
use flowgate_core::domain::history::ActionSource;
use flowgate_core::domain::instance::WorkflowInstance;
use flowgate_core::domain::token::{EmailActionToken, TokenAction};
use flowgate_core::errors::EngineError;
use flowgate_db::repositories::{InstanceStore, TokenStore};

use crate::engine::{ApprovalDecision, ApprovalEngine, DecisionAction};

pub struct EmailActionGateway {
    engine: Arc<ApprovalEngine>,
}

impl EmailActionGateway {
    pub fn new(engine: Arc<ApprovalEngine>) -> Self {
        Self { engine }
    }

    /// Redeems a single-use token for its bound action. Every failure mode
    /// (unknown, expired, already used, wrong action, instance moved on)
    /// surfaces as the same undifferentiated token error.
    pub async fn redeem(
        &self,
        token_string: &str,
        action: TokenAction,
        comments: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        if !self.engine.settings().email_approvals_enabled {
            return Err(EngineError::validation("email approvals are not enabled"));
        }

        let token = self.validate(token_string, action).await?;

        let comments = match action {
            TokenAction::Approve => comments
                .filter(|text| !text.trim().is_empty())
                .or_else(|| Some("Approved via email".to_string())),
            TokenAction::Reject => {
                let comments = comments.filter(|text| !text.trim().is_empty());
                if comments.is_none() {
                    return Err(EngineError::validation("comments are required for rejection"));
                }
                comments
            }
        };

        let actor = Actor::email_only(token.approver_name.clone(), token.approver_email.clone());
        let decision = ApprovalDecision {
            action: match action {
                TokenAction::Approve => DecisionAction::Approve,
                TokenAction::Reject => DecisionAction::Reject,
            },
            comments,
            source: ActionSource::Email,
        };

        let instance = self.engine.process_decision(&token.instance_id, &actor, decision).await?;

        // The transition commit already invalidated this level's tokens;
        // marking here keeps the redeemed token's used_at authoritative.
        if let Err(error) = self.engine.tokens().mark_used(token_string, Utc::now()).await {
            warn!(%error, "could not mark redeemed token as used");
        }

        info!(
            event_name = "gateway.token_redeemed",
            reference = %instance.reference_number,
            action = action.as_str(),
            "email action token redeemed"
        );

        Ok(instance)
    }

    /// Looks up a token and checks it is still redeemable against the
    /// instance's current position in the chain.
    async fn validate(
        &self,
        token_string: &str,
        action: TokenAction,
    ) -> Result<EmailActionToken, EngineError> {
        let token = self
            .engine
            .tokens()
            .find_by_token(token_string)
            .await
            .map_err(EngineError::persistence)?
            .ok_or(EngineError::Token)?;

        if !token.is_redeemable(Utc::now()) || token.action != action {
            return Err(EngineError::Token);
        }

        let instance = self
            .engine
            .instances()
            .find_by_id(&token.instance_id)
            .await
            .map_err(EngineError::persistence)?
            .filter(|instance| instance.is_active)
            .ok_or(EngineError::Token)?;

        // A token issued for an earlier level must not act after the
        // instance has advanced past it.
        if !instance.status.is_awaiting_action() || instance.current_level != token.level {
            return Err(EngineError::Token);
        }

        Ok(token)
    }

    /// Deletes expired tokens; driven by the periodic sweep.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let deleted =
            self.engine.tokens().delete_expired(now).await.map_err(EngineError::persistence)?;
        if deleted > 0 {
            info!(deleted, "purged expired email action tokens");
        }
        Ok(deleted)
    }
}

/// The link embedded in approval emails for one action token.
pub fn action_url(base_url: &str, token: &str, action: TokenAction) -> String {
    format!("{base_url}/email-approval?token={token}&action={}", action.as_str())
}
