use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::instance::InstanceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAction {
    Approve,
    Reject,
}

impl TokenAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Single-use, time-boxed credential binding an instance, an approval level
/// and one permitted action to a random URL-safe string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailActionToken {
    pub id: String,
    pub token: String,
    pub instance_id: InstanceId,
    pub approver_email: String,
    pub approver_name: String,
    pub level: u32,
    pub action: TokenAction,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub is_used: bool,
}

impl EmailActionToken {
    pub fn issue(
        instance_id: InstanceId,
        approver_email: impl Into<String>,
        approver_name: impl Into<String>,
        level: u32,
        action: TokenAction,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token: generate_token(),
            instance_id,
            approver_email: approver_email.into(),
            approver_name: approver_name.into(),
            level,
            action,
            issued_at,
            expires_at,
            used_at: None,
            is_used: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_expired(now)
    }
}

/// 32 bytes from the OS RNG, base64 URL-safe without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{generate_token, EmailActionToken, TokenAction};
    use crate::domain::instance::InstanceId;

    fn token(expired: bool, used: bool) -> EmailActionToken {
        let now = Utc::now();
        let mut token = EmailActionToken::issue(
            InstanceId("WI-1".to_string()),
            "dana@example.com",
            "Dana Lee",
            1,
            TokenAction::Approve,
            now,
            if expired { now - Duration::hours(1) } else { now + Duration::hours(48) },
        );
        token.is_used = used;
        token
    }

    #[test]
    fn generated_tokens_are_url_safe_and_unique() {
        let first = generate_token();
        let second = generate_token();

        assert_ne!(first, second);
        // 32 bytes -> 43 base64 characters without padding
        assert_eq!(first.len(), 43);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn fresh_token_is_redeemable() {
        assert!(token(false, false).is_redeemable(Utc::now()));
    }

    #[test]
    fn expired_or_used_token_is_not_redeemable() {
        let now = Utc::now();
        assert!(!token(true, false).is_redeemable(now));
        assert!(!token(false, true).is_redeemable(now));
    }

    #[test]
    fn token_action_round_trips_from_storage_encoding() {
        for action in [TokenAction::Approve, TokenAction::Reject] {
            assert_eq!(TokenAction::parse(action.as_str()), Some(action));
        }
    }
}
