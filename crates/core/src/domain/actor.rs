use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// The identity a transition is attributed to. Always passed explicitly;
/// the engine never consults ambient session state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<UserId>,
    pub name: String,
    pub email: String,
    pub is_super_user: bool,
}

impl Actor {
    pub fn user(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Some(UserId(id.into())),
            name: name.into(),
            email: email.into(),
            is_super_user: false,
        }
    }

    pub fn super_user(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(UserId(id.into())),
            name: name.into(),
            email: email.into(),
            is_super_user: true,
        }
    }

    /// An actor known only by email, as redeemed from an email action link.
    pub fn email_only(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { id: None, name: name.into(), email: email.into(), is_super_user: false }
    }

    /// The attribution used by scheduled jobs (escalation timeouts).
    pub fn system() -> Self {
        Self {
            id: None,
            name: "System".to_string(),
            email: String::new(),
            is_super_user: true,
        }
    }

    pub fn is_user(&self, user_id: &UserId) -> bool {
        self.id.as_ref() == Some(user_id)
    }
}
