//! Caller identity.
//!
//! Authentication happens upstream; handlers receive an explicit [`Session`]
//! and pass it into every service call.

use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a caller is allowed to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Pass holder
    Member,
    /// Door staff, may redeem tickets
    Staff,
    /// Administrator, may also register passes and reset redemptions
    Admin,
}

impl Role {
    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "staff" => Ok(Self::Staff),
            "admin" => Ok(Self::Admin),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// The authenticated caller of one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// User ID
    pub user_id: UserId,
    /// Name shown to other users and recorded as `used_by`
    pub display_name: String,
    /// Role
    pub role: Role,
}

impl Session {
    /// Creates a session
    #[must_use]
    pub fn new(user_id: UserId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            role,
        }
    }

    /// Shorthand for a member session
    #[must_use]
    pub fn member(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self::new(user_id, display_name, Role::Member)
    }

    /// Shorthand for a staff session
    #[must_use]
    pub fn staff(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self::new(user_id, display_name, Role::Staff)
    }

    /// Shorthand for an admin session
    #[must_use]
    pub fn admin(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self::new(user_id, display_name, Role::Admin)
    }

    /// Door staff and admins may redeem
    #[must_use]
    pub const fn can_redeem(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Admin)
    }

    /// Whether this is an admin session
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}
