//! Rule ownership

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Who owns a rule: the platform operator, or exactly one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RuleScope {
    #[default]
    System,
    User { user_id: u64 },
}

impl RuleScope {
    pub fn is_system(&self) -> bool {
        matches!(self, RuleScope::System)
    }

    pub fn user_id(&self) -> Option<u64> {
        match self {
            RuleScope::System => None,
            RuleScope::User { user_id } => Some(*user_id),
        }
    }

    /// Whether `user_id` owns rules in this scope. System rules belong to no user.
    pub fn is_owned_by(&self, user_id: u64) -> bool {
        self.user_id() == Some(user_id)
    }
}
