//! Exit-agent weights and load-balancing strategies

use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::AgentId;

/// Strategy for spreading traffic over several exit agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    /// Highest weight first; zero-weight agents are backups.
    #[default]
    Failover,
    /// Random pick proportional to weight; zero-weight agents only as a last resort.
    Weighted,
}

impl LoadBalanceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceStrategy::Failover => "failover",
            LoadBalanceStrategy::Weighted => "weighted",
        }
    }

    /// Parse a strategy name, falling back to [`LoadBalanceStrategy::Failover`]
    /// for anything unrecognised. Never fails.
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim() {
            "failover" => LoadBalanceStrategy::Failover,
            "weighted" => LoadBalanceStrategy::Weighted,
            other => {
                if !other.is_empty() {
                    tracing::debug!(
                        strategy = %other,
                        "Unknown load balance strategy, using failover"
                    );
                }
                LoadBalanceStrategy::default()
            }
        }
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exit agent together with its load-balancing weight.
///
/// Weight `0` marks a failover backup: it never carries traffic while a
/// positive-weight agent is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AgentWeight {
    pub agent_id: AgentId,
    #[serde(default)]
    pub weight: u32,
}

impl AgentWeight {
    pub const fn new(agent_id: AgentId, weight: u32) -> Self {
        Self { agent_id, weight }
    }

    pub const fn is_backup(&self) -> bool {
        self.weight == 0
    }
}
