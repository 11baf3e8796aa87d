//! Forwarding rule variants and the capabilities each one carries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::rule::RuleError;

/// Kind of forwarding rule.
///
/// The variant decides which fields of a [`ForwardRule`](crate::ForwardRule)
/// are meaningful; the `requires_*` predicates spell that out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Single agent dials the target itself
    Direct,
    /// Entry agent hands traffic to one (or several load-balanced) exit agents
    Entry,
    /// Multi-hop path through agents, tunnelled for all or the first N hops
    Chain,
    /// Multi-hop path using plain TCP/UDP relays on per-agent listen ports
    DirectChain,
    /// Forwarding to a user-operated server outside the agent fleet
    External,
}

impl RuleType {
    pub const ALL: [RuleType; 5] = [
        RuleType::Direct,
        RuleType::Entry,
        RuleType::Chain,
        RuleType::DirectChain,
        RuleType::External,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Direct => "direct",
            RuleType::Entry => "entry",
            RuleType::Chain => "chain",
            RuleType::DirectChain => "direct_chain",
            RuleType::External => "external",
        }
    }

    pub const fn is_direct(&self) -> bool {
        matches!(self, RuleType::Direct)
    }

    pub const fn is_entry(&self) -> bool {
        matches!(self, RuleType::Entry)
    }

    pub const fn is_chain(&self) -> bool {
        matches!(self, RuleType::Chain)
    }

    pub const fn is_direct_chain(&self) -> bool {
        matches!(self, RuleType::DirectChain)
    }

    pub const fn is_external(&self) -> bool {
        matches!(self, RuleType::External)
    }

    /// Every rule type ends at some target address.
    pub const fn requires_target(&self) -> bool {
        true
    }

    pub const fn requires_exit_agent(&self) -> bool {
        self.is_entry()
    }

    /// Agent-hosted rules open a listener on the entry agent; external rules do not.
    pub const fn requires_listen_port(&self) -> bool {
        !self.is_external()
    }

    pub const fn requires_chain_agents(&self) -> bool {
        self.is_chain() || self.is_direct_chain()
    }

    pub const fn requires_chain_port_config(&self) -> bool {
        self.is_direct_chain()
    }

    pub const fn requires_agent(&self) -> bool {
        !self.is_external()
    }

    pub const fn requires_server_address(&self) -> bool {
        self.is_external()
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RuleError::UnknownRuleType(s.to_string()))
    }
}
