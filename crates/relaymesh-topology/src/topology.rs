//! Chain topology resolution
//!
//! Positions index the *full chain*: the entry agent at position 0 followed by
//! the rule's chain agents. For a chain `[1; 2, 3, 4]` agent 1 is at position
//! 0 and agent 4, the last hop, at position 3.
//!
//! `chain` rules tunnel every hop unless `tunnel_hops` is strictly between 0
//! and the number of chain agents. In that hybrid case only the first
//! `tunnel_hops` legs tunnel; the agent at position `tunnel_hops` terminates
//! the tunnel (a *boundary* hop) and everything after it relays in plaintext.
//!
//! `direct_chain` rules never tunnel. Each agent dials the next one on the
//! port from the rule's chain port configuration.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::rule::ForwardRule;
use crate::rule_type::RuleType;
use crate::tunnel::TunnelType;
use crate::AgentId;

/// Topology lookup errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Rule is not a direct_chain rule (got {0})")]
    NotDirectChain(RuleType),

    #[error("Rule is not a chain rule (got {0})")]
    NotChainRule(RuleType),

    #[error("Agent {0} is not part of the chain")]
    AgentNotInChain(AgentId),

    #[error("No listen port configured for chain agent {0}")]
    MissingPortConfig(AgentId),
}

/// How an agent handles its leg of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum HopMode {
    /// Outbound leg uses the encrypted tunnel
    Tunnel,
    /// Plain TCP/UDP relay
    Direct,
    /// Terminates the inbound tunnel and relays onward in plaintext
    Boundary,
}

impl HopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HopMode::Tunnel => "tunnel",
            HopMode::Direct => "direct",
            HopMode::Boundary => "boundary",
        }
    }
}

impl fmt::Display for HopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful `direct_chain` next-hop lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextHop {
    /// The current agent is the last relay; it dials the rule's target.
    EndOfChain,
    /// Relay to `agent_id` on `port`.
    Relay { agent_id: AgentId, port: u16 },
}

/// Where an agent sends its outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    /// Last hop: dial the rule's target
    Target,
    /// Open a tunnel to the next agent
    Tunnel {
        agent_id: AgentId,
        tunnel_type: TunnelType,
    },
    /// Plaintext relay to the next agent. `port` is `None` when the rule does
    /// not pin one and the agent's default listener applies.
    Direct { agent_id: AgentId, port: Option<u16> },
}

/// Everything an agent needs to know about its place in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HopPlan {
    pub agent_id: AgentId,
    pub position: usize,
    pub mode: HopMode,
    pub is_last: bool,
    /// Whether the connection arriving at this agent came over the tunnel
    pub inbound_tunnel: bool,
    pub outbound: Outbound,
}

impl ForwardRule {
    /// Entry agent followed by the chain agents.
    pub fn full_chain(&self) -> impl Iterator<Item = AgentId> + '_ {
        std::iter::once(self.agent_id).chain(self.chain_agent_ids.iter().copied())
    }

    /// Number of positions in the full chain, entry agent included.
    pub fn chain_len(&self) -> usize {
        self.chain_agent_ids.len() + 1
    }

    /// Hop count of a hybrid chain, `None` when every hop tunnels or the rule
    /// is not a tunnel chain.
    fn hybrid_hops(&self) -> Option<usize> {
        if !self.rule_type.is_chain() {
            return None;
        }
        let hops = self.tunnel_hops? as usize;
        (hops > 0 && hops < self.chain_agent_ids.len()).then_some(hops)
    }

    /// True for `chain` rules that tunnel only the first `tunnel_hops` legs.
    pub fn is_hybrid_chain(&self) -> bool {
        self.hybrid_hops().is_some()
    }

    /// Whether the outbound leg at `position` uses the tunnel.
    pub fn needs_tunnel_at_position(&self, position: usize) -> bool {
        if !self.rule_type.is_chain() {
            return false;
        }
        match self.hybrid_hops() {
            Some(hops) => position < hops,
            None => true,
        }
    }

    /// Classify the agent at `position`.
    ///
    /// Positions past the end of the chain are treated as the last hop.
    pub fn hop_mode(&self, position: usize) -> HopMode {
        if !self.rule_type.is_chain() {
            return HopMode::Direct;
        }
        let Some(hops) = self.hybrid_hops() else {
            return HopMode::Tunnel;
        };

        let is_last = position >= self.chain_len() - 1;
        let inbound_tunnel = position > 0 && position <= hops;
        let outbound_tunnel = !is_last && position < hops;

        let mode = if inbound_tunnel && !outbound_tunnel {
            HopMode::Boundary
        } else if outbound_tunnel {
            HopMode::Tunnel
        } else {
            HopMode::Direct
        };

        trace!(
            rule_id = self.id,
            position,
            hops,
            inbound_tunnel,
            outbound_tunnel,
            mode = %mode,
            "Resolved hybrid hop mode"
        );
        mode
    }

    /// Index of `agent_id` in the full chain.
    ///
    /// Always `None` for rule types without a chain.
    pub fn chain_position(&self, agent_id: AgentId) -> Option<usize> {
        if !self.rule_type.requires_chain_agents() {
            return None;
        }
        self.full_chain().position(|id| id == agent_id)
    }

    /// Whether `agent_id` is the final hop of a chain rule.
    ///
    /// A chain without chain agents ends at its entry agent.
    pub fn is_last_in_chain(&self, agent_id: AgentId) -> bool {
        if !self.rule_type.requires_chain_agents() {
            return false;
        }
        match self.chain_agent_ids.last() {
            Some(&last) => last == agent_id,
            None => self.agent_id == agent_id,
        }
    }

    /// Listen port `agent_id` exposes to the hop before it.
    pub fn agent_listen_port(&self, agent_id: AgentId) -> Option<u16> {
        self.chain_port_config
            .get(&agent_id)
            .copied()
            .filter(|port| *port != 0)
    }

    /// Next hop of a `direct_chain` rule as `(agent_id, port)`.
    ///
    /// Returns `(0, 0)` both at the end of the chain and when the next hop has
    /// no port, so the two cannot be told apart.
    #[deprecated(note = "use next_hop_for_direct_chain_safe, which reports misconfiguration")]
    pub fn next_hop_for_direct_chain(&self, current_agent_id: AgentId) -> (AgentId, u16) {
        match self.next_hop_for_direct_chain_safe(current_agent_id) {
            Ok(NextHop::Relay { agent_id, port }) => (agent_id, port),
            Ok(NextHop::EndOfChain) | Err(_) => (0, 0),
        }
    }

    /// Next hop of a `direct_chain` rule.
    ///
    /// `Ok(NextHop::EndOfChain)` means the current agent is the last relay and
    /// dials the final target. A missing port for the next agent is an error,
    /// never an end of chain.
    pub fn next_hop_for_direct_chain_safe(
        &self,
        current_agent_id: AgentId,
    ) -> Result<NextHop, TopologyError> {
        if !self.rule_type.is_direct_chain() {
            return Err(TopologyError::NotDirectChain(self.rule_type));
        }

        let position = self
            .full_chain()
            .position(|id| id == current_agent_id)
            .ok_or(TopologyError::AgentNotInChain(current_agent_id))?;

        let Some(&next_agent_id) = self.chain_agent_ids.get(position) else {
            debug!(
                rule_id = self.id,
                agent_id = current_agent_id,
                "Agent is the last hop of the direct chain"
            );
            return Ok(NextHop::EndOfChain);
        };

        let port = self
            .agent_listen_port(next_agent_id)
            .ok_or(TopologyError::MissingPortConfig(next_agent_id))?;

        Ok(NextHop::Relay {
            agent_id: next_agent_id,
            port,
        })
    }

    /// Agent after `current_agent_id` in a `chain` rule.
    ///
    /// `None` when the agent is last, absent, or the rule is not a `chain`.
    pub fn next_hop_agent_id(&self, current_agent_id: AgentId) -> Option<AgentId> {
        if !self.rule_type.is_chain() {
            return None;
        }
        let position = self.full_chain().position(|id| id == current_agent_id)?;
        self.chain_agent_ids.get(position).copied()
    }

    /// Resolve the full hop plan for `agent_id` on a `chain` or `direct_chain`
    /// rule.
    pub fn hop_plan(&self, agent_id: AgentId) -> Result<HopPlan, TopologyError> {
        if !self.rule_type.requires_chain_agents() {
            return Err(TopologyError::NotChainRule(self.rule_type));
        }

        let position = self
            .chain_position(agent_id)
            .ok_or(TopologyError::AgentNotInChain(agent_id))?;
        let mode = self.hop_mode(position);
        let inbound_tunnel = match mode {
            HopMode::Boundary => true,
            HopMode::Direct => false,
            HopMode::Tunnel => position > 0,
        };

        let outbound = match self.rule_type {
            RuleType::DirectChain => match self.next_hop_for_direct_chain_safe(agent_id)? {
                NextHop::EndOfChain => Outbound::Target,
                NextHop::Relay { agent_id, port } => Outbound::Direct {
                    agent_id,
                    port: Some(port),
                },
            },
            _ => match self.next_hop_agent_id(agent_id) {
                None => Outbound::Target,
                Some(next) if self.needs_tunnel_at_position(position) => Outbound::Tunnel {
                    agent_id: next,
                    tunnel_type: self.tunnel_type,
                },
                Some(next) => Outbound::Direct {
                    agent_id: next,
                    port: self.agent_listen_port(next),
                },
            },
        };

        let plan = HopPlan {
            agent_id,
            position,
            mode,
            is_last: self.is_last_in_chain(agent_id),
            inbound_tunnel,
            outbound,
        };

        debug!(
            rule_id = self.id,
            agent_id,
            position,
            mode = %mode,
            is_last = plan.is_last,
            "Resolved hop plan"
        );

        Ok(plan)
    }
}
