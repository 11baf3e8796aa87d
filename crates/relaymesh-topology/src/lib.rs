//! Forward-rule topology resolution
//!
//! This crate models the forwarding rules of the relay network and answers,
//! for any agent on a rule's path, how it must carry traffic: its position in
//! the chain, whether the hop tunnels or relays in plaintext, which agent and
//! port comes next, and which exit agent should take the traffic.
//!
//! Everything here is pure computation over an immutable [`ForwardRule`]
//! snapshot. Network I/O and persistence live elsewhere.

pub mod exit;
pub mod load_balance;
pub mod port_range;
pub mod rule;
pub mod rule_type;
pub mod scope;
pub mod topology;
pub mod tunnel;

pub use exit::ExitSelector;
pub use load_balance::{AgentWeight, LoadBalanceStrategy};
pub use port_range::{PortInterval, PortRange, PortRangeError};
pub use rule::{ForwardRule, ForwardRuleBuilder, IpVersion, Protocol, RuleError, Target};
pub use rule_type::RuleType;
pub use scope::RuleScope;
pub use topology::{HopMode, HopPlan, NextHop, Outbound, TopologyError};
pub use tunnel::TunnelType;

/// Identifier of a relay agent. Zero means "no agent".
pub type AgentId = u64;
