//! The forward-rule aggregate and its validating builder
//!
//! A [`ForwardRule`] is built once through [`ForwardRuleBuilder::build`], which
//! enforces that exactly the fields required by the rule type are populated.
//! After that the rule is read-only; the topology queries in
//! [`crate::topology`] assume these invariants and do not re-check them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::load_balance::{AgentWeight, LoadBalanceStrategy};
use crate::port_range::PortRange;
use crate::rule_type::RuleType;
use crate::scope::RuleScope;
use crate::tunnel::TunnelType;
use crate::AgentId;

/// Rule construction errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("Unknown tunnel type: {0}")]
    UnknownTunnelType(String),

    #[error("{0} rules require an entry agent")]
    MissingAgent(RuleType),

    #[error("external rules must not be bound to an agent (got agent {0})")]
    UnexpectedAgent(AgentId),

    #[error("Agent id 0 is not a valid agent")]
    ZeroAgentId,

    #[error("{0} rules require a target address and port or a target node")]
    MissingTarget(RuleType),

    #[error("{0} rules require a listen port")]
    MissingListenPort(RuleType),

    #[error("Listen port {port} is outside the agent's allowed ports ({allowed})")]
    ListenPortNotAllowed { port: u16, allowed: String },

    #[error("external rules require a server address")]
    MissingServerAddress,

    #[error("entry rules require an exit agent or a set of exit agents")]
    MissingExitAgent,

    #[error("A single exit agent and a set of exit agents are mutually exclusive")]
    ConflictingExitAgents,

    #[error("{0} rules do not take exit agents")]
    UnexpectedExitAgents(RuleType),

    #[error("Exit agent {0} is listed more than once")]
    DuplicateExitAgent(AgentId),

    #[error("Exit agent {0} is also the entry agent")]
    ExitAgentIsEntry(AgentId),

    #[error("{0} rules require at least one chain agent")]
    MissingChainAgents(RuleType),

    #[error("{0} rules do not take chain agents")]
    UnexpectedChainAgents(RuleType),

    #[error("Agent {0} appears more than once in the chain")]
    DuplicateChainAgent(AgentId),

    #[error("Chain agent {0} has no listen port configured")]
    MissingChainPort(AgentId),

    #[error("Port configured for agent {0}, which is not a chain agent")]
    UnexpectedChainPort(AgentId),

    #[error("{0} rules do not take a chain port configuration")]
    UnexpectedChainPortConfig(RuleType),

    #[error("Tunnel options are only valid on chain rules, not {0}")]
    UnexpectedTunnelOptions(RuleType),
}

/// Address family preference when the terminal hop resolves the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum IpVersion {
    #[default]
    Auto,
    Ipv4,
    Ipv6,
}

/// Transport protocol(s) forwarded by a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    TcpUdp,
}

impl Protocol {
    pub fn carries_tcp(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::TcpUdp)
    }

    pub fn carries_udp(&self) -> bool {
        matches!(self, Protocol::Udp | Protocol::TcpUdp)
    }
}

/// Where the terminal hop sends traffic. Opaque to the topology resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Target {
    /// Target host name or IP address
    #[serde(default)]
    pub address: String,
    /// Target port
    #[serde(default)]
    pub port: u16,
    /// Managed node standing in for an explicit address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
    /// Local address the terminal hop binds before dialling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>))]
    pub bind_ip: Option<IpAddr>,
    #[serde(default)]
    pub ip_version: IpVersion,
    #[serde(default)]
    pub protocol: Protocol,
}

impl Target {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    pub fn node(node_id: u64) -> Self {
        Self {
            node_id: Some(node_id),
            ..Default::default()
        }
    }

    fn is_set(&self) -> bool {
        self.node_id.is_some() || (!self.address.trim().is_empty() && self.port != 0)
    }
}

/// A validated traffic-forwarding rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ForwardRule {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) scope: RuleScope,
    pub(crate) rule_type: RuleType,
    pub(crate) agent_id: AgentId,
    pub(crate) listen_port: u16,
    pub(crate) exit_agent_id: AgentId,
    pub(crate) exit_agents: Vec<AgentWeight>,
    pub(crate) load_balance_strategy: LoadBalanceStrategy,
    pub(crate) chain_agent_ids: Vec<AgentId>,
    pub(crate) chain_port_config: BTreeMap<AgentId, u16>,
    pub(crate) tunnel_hops: Option<u32>,
    pub(crate) tunnel_type: TunnelType,
    pub(crate) target: Target,
    pub(crate) server_address: Option<String>,
}

impl ForwardRule {
    pub fn builder(rule_type: RuleType) -> ForwardRuleBuilder {
        ForwardRuleBuilder::new(rule_type)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> RuleScope {
        self.scope
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    /// Entry agent; `0` only for external rules.
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Port the entry agent listens on; `0` when the rule type has no listener.
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Single exit agent of an entry rule, if configured that way.
    pub fn exit_agent_id(&self) -> Option<AgentId> {
        (self.exit_agent_id != 0).then_some(self.exit_agent_id)
    }

    pub fn exit_agents(&self) -> &[AgentWeight] {
        &self.exit_agents
    }

    pub fn load_balance_strategy(&self) -> LoadBalanceStrategy {
        self.load_balance_strategy
    }

    /// Agents after the entry agent, in path order.
    pub fn chain_agent_ids(&self) -> &[AgentId] {
        &self.chain_agent_ids
    }

    pub fn chain_port_config(&self) -> &BTreeMap<AgentId, u16> {
        &self.chain_port_config
    }

    pub fn tunnel_hops(&self) -> Option<u32> {
        self.tunnel_hops
    }

    pub fn tunnel_type(&self) -> TunnelType {
        self.tunnel_type
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn server_address(&self) -> Option<&str> {
        self.server_address.as_deref()
    }
}

/// Builder for [`ForwardRule`]. Nothing is checked until [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ForwardRuleBuilder {
    rule: ForwardRule,
    allowed_listen_ports: PortRange,
    tunnel_type: Option<TunnelType>,
}

impl ForwardRuleBuilder {
    pub fn new(rule_type: RuleType) -> Self {
        Self {
            rule: ForwardRule {
                id: 0,
                name: String::new(),
                scope: RuleScope::System,
                rule_type,
                agent_id: 0,
                listen_port: 0,
                exit_agent_id: 0,
                exit_agents: Vec::new(),
                load_balance_strategy: LoadBalanceStrategy::default(),
                chain_agent_ids: Vec::new(),
                chain_port_config: BTreeMap::new(),
                tunnel_hops: None,
                tunnel_type: TunnelType::default(),
                target: Target::default(),
                server_address: None,
            },
            allowed_listen_ports: PortRange::unconstrained(),
            tunnel_type: None,
        }
    }

    pub fn id(mut self, id: u64) -> Self {
        self.rule.id = id;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.rule.name = name.into();
        self
    }

    pub fn scope(mut self, scope: RuleScope) -> Self {
        self.rule.scope = scope;
        self
    }

    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.rule.agent_id = agent_id;
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.rule.listen_port = port;
        self
    }

    /// Ports the entry agent accepts rules on; the listen port must fall inside.
    pub fn allowed_listen_ports(mut self, ports: PortRange) -> Self {
        self.allowed_listen_ports = ports;
        self
    }

    pub fn exit_agent(mut self, agent_id: AgentId) -> Self {
        self.rule.exit_agent_id = agent_id;
        self
    }

    pub fn exit_agents(mut self, agents: Vec<AgentWeight>) -> Self {
        self.rule.exit_agents = agents;
        self
    }

    pub fn load_balance_strategy(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.rule.load_balance_strategy = strategy;
        self
    }

    pub fn chain_agents(mut self, agents: Vec<AgentId>) -> Self {
        self.rule.chain_agent_ids = agents;
        self
    }

    pub fn chain_port(mut self, agent_id: AgentId, port: u16) -> Self {
        self.rule.chain_port_config.insert(agent_id, port);
        self
    }

    pub fn chain_port_config(mut self, config: BTreeMap<AgentId, u16>) -> Self {
        self.rule.chain_port_config = config;
        self
    }

    pub fn tunnel_hops(mut self, hops: u32) -> Self {
        self.rule.tunnel_hops = Some(hops);
        self
    }

    pub fn tunnel_type(mut self, tunnel_type: TunnelType) -> Self {
        self.tunnel_type = Some(tunnel_type);
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.rule.target = target;
        self
    }

    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.rule.server_address = Some(address.into());
        self
    }

    /// Validate and produce the rule.
    pub fn build(self) -> Result<ForwardRule, RuleError> {
        let mut rule = self.rule;
        let rule_type = rule.rule_type;

        Self::check_agent(&rule)?;

        if rule_type.requires_target() && !rule.target.is_set() {
            return Err(RuleError::MissingTarget(rule_type));
        }

        if rule_type.requires_listen_port() {
            if rule.listen_port == 0 {
                return Err(RuleError::MissingListenPort(rule_type));
            }
            if !self.allowed_listen_ports.contains(rule.listen_port) {
                return Err(RuleError::ListenPortNotAllowed {
                    port: rule.listen_port,
                    allowed: self.allowed_listen_ports.to_string(),
                });
            }
        }

        if rule_type.requires_server_address()
            && rule
                .server_address
                .as_deref()
                .map_or(true, |a| a.trim().is_empty())
        {
            return Err(RuleError::MissingServerAddress);
        }

        Self::check_exits(&rule)?;
        Self::check_chain(&rule)?;

        let has_tunnel_options = rule.tunnel_hops.is_some() || self.tunnel_type.is_some();
        if !rule_type.is_chain() && has_tunnel_options {
            return Err(RuleError::UnexpectedTunnelOptions(rule_type));
        }
        rule.tunnel_type = self.tunnel_type.unwrap_or_default();

        debug!(
            rule_id = rule.id,
            rule_type = %rule_type,
            agent_id = rule.agent_id,
            hops = rule.chain_agent_ids.len(),
            "Built forward rule"
        );

        Ok(rule)
    }

    fn check_agent(rule: &ForwardRule) -> Result<(), RuleError> {
        if rule.rule_type.requires_agent() {
            if rule.agent_id == 0 {
                return Err(RuleError::MissingAgent(rule.rule_type));
            }
        } else if rule.agent_id != 0 {
            return Err(RuleError::UnexpectedAgent(rule.agent_id));
        }
        Ok(())
    }

    fn check_exits(rule: &ForwardRule) -> Result<(), RuleError> {
        let has_single = rule.exit_agent_id != 0;
        let has_multi = !rule.exit_agents.is_empty();

        if !rule.rule_type.requires_exit_agent() {
            if has_single || has_multi {
                return Err(RuleError::UnexpectedExitAgents(rule.rule_type));
            }
            return Ok(());
        }

        match (has_single, has_multi) {
            (false, false) => return Err(RuleError::MissingExitAgent),
            (true, true) => return Err(RuleError::ConflictingExitAgents),
            _ => {}
        }

        if has_single && rule.exit_agent_id == rule.agent_id {
            return Err(RuleError::ExitAgentIsEntry(rule.exit_agent_id));
        }

        let mut seen = HashSet::new();
        for exit in &rule.exit_agents {
            if exit.agent_id == 0 {
                return Err(RuleError::ZeroAgentId);
            }
            if exit.agent_id == rule.agent_id {
                return Err(RuleError::ExitAgentIsEntry(exit.agent_id));
            }
            if !seen.insert(exit.agent_id) {
                return Err(RuleError::DuplicateExitAgent(exit.agent_id));
            }
        }

        Ok(())
    }

    fn check_chain(rule: &ForwardRule) -> Result<(), RuleError> {
        let rule_type = rule.rule_type;

        if !rule_type.requires_chain_agents() {
            if !rule.chain_agent_ids.is_empty() {
                return Err(RuleError::UnexpectedChainAgents(rule_type));
            }
        } else {
            if rule.chain_agent_ids.is_empty() {
                return Err(RuleError::MissingChainAgents(rule_type));
            }

            let mut seen = HashSet::from([rule.agent_id]);
            for &agent_id in &rule.chain_agent_ids {
                if agent_id == 0 {
                    return Err(RuleError::ZeroAgentId);
                }
                if !seen.insert(agent_id) {
                    return Err(RuleError::DuplicateChainAgent(agent_id));
                }
            }
        }

        if !rule_type.requires_chain_port_config() {
            // hybrid chains may still pin ports for their plaintext legs
            if !rule_type.is_chain() && !rule.chain_port_config.is_empty() {
                return Err(RuleError::UnexpectedChainPortConfig(rule_type));
            }
        } else {
            for &agent_id in &rule.chain_agent_ids {
                match rule.chain_port_config.get(&agent_id) {
                    Some(port) if *port != 0 => {}
                    _ => return Err(RuleError::MissingChainPort(agent_id)),
                }
            }
        }

        if let Some(&stray) = rule
            .chain_port_config
            .keys()
            .find(|id| !rule.chain_agent_ids.contains(*id))
        {
            return Err(RuleError::UnexpectedChainPort(stray));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::new("10.0.0.1", 443)
    }

    #[test]
    fn test_build_direct_rule() {
        let rule = ForwardRule::builder(RuleType::Direct)
            .id(1)
            .name("web")
            .agent(7)
            .listen_port(8443)
            .target(target())
            .build()
            .unwrap();

        assert_eq!(rule.rule_type(), RuleType::Direct);
        assert_eq!(rule.agent_id(), 7);
        assert_eq!(rule.exit_agent_id(), None);
        assert!(rule.chain_agent_ids().is_empty());
        assert_eq!(rule.target().port, 443);
    }

    #[test]
    fn test_missing_agent() {
        let err = ForwardRule::builder(RuleType::Direct)
            .listen_port(80)
            .target(target())
            .build()
            .unwrap_err();
        assert_eq!(err, RuleError::MissingAgent(RuleType::Direct));
    }

    #[test]
    fn test_missing_target() {
        let err = ForwardRule::builder(RuleType::Direct)
            .agent(1)
            .listen_port(80)
            .target(Target::new("", 80))
            .build()
            .unwrap_err();
        assert_eq!(err, RuleError::MissingTarget(RuleType::Direct));

        // a managed node is an acceptable target
        assert!(ForwardRule::builder(RuleType::Direct)
            .agent(1)
            .listen_port(80)
            .target(Target::node(12))
            .build()
            .is_ok());
    }

    #[test]
    fn test_listen_port_must_be_allowed() {
        let allowed = PortRange::parse("10000-20000").unwrap();
        let err = ForwardRule::builder(RuleType::Direct)
            .agent(1)
            .listen_port(80)
            .allowed_listen_ports(allowed.clone())
            .target(target())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RuleError::ListenPortNotAllowed {
                port: 80,
                allowed: "10000-20000".to_string()
            }
        );

        assert!(ForwardRule::builder(RuleType::Direct)
            .agent(1)
            .listen_port(15000)
            .allowed_listen_ports(allowed)
            .target(target())
            .build()
            .is_ok());
    }

    #[test]
    fn test_external_rule() {
        let rule = ForwardRule::builder(RuleType::External)
            .server_address("203.0.113.9")
            .target(target())
            .build()
            .unwrap();
        assert_eq!(rule.agent_id(), 0);
        assert_eq!(rule.listen_port(), 0);
        assert_eq!(rule.server_address(), Some("203.0.113.9"));

        let err = ForwardRule::builder(RuleType::External)
            .agent(3)
            .server_address("203.0.113.9")
            .target(target())
            .build()
            .unwrap_err();
        assert_eq!(err, RuleError::UnexpectedAgent(3));

        let err = ForwardRule::builder(RuleType::External)
            .target(target())
            .build()
            .unwrap_err();
        assert_eq!(err, RuleError::MissingServerAddress);
    }

    #[test]
    fn test_entry_exit_agents() {
        let base = || {
            ForwardRule::builder(RuleType::Entry)
                .agent(1)
                .listen_port(9000)
                .target(target())
        };

        assert_eq!(base().build().unwrap_err(), RuleError::MissingExitAgent);
        assert_eq!(
            base()
                .exit_agent(2)
                .exit_agents(vec![AgentWeight::new(3, 1)])
                .build()
                .unwrap_err(),
            RuleError::ConflictingExitAgents
        );
        assert_eq!(
            base().exit_agent(1).build().unwrap_err(),
            RuleError::ExitAgentIsEntry(1)
        );
        assert_eq!(
            base()
                .exit_agents(vec![AgentWeight::new(3, 1), AgentWeight::new(3, 0)])
                .build()
                .unwrap_err(),
            RuleError::DuplicateExitAgent(3)
        );

        let rule = base()
            .exit_agents(vec![AgentWeight::new(3, 10), AgentWeight::new(4, 0)])
            .load_balance_strategy(LoadBalanceStrategy::Weighted)
            .build()
            .unwrap();
        assert_eq!(rule.exit_agents().len(), 2);
        assert_eq!(rule.load_balance_strategy(), LoadBalanceStrategy::Weighted);
    }

    #[test]
    fn test_exit_agents_rejected_on_other_types() {
        let err = ForwardRule::builder(RuleType::Direct)
            .agent(1)
            .listen_port(80)
            .exit_agent(2)
            .target(target())
            .build()
            .unwrap_err();
        assert_eq!(err, RuleError::UnexpectedExitAgents(RuleType::Direct));
    }

    #[test]
    fn test_chain_agents() {
        let base = || {
            ForwardRule::builder(RuleType::Chain)
                .agent(1)
                .listen_port(9000)
                .target(target())
        };

        assert_eq!(
            base().build().unwrap_err(),
            RuleError::MissingChainAgents(RuleType::Chain)
        );
        assert_eq!(
            base().chain_agents(vec![2, 1]).build().unwrap_err(),
            RuleError::DuplicateChainAgent(1)
        );
        assert_eq!(
            base().chain_agents(vec![2, 0]).build().unwrap_err(),
            RuleError::ZeroAgentId
        );

        let rule = base()
            .chain_agents(vec![2, 3])
            .tunnel_hops(1)
            .tunnel_type(TunnelType::TlsSmux)
            .build()
            .unwrap();
        assert_eq!(rule.tunnel_hops(), Some(1));
        assert_eq!(rule.tunnel_type(), TunnelType::TlsSmux);
    }

    #[test]
    fn test_direct_chain_port_config_is_exhaustive() {
        let base = || {
            ForwardRule::builder(RuleType::DirectChain)
                .agent(1)
                .listen_port(9000)
                .chain_agents(vec![2, 3])
                .target(target())
        };

        assert_eq!(
            base().chain_port(2, 7001).build().unwrap_err(),
            RuleError::MissingChainPort(3)
        );
        assert_eq!(
            base()
                .chain_port(2, 7001)
                .chain_port(3, 0)
                .build()
                .unwrap_err(),
            RuleError::MissingChainPort(3)
        );
        assert_eq!(
            base()
                .chain_port(2, 7001)
                .chain_port(3, 7002)
                .chain_port(9, 7003)
                .build()
                .unwrap_err(),
            RuleError::UnexpectedChainPort(9)
        );
        assert!(base()
            .chain_port(2, 7001)
            .chain_port(3, 7002)
            .build()
            .is_ok());
    }

    #[test]
    fn test_tunnel_options_only_on_chain() {
        let err = ForwardRule::builder(RuleType::DirectChain)
            .agent(1)
            .listen_port(9000)
            .chain_agents(vec![2])
            .chain_port(2, 7001)
            .tunnel_hops(1)
            .target(target())
            .build()
            .unwrap_err();
        assert_eq!(err, RuleError::UnexpectedTunnelOptions(RuleType::DirectChain));
    }

    #[test]
    fn test_explicit_default_tunnel_type_rejected_outside_chains() {
        for tunnel_type in [TunnelType::Ws, TunnelType::Tls] {
            let err = ForwardRule::builder(RuleType::Direct)
                .agent(1)
                .listen_port(9000)
                .tunnel_type(tunnel_type)
                .target(target())
                .build()
                .unwrap_err();
            assert_eq!(err, RuleError::UnexpectedTunnelOptions(RuleType::Direct));
        }

        let rule = ForwardRule::builder(RuleType::Chain)
            .agent(1)
            .listen_port(9000)
            .chain_agents(vec![2])
            .target(target())
            .build()
            .unwrap();
        assert_eq!(rule.tunnel_type(), TunnelType::Ws);
    }

    #[test]
    fn test_port_config_rejected_outside_chains() {
        let err = ForwardRule::builder(RuleType::Direct)
            .agent(1)
            .listen_port(9000)
            .chain_port(2, 7001)
            .target(target())
            .build()
            .unwrap_err();
        assert_eq!(err, RuleError::UnexpectedChainPortConfig(RuleType::Direct));
    }
}
