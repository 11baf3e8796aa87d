//! Rules file support
//!
//! Forward rules are described in a YAML file together with the agents they
//! run on:
//!
//! ```yaml
//! agents:
//!   - id: 1
//!     name: hk-entry
//!     port_range: "10000-20000"
//!
//! rules:
//!   - name: hk-to-us
//!     type: chain
//!     agent: 1
//!     listen_port: 10001
//!     chain: [2, 3, 4]
//!     tunnel_hops: 2
//!     tunnel_type: tls
//!     target:
//!       address: example.com
//!       port: 443
//! ```
//!
//! Each entry goes through the validating rule builder, so a file that loads
//! only yields well-formed rules.

use anyhow::{anyhow, Context, Result};
use relaymesh_topology::{
    AgentId, AgentWeight, ForwardRule, LoadBalanceStrategy, PortRange, RuleScope, RuleType,
    Target, TunnelType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Rules file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesFile {
    /// Known agents and the ports they accept rules on
    #[serde(default)]
    pub agents: Vec<AgentEntry>,

    /// Rule definitions
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// An agent declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: AgentId,

    #[serde(default)]
    pub name: Option<String>,

    /// Allowed listen ports, e.g. "80,443,10000-20000". Empty allows all.
    #[serde(default)]
    pub port_range: String,
}

/// A single rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Rule name (required, must be unique)
    pub name: String,

    #[serde(default)]
    pub id: u64,

    #[serde(rename = "type")]
    pub rule_type: RuleType,

    /// Owning user; omitted for system rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,

    /// Entry agent
    #[serde(default)]
    pub agent: AgentId,

    #[serde(default)]
    pub listen_port: u16,

    #[serde(default)]
    pub exit_agent: AgentId,

    #[serde(default)]
    pub exit_agents: Vec<AgentWeight>,

    /// failover or weighted; anything else falls back to failover
    #[serde(default)]
    pub load_balance: String,

    /// Agents after the entry agent, in path order
    #[serde(default)]
    pub chain: Vec<AgentId>,

    /// Listen port per chain agent
    #[serde(default)]
    pub chain_ports: BTreeMap<AgentId, u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_hops: Option<u32>,

    /// ws, tls, ws_smux or tls_smux
    #[serde(default)]
    pub tunnel_type: String,

    #[serde(default)]
    pub target: Target,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
}

impl RulesFile {
    /// Load a rules file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path.display()))?;

        let file = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse rules file: {}", path.display()))?;

        info!(
            "Loaded {} rules and {} agents from {}",
            file.rules.len(),
            file.agents.len(),
            path.display()
        );
        Ok(file)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(content).context("Invalid YAML")?;
        file.check_unique_names()?;
        Ok(file)
    }

    fn check_unique_names(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(anyhow!("Duplicate rule name: {}", rule.name));
            }
        }
        Ok(())
    }

    /// Allowed listen ports of an agent; unconstrained when the agent is not
    /// declared.
    pub fn agent_port_range(&self, agent_id: AgentId) -> Result<PortRange> {
        match self.agents.iter().find(|a| a.id == agent_id) {
            Some(agent) => PortRange::parse(&agent.port_range)
                .with_context(|| format!("Invalid port range for agent {}", agent_id)),
            None => Ok(PortRange::unconstrained()),
        }
    }

    /// Build the named rule
    pub fn rule(&self, name: &str) -> Result<ForwardRule> {
        let entry = self
            .rules
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow!("No rule named '{}'", name))?;
        self.build(entry)
    }

    /// Build every rule, failing on the first invalid one
    pub fn build_all(&self) -> Result<Vec<ForwardRule>> {
        self.rules.iter().map(|entry| self.build(entry)).collect()
    }

    /// Build a rule entry through the validating builder
    pub fn build(&self, entry: &RuleEntry) -> Result<ForwardRule> {
        let scope = match entry.user_id {
            Some(user_id) => RuleScope::User { user_id },
            None => RuleScope::System,
        };

        let mut builder = ForwardRule::builder(entry.rule_type)
            .id(entry.id)
            .name(&entry.name)
            .scope(scope)
            .agent(entry.agent)
            .listen_port(entry.listen_port)
            .allowed_listen_ports(self.agent_port_range(entry.agent)?)
            .exit_agent(entry.exit_agent)
            .exit_agents(entry.exit_agents.clone())
            .load_balance_strategy(LoadBalanceStrategy::parse_or_default(&entry.load_balance))
            .chain_agents(entry.chain.clone())
            .chain_port_config(entry.chain_ports.clone())
            .target(entry.target.clone());

        if !entry.tunnel_type.trim().is_empty() {
            let tunnel_type: TunnelType = entry
                .tunnel_type
                .parse()
                .with_context(|| format!("Rule '{}'", entry.name))?;
            builder = builder.tunnel_type(tunnel_type);
        }

        if let Some(hops) = entry.tunnel_hops {
            builder = builder.tunnel_hops(hops);
        }
        if let Some(address) = &entry.server_address {
            builder = builder.server_address(address);
        }

        let rule = builder
            .build()
            .with_context(|| format!("Invalid rule '{}'", entry.name))?;

        debug!(name = %entry.name, rule_type = %entry.rule_type, "Validated rule");
        Ok(rule)
    }
}
