//! relaymesh - inspect forward-rule topologies
//!
//! Loads a rules file and answers the questions a relay agent asks at
//! connection time: where am I in this rule's chain, do I tunnel, and who do I
//! hand traffic to next.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use relaymesh_cli::RulesFile;
use relaymesh_topology::{AgentId, ForwardRule, Outbound, PortRange};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// relaymesh - forward-rule topology inspector
#[derive(Parser, Debug)]
#[command(name = "relaymesh")]
#[command(about = "Inspect relay forwarding rules: hop modes, next hops and exit selection")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Rules file (YAML)
    #[arg(
        long,
        short = 'r',
        global = true,
        env = "RELAYMESH_RULES",
        default_value = "relaymesh.yaml"
    )]
    rules: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate every rule in the rules file
    Validate,

    /// Show how an agent handles its hop of a chain rule
    #[command(long_about = r#"
Show how an agent handles its hop of a chain or direct_chain rule: its
position, hop mode (tunnel, direct or boundary) and the outbound leg.

EXAMPLES:
  # Hop plan for agent 3 on rule "hk-to-us"
  relaymesh plan --rule hk-to-us --agent 3

  # Same, as JSON
  relaymesh plan --rule hk-to-us --agent 3 --json
"#)]
    Plan {
        /// Rule name
        #[arg(long)]
        rule: String,

        /// Agent ID
        #[arg(long)]
        agent: AgentId,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the whole path of a chain rule, one line per hop
    Path {
        /// Rule name
        #[arg(long)]
        rule: String,
    },

    /// Show exit agents of an entry rule and which one would be selected
    Exits {
        /// Rule name
        #[arg(long)]
        rule: String,

        /// Agents to treat as unavailable
        #[arg(long = "down", value_delimiter = ',')]
        down: Vec<AgentId>,
    },

    /// Port range utilities
    Ports {
        #[command(subcommand)]
        command: PortCommands,
    },

    /// Print the OpenAPI schemas of the rule and topology types
    #[cfg(feature = "openapi")]
    Schema,
}

#[derive(Subcommand, Debug)]
enum PortCommands {
    /// Parse a port range and print its canonical form
    Parse {
        /// Port specification (e.g., "80,443,8000-9000")
        spec: String,
    },

    /// Pick random ports from a range
    Pick {
        /// Port specification (e.g., "80,443,8000-9000")
        spec: String,

        /// Number of ports to pick
        #[arg(long, default_value = "1")]
        count: usize,

        /// Range to pick from when the specification is empty
        #[arg(long, default_value = "10000-60000")]
        default_range: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Validate => handle_validate(&cli.rules),
        Commands::Plan { rule, agent, json } => handle_plan(&cli.rules, &rule, agent, json),
        Commands::Path { rule } => handle_path(&cli.rules, &rule),
        Commands::Exits { rule, down } => handle_exits(&cli.rules, &rule, &down),
        Commands::Ports { command } => handle_ports(command),
        #[cfg(feature = "openapi")]
        Commands::Schema => {
            println!("{}", relaymesh_cli::schema::schema_json()?);
            Ok(())
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn handle_validate(path: &Path) -> Result<()> {
    let file = RulesFile::load(path)?;

    let mut invalid = 0;
    for entry in &file.rules {
        match file.build(entry) {
            Ok(rule) => println!("✅ {:<24} {}", entry.name, describe(&rule)),
            Err(e) => {
                invalid += 1;
                println!("❌ {:<24} {:#}", entry.name, e);
            }
        }
    }

    if invalid > 0 {
        return Err(anyhow!(
            "{} of {} rules are invalid",
            invalid,
            file.rules.len()
        ));
    }

    info!("All {} rules are valid", file.rules.len());
    Ok(())
}

fn describe(rule: &ForwardRule) -> String {
    let mut desc = format!("{} on agent {}", rule.rule_type(), rule.agent_id());
    if rule.rule_type().requires_chain_agents() {
        let path: Vec<String> = rule.full_chain().map(|id| id.to_string()).collect();
        desc.push_str(&format!(" via {}", path.join(" -> ")));
        if rule.is_hybrid_chain() {
            if let Some(hops) = rule.tunnel_hops() {
                desc.push_str(&format!(" (tunnel first {} hops)", hops));
            }
        }
    }
    let exits = rule.all_exit_agent_ids();
    if !exits.is_empty() {
        desc.push_str(&format!(
            " exits {:?} ({})",
            exits,
            rule.load_balance_strategy()
        ));
    }
    desc
}

fn handle_plan(path: &Path, name: &str, agent: AgentId, json: bool) -> Result<()> {
    let rule = RulesFile::load(path)?.rule(name)?;
    let plan = rule
        .hop_plan(agent)
        .with_context(|| format!("Cannot plan agent {} on rule '{}'", agent, name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Rule:      {} ({})", rule.name(), rule.rule_type());
    println!("Agent:     {}", plan.agent_id);
    println!("Position:  {} of {}", plan.position, rule.chain_len());
    println!("Mode:      {}", plan.mode);
    println!("Last hop:  {}", plan.is_last);
    println!("Outbound:  {}", describe_outbound(&rule, &plan.outbound));
    Ok(())
}

fn describe_outbound(rule: &ForwardRule, outbound: &Outbound) -> String {
    match outbound {
        Outbound::Target => {
            let target = rule.target();
            match target.node_id {
                Some(node) => format!("target node {}", node),
                None => format!("target {}:{}", target.address, target.port),
            }
        }
        Outbound::Tunnel {
            agent_id,
            tunnel_type,
        } => format!("{} tunnel to agent {}", tunnel_type, agent_id),
        Outbound::Direct {
            agent_id,
            port: Some(port),
        } => format!("direct to agent {} port {}", agent_id, port),
        Outbound::Direct {
            agent_id,
            port: None,
        } => format!("direct to agent {} (default port)", agent_id),
    }
}

fn handle_path(path: &Path, name: &str) -> Result<()> {
    let rule = RulesFile::load(path)?.rule(name)?;
    if !rule.rule_type().requires_chain_agents() {
        return Err(anyhow!(
            "Rule '{}' is a {} rule and has no chain",
            name,
            rule.rule_type()
        ));
    }

    for agent in rule.full_chain() {
        let plan = rule.hop_plan(agent)?;
        println!(
            "[{}] agent {:<6} {:<9} -> {}",
            plan.position,
            agent,
            plan.mode,
            describe_outbound(&rule, &plan.outbound)
        );
    }
    Ok(())
}

fn handle_exits(path: &Path, name: &str, down: &[AgentId]) -> Result<()> {
    let rule = RulesFile::load(path)?.rule(name)?;
    let selector = rule.exit_selector();
    if selector.is_empty() {
        return Err(anyhow!("Rule '{}' has no exit agents", name));
    }

    let down: HashSet<AgentId> = down.iter().copied().collect();
    println!("Strategy:  {}", selector.strategy());
    for candidate in selector.candidates() {
        let state = if down.contains(&candidate.agent_id) {
            "down"
        } else if candidate.is_backup() {
            "backup"
        } else {
            "up"
        };
        println!(
            "  agent {:<6} weight {:<4} {}",
            candidate.agent_id, candidate.weight, state
        );
    }
    println!("Failover order: {:?}", selector.failover_order());

    match selector.select(|id| !down.contains(&id)) {
        Some(agent) => println!("Selected:  agent {}", agent),
        None => {
            warn!(rule = %name, "Every exit agent is down");
            println!("Selected:  none (all exit agents down)");
        }
    }
    Ok(())
}

fn handle_ports(command: PortCommands) -> Result<()> {
    match command {
        PortCommands::Parse { spec } => {
            let range = PortRange::parse(&spec)
                .with_context(|| format!("Invalid port range: {}", spec))?;
            if range.is_unconstrained() {
                println!("unconstrained (all ports allowed)");
            } else {
                println!("{}", range);
                println!(
                    "{} ports in {} intervals",
                    range.total_ports(),
                    range.intervals().len()
                );
            }
        }
        PortCommands::Pick {
            spec,
            count,
            default_range,
        } => {
            let mut range = PortRange::parse(&spec)
                .with_context(|| format!("Invalid port range: {}", spec))?;
            if range.is_unconstrained() {
                info!("Empty port range, picking from {}", default_range);
                range = PortRange::parse(&default_range)
                    .with_context(|| format!("Invalid default range: {}", default_range))?;
            }
            for _ in 0..count {
                let port = range
                    .random_port()
                    .ok_or_else(|| anyhow!("No ports to pick from"))?;
                println!("{}", port);
            }
        }
    }
    Ok(())
}
