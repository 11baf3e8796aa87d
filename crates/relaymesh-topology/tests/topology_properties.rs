//! Property checks for chain topology resolution
//!
//! Walks every chain shape up to a handful of hops and every tunnel hop count
//! and checks the resolver's structural guarantees.

use relaymesh_topology::{
    AgentId, ForwardRule, HopMode, NextHop, Outbound, RuleType, Target, TopologyError,
};

const MAX_CHAIN_AGENTS: usize = 6;

fn chain_agents(n: usize) -> Vec<AgentId> {
    (2..2 + n as AgentId).collect()
}

fn tunnel_chain(n: usize, hops: Option<u32>) -> ForwardRule {
    let mut builder = ForwardRule::builder(RuleType::Chain)
        .agent(1)
        .listen_port(10000)
        .chain_agents(chain_agents(n))
        .target(Target::new("198.51.100.7", 22));
    if let Some(hops) = hops {
        builder = builder.tunnel_hops(hops);
    }
    builder.build().expect("valid chain rule")
}

fn direct_chain(n: usize) -> ForwardRule {
    let mut builder = ForwardRule::builder(RuleType::DirectChain)
        .agent(1)
        .listen_port(10000)
        .chain_agents(chain_agents(n))
        .target(Target::new("198.51.100.7", 22));
    for id in chain_agents(n) {
        builder = builder.chain_port(id, 7000 + id as u16);
    }
    builder.build().expect("valid direct_chain rule")
}

#[test]
fn test_full_tunnel_chains_tunnel_everywhere() {
    for n in 1..=MAX_CHAIN_AGENTS {
        let mut hop_counts = vec![None, Some(0)];
        hop_counts.extend((n as u32..n as u32 + 3).map(Some));

        for hops in hop_counts {
            let rule = tunnel_chain(n, hops);
            for p in 0..rule.chain_len() {
                assert_eq!(
                    rule.hop_mode(p),
                    HopMode::Tunnel,
                    "n={} hops={:?} position={}",
                    n,
                    hops,
                    p
                );
            }
        }
    }
}

#[test]
fn test_hybrid_chains_have_exactly_one_boundary() {
    for n in 2..=MAX_CHAIN_AGENTS {
        for hops in 1..n as u32 {
            let rule = tunnel_chain(n, Some(hops));
            assert!(rule.is_hybrid_chain());

            let boundaries: Vec<usize> = (0..rule.chain_len())
                .filter(|p| rule.hop_mode(*p) == HopMode::Boundary)
                .collect();
            assert_eq!(boundaries, vec![hops as usize], "n={} hops={}", n, hops);

            // tunnel strictly before the boundary, direct strictly after it
            for p in 0..rule.chain_len() {
                let expected = match p.cmp(&(hops as usize)) {
                    std::cmp::Ordering::Less => HopMode::Tunnel,
                    std::cmp::Ordering::Equal => HopMode::Boundary,
                    std::cmp::Ordering::Greater => HopMode::Direct,
                };
                assert_eq!(rule.hop_mode(p), expected, "n={} hops={} p={}", n, hops, p);
            }
        }
    }
}

#[test]
fn test_direct_chains_never_tunnel() {
    for n in 1..=MAX_CHAIN_AGENTS {
        let rule = direct_chain(n);
        for p in 0..rule.chain_len() {
            assert_eq!(rule.hop_mode(p), HopMode::Direct);
            assert!(!rule.needs_tunnel_at_position(p));
        }
    }
}

#[test]
fn test_chain_position_inverts_indexing() {
    for n in 1..=MAX_CHAIN_AGENTS {
        for rule in [tunnel_chain(n, None), direct_chain(n)] {
            let full: Vec<AgentId> = rule.full_chain().collect();
            for id in &full {
                let position = rule.chain_position(*id).expect("member of chain");
                assert_eq!(full[position], *id);
            }
            assert_eq!(rule.chain_position(1000), None);
            assert_eq!(rule.chain_position(0), None);
        }
    }
}

#[test]
fn test_exactly_one_last_hop() {
    for n in 1..=MAX_CHAIN_AGENTS {
        for rule in [tunnel_chain(n, Some(1)), direct_chain(n)] {
            let last: Vec<AgentId> = rule
                .full_chain()
                .filter(|id| rule.is_last_in_chain(*id))
                .collect();
            assert_eq!(last, vec![*rule.chain_agent_ids().last().unwrap()]);
        }
    }
}

#[test]
fn test_direct_chain_walk_reaches_end() {
    for n in 1..=MAX_CHAIN_AGENTS {
        let rule = direct_chain(n);
        let mut current = rule.agent_id();
        let mut visited = vec![current];

        loop {
            match rule.next_hop_for_direct_chain_safe(current).unwrap() {
                NextHop::EndOfChain => break,
                NextHop::Relay { agent_id, port } => {
                    assert_eq!(port, 7000 + agent_id as u16);
                    visited.push(agent_id);
                    current = agent_id;
                }
            }
        }

        assert_eq!(visited, rule.full_chain().collect::<Vec<_>>());
        assert!(rule.is_last_in_chain(current));
    }
}

#[test]
fn test_direct_chain_scenario() {
    let rule = ForwardRule::builder(RuleType::DirectChain)
        .agent(1)
        .listen_port(10000)
        .chain_agents(vec![2, 3])
        .chain_port(2, 7001)
        .chain_port(3, 7002)
        .target(Target::new("198.51.100.7", 22))
        .build()
        .unwrap();

    assert_eq!(
        rule.next_hop_for_direct_chain_safe(1),
        Ok(NextHop::Relay {
            agent_id: 2,
            port: 7001
        })
    );
    assert_eq!(
        rule.next_hop_for_direct_chain_safe(2),
        Ok(NextHop::Relay {
            agent_id: 3,
            port: 7002
        })
    );
    assert_eq!(rule.next_hop_for_direct_chain_safe(3), Ok(NextHop::EndOfChain));
    assert_eq!(
        rule.next_hop_for_direct_chain_safe(99),
        Err(TopologyError::AgentNotInChain(99))
    );
}

#[test]
fn test_hybrid_chain_scenario() {
    let rule = tunnel_chain(3, Some(2));
    assert_eq!(rule.hop_mode(0), HopMode::Tunnel);
    assert_eq!(rule.hop_mode(1), HopMode::Tunnel);
    assert_eq!(rule.hop_mode(2), HopMode::Boundary);
    assert_eq!(rule.hop_mode(3), HopMode::Direct);
}

#[test]
fn test_hop_plans_link_up() {
    for n in 1..=MAX_CHAIN_AGENTS {
        for hops in [None, Some(1), Some(n as u32 - 1)] {
            let rule = tunnel_chain(n, hops);
            let plans: Vec<_> = rule
                .full_chain()
                .map(|id| rule.hop_plan(id).unwrap())
                .collect();

            for pair in plans.windows(2) {
                let next = match pair[0].outbound {
                    Outbound::Tunnel { agent_id, .. } => {
                        assert!(pair[1].inbound_tunnel);
                        agent_id
                    }
                    Outbound::Direct { agent_id, .. } => {
                        assert!(!pair[1].inbound_tunnel);
                        agent_id
                    }
                    Outbound::Target => panic!("only the last hop dials the target"),
                };
                assert_eq!(next, pair[1].agent_id);
            }

            let last = plans.last().unwrap();
            assert!(last.is_last);
            assert_eq!(last.outbound, Outbound::Target);
        }
    }
}
