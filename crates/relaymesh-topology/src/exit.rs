//! Exit-agent selection for entry rules
//!
//! An entry rule names either a single exit agent or a weighted set of them.
//! [`ExitSelector`] presents both shapes uniformly and applies the rule's
//! [`LoadBalanceStrategy`] given the caller's view of which agents are
//! currently reachable.

use rand::Rng;
use tracing::{debug, warn};

use crate::load_balance::{AgentWeight, LoadBalanceStrategy};
use crate::rule::ForwardRule;
use crate::AgentId;

impl ForwardRule {
    pub fn has_multiple_exit_agents(&self) -> bool {
        !self.exit_agents.is_empty()
    }

    /// Exit agents in stored order, whether configured as a set or singly.
    pub fn all_exit_agent_ids(&self) -> Vec<AgentId> {
        if self.has_multiple_exit_agents() {
            self.exit_agents.iter().map(|e| e.agent_id).collect()
        } else if self.exit_agent_id != 0 {
            vec![self.exit_agent_id]
        } else {
            Vec::new()
        }
    }

    /// Selector over this rule's exit candidates. A single exit agent is
    /// treated as one candidate of weight 1.
    pub fn exit_selector(&self) -> ExitSelector {
        let candidates = if self.has_multiple_exit_agents() {
            self.exit_agents.clone()
        } else if self.exit_agent_id != 0 {
            vec![AgentWeight::new(self.exit_agent_id, 1)]
        } else {
            Vec::new()
        };
        ExitSelector::new(self.load_balance_strategy, candidates)
    }
}

/// Chooses an exit agent among weighted candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSelector {
    strategy: LoadBalanceStrategy,
    candidates: Vec<AgentWeight>,
}

impl ExitSelector {
    pub fn new(strategy: LoadBalanceStrategy, candidates: Vec<AgentWeight>) -> Self {
        Self {
            strategy,
            candidates,
        }
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    pub fn candidates(&self) -> &[AgentWeight] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates by descending weight; equal weights keep stored order, so
    /// zero-weight backups always come last.
    pub fn failover_order(&self) -> Vec<AgentId> {
        let mut ordered = self.candidates.clone();
        ordered.sort_by(|a, b| b.weight.cmp(&a.weight));
        ordered.into_iter().map(|c| c.agent_id).collect()
    }

    /// Pick an exit agent using the thread-local RNG.
    pub fn select<F>(&self, is_available: F) -> Option<AgentId>
    where
        F: Fn(AgentId) -> bool,
    {
        self.select_with(&mut rand::thread_rng(), is_available)
    }

    /// Pick an exit agent among those for which `is_available` holds.
    ///
    /// Zero-weight backups are only returned when no positive-weight candidate
    /// is available. `None` means no candidate is available at all.
    pub fn select_with<R, F>(&self, rng: &mut R, is_available: F) -> Option<AgentId>
    where
        R: Rng + ?Sized,
        F: Fn(AgentId) -> bool,
    {
        let selected = match self.strategy {
            LoadBalanceStrategy::Failover => self
                .failover_order()
                .into_iter()
                .find(|id| is_available(*id)),
            LoadBalanceStrategy::Weighted => self.select_weighted(rng, &is_available),
        };

        match selected {
            Some(agent_id) => debug!(
                agent_id,
                strategy = %self.strategy,
                "Selected exit agent"
            ),
            None if !self.candidates.is_empty() => warn!(
                candidates = self.candidates.len(),
                strategy = %self.strategy,
                "No exit agent available"
            ),
            None => {}
        }

        selected
    }

    fn select_weighted<R, F>(&self, rng: &mut R, is_available: &F) -> Option<AgentId>
    where
        R: Rng + ?Sized,
        F: Fn(AgentId) -> bool,
    {
        let eligible: Vec<&AgentWeight> = self
            .candidates
            .iter()
            .filter(|c| !c.is_backup() && is_available(c.agent_id))
            .collect();

        let total_weight: u64 = eligible.iter().map(|c| u64::from(c.weight)).sum();
        if total_weight == 0 {
            return self
                .candidates
                .iter()
                .filter(|c| c.is_backup())
                .map(|c| c.agent_id)
                .find(|id| is_available(*id));
        }

        let target = rng.gen_range(0..total_weight);
        let mut cumulative: u64 = 0;
        for candidate in &eligible {
            cumulative += u64::from(candidate.weight);
            if target < cumulative {
                return Some(candidate.agent_id);
            }
        }

        eligible.last().map(|c| c.agent_id)
    }
}
