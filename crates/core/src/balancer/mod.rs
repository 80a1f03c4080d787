//! Load Balancer (§4.8): selects an agent for a ready task.

use std::collections::HashSet;

use crate::agent::AgentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RoundRobin,
    LeastLoaded,
    CapabilityWeighted,
    Adaptive,
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveWeights {
    pub load: f64,
    pub success_rate: f64,
    pub duration: f64,
    pub recent_failures: f64,
}

impl Default for AdaptiveWeights {
    fn default() -> Self {
        Self {
            load: 0.4,
            success_rate: 0.3,
            duration: 0.2,
            recent_failures: 0.1,
        }
    }
}

/// Observed performance an agent brings into an adaptive-score computation;
/// sourced from the Performance Monitor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentPerformance {
    pub success_rate: f64,
    pub average_duration_secs: f64,
    pub recent_failures: f64,
}

pub struct LoadBalancer {
    algorithm: Algorithm,
    weights: AdaptiveWeights,
    round_robin_cursor: parking_lot::Mutex<usize>,
}

impl LoadBalancer {
    pub fn new(algorithm: Algorithm, weights: AdaptiveWeights) -> Self {
        Self {
            algorithm,
            weights,
            round_robin_cursor: parking_lot::Mutex::new(0),
        }
    }

    /// Filters to agents that cover `required_capabilities` and are not at
    /// `maxConcurrentTasks`.
    pub fn eligible<'a>(
        &self,
        agents: &'a [AgentRecord],
        required_capabilities: &HashSet<String>,
    ) -> Vec<&'a AgentRecord> {
        agents
            .iter()
            .filter(|a| {
                required_capabilities.iter().all(|c| a.capabilities.contains(c))
                    && a.current_tasks < a.max_concurrent_tasks
            })
            .collect()
    }

    /// Selects the winner from an eligible set, tie-broken by agent id.
    /// Returns `None` if the set is empty — the task stays `queued`.
    pub fn select(
        &self,
        eligible: &[&AgentRecord],
        performance: impl Fn(&AgentRecord) -> AgentPerformance,
    ) -> Option<uuid::Uuid> {
        if eligible.is_empty() {
            return None;
        }

        let mut sorted = eligible.to_vec();
        sorted.sort_by_key(|a| a.id);

        let winner = match self.algorithm {
            Algorithm::RoundRobin => {
                let mut cursor = self.round_robin_cursor.lock();
                let pick = sorted[*cursor % sorted.len()];
                *cursor = (*cursor + 1) % sorted.len().max(1);
                pick
            }
            Algorithm::LeastLoaded => *sorted
                .iter()
                .min_by(|a, b| {
                    a.load_fraction()
                        .partial_cmp(&b.load_fraction())
                        .unwrap()
                        .then_with(|| a.id.cmp(&b.id))
                })
                .unwrap(),
            Algorithm::CapabilityWeighted => {
                // Prefer the agent whose capability set is closest in size
                // to the smallest eligible set (a tighter capability match).
                *sorted
                    .iter()
                    .min_by_key(|a| (a.capabilities.len(), a.id))
                    .unwrap()
            }
            Algorithm::Adaptive => *sorted
                .iter()
                .max_by(|a, b| {
                    self.adaptive_score(a, performance(a))
                        .partial_cmp(&self.adaptive_score(b, performance(b)))
                        .unwrap()
                        .then_with(|| b.id.cmp(&a.id))
                })
                .unwrap(),
        };

        Some(winner.id)
    }

    fn adaptive_score(&self, agent: &AgentRecord, perf: AgentPerformance) -> f64 {
        let w = self.weights;
        let inverse_duration = if perf.average_duration_secs > 0.0 {
            1.0 / perf.average_duration_secs
        } else {
            0.0
        };
        w.load * (1.0 - agent.load_fraction()) + w.success_rate * perf.success_rate
            + w.duration * inverse_duration
            - w.recent_failures * perf.recent_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn agent(caps: &[&str], current: u32, max: u32) -> AgentRecord {
        crate::agent::AgentRecord::new(
            "worker",
            caps.iter().map(|s| s.to_string()).collect(),
            max,
            "1.0",
        )
        .tap_current(current)
    }

    trait TapCurrent {
        fn tap_current(self, current: u32) -> Self;
    }
    impl TapCurrent for AgentRecord {
        fn tap_current(mut self, current: u32) -> Self {
            self.current_tasks = current;
            self
        }
    }

    #[test]
    fn capability_filter_picks_the_matching_agent() {
        let a1 = agent(&["base"], 0, 4);
        let a2 = agent(&["base", "messaging"], 0, 4);
        let agents = vec![a1, a2.clone()];
        let balancer = LoadBalancer::new(Algorithm::LeastLoaded, AdaptiveWeights::default());

        let required: HashSet<String> = ["messaging".into()].into_iter().collect();
        let eligible = balancer.eligible(&agents, &required);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, a2.id);

        let winner = balancer.select(&eligible, |_| AgentPerformance::default());
        assert_eq!(winner, Some(a2.id));
    }

    #[test]
    fn least_loaded_prefers_lower_fraction() {
        let a1 = agent(&["base"], 3, 4);
        let a2 = agent(&["base"], 0, 4);
        let agents = vec![a1, a2.clone()];
        let balancer = LoadBalancer::new(Algorithm::LeastLoaded, AdaptiveWeights::default());
        let eligible = balancer.eligible(&agents, &HashSet::new());
        let winner = balancer.select(&eligible, |_| AgentPerformance::default());
        assert_eq!(winner, Some(a2.id));
    }

    #[test]
    fn no_eligible_agents_returns_none() {
        let balancer = LoadBalancer::new(Algorithm::RoundRobin, AdaptiveWeights::default());
        let winner = balancer.select(&[], |_| AgentPerformance::default());
        assert_eq!(winner, None);
    }
}
