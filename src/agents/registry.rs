//! The run's agent roster: identities, weights and activation.

use crate::agents::configurable::{AgentSpec, DomainAgent};
use crate::agents::Agent;
use crate::llm::Reasoner;
use crate::types::{AppError, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Ordered set of uniquely named agents with their weights.
///
/// Weight 0 deactivates an agent: it stays in the roster and the weights map
/// but is never dispatched.
pub struct AgentRoster {
    agents: Vec<Arc<dyn Agent>>,
    weights: BTreeMap<String, f64>,
}

impl AgentRoster {
    /// Builds a roster, rejecting duplicate names and invalid weights.
    /// Agents without an explicit weight get 1.0.
    pub fn new(agents: Vec<Arc<dyn Agent>>, weights: &BTreeMap<String, f64>) -> Result<Self> {
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.name().to_string()) {
                return Err(AppError::InvalidInput(format!(
                    "duplicate agent name '{}'",
                    agent.name()
                )));
            }
        }

        for (name, weight) in weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(AppError::InvalidInput(format!(
                    "weight for '{}' must be a non-negative number, got {}",
                    name, weight
                )));
            }
            if !seen.contains(name) {
                tracing::warn!(agent = %name, "Weight given for an agent that is not in the roster");
            }
        }

        let resolved = agents
            .iter()
            .map(|a| {
                let name = a.name().to_string();
                let weight = weights.get(&name).copied().unwrap_or(1.0);
                (name, weight)
            })
            .collect();

        Ok(Self {
            agents,
            weights: resolved,
        })
    }

    /// Instantiates one [`DomainAgent`] per spec over a shared reasoner.
    pub fn from_specs(
        specs: Vec<AgentSpec>,
        reasoner: Arc<Reasoner>,
        weights: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let agents = specs
            .into_iter()
            .map(|spec| Arc::new(DomainAgent::new(spec, reasoner.clone())) as Arc<dyn Agent>)
            .collect();
        Self::new(agents, weights)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.name() == name)
    }

    pub fn weight(&self, name: &str) -> f64 {
        self.weights.get(name).copied().unwrap_or(1.0)
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    /// Agents with weight > 0, in roster order.
    pub fn active(&self) -> Vec<Arc<dyn Agent>> {
        self.agents
            .iter()
            .filter(|a| self.weight(a.name()) > 0.0)
            .cloned()
            .collect()
    }

    /// Names of weight-0 agents, in roster order.
    pub fn deactivated(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| self.weight(a.name()) <= 0.0)
            .map(|a| a.name().to_string())
            .collect()
    }
}
