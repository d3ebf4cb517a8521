//! L5: round-to-round consistency.
//!
//! For each agent with both rounds, asks the reasoning service for concrete,
//! numeric or named-metric claims that Round 2 introduced without a citation.

use crate::llm::{prompts, Reasoner};
use crate::sources::string_list;
use crate::types::{AgentOutput, ConsistencyCheck, FinalAnalysis, Round};
use std::sync::Arc;

pub struct ConsistencyChecker {
    reasoner: Arc<Reasoner>,
}

/// (agent, Round 1, Round 2) for every agent that completed both rounds.
pub fn revision_pairs(analysis: &FinalAnalysis) -> Vec<(&AgentOutput, &AgentOutput)> {
    analysis
        .outputs_for(Round::Independent)
        .filter_map(|first| {
            analysis
                .outputs_for(Round::Revision)
                .find(|second| second.agent == first.agent)
                .map(|second| (first, second))
        })
        .collect()
}

impl ConsistencyChecker {
    pub fn new(reasoner: Arc<Reasoner>) -> Self {
        Self { reasoner }
    }

    /// One result per agent, sorted by agent name.
    pub async fn check(&self, analysis: &FinalAnalysis) -> Vec<ConsistencyCheck> {
        let pairs = revision_pairs(analysis);
        tracing::info!(agents = pairs.len(), "Checking round consistency");

        let mut checks = futures::future::join_all(
            pairs
                .into_iter()
                .map(|(first, second)| self.check_agent(first, second)),
        )
        .await;
        checks.sort_by(|a, b| a.agent.cmp(&b.agent));
        checks
    }

    async fn check_agent(&self, first: &AgentOutput, second: &AgentOutput) -> ConsistencyCheck {
        let prompt = prompts::consistency_check(&first.agent, first, second);
        match self
            .reasoner
            .invoke(&prompt, &prompts::consistency_schema())
            .await
        {
            Ok(value) => {
                let issues = string_list(value.get("issues"));
                ConsistencyCheck {
                    agent: first.agent.clone(),
                    ok: issues.is_empty(),
                    issues,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(agent = %first.agent, error = %e, "Consistency check failed");
                ConsistencyCheck {
                    agent: first.agent.clone(),
                    issues: Vec::new(),
                    error: Some(e.to_string()),
                    ok: false,
                }
            }
        }
    }
}
