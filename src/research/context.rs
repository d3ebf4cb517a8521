//! Per-round context staging.
//!
//! Round 1 sees only the problem (plus own grounding). Round 2 sees the
//! agent's own full Round 1 output and every other agent's Round 1 output in
//! brief form. Synthesis sees every full output.

use crate::agents::AgentContext;
use crate::types::{AgentOutput, BriefOutput, FinalAnalysis, Round};

pub fn round1(problem: &str, grounding: Option<String>) -> AgentContext {
    AgentContext::independent(problem, grounding)
}

/// Context for `agent` in Round 2, or `None` when it has no Round 1 output.
pub fn round2(
    problem: &str,
    agent: &str,
    round1_outputs: &[AgentOutput],
    grounding: Option<String>,
) -> Option<AgentContext> {
    let own = round1_outputs.iter().find(|o| o.agent == agent)?.clone();
    Some(AgentContext {
        problem: problem.to_string(),
        own_prior: Some(own),
        peers: peer_briefs(agent, round1_outputs),
        grounding,
    })
}

/// Brief form of every output except `agent`'s own.
pub fn peer_briefs(agent: &str, outputs: &[AgentOutput]) -> Vec<BriefOutput> {
    outputs
        .iter()
        .filter(|o| o.agent != agent)
        .map(AgentOutput::brief)
        .collect()
}

/// Full Round 1 and Round 2 outputs, not briefed.
pub fn synthesis_inputs(analysis: &FinalAnalysis) -> Vec<AgentOutput> {
    analysis
        .agent_outputs
        .iter()
        .filter(|o| matches!(o.round, Round::Independent | Round::Revision))
        .cloned()
        .collect()
}

/// An agent's most recent output: Round 2 when it has one, else Round 1.
pub fn latest_output<'a>(analysis: &'a FinalAnalysis, agent: &str) -> Option<&'a AgentOutput> {
    analysis
        .outputs_for(Round::Revision)
        .find(|o| o.agent == agent)
        .or_else(|| analysis.outputs_for(Round::Independent).find(|o| o.agent == agent))
}
