//! Analysis agents
//!
//! One closed interface ([`Agent::produce_analysis`]) with a single generic
//! implementation, [`DomainAgent`], driven by an [`AgentSpec`]: either a
//! built-in domain or an ad-hoc `{ name, system_prompt }` proposed at runtime.

pub mod catalogue;
pub mod configurable;
pub mod registry;
pub mod selector;

pub use catalogue::{BuiltinDomain, DEFAULT_ROSTER};
pub use configurable::{AgentSpec, DomainAgent};
pub use registry::AgentRoster;
pub use selector::{AgentSelector, Selection};

use crate::types::{AgentOutput, BriefOutput, Result, Round};
use async_trait::async_trait;

/// What one agent sees in one round.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub problem: String,
    /// Own full Round 1 output (Round 2 only)
    pub own_prior: Option<AgentOutput>,
    /// Every other agent's Round 1 output in brief form (Round 2 only)
    pub peers: Vec<BriefOutput>,
    /// Formatted search results, when grounding produced any
    pub grounding: Option<String>,
}

impl AgentContext {
    pub fn independent(problem: impl Into<String>, grounding: Option<String>) -> Self {
        Self {
            problem: problem.into(),
            grounding,
            ..Default::default()
        }
    }
}

/// Base trait for all agents
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique name within a run
    fn name(&self) -> &str;

    /// Get the agent's system prompt
    fn system_prompt(&self) -> &str;

    /// Short phrase used to scope search queries
    fn domain_hint(&self) -> &str;

    /// `produce_analysis(round, context) -> Output | Failure`
    async fn produce_analysis(&self, round: Round, context: &AgentContext) -> Result<AgentOutput>;
}
