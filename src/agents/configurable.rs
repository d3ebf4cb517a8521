//! Configuration-driven agent
//!
//! Built-in and ad-hoc agents share this implementation; only the
//! [`AgentSpec`] differs.

use crate::agents::catalogue::BuiltinDomain;
use crate::agents::{Agent, AgentContext};
use crate::llm::{prompts, Reasoner};
use crate::sources::{parse_source_entries, string_list};
use crate::types::{AdHocAgent, AgentOutput, AppError, Result, Round};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Tagged configuration value behind every agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSpec {
    Builtin(BuiltinDomain),
    AdHoc(AdHocAgent),
}

impl AgentSpec {
    pub fn name(&self) -> &str {
        match self {
            AgentSpec::Builtin(domain) => domain.name(),
            AgentSpec::AdHoc(agent) => &agent.name,
        }
    }

    pub fn system_prompt(&self) -> String {
        match self {
            AgentSpec::Builtin(domain) => domain.system_prompt(),
            AgentSpec::AdHoc(agent) => agent.system_prompt.clone(),
        }
    }

    pub fn domain_hint(&self) -> String {
        match self {
            AgentSpec::Builtin(domain) => domain.description().to_string(),
            AgentSpec::AdHoc(agent) => agent.name.replace(['_', '-'], " "),
        }
    }

    pub fn is_ad_hoc(&self) -> bool {
        matches!(self, AgentSpec::AdHoc(_))
    }
}

/// A configurable agent that derives its behavior from an [`AgentSpec`]
pub struct DomainAgent {
    spec: AgentSpec,
    system_prompt: String,
    domain_hint: String,
    reasoner: Arc<Reasoner>,
}

impl DomainAgent {
    pub fn new(spec: AgentSpec, reasoner: Arc<Reasoner>) -> Self {
        let system_prompt = spec.system_prompt();
        let domain_hint = spec.domain_hint();
        Self {
            spec,
            system_prompt,
            domain_hint,
            reasoner,
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }
}

#[async_trait]
impl Agent for DomainAgent {
    fn name(&self) -> &str {
        self.spec.name()
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn domain_hint(&self) -> &str {
        &self.domain_hint
    }

    async fn produce_analysis(&self, round: Round, context: &AgentContext) -> Result<AgentOutput> {
        let grounding = context.grounding.as_deref();
        let prompt = match round {
            Round::Independent => prompts::round1(&self.system_prompt, &context.problem, grounding),
            Round::Revision => {
                let own = context.own_prior.as_ref().ok_or_else(|| {
                    AppError::InvalidInput(format!(
                        "{} has no Round 1 output to revise",
                        self.name()
                    ))
                })?;
                prompts::round2(
                    &self.system_prompt,
                    &context.problem,
                    own,
                    &context.peers,
                    grounding,
                )
            }
            Round::Synthesis => {
                return Err(AppError::InvalidInput(
                    "agents do not take part in synthesis".to_string(),
                ))
            }
        };

        let value = self.reasoner.invoke(&prompt, &prompts::agent_schema()).await?;
        Ok(output_from_structured(self.name(), round, value))
    }
}

/// Splits a validated agent result into analysis payload, flags and sources.
pub fn output_from_structured(agent: &str, round: Round, mut value: Value) -> AgentOutput {
    let flags = string_list(value.get("flags"));
    let sources = parse_source_entries(value.get("sources"));
    if let Some(object) = value.as_object_mut() {
        object.remove("flags");
        object.remove("sources");
    }
    AgentOutput {
        agent: agent.to_string(),
        round,
        analysis: value,
        flags,
        sources,
        revised: round == Round::Revision,
        citations_resolved: false,
    }
}
