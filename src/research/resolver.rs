//! Evidence-gathering resolution of high-stakes disagreements.
//!
//! Targets every high/critical conflict and every `red:` priority flag that no
//! conflict already covers. Each target becomes one independent unit on the
//! same fan-out used by the rounds.

use crate::llm::{prompts, Reasoner};
use crate::research::context::latest_output;
use crate::research::dispatch::{fan_out, DispatchPolicy, Unit};
use crate::search::Grounding;
use crate::sources::parse_source_entries;
use crate::types::{
    BriefOutput, ConflictResolution, FinalAnalysis, FlagLevel, ResolutionFailure, ResolutionKind,
};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One conflict or standalone critical flag to resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionTarget {
    pub topic: String,
    pub description: String,
    pub kind: ResolutionKind,
    pub agents: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    pub resolutions: Vec<ConflictResolution>,
    pub failures: Vec<ResolutionFailure>,
    pub cancelled: bool,
}

/// A red flag is covered when some conflict's topic appears in its text.
fn is_covered(flag: &str, analysis: &FinalAnalysis) -> bool {
    let lowered = flag.to_lowercase();
    analysis.conflicts.iter().any(|c| {
        let topic = c.topic.trim().to_lowercase();
        !topic.is_empty() && lowered.contains(&topic)
    })
}

fn strip_level(flag: &str) -> &str {
    flag.trim_start()
        .split_once(':')
        .map(|(_, rest)| rest.trim())
        .unwrap_or(flag)
}

/// Lowercased flag text without its level prefix or `[N]` markers.
fn flag_body(flag: &str) -> String {
    let mut body = String::new();
    let mut rest = strip_level(flag);
    while let Some(open) = rest.find('[') {
        let tail = &rest[open + 1..];
        match tail.find(']') {
            Some(close) if close > 0 && tail[..close].chars().all(|c| c.is_ascii_digit()) => {
                body.push_str(&rest[..open]);
                rest = &tail[close + 1..];
            }
            _ => {
                body.push_str(&rest[..=open]);
                rest = tail;
            }
        }
    }
    body.push_str(rest);
    body.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn red_flag_agents<'a>(
    analysis: &'a FinalAnalysis,
    matches: impl Fn(&str) -> bool + 'a,
) -> impl Iterator<Item = String> + 'a {
    analysis
        .agent_outputs
        .iter()
        .filter(move |o| {
            o.flags
                .iter()
                .any(|f| FlagLevel::of(f) == FlagLevel::Red && matches(f.as_str()))
        })
        .map(|o| o.agent.clone())
}

/// Agents whose own red flags match this priority flag's text. When none do,
/// every agent that raised a red flag is attributed.
fn flag_owners(flag: &str, analysis: &FinalAnalysis) -> Vec<String> {
    let body = flag_body(flag);
    let same_text = |own: &str| {
        let own = flag_body(own);
        !own.is_empty() && !body.is_empty() && (own.contains(&body) || body.contains(&own))
    };
    let mut owners: Vec<String> = red_flag_agents(analysis, same_text).collect();
    if owners.is_empty() {
        owners = red_flag_agents(analysis, |_| true).collect();
    }
    let mut seen = HashSet::new();
    owners.retain(|name| seen.insert(name.clone()));
    owners
}

/// Escalated conflicts first, then uncovered red priority flags.
pub fn targets(analysis: &FinalAnalysis) -> Vec<ResolutionTarget> {
    let mut targets: Vec<ResolutionTarget> = analysis
        .conflicts
        .iter()
        .filter(|c| c.severity.is_escalated())
        .map(|c| ResolutionTarget {
            topic: c.topic.clone(),
            description: c.description.clone(),
            kind: ResolutionKind::Conflict,
            agents: c.agents.clone(),
        })
        .collect();

    for flag in &analysis.priority_flags {
        if FlagLevel::of(flag) != FlagLevel::Red || is_covered(flag, analysis) {
            continue;
        }
        let topic = strip_level(flag).chars().take(80).collect::<String>();
        if targets.iter().any(|t| t.topic == topic) {
            continue;
        }
        let agents = flag_owners(flag, analysis);
        targets.push(ResolutionTarget {
            topic,
            description: flag.clone(),
            kind: ResolutionKind::CriticalFlag,
            agents,
        });
    }
    targets
}

pub struct ConflictResolver {
    reasoner: Arc<Reasoner>,
    grounding: Arc<Grounding>,
    policy: DispatchPolicy,
}

impl ConflictResolver {
    pub fn new(reasoner: Arc<Reasoner>, grounding: Arc<Grounding>, policy: DispatchPolicy) -> Self {
        Self {
            reasoner,
            grounding,
            policy,
        }
    }

    /// Resolves every target concurrently. Failures are recorded, never fatal.
    pub async fn resolve(
        &self,
        analysis: &FinalAnalysis,
        cancel: &CancellationToken,
    ) -> ResolutionOutcome {
        let targets = targets(analysis);
        if targets.is_empty() {
            return ResolutionOutcome::default();
        }
        tracing::info!(targets = targets.len(), "Resolving conflicts and critical flags");

        let units: Vec<Unit<ConflictResolution>> = targets
            .into_iter()
            .map(|target| {
                let positions: Vec<BriefOutput> = target
                    .agents
                    .iter()
                    .filter_map(|a| latest_output(analysis, a))
                    .map(|o| o.brief())
                    .collect();
                let reasoner = self.reasoner.clone();
                let grounding = self.grounding.clone();
                let label = target.topic.clone();
                let future = async move {
                    let evidence = grounding
                        .for_conflict(&target.topic, &target.description)
                        .await
                        .map(|ctx| ctx.format_for_prompt());
                    let prompt = prompts::resolution(
                        &target.topic,
                        &target.description,
                        &positions,
                        evidence.as_deref(),
                    );
                    let value = reasoner
                        .invoke(&prompt, &prompts::resolution_schema())
                        .await?;
                    Ok(build_resolution(target, &value, evidence.is_some()))
                }
                .boxed();
                (label, future)
            })
            .collect();

        let dispatched = fan_out(units, &self.policy, cancel).await;
        ResolutionOutcome {
            resolutions: dispatched.successes.into_iter().map(|(_, r)| r).collect(),
            failures: dispatched
                .failures
                .into_iter()
                .map(|(topic, reason)| ResolutionFailure { topic, reason })
                .collect(),
            cancelled: dispatched.cancelled,
        }
    }
}

/// Sources are only accepted when fresh evidence was supplied.
fn build_resolution(target: ResolutionTarget, value: &Value, had_evidence: bool) -> ConflictResolution {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    let sources = if had_evidence {
        parse_source_entries(value.get("sources"))
    } else {
        Vec::new()
    };
    ConflictResolution {
        topic: target.topic,
        kind: target.kind,
        agents: target.agents,
        verdict: text("verdict"),
        updated_recommendation: text("updated_recommendation"),
        sources,
        citations_resolved: false,
    }
}
