//! Round orchestration
//!
//! Drives `SELECT → ROUND1 → ROUND2 → SYNTHESIZE → RESOLVE → DONE`. Every
//! phase appends to one [`FinalAnalysis`]; nothing is rolled back, so a
//! cancelled or timed-out run still returns everything that completed.

use crate::agents::{Agent, AgentRoster, AgentSelector, AgentSpec};
use crate::audit::QualityGate;
use crate::llm::{prompts, Reasoner};
use crate::research::context;
use crate::research::dispatch::{coordinated_fan_out, fan_out, DispatchPolicy, Dispatched, Unit};
use crate::research::resolver::ConflictResolver;
use crate::search::Grounding;
use crate::sources::{string_list, SourceConsolidator};
use crate::types::{
    AgentFailure, AgentOutput, AppError, Conflict, FinalAnalysis, RaciRow, Result, Round,
    RunPhase,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

/// How a round's units reach the reasoning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One independent call per agent on a bounded worker pool.
    #[default]
    Parallel,
    /// A coordinating exchange acknowledges each agent before dispatch.
    Coordinated,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub mode: DispatchMode,
    pub policy: DispatchPolicy,
    /// See [`coordinated_fan_out`].
    pub max_stalled_passes: usize,
    /// Whole-run budget; `None` means unbounded.
    pub run_timeout: Option<Duration>,
    pub resolve_conflicts: bool,
    pub drop_on_miss: bool,
    /// Matrix handed to the synthesis lead; `None` leaves it out.
    pub raci: Option<Vec<RaciRow>>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Parallel,
            policy: DispatchPolicy::default(),
            max_stalled_passes: 3,
            run_timeout: None,
            resolve_conflicts: false,
            drop_on_miss: true,
            raci: None,
        }
    }
}

pub struct RoundOrchestrator {
    reasoner: Arc<Reasoner>,
    grounding: Arc<Grounding>,
    options: OrchestratorOptions,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl RoundOrchestrator {
    pub fn new(reasoner: Arc<Reasoner>, grounding: Arc<Grounding>, options: OrchestratorOptions) -> Self {
        Self {
            reasoner,
            grounding,
            options,
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Runs the optional SELECT state, then the rounds over the chosen roster.
    pub async fn run_with_selection(
        &self,
        problem: &str,
        fallback: &[AgentSpec],
        weights: &BTreeMap<String, f64>,
        cancel: &CancellationToken,
    ) -> Result<FinalAnalysis> {
        validate_problem(problem)?;
        let started = Instant::now();
        let selection = AgentSelector::new(self.reasoner.clone())
            .select(problem, fallback)
            .await;
        let selection_ms = elapsed_ms(started);

        let roster = AgentRoster::from_specs(selection.specs, self.reasoner.clone(), weights)?;
        let mut analysis = FinalAnalysis::new(problem);
        analysis.selection_metadata = Some(selection.metadata);
        analysis.telemetry.timings.selection_ms = selection_ms;
        self.execute(analysis, &roster, cancel).await
    }

    /// Runs ROUND1 through DONE over a fixed roster.
    pub async fn run(
        &self,
        problem: &str,
        roster: &AgentRoster,
        cancel: &CancellationToken,
    ) -> Result<FinalAnalysis> {
        validate_problem(problem)?;
        self.execute(FinalAnalysis::new(problem), roster, cancel)
            .await
    }

    async fn execute(
        &self,
        mut analysis: FinalAnalysis,
        roster: &AgentRoster,
        cancel: &CancellationToken,
    ) -> Result<FinalAnalysis> {
        let run_started = Instant::now();
        let token = cancel.child_token();
        let _timer = self.options.run_timeout.map(|limit| {
            let token = token.clone();
            AbortOnDropHandle::new(tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!(timeout_secs = limit.as_secs(), "Run timeout reached, cancelling");
                token.cancel();
            }))
        });

        analysis.weights = roster.weights().clone();
        analysis.search_enabled = self.grounding.is_enabled();

        let active = roster.active();
        let deactivated = roster.deactivated();
        analysis.telemetry.modules_attempted = active.len();
        if active.is_empty() {
            analysis.telemetry.phase = RunPhase::Aborted;
            tracing::error!(roster = roster.len(), "No active agents to dispatch");
            return Err(AppError::FatalDispatch(format!(
                "no active agents among {} configured",
                roster.len()
            )));
        }

        tracing::info!(
            run_id = %analysis.telemetry.run_id,
            agents = active.len(),
            deactivated = deactivated.len(),
            search = analysis.search_enabled,
            "Starting analysis run"
        );

        // ROUND1
        analysis.telemetry.phase = RunPhase::Round1;
        let started = Instant::now();
        let round1 = self
            .dispatch(&analysis.problem, Round::Independent, self.round1_units(&analysis.problem, &active), &token)
            .await;
        analysis.telemetry.timings.round1_ms = elapsed_ms(started);
        self.absorb(&mut analysis, Round::Independent, round1);

        // ROUND2
        if !token.is_cancelled() {
            analysis.telemetry.phase = RunPhase::Round2;
            let started = Instant::now();
            let units = self.round2_units(&analysis, &active);
            if !units.is_empty() {
                let round2 = self
                    .dispatch(&analysis.problem, Round::Revision, units, &token)
                    .await;
                self.absorb(&mut analysis, Round::Revision, round2);
            }
            analysis.telemetry.timings.round2_ms = elapsed_ms(started);
        }

        let consolidator = SourceConsolidator::new(self.options.drop_on_miss);
        let report = consolidator.consolidate(&mut analysis);
        tracing::info!(
            claimed = report.claimed,
            promoted = report.promoted,
            dropped = report.dropped,
            global = analysis.sources.len(),
            "Round sources consolidated"
        );

        // SYNTHESIZE
        if !token.is_cancelled() && !analysis.agent_outputs.is_empty() {
            analysis.telemetry.phase = RunPhase::Synthesize;
            let started = Instant::now();
            self.synthesize(&mut analysis, &token).await;
            analysis.telemetry.timings.synthesis_ms = elapsed_ms(started);
            consolidator.consolidate(&mut analysis);
        }

        // RESOLVE
        if self.options.resolve_conflicts && !token.is_cancelled() {
            analysis.telemetry.phase = RunPhase::Resolve;
            let started = Instant::now();
            let resolver = ConflictResolver::new(
                self.reasoner.clone(),
                self.grounding.clone(),
                self.options.policy,
            );
            let outcome = resolver.resolve(&analysis, &token).await;
            tracing::info!(
                resolved = outcome.resolutions.len(),
                failed = outcome.failures.len(),
                "Resolution pass complete"
            );
            analysis.conflict_resolutions.extend(outcome.resolutions);
            analysis.telemetry.resolution_failures.extend(outcome.failures);
            analysis.telemetry.timings.resolution_ms = elapsed_ms(started);
            consolidator.consolidate(&mut analysis);
        }

        self.finish(&mut analysis, &active, &deactivated, &token, run_started);
        Ok(analysis)
    }

    fn round1_units(&self, problem: &str, active: &[Arc<dyn Agent>]) -> Vec<Unit<AgentOutput>> {
        active
            .iter()
            .map(|agent| {
                let agent = agent.clone();
                let grounding = self.grounding.clone();
                let problem = problem.to_string();
                let label = agent.name().to_string();
                let future = async move {
                    let evidence = grounding
                        .for_agent(agent.domain_hint(), &problem, None)
                        .await
                        .map(|ctx| ctx.format_for_prompt());
                    let context = context::round1(&problem, evidence);
                    agent.produce_analysis(Round::Independent, &context).await
                }
                .boxed();
                (label, future)
            })
            .collect()
    }

    /// Only agents that completed Round 1 take part in Round 2.
    fn round2_units(&self, analysis: &FinalAnalysis, active: &[Arc<dyn Agent>]) -> Vec<Unit<AgentOutput>> {
        let round1: Arc<Vec<AgentOutput>> =
            Arc::new(analysis.outputs_for(Round::Independent).cloned().collect());

        active
            .iter()
            .filter(|agent| round1.iter().any(|o| o.agent == agent.name()))
            .map(|agent| {
                let agent = agent.clone();
                let grounding = self.grounding.clone();
                let problem = analysis.problem.clone();
                let round1 = round1.clone();
                let label = agent.name().to_string();
                let future = async move {
                    let prior = round1
                        .iter()
                        .find(|o| o.agent == agent.name())
                        .map(|o| o.summary().to_string());
                    let evidence = grounding
                        .for_agent(agent.domain_hint(), &problem, prior.as_deref())
                        .await
                        .map(|ctx| ctx.format_for_prompt());
                    let context = context::round2(&problem, agent.name(), &round1, evidence)
                        .ok_or_else(|| {
                            AppError::Internal(format!("{} lost its Round 1 output", agent.name()))
                        })?;
                    agent.produce_analysis(Round::Revision, &context).await
                }
                .boxed();
                (label, future)
            })
            .collect()
    }

    async fn dispatch(
        &self,
        problem: &str,
        round: Round,
        units: Vec<Unit<AgentOutput>>,
        cancel: &CancellationToken,
    ) -> Dispatched<AgentOutput> {
        tracing::info!(%round, units = units.len(), mode = ?self.options.mode, "Dispatching round");
        match self.options.mode {
            DispatchMode::Parallel => fan_out(units, &self.options.policy, cancel).await,
            DispatchMode::Coordinated => {
                coordinated_fan_out(
                    &self.reasoner,
                    problem,
                    round,
                    units,
                    &self.options.policy,
                    self.options.max_stalled_passes,
                    cancel,
                )
                .await
            }
        }
    }

    fn absorb(&self, analysis: &mut FinalAnalysis, round: Round, dispatched: Dispatched<AgentOutput>) {
        tracing::info!(
            %round,
            completed = dispatched.successes.len(),
            failed = dispatched.failures.len(),
            "Round complete"
        );
        analysis
            .agent_outputs
            .extend(dispatched.successes.into_iter().map(|(_, output)| output));
        analysis
            .telemetry
            .failures
            .extend(dispatched.failures.into_iter().map(|(agent, reason)| AgentFailure {
                agent,
                round,
                reason,
            }));
    }

    /// A failed synthesis leaves the narrative empty and is recorded; the run
    /// still completes with the round outputs.
    async fn synthesize(&self, analysis: &mut FinalAnalysis, cancel: &CancellationToken) {
        let inputs = context::synthesis_inputs(analysis);
        let prompt = prompts::synthesis(
            &analysis.problem,
            &inputs,
            &analysis.weights,
            &analysis.sources,
            self.options.raci.as_deref(),
        );
        let schema = prompts::synthesis_schema();
        let call = tokio::time::timeout(
            self.options.policy.unit_timeout,
            self.reasoner.invoke(&prompt, &schema),
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            r = call => match r {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "synthesis produced no result within {:?}",
                    self.options.policy.unit_timeout
                ))),
            },
        };

        match result {
            Ok(value) => {
                apply_synthesis(analysis, &value);
                tracing::info!(
                    conflicts = analysis.conflicts.len(),
                    recommendations = analysis.recommendations.len(),
                    "Synthesis complete"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Synthesis failed");
                analysis.telemetry.failures.push(AgentFailure {
                    agent: "synthesis".to_string(),
                    round: Round::Synthesis,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn finish(
        &self,
        analysis: &mut FinalAnalysis,
        active: &[Arc<dyn Agent>],
        deactivated: &[String],
        token: &CancellationToken,
        run_started: Instant,
    ) {
        let failed = failed_agents(analysis);
        analysis.deactivated_disclaimer = disclaimer(deactivated, &failed);
        analysis.telemetry.modules_completed = active
            .iter()
            .filter(|a| !failed.contains(a.name()))
            .count();
        analysis.telemetry.token_usage = self.reasoner.usage();
        analysis.telemetry.cancelled = token.is_cancelled();
        analysis.telemetry.phase = RunPhase::Done;
        analysis.telemetry.timings.total_ms =
            elapsed_ms(run_started) + analysis.telemetry.timings.selection_ms;

        let quality = QualityGate::default().evaluate(analysis);
        tracing::info!(
            score = quality.score,
            tier = %quality.tier,
            completed = analysis.telemetry.modules_completed,
            attempted = analysis.telemetry.modules_attempted,
            sources = analysis.sources.len(),
            cancelled = analysis.telemetry.cancelled,
            "Run finished"
        );
        analysis.quality = Some(quality);
    }
}

fn validate_problem(problem: &str) -> Result<()> {
    if problem.trim().is_empty() {
        return Err(AppError::InvalidInput("problem statement is empty".to_string()));
    }
    Ok(())
}

/// Agents with a failure in Round 1 or Round 2.
fn failed_agents(analysis: &FinalAnalysis) -> BTreeSet<String> {
    analysis
        .telemetry
        .failures
        .iter()
        .filter(|f| f.round != Round::Synthesis)
        .map(|f| f.agent.clone())
        .collect()
}

fn disclaimer(deactivated: &[String], failed: &BTreeSet<String>) -> String {
    let mut parts = Vec::new();
    if !deactivated.is_empty() {
        parts.push(format!(
            "Deactivated by weight 0: {}.",
            deactivated.join(", ")
        ));
    }
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(String::as_str).collect();
        parts.push(format!(
            "Failed or timed out during analysis: {}. Their perspective is missing or incomplete.",
            names.join(", ")
        ));
    }
    parts.join(" ")
}

/// Copies the synthesis result into the record. Sources returned by the
/// model are ignored; synthesis cites the global list only.
fn apply_synthesis(analysis: &mut FinalAnalysis, value: &Value) {
    analysis.synthesis = value
        .get("synthesis")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    analysis.recommendations = string_list(value.get("recommendations"));
    analysis.priority_flags = string_list(value.get("priority_flags"));
    analysis.conflicts = parse_conflicts(value.get("conflicts"));
}

/// Lenient: severity is case-insensitive and defaults to medium; malformed
/// entries are skipped.
fn parse_conflicts(value: Option<&Value>) -> Vec<Conflict> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let mut item = item.clone();
            let object = item.as_object_mut()?;
            let severity = object
                .get("severity")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .unwrap_or_else(|| "medium".to_string());
            object.insert("severity".to_string(), Value::String(severity));
            object
                .entry("description")
                .or_insert_with(|| Value::String(String::new()));
            match serde_json::from_value::<Conflict>(item) {
                Ok(conflict) => Some(conflict),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed conflict");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use serde_json::json;

    #[test]
    fn test_parse_conflicts_is_lenient() {
        let value = json!([
            {"agents": ["market", "cost"], "topic": "pricing", "description": "d", "severity": "HIGH"},
            {"modules": ["risk"], "topic": "timing"},
            {"topic": "no agents"},
            "not an object"
        ]);
        let conflicts = parse_conflicts(Some(&value));
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].severity, Severity::High);
        assert_eq!(conflicts[1].severity, Severity::Medium);
        assert_eq!(conflicts[1].agents, vec!["risk"]);
    }

    #[test]
    fn test_disclaimer_names_deactivated_and_failed() {
        let mut failed = BTreeSet::new();
        failed.insert("legal".to_string());
        let text = disclaimer(&["cost".to_string()], &failed);
        assert!(text.contains("cost"));
        assert!(text.contains("legal"));
        assert!(disclaimer(&[], &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_failed_agents_ignores_synthesis() {
        let mut analysis = FinalAnalysis::new("p");
        analysis.telemetry.failures = vec![
            AgentFailure {
                agent: "market".to_string(),
                round: Round::Independent,
                reason: "x".to_string(),
            },
            AgentFailure {
                agent: "market".to_string(),
                round: Round::Revision,
                reason: "y".to_string(),
            },
            AgentFailure {
                agent: "synthesis".to_string(),
                round: Round::Synthesis,
                reason: "z".to_string(),
            },
        ];
        let failed = failed_agents(&analysis);
        assert_eq!(failed.into_iter().collect::<Vec<_>>(), vec!["market"]);
    }

    #[test]
    fn test_apply_synthesis_ignores_model_sources() {
        let mut analysis = FinalAnalysis::new("p");
        apply_synthesis(
            &mut analysis,
            &json!({
                "synthesis": " merged view [1] ",
                "recommendations": ["do x"],
                "priority_flags": ["red: y"],
                "sources": ["1. New — https://new.example"]
            }),
        );
        assert_eq!(analysis.synthesis, "merged view [1]");
        assert_eq!(analysis.recommendations, vec!["do x"]);
        assert!(analysis.sources.is_empty());
        assert_eq!(analysis.red_flag_count(), 1);
    }
}
