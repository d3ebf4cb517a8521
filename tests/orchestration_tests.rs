//! End-to-end runs of the round protocol over scripted collaborators.

mod common;

use common::mocks::{default_reply, CallKind, CountingSearch, ScriptedLLM};
use mediator::agents::{AgentRoster, AgentSpec, BuiltinDomain};
use mediator::llm::{LLMClient, Reasoner};
use mediator::research::{DispatchMode, OrchestratorOptions, RoundOrchestrator};
use mediator::search::grounding::GroundingLimits;
use mediator::search::{Grounding, SearchBackend, SearchCache};
use mediator::sources::SourceConsolidator;
use mediator::types::{AppError, QualityTier, RaciRow, ResolutionKind, Round};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PROBLEM: &str = "Should we open a second warehouse in the northern region?";
const REPORT_URL: &str = "https://example.com/regional-demand";

struct Harness {
    llm: Arc<ScriptedLLM>,
    reasoner: Arc<Reasoner>,
    grounding: Arc<Grounding>,
}

impl Harness {
    fn new(llm: ScriptedLLM, search: Option<Arc<CountingSearch>>) -> Self {
        let llm = Arc::new(llm);
        let reasoner = Arc::new(Reasoner::new(llm.clone() as Arc<dyn LLMClient>));
        let cache = SearchCache::new(search.map(|s| s as Arc<dyn SearchBackend>), 5);
        let grounding = Arc::new(Grounding::new(
            reasoner.clone(),
            Arc::new(cache),
            GroundingLimits::default(),
        ));
        Self {
            llm,
            reasoner,
            grounding,
        }
    }

    fn orchestrator(&self, options: OrchestratorOptions) -> RoundOrchestrator {
        RoundOrchestrator::new(self.reasoner.clone(), self.grounding.clone(), options)
    }

    fn roster(&self, weights: &BTreeMap<String, f64>) -> AgentRoster {
        AgentRoster::from_specs(default_specs(), self.reasoner.clone(), weights)
            .expect("valid roster")
    }
}

fn default_specs() -> Vec<AgentSpec> {
    [BuiltinDomain::Market, BuiltinDomain::Cost, BuiltinDomain::Risk]
        .into_iter()
        .map(AgentSpec::Builtin)
        .collect()
}

#[tokio::test]
async fn test_failed_agent_is_dropped_and_disclosed() {
    let harness = Harness::new(ScriptedLLM::failing_agent("risk"), None);
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let roster = harness.roster(&BTreeMap::new());

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes despite one failing agent");

    let telemetry = &analysis.telemetry;
    assert_eq!(telemetry.modules_attempted, 3);
    assert_eq!(telemetry.modules_completed, 2);
    assert!(analysis.deactivated_disclaimer.contains("risk"));
    assert!(telemetry
        .failures
        .iter()
        .any(|f| f.agent == "risk" && f.round == Round::Independent));

    // Round 1 failures are not dispatched again in Round 2
    assert_eq!(
        harness.llm.count(|c| *c == CallKind::Round2("risk".to_string())),
        0
    );
    assert_eq!(analysis.outputs_for(Round::Revision).count(), 2);
    assert!(!analysis.synthesis.is_empty());

    let quality = analysis.quality.as_ref().expect("quality is scored");
    assert!((quality.score - 0.7).abs() < 1e-9);
    assert_eq!(quality.tier, QualityTier::Degraded);

    // 3 + 2 agent calls and one synthesis; the failed call reports no usage
    assert_eq!(harness.llm.calls().len(), 6);
    assert_eq!(telemetry.token_usage.total_input, 50);
    assert_eq!(telemetry.token_usage.total_output, 25);
}

#[tokio::test]
async fn test_shared_url_gets_one_global_index() {
    let search = Arc::new(CountingSearch::with_urls(&[REPORT_URL]));
    let harness = Harness::new(ScriptedLLM::panel(), Some(search.clone()));
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let roster = harness.roster(&BTreeMap::new());

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    assert!(analysis.search_enabled);
    assert_eq!(analysis.sources.len(), 1);
    assert_eq!(analysis.sources[0].url.as_deref(), Some(REPORT_URL));
    assert_eq!(analysis.telemetry.sources_claimed, 6);

    for output in &analysis.agent_outputs {
        assert!(output.citations_resolved);
        assert!(output.sources.is_empty());
        assert!(output.summary().ends_with("[1]."), "{}", output.summary());
    }
    assert_eq!(analysis.synthesis, "Proceed with a staged pilot [1].");
}

#[tokio::test]
async fn test_identical_queries_hit_the_backend_once() {
    let search = Arc::new(CountingSearch::with_urls(&[REPORT_URL]));
    let harness = Harness::new(ScriptedLLM::panel(), Some(search.clone()));
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let roster = harness.roster(&BTreeMap::new());

    orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    // three agents, two rounds, one generated query each time
    let stats = harness.grounding.cache().stats();
    assert_eq!(stats.lookups, 6);
    assert_eq!(stats.backend_calls, 1);
    assert_eq!(search.calls(), 1);
    assert_eq!(search.queries(), vec!["regional warehouse demand 2024".to_string()]);
}

#[tokio::test]
async fn test_urlless_source_is_dropped_with_its_marker() {
    let llm = ScriptedLLM::new(|kind, user| {
        if *kind == CallKind::Round1("market".to_string()) {
            return Ok(json!({
                "summary": "An internal memo expects growth [1]. The survey confirms it [2].",
                "flags": ["green: demand is strong [2]"],
                "sources": ["1. Internal planning memo", format!("2. Demand survey — {}", REPORT_URL)]
            })
            .to_string());
        }
        default_reply(kind, user)
    });
    let search = Arc::new(CountingSearch::with_urls(&[REPORT_URL]));
    let harness = Harness::new(llm, Some(search));
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let roster = harness.roster(&BTreeMap::new());

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    assert!(analysis.sources.iter().all(|s| s.url.is_some()));
    let survey = analysis
        .sources
        .iter()
        .position(|s| s.url.as_deref() == Some(REPORT_URL))
        .expect("survey promoted")
        + 1;

    let market = analysis
        .outputs_for(Round::Independent)
        .find(|o| o.agent == "market")
        .expect("market completed");
    assert_eq!(
        market.summary(),
        format!(
            "An internal memo expects growth. The survey confirms it [{}].",
            survey
        )
    );
    assert_eq!(market.flags, vec![format!("green: demand is strong [{}]", survey)]);
}

#[tokio::test]
async fn test_consolidation_is_idempotent_after_a_run() {
    let search = Arc::new(CountingSearch::with_urls(&[
        REPORT_URL,
        "https://example.org/costs",
    ]));
    let harness = Harness::new(ScriptedLLM::panel(), Some(search));
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let roster = harness.roster(&BTreeMap::new());

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    let mut again = analysis.clone();
    let report = SourceConsolidator::new(true).consolidate(&mut again);

    assert_eq!(report.claimed, 0);
    assert_eq!(report.promoted, 0);
    assert_eq!(again.sources, analysis.sources);
    assert_eq!(again.synthesis, analysis.synthesis);
    assert_eq!(
        again.telemetry.sources_claimed,
        analysis.telemetry.sources_claimed
    );
    for (before, after) in analysis.agent_outputs.iter().zip(&again.agent_outputs) {
        assert_eq!(before.analysis, after.analysis);
        assert_eq!(before.flags, after.flags);
    }
}

#[tokio::test]
async fn test_zero_weight_deactivates_agent() {
    let harness = Harness::new(ScriptedLLM::panel(), None);
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let weights = BTreeMap::from([("cost".to_string(), 0.0), ("risk".to_string(), 2.0)]);
    let roster = harness.roster(&weights);

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(harness.llm.count(|c| c.agent() == Some("cost")), 0);
    assert_eq!(analysis.telemetry.modules_attempted, 2);
    assert_eq!(analysis.telemetry.modules_completed, 2);
    assert_eq!(analysis.deactivated_disclaimer, "Deactivated by weight 0: cost.");
    assert_eq!(analysis.weights.get("cost"), Some(&0.0));
    assert_eq!(analysis.weights.get("market"), Some(&1.0));
}

#[tokio::test]
async fn test_no_active_agents_is_fatal() {
    let harness = Harness::new(ScriptedLLM::panel(), None);
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let weights: BTreeMap<String, f64> = ["market", "cost", "risk"]
        .iter()
        .map(|n| (n.to_string(), 0.0))
        .collect();
    let roster = harness.roster(&weights);

    let result = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AppError::FatalDispatch(_))));
    assert!(harness.llm.calls().is_empty());
}

#[tokio::test]
async fn test_empty_problem_is_rejected() {
    let harness = Harness::new(ScriptedLLM::panel(), None);
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let roster = harness.roster(&BTreeMap::new());

    let result = orchestrator
        .run("   ", &roster, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));
}

#[tokio::test]
async fn test_cancelled_run_returns_partial_record() {
    let harness = Harness::new(ScriptedLLM::panel(), None);
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());
    let roster = harness.roster(&BTreeMap::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let analysis = orchestrator
        .run(PROBLEM, &roster, &cancel)
        .await
        .expect("cancellation still yields a record");

    assert!(analysis.telemetry.cancelled);
    assert!(analysis.synthesis.is_empty());
    assert_eq!(analysis.telemetry.modules_completed, 0);
    let quality = analysis.quality.expect("quality is scored");
    assert_eq!(quality.tier, QualityTier::Poor);
    assert!(quality
        .warnings
        .iter()
        .any(|w| w.contains("cancelled")));
}

#[tokio::test]
async fn test_resolution_pass_covers_conflicts_and_red_flags() {
    let search = Arc::new(CountingSearch::with_urls(&[REPORT_URL]));
    let harness = Harness::new(ScriptedLLM::panel(), Some(search));
    let orchestrator = harness.orchestrator(OrchestratorOptions {
        resolve_conflicts: true,
        ..Default::default()
    });
    let roster = harness.roster(&BTreeMap::new());

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    let kinds: Vec<ResolutionKind> = analysis
        .conflict_resolutions
        .iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds, vec![ResolutionKind::Conflict, ResolutionKind::CriticalFlag]);
    assert_eq!(analysis.conflict_resolutions[0].topic, "pricing");

    for resolution in &analysis.conflict_resolutions {
        assert!(resolution.citations_resolved);
        assert!(resolution.sources.is_empty());
        assert_eq!(resolution.verdict, "Evidence favours premium pricing [1].");
    }
    assert_eq!(analysis.sources.len(), 1);
    assert!(analysis.telemetry.resolution_failures.is_empty());
}

#[tokio::test]
async fn test_adaptive_selection_adds_ad_hoc_agent() {
    let llm = ScriptedLLM::new(|kind, user| {
        if *kind == CallKind::GapCheck {
            return Ok(json!({
                "ad_hoc_agents": [{
                    "name": "logistics",
                    "system_prompt": "You are the logistics analyst for regional freight networks."
                }],
                "reasoning": "freight routing is not covered"
            })
            .to_string());
        }
        default_reply(kind, user)
    });
    let harness = Harness::new(llm, None);
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());

    let analysis = orchestrator
        .run_with_selection(
            PROBLEM,
            &default_specs(),
            &BTreeMap::new(),
            &CancellationToken::new(),
        )
        .await
        .expect("run completes");

    let metadata = analysis.selection_metadata.as_ref().expect("selection recorded");
    assert!(metadata.auto_selected);
    assert_eq!(metadata.selected_agents, vec!["market", "cost", "risk"]);
    assert_eq!(metadata.ad_hoc_agents.len(), 1);
    assert_eq!(analysis.telemetry.modules_attempted, 4);
    assert!(analysis
        .outputs_for(Round::Revision)
        .any(|o| o.agent == "logistics"));
}

#[tokio::test]
async fn test_coordinated_mode_without_tool_calls_falls_back_to_direct_dispatch() {
    let harness = Harness::new(ScriptedLLM::panel(), None);
    let orchestrator = harness.orchestrator(OrchestratorOptions {
        mode: DispatchMode::Coordinated,
        max_stalled_passes: 2,
        ..Default::default()
    });
    let roster = harness.roster(&BTreeMap::new());

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(analysis.telemetry.modules_completed, 3);
    assert_eq!(analysis.outputs_for(Round::Independent).count(), 3);
    assert_eq!(analysis.outputs_for(Round::Revision).count(), 3);
    // two passes without an acknowledgement per round
    assert_eq!(harness.llm.count(|c| *c == CallKind::Coordinate), 4);
}

#[tokio::test]
async fn test_coordinated_mode_acknowledges_each_agent_once_per_round() {
    let harness = Harness::new(ScriptedLLM::panel().acknowledging(), None);
    let orchestrator = harness.orchestrator(OrchestratorOptions {
        mode: DispatchMode::Coordinated,
        ..Default::default()
    });
    let roster = harness.roster(&BTreeMap::new());

    let analysis = orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(analysis.telemetry.modules_completed, 3);
    assert_eq!(analysis.outputs_for(Round::Revision).count(), 3);
    assert_eq!(harness.llm.count(|c| *c == CallKind::Coordinate), 2);

    let calls = harness.llm.calls();
    let first_coordinate = calls.iter().position(|c| *c == CallKind::Coordinate);
    let first_round1 = calls.iter().position(|c| matches!(c, CallKind::Round1(_)));
    assert!(first_coordinate < first_round1);
}

#[tokio::test]
async fn test_raci_matrix_reaches_the_synthesis_lead() {
    let seen: Arc<parking_lot::Mutex<Vec<String>>> = Arc::default();
    let record = seen.clone();
    let harness = Harness::new(
        ScriptedLLM::new(move |kind, user| {
            if *kind == CallKind::Synthesis {
                record.lock().push(user.to_string());
            }
            default_reply(kind, user)
        }),
        None,
    );
    let orchestrator = harness.orchestrator(OrchestratorOptions {
        raci: Some(RaciRow::default_matrix()),
        ..Default::default()
    });
    let roster = harness.roster(&BTreeMap::new());

    orchestrator
        .run(PROBLEM, &roster, &CancellationToken::new())
        .await
        .expect("run completes");

    let prompts = seen.lock();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("RACI MATRIX"));
    assert!(prompts[0].contains("| Financial viability | cost | cost | market | risk |"));
}

#[tokio::test]
async fn test_short_selection_falls_back_to_configured_roster() {
    let llm = ScriptedLLM::new(|kind, user| {
        if *kind == CallKind::Selection {
            return Ok(json!({"selected": ["legal", "astrology"], "reasoning": "narrow"}).to_string());
        }
        default_reply(kind, user)
    });
    let harness = Harness::new(llm, None);
    let orchestrator = harness.orchestrator(OrchestratorOptions::default());

    let analysis = orchestrator
        .run_with_selection(
            PROBLEM,
            &default_specs(),
            &BTreeMap::new(),
            &CancellationToken::new(),
        )
        .await
        .expect("run completes");

    let metadata = analysis.selection_metadata.as_ref().expect("selection recorded");
    assert!(!metadata.auto_selected);
    assert_eq!(metadata.selected_agents, vec!["market", "cost", "risk"]);
    assert!(metadata.selection_reasoning.contains("fewer than the minimum of 3"));
    assert_eq!(harness.llm.count(|c| *c == CallKind::GapCheck), 0);
    assert_eq!(analysis.telemetry.modules_completed, 3);
}
