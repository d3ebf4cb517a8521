//! L1: static constraint linter.
//!
//! Rebuilds every prompt variant with the run's own inputs and checks that the
//! source-handling instructions are present. Pure text, no external calls.

use crate::llm::prompts::{self, Prompt};
use crate::types::{AgentOutput, BriefOutput, FinalAnalysis, LayerVerdict, Round, SourceRecord};
use std::collections::BTreeMap;

/// One prompt variant and the phrases it must contain.
struct Rule {
    label: &'static str,
    prompt: Prompt,
    required: Vec<String>,
    /// Checked against the system text only.
    system_required: Vec<String>,
}

fn phrases(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn sample_output(problem: &str) -> AgentOutput {
    AgentOutput {
        agent: "sample".to_string(),
        round: Round::Independent,
        analysis: serde_json::json!({ "summary": problem }),
        flags: Vec::new(),
        sources: Vec::new(),
        revised: false,
        citations_resolved: true,
    }
}

fn rules(analysis: &FinalAnalysis) -> Vec<Rule> {
    let problem = analysis.problem.as_str();
    let sample = sample_output(problem);
    let peers = vec![BriefOutput {
        agent: "peer".to_string(),
        summary: "peer summary".to_string(),
        flags: Vec::new(),
    }];
    let grounding = "[1] Sample — https://sample.example\n    snippet";

    let mut rules = vec![
        Rule {
            label: "round 1 without grounding",
            prompt: prompts::round1("system", problem, None),
            required: phrases(&["MUST BE EMPTY", "Do not fabricate", "Do not use inline citation markers"]),
            system_required: Vec::new(),
        },
        Rule {
            label: "round 1 with grounding",
            prompt: prompts::round1("system", problem, Some(grounding)),
            required: phrases(&["verbatim", "MUST have an inline [N]"]),
            system_required: Vec::new(),
        },
        Rule {
            label: "round 2 without grounding",
            prompt: prompts::round2("system", problem, &sample, &peers, None),
            required: phrases(&["MUST BE EMPTY", "Do not fabricate"]),
            system_required: phrases(&["Do not introduce new specific statistics"]),
        },
        Rule {
            label: "round 2 with grounding",
            prompt: prompts::round2("system", problem, &sample, &peers, Some(grounding)),
            required: phrases(&["verbatim", "MUST have an inline [N]"]),
            system_required: phrases(&["Do not introduce new specific statistics"]),
        },
        Rule {
            label: "resolution with evidence",
            prompt: prompts::resolution("topic", "description", &peers, Some(grounding)),
            required: phrases(&["verbatim"]),
            system_required: Vec::new(),
        },
        Rule {
            label: "resolution without evidence",
            prompt: prompts::resolution("topic", "description", &peers, None),
            required: phrases(&["MUST BE EMPTY"]),
            system_required: Vec::new(),
        },
    ];

    let sample_sources;
    let sources: &[SourceRecord] = if analysis.sources.is_empty() {
        sample_sources = vec![SourceRecord::new("Sample", Some("https://sample.example".to_string()))];
        &sample_sources
    } else {
        &analysis.sources
    };
    let mut required = phrases(&["CRITICAL", "\"sources\": []"]);
    if let Some(url) = sources.first().and_then(|s| s.url.clone()) {
        required.push(url);
    }
    rules.push(Rule {
        label: "synthesis with global sources",
        prompt: prompts::synthesis(problem, &[sample], &BTreeMap::new(), sources, None),
        required,
        system_required: Vec::new(),
    });
    rules
}

fn violations(rules: &[Rule]) -> Vec<String> {
    let mut violations = Vec::new();
    for rule in rules {
        let text = rule.prompt.full_text();
        for phrase in &rule.required {
            if !text.contains(phrase.as_str()) {
                violations.push(format!("{}: missing \"{}\"", rule.label, phrase));
            }
        }
        for phrase in &rule.system_required {
            if !rule.prompt.system.contains(phrase.as_str()) {
                violations.push(format!("{}: system prompt missing \"{}\"", rule.label, phrase));
            }
        }
    }
    violations
}

/// Missing phrases across every prompt variant, as violation strings.
pub fn lint(analysis: &FinalAnalysis) -> LayerVerdict {
    let violations = violations(&rules(analysis));
    if !violations.is_empty() {
        tracing::warn!(violations = violations.len(), "Prompt lint failed");
    }
    LayerVerdict::from_violations(violations)
}
