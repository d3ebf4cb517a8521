//! Prompt builders and the output schemas that go with them.
//!
//! Source-handling instructions are fixed strings so the static linter in
//! [`crate::audit::linter`] can check them without calling a model.

use crate::llm::reasoning::{FieldKind, OutputSchema};
use crate::types::{AgentOutput, BriefOutput, RaciRow, Round, SourceRecord};
use std::collections::BTreeMap;

/// System + user text for one reasoning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// System and user text joined, as the linter sees it.
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

// ============= Fixed instructions =============

pub const UNGROUNDED_SOURCE_RULES: &str = "SOURCE RULES: No search results were provided. \
Do not fabricate sources, titles, statistics attributions or URLs. \
Do not use inline citation markers such as [1]. \
The \"sources\" array MUST BE EMPTY.";

pub const GROUNDED_SOURCE_RULES: &str = "SOURCE RULES: Cite only the SEARCH RESULTS above. \
Copy each cited title and URL verbatim into \"sources\" as \"N. Title — URL\", where N is the result number. \
Every claim taken from a search result MUST have an inline [N] marker matching its entry in \"sources\". \
Do not invent sources that are not in the SEARCH RESULTS.";

pub const REVISION_GUARD: &str = "Do not introduce new specific statistics, figures or named \
metrics in this revision unless they carry an inline citation to a listed source.";

const AGENT_OUTPUT_GUIDE: &str = "Return \"summary\" (2-4 sentences), \"key_findings\" (list of strings), \
\"recommendations\" (list of strings), \"flags\" (list of strings, each prefixed with red:, yellow: or green:) \
and \"sources\".";

const EVIDENCE_RULES: &str = "Cite only the FRESH EVIDENCE above. Copy each cited title and URL verbatim \
into \"sources\" as \"N. Title — URL\" and mark supporting claims with inline [N] markers.";

const NO_EVIDENCE_RULES: &str = "No fresh evidence is available. Do not cite anything and do not use \
citation markers. The \"sources\" array MUST BE EMPTY.";

pub const COORDINATOR_SYSTEM: &str = "You coordinate a panel of domain analysts. \
Call the analyze_agent tool exactly once for every analyst listed as pending. \
Do not analyse the problem yourself and do not repeat the analysts' output.";

// ============= Rounds =============

pub fn round1(system_prompt: &str, problem: &str, grounding: Option<&str>) -> Prompt {
    let mut user = format!("PROBLEM:\n{}\n\n", problem);
    push_grounding(&mut user, grounding);
    user.push_str("Analyse the problem from your domain's perspective.\n");
    user.push_str(AGENT_OUTPUT_GUIDE);
    Prompt::new(system_prompt, user)
}

pub fn round2(
    system_prompt: &str,
    problem: &str,
    own: &AgentOutput,
    peers: &[BriefOutput],
    grounding: Option<&str>,
) -> Prompt {
    let system = format!("{}\n\n{}", system_prompt, REVISION_GUARD);

    let mut user = format!("PROBLEM:\n{}\n\n", problem);
    user.push_str("YOUR ROUND 1 ANALYSIS:\n");
    user.push_str(&render_output(own));
    user.push_str("\n\nOTHER ANALYSTS (summary and flags only):\n");
    if peers.is_empty() {
        user.push_str("(none completed)\n");
    }
    for peer in peers {
        user.push_str(&format!("### {}\n{}\n", peer.agent, peer.summary));
        for flag in &peer.flags {
            user.push_str(&format!("- {}\n", flag));
        }
    }
    user.push('\n');
    push_grounding(&mut user, grounding);
    user.push_str(
        "Revise your analysis in light of the other analysts. Keep what still holds, \
correct what does not, and note disagreements explicitly.\n",
    );
    user.push_str(AGENT_OUTPUT_GUIDE);
    Prompt::new(system, user)
}

fn push_grounding(user: &mut String, grounding: Option<&str>) {
    match grounding {
        Some(block) if !block.trim().is_empty() => {
            user.push_str("SEARCH RESULTS:\n");
            user.push_str(block);
            user.push_str("\n\n");
            user.push_str(GROUNDED_SOURCE_RULES);
        }
        _ => user.push_str(UNGROUNDED_SOURCE_RULES),
    }
    user.push_str("\n\n");
}

fn render_output(output: &AgentOutput) -> String {
    let analysis = serde_json::to_string_pretty(&output.analysis).unwrap_or_default();
    let mut text = analysis;
    if !output.flags.is_empty() {
        text.push_str("\nFlags:\n");
        for flag in &output.flags {
            text.push_str(&format!("- {}\n", flag));
        }
    }
    text
}

// ============= Synthesis =============

pub fn synthesis(
    problem: &str,
    outputs: &[AgentOutput],
    weights: &BTreeMap<String, f64>,
    sources: &[SourceRecord],
    raci: Option<&[RaciRow]>,
) -> Prompt {
    let system = "You are the synthesis lead of a multi-domain analysis panel. \
Merge the analysts' work into one decision-ready assessment, surfacing every \
material disagreement as a conflict.";

    let mut user = format!("PROBLEM:\n{}\n\n", problem);
    if weights.values().any(|w| (*w - 1.0).abs() > f64::EPSILON) {
        user.push_str(
            "Analyst weights express relative influence; weigh higher-weighted analysts accordingly.\n\n",
        );
    }

    for round in [Round::Independent, Round::Revision] {
        user.push_str(&format!("== {} ==\n", round));
        for output in outputs.iter().filter(|o| o.round == round) {
            let weight = weights.get(&output.agent).copied().unwrap_or(1.0);
            if (weight - 1.0).abs() > f64::EPSILON {
                user.push_str(&format!("### {} (Weight: {}x)\n", output.agent, weight));
            } else {
                user.push_str(&format!("### {}\n", output.agent));
            }
            user.push_str(&render_output(output));
            user.push_str("\n\n");
        }
    }

    if let Some(matrix) = raci.filter(|m| !m.is_empty()) {
        user.push_str(&raci_table(matrix));
    }

    if sources.is_empty() {
        user.push_str(
            "No sources are available. Do not use citation markers. Return \"sources\": [] in your response.\n",
        );
    } else {
        user.push_str("GLOBAL SOURCES:\n");
        for (i, source) in sources.iter().enumerate() {
            user.push_str(&format!("[{}] {}\n", i + 1, source.display_line()));
        }
        user.push_str(&format!(
            "\nCRITICAL: Cite only sources from the GLOBAL SOURCES list, using their [N] numbers \
exactly (1 to {}). Do not add new sources and do not renumber. Return \"sources\": [] in your response.\n",
            sources.len()
        ));
    }

    user.push_str(
        "Return \"synthesis\" (narrative), \"recommendations\" (list), \"priority_flags\" \
(list prefixed red:/yellow:/green:), \"conflicts\" (list of {\"agents\": [names], \"topic\", \
\"description\", \"severity\": critical|high|medium|low}) and \"sources\".",
    );
    Prompt::new(system, user)
}

/// Markdown RACI table plus the rule for weighing disagreements by it.
pub fn raci_table(matrix: &[RaciRow]) -> String {
    let mut text = String::from(
        "RACI MATRIX: use it to resolve conflicts and prioritize recommendations.\n\
| Topic | Responsible | Accountable | Consulted | Informed |\n|---|---|---|---|---|\n",
    );
    for row in matrix {
        text.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            row.topic,
            row.responsible,
            row.accountable,
            row.consulted.join(", "),
            row.informed.join(", ")
        ));
    }
    text.push_str(
        "\nWhen analysts disagree, the Accountable analyst's position carries the most weight \
for that topic. Consulted analysts provide secondary input. Informed analysts are noted but \
do not override the Accountable analyst.\n\n",
    );
    text
}

// ============= Resolution =============

pub fn resolution(
    topic: &str,
    description: &str,
    positions: &[BriefOutput],
    evidence: Option<&str>,
) -> Prompt {
    let system = "You are an impartial arbiter resolving a disagreement between domain analysts \
using fresh evidence. Give a clear verdict and a concrete updated recommendation.";

    let mut user = format!("TOPIC: {}\nDESCRIPTION: {}\n\nPOSITIONS:\n", topic, description);
    if positions.is_empty() {
        user.push_str("(no analyst positions recorded)\n");
    }
    for position in positions {
        user.push_str(&format!("### {}\n{}\n", position.agent, position.summary));
        for flag in &position.flags {
            user.push_str(&format!("- {}\n", flag));
        }
    }
    user.push('\n');
    match evidence {
        Some(block) if !block.trim().is_empty() => {
            user.push_str("FRESH EVIDENCE:\n");
            user.push_str(block);
            user.push_str("\n\n");
            user.push_str(EVIDENCE_RULES);
        }
        _ => user.push_str(NO_EVIDENCE_RULES),
    }
    user.push_str("\n\nReturn \"verdict\", \"updated_recommendation\" and \"sources\".");
    Prompt::new(system, user)
}

// ============= Selection =============

pub fn selection(problem: &str, catalogue: &[(&str, &str)], min: usize, max: usize) -> Prompt {
    let system = "You assemble analysis panels. Pick the domains that matter most for the problem.";
    let mut user = format!("PROBLEM:\n{}\n\nAVAILABLE DOMAINS:\n", problem);
    for (name, description) in catalogue {
        user.push_str(&format!("- {}: {}\n", name, description));
    }
    user.push_str(&format!(
        "\nSelect between {} and {} domains by name. Return \"selected\" (list of names) and \"reasoning\".",
        min, max
    ));
    Prompt::new(system, user)
}

pub fn gap_check(problem: &str, selected: &[String], max_ad_hoc: usize) -> Prompt {
    let system = "You review analysis panels for blind spots.";
    let user = format!(
        "PROBLEM:\n{}\n\nSELECTED DOMAINS: {}\n\nIf an important perspective is missing, propose up to {} \
additional specialist analysts. Return \"ad_hoc_agents\" (list of {{\"name\", \"system_prompt\"}}, \
empty when nothing is missing) and \"reasoning\".",
        problem,
        selected.join(", "),
        max_ad_hoc
    );
    Prompt::new(system, user)
}

// ============= Search queries =============

pub fn search_queries(
    domain_hint: &str,
    problem: &str,
    prior_findings: Option<&str>,
    max: usize,
) -> Prompt {
    let system = "You write concise web search queries.";
    let mut user = format!(
        "Write up to {} web search queries that would find evidence on the {} aspects of this problem:\n{}\n",
        max, domain_hint, problem
    );
    if let Some(prior) = prior_findings.filter(|p| !p.trim().is_empty()) {
        user.push_str(&format!(
            "\nEarlier findings to verify or extend:\n{}\n",
            prior
        ));
    }
    user.push_str("\nReturn \"queries\" (list of strings).");
    Prompt::new(system, user)
}

pub fn conflict_queries(topic: &str, description: &str, max: usize) -> Prompt {
    let system = "You write concise web search queries.";
    let user = format!(
        "Write up to {} web search queries that would settle this disagreement.\nTOPIC: {}\nDESCRIPTION: {}\n\nReturn \"queries\" (list of strings).",
        max, topic, description
    );
    Prompt::new(system, user)
}

// ============= Coordinated dispatch =============

pub fn coordinator(problem: &str, round: Round, pending: &[String]) -> Prompt {
    let user = format!(
        "{} of the panel for this problem:\n{}\n\nPENDING ANALYSTS: {}\n\nCall analyze_agent once per pending analyst.",
        round,
        problem,
        pending.join(", ")
    );
    Prompt::new(COORDINATOR_SYSTEM, user)
}

// ============= Audit =============

pub fn grounding_check(sentence: &str, page_text: &str) -> Prompt {
    let system = "You verify whether a cited web page supports a claim. Judge only from the page text.";
    let user = format!(
        "CLAIM:\n{}\n\nPAGE TEXT:\n{}\n\nClassify support as SUPPORTED, PARTIAL or UNSUPPORTED. Return \"verdict\" and \"reasoning\".",
        sentence, page_text
    );
    Prompt::new(system, user)
}

pub fn consistency_check(agent: &str, round1: &AgentOutput, round2: &AgentOutput) -> Prompt {
    let system = "You audit analysis revisions for unsupported new claims.";
    let user = format!(
        "ANALYST: {}\n\nROUND 1:\n{}\n\nROUND 2:\n{}\n\nList every concrete, numeric or named-metric claim \
that appears in Round 2 but not in Round 1 and carries no inline [N] citation. Return \"issues\" \
(list of strings, empty when there are none).",
        agent,
        render_output(round1),
        render_output(round2)
    );
    Prompt::new(system, user)
}

// ============= Schemas =============

pub fn agent_schema() -> OutputSchema {
    OutputSchema::new("agent_output")
        .required("summary", FieldKind::String)
        .optional("key_findings", FieldKind::Array)
        .optional("recommendations", FieldKind::Array)
        .optional("flags", FieldKind::Array)
        .optional("sources", FieldKind::Array)
}

pub fn synthesis_schema() -> OutputSchema {
    OutputSchema::new("synthesis")
        .required("synthesis", FieldKind::String)
        .optional("recommendations", FieldKind::Array)
        .optional("priority_flags", FieldKind::Array)
        .optional("conflicts", FieldKind::Array)
        .optional("sources", FieldKind::Array)
}

pub fn resolution_schema() -> OutputSchema {
    OutputSchema::new("resolution")
        .required("verdict", FieldKind::String)
        .required("updated_recommendation", FieldKind::String)
        .optional("sources", FieldKind::Array)
}

pub fn selection_schema() -> OutputSchema {
    OutputSchema::new("selection")
        .required("selected", FieldKind::Array)
        .optional("reasoning", FieldKind::String)
}

pub fn gap_check_schema() -> OutputSchema {
    OutputSchema::new("gap_check")
        .required("ad_hoc_agents", FieldKind::Array)
        .optional("reasoning", FieldKind::String)
}

pub fn queries_schema() -> OutputSchema {
    OutputSchema::new("search_queries").required("queries", FieldKind::Array)
}

pub fn grounding_schema() -> OutputSchema {
    OutputSchema::new("grounding_check")
        .required("verdict", FieldKind::String)
        .optional("reasoning", FieldKind::String)
}

pub fn consistency_schema() -> OutputSchema {
    OutputSchema::new("consistency_check").required("issues", FieldKind::Array)
}
