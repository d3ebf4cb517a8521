//! Adaptive agent selection: a selection call over the built-in catalogue
//! followed by a gap check that may propose ad-hoc specialists.

use crate::agents::catalogue::BuiltinDomain;
use crate::agents::configurable::AgentSpec;
use crate::llm::{prompts, Reasoner};
use crate::sources::string_list;
use crate::types::{AdHocAgent, SelectionMetadata};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub const MIN_SELECTED: usize = 3;
pub const MAX_SELECTED: usize = 7;
pub const MAX_AD_HOC: usize = 3;

/// Outcome of the SELECT state.
#[derive(Debug, Clone)]
pub struct Selection {
    pub specs: Vec<AgentSpec>,
    pub metadata: SelectionMetadata,
}

pub struct AgentSelector {
    reasoner: Arc<Reasoner>,
}

impl AgentSelector {
    pub fn new(reasoner: Arc<Reasoner>) -> Self {
        Self { reasoner }
    }

    /// Never fails: when the selection call fails or names fewer than
    /// [`MIN_SELECTED`] known domains the `fallback` roster is returned with
    /// `auto_selected = false` and the reason recorded.
    pub async fn select(&self, problem: &str, fallback: &[AgentSpec]) -> Selection {
        let prompt = prompts::selection(
            problem,
            &BuiltinDomain::catalogue(),
            MIN_SELECTED,
            MAX_SELECTED,
        );

        let (selected, selection_reasoning) =
            match self.reasoner.invoke(&prompt, &prompts::selection_schema()).await {
                Ok(value) => (parse_selected(&value), reasoning_of(&value)),
                Err(e) => {
                    tracing::warn!(error = %e, "Agent selection failed, using configured roster");
                    return Self::fallback(fallback, format!("Selection failed: {}", e));
                }
            };

        if let Some(reason) = shortfall(&selected) {
            tracing::warn!(selected = selected.len(), "{}", reason);
            return Self::fallback(fallback, reason);
        }

        let selected_names: Vec<String> = selected.iter().map(|d| d.name().to_string()).collect();
        let (ad_hoc, gap_check_reasoning) = self.gap_check(problem, &selected_names).await;

        tracing::info!(
            selected = ?selected_names,
            ad_hoc = ad_hoc.len(),
            "Adaptive selection complete"
        );

        let mut specs: Vec<AgentSpec> = selected.into_iter().map(AgentSpec::Builtin).collect();
        specs.extend(ad_hoc.iter().cloned().map(AgentSpec::AdHoc));

        Selection {
            specs,
            metadata: SelectionMetadata {
                auto_selected: true,
                selected_agents: selected_names,
                selection_reasoning,
                gap_check_reasoning,
                ad_hoc_agents: ad_hoc,
            },
        }
    }

    async fn gap_check(&self, problem: &str, selected: &[String]) -> (Vec<AdHocAgent>, String) {
        let prompt = prompts::gap_check(problem, selected, MAX_AD_HOC);
        match self.reasoner.invoke(&prompt, &prompts::gap_check_schema()).await {
            Ok(value) => (parse_ad_hoc(&value, selected), reasoning_of(&value)),
            Err(e) => {
                tracing::warn!(error = %e, "Gap check failed, continuing without ad-hoc agents");
                (Vec::new(), format!("Gap check failed: {}", e))
            }
        }
    }

    fn fallback(fallback: &[AgentSpec], reason: String) -> Selection {
        Selection {
            specs: fallback.to_vec(),
            metadata: SelectionMetadata {
                auto_selected: false,
                selected_agents: fallback.iter().map(|s| s.name().to_string()).collect(),
                selection_reasoning: reason,
                gap_check_reasoning: String::new(),
                ad_hoc_agents: Vec::new(),
            },
        }
    }
}

fn reasoning_of(value: &Value) -> String {
    value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Why a selection is too small to use, if it is.
fn shortfall(selected: &[BuiltinDomain]) -> Option<String> {
    if selected.len() >= MIN_SELECTED {
        return None;
    }
    let names: Vec<&str> = selected.iter().map(|d| d.name()).collect();
    Some(format!(
        "Selection named {} known domain(s) [{}], fewer than the minimum of {}; using configured roster",
        selected.len(),
        names.join(", "),
        MIN_SELECTED
    ))
}

/// Known domains only, deduplicated, capped at [`MAX_SELECTED`].
fn parse_selected(value: &Value) -> Vec<BuiltinDomain> {
    let mut selected = Vec::new();
    for name in string_list(value.get("selected")) {
        match BuiltinDomain::from_name(&name) {
            Some(domain) if !selected.contains(&domain) => selected.push(domain),
            Some(_) => {}
            None => tracing::debug!(name = %name, "Ignoring unknown domain from selection"),
        }
    }
    selected.truncate(MAX_SELECTED);
    selected
}

/// Ad-hoc proposals with a usable name and prompt, not clashing with the
/// selected agents, capped at [`MAX_AD_HOC`].
fn parse_ad_hoc(value: &Value, selected: &[String]) -> Vec<AdHocAgent> {
    let Some(Value::Array(items)) = value.get("ad_hoc_agents") else {
        return Vec::new();
    };

    let mut taken: HashSet<String> = selected.iter().cloned().collect();
    let mut agents = Vec::new();
    for item in items {
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .map(normalize_agent_name)
            .unwrap_or_default();
        let system_prompt = item
            .get("system_prompt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if name.is_empty() || system_prompt.is_empty() || !taken.insert(name.clone()) {
            continue;
        }
        agents.push(AdHocAgent {
            name,
            system_prompt,
        });
        if agents.len() == MAX_AD_HOC {
            break;
        }
    }
    agents
}

fn normalize_agent_name(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}
