//! Mock implementations for testing.
//!
//! Scripted stand-ins for the three external collaborators, so a whole run can
//! be driven without a model, a search engine or the network.

use async_trait::async_trait;
use mediator::llm::{LLMClient, LLMResponse, TokenUsage, ToolCall, ToolDefinition};
use mediator::search::{PageFetcher, SearchBackend, SearchHit};
use mediator::types::{AppError, Result};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a reasoning call was for, recovered from its prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Queries,
    Round1(String),
    Round2(String),
    Synthesis,
    Resolution,
    Selection,
    GapCheck,
    GroundingCheck,
    Consistency,
    /// Coordinating exchange with tools offered
    Coordinate,
    Unknown,
}

impl CallKind {
    pub fn agent(&self) -> Option<&str> {
        match self {
            CallKind::Round1(agent) | CallKind::Round2(agent) => Some(agent),
            _ => None,
        }
    }
}

pub fn classify(system: &str, user: &str) -> CallKind {
    if system.starts_with("You write concise web search queries") {
        CallKind::Queries
    } else if system.starts_with("You are the synthesis lead") {
        CallKind::Synthesis
    } else if system.starts_with("You are an impartial arbiter") {
        CallKind::Resolution
    } else if system.starts_with("You assemble analysis panels") {
        CallKind::Selection
    } else if system.starts_with("You review analysis panels") {
        CallKind::GapCheck
    } else if system.starts_with("You verify whether") {
        CallKind::GroundingCheck
    } else if system.starts_with("You audit analysis revisions") {
        CallKind::Consistency
    } else if let Some(agent) = analyst_name(system) {
        if user.contains("YOUR ROUND 1 ANALYSIS:") {
            CallKind::Round2(agent)
        } else {
            CallKind::Round1(agent)
        }
    } else {
        CallKind::Unknown
    }
}

fn analyst_name(system: &str) -> Option<String> {
    let rest = system.strip_prefix("You are the ")?;
    let (name, _) = rest.split_once(" analyst")?;
    Some(name.to_string())
}

/// First `[1] Title — URL` line of an evidence block, if any.
pub fn first_search_hit(user: &str) -> Option<(String, String)> {
    let line = user.lines().find(|l| l.starts_with("[1] "))?;
    let (title, url) = line.trim_start_matches("[1] ").split_once(" — ")?;
    Some((title.to_string(), url.trim().to_string()))
}

type Handler = dyn Fn(&CallKind, &str) -> Result<String> + Send + Sync;

/// LLM client whose replies are produced by a handler keyed on the call kind.
///
/// Every call is recorded, and reports 10 input / 5 output tokens.
pub struct ScriptedLLM {
    handler: Arc<Handler>,
    calls: Mutex<Vec<CallKind>>,
    acknowledges: bool,
}

impl ScriptedLLM {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CallKind, &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            calls: Mutex::new(Vec::new()),
            acknowledges: false,
        }
    }

    /// Coordinating calls acknowledge every agent the offered tool lists.
    pub fn acknowledging(mut self) -> Self {
        self.acknowledges = true;
        self
    }

    /// Well-behaved panel: every call gets a plausible structured reply.
    pub fn panel() -> Self {
        Self::new(default_reply)
    }

    /// Like [`ScriptedLLM::panel`], but `agent` fails in every round.
    pub fn failing_agent(agent: &'static str) -> Self {
        Self::new(move |kind, user| {
            if kind.agent() == Some(agent) {
                Err(AppError::Reasoning(format!("{} provider error", agent)))
            } else {
                default_reply(kind, user)
            }
        })
    }

    pub fn calls(&self) -> Vec<CallKind> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&CallKind) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }
}

/// Default structured replies. Agents cite the first search hit when they
/// were given evidence and cite nothing otherwise.
pub fn default_reply(kind: &CallKind, user: &str) -> Result<String> {
    let value = match kind {
        CallKind::Queries => json!({"queries": ["regional warehouse demand 2024"]}),
        CallKind::Round1(agent) | CallKind::Round2(agent) => match first_search_hit(user) {
            Some((title, url)) => json!({
                "summary": format!("{} finds demand rising in the region [1].", agent),
                "key_findings": [format!("Regional demand is up [1] ({})", agent)],
                "flags": [format!("yellow: {} depends on demand holding", agent)],
                "sources": [format!("1. {} — {}", title, url)]
            }),
            None => json!({
                "summary": format!("{} sees moderate upside.", agent),
                "key_findings": ["No external evidence was available"],
                "flags": [format!("yellow: {} view is unverified", agent)],
                "sources": []
            }),
        },
        CallKind::Synthesis => {
            let cite = if user.contains("GLOBAL SOURCES:") { " [1]" } else { "" };
            json!({
                "synthesis": format!("Proceed with a staged pilot{}.", cite),
                "recommendations": [format!("Run a six-month pilot{}", cite)],
                "priority_flags": ["red: cash runway is short"],
                "conflicts": [{
                    "agents": ["market", "cost"],
                    "topic": "pricing",
                    "description": "Market expects premium pricing while cost sees margin pressure.",
                    "severity": "high"
                }],
                "sources": []
            })
        }
        CallKind::Resolution => match first_search_hit(user) {
            Some((title, url)) => json!({
                "verdict": "Evidence favours premium pricing [1].",
                "updated_recommendation": "Price at a premium in the pilot region [1].",
                "sources": [format!("1. {} — {}", title, url)]
            }),
            None => json!({
                "verdict": "No evidence either way; keep pricing neutral.",
                "updated_recommendation": "Test two price points in the pilot.",
                "sources": []
            }),
        },
        CallKind::Selection => json!({"selected": ["market", "cost", "risk"], "reasoning": "core panel"}),
        CallKind::GapCheck => json!({"ad_hoc_agents": [], "reasoning": "nothing missing"}),
        CallKind::GroundingCheck => json!({"verdict": "SUPPORTED", "reasoning": "stated on the page"}),
        CallKind::Consistency => json!({"issues": []}),
        CallKind::Coordinate | CallKind::Unknown => {
            return Err(AppError::Reasoning("unscripted prompt".to_string()));
        }
    };
    Ok(value.to_string())
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<LLMResponse> {
        let kind = classify(system, prompt);
        self.calls.lock().push(kind.clone());
        let content = (self.handler)(&kind, prompt)?;
        let mut response = LLMResponse::text(content);
        response.usage = Some(TokenUsage {
            input: 10,
            output: 5,
        });
        Ok(response)
    }

    /// Calls no tools unless built with [`ScriptedLLM::acknowledging`].
    async fn generate_with_tools(
        &self,
        _system: &str,
        _prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<LLMResponse> {
        self.calls.lock().push(CallKind::Coordinate);
        let mut response = LLMResponse::text("Dispatching the panel.");
        if self.acknowledges {
            let pending = tools
                .iter()
                .filter_map(|t| t.parameters["properties"]["agent"]["enum"].as_array())
                .flatten()
                .filter_map(|v| v.as_str());
            response.tool_calls = pending
                .enumerate()
                .map(|(i, agent)| ToolCall {
                    id: format!("call_{}", i),
                    name: tools[0].name.clone(),
                    arguments: json!({ "agent": agent }),
                })
                .collect();
        }
        Ok(response)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Search backend returning the same hits for every query and counting calls.
pub struct CountingSearch {
    hits: Vec<SearchHit>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl CountingSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_urls(urls: &[&str]) -> Self {
        Self::new(
            urls.iter()
                .enumerate()
                .map(|(i, url)| SearchHit {
                    title: format!("Report {}", i + 1),
                    url: url.to_string(),
                    snippet: "Regional demand rose last year.".to_string(),
                })
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchBackend for CountingSearch {
    async fn query(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.to_string());
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

/// Page fetcher backed by a fixed URL → text map; unknown URLs fail.
#[derive(Default)]
pub struct StaticPages {
    pages: HashMap<String, String>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl PageFetcher for StaticPages {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Search(format!("no page for {}", url)))
    }
}
