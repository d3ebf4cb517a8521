use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============= Rounds =============

/// One synchronized phase of the protocol.
///
/// Serialized as its number (`1`, `2`, `3`) so persisted records stay compact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Round {
    /// Independent analysis: problem plus own grounding only.
    Independent,
    /// Informed revision: own full output plus briefed peers.
    Revision,
    /// Synthesis over every full output.
    Synthesis,
}

impl Round {
    pub fn number(self) -> u8 {
        match self {
            Round::Independent => 1,
            Round::Revision => 2,
            Round::Synthesis => 3,
        }
    }
}

impl From<Round> for u8 {
    fn from(round: Round) -> Self {
        round.number()
    }
}

impl TryFrom<u8> for Round {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Round::Independent),
            2 => Ok(Round::Revision),
            3 => Ok(Round::Synthesis),
            other => Err(format!("invalid round number: {}", other)),
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round {}", self.number())
    }
}

// ============= Sources =============

/// A (title, url, snippet) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snippet: String,
}

impl SourceRecord {
    pub fn new(title: impl Into<String>, url: Option<String>) -> Self {
        Self {
            title: title.into(),
            url,
            snippet: String::new(),
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// True when the record carries a non-empty URL.
    pub fn has_url(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// `Title — URL`, the form used in prompts and reports.
    pub fn display_line(&self) -> String {
        match &self.url {
            Some(url) if !self.title.is_empty() => format!("{} — {}", self.title, url),
            Some(url) => url.clone(),
            None => self.title.clone(),
        }
    }
}

/// A source as emitted by one agent or resolution task, before consolidation.
///
/// `local_index` is the number the emitter used in its own inline markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedSource {
    pub local_index: usize,
    #[serde(flatten)]
    pub record: SourceRecord,
}

// ============= Agent Outputs =============

/// Produced by one agent in one round. Immutable once emitted apart from the
/// consolidation pass, which rewrites markers and clears `sources`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent: String,
    pub round: Round,
    #[serde(default)]
    pub analysis: serde_json::Value,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub sources: Vec<CitedSource>,
    #[serde(default)]
    pub revised: bool,
    /// Set once the consolidator has remapped this output's markers.
    #[serde(default)]
    pub citations_resolved: bool,
}

impl AgentOutput {
    /// The `summary` field of the analysis payload, or an empty string.
    pub fn summary(&self) -> &str {
        self.analysis
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    /// Reduced view used for cross-agent context in Round 2.
    pub fn brief(&self) -> BriefOutput {
        BriefOutput {
            agent: self.agent.clone(),
            summary: self.summary().to_string(),
            flags: self.flags.clone(),
        }
    }
}

/// Summary + flags only. Bounds per-agent payload growth in Round 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefOutput {
    pub agent: String,
    pub summary: String,
    pub flags: Vec<String>,
}

/// Severity prefix of a flag string (`red: ...`, `yellow: ...`, `green: ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagLevel {
    Red,
    Yellow,
    Green,
    Untagged,
}

impl FlagLevel {
    pub fn of(flag: &str) -> Self {
        let lowered = flag.trim_start().to_lowercase();
        if lowered.starts_with("red:") {
            FlagLevel::Red
        } else if lowered.starts_with("yellow:") {
            FlagLevel::Yellow
        } else if lowered.starts_with("green:") {
            FlagLevel::Green
        } else {
            FlagLevel::Untagged
        }
    }
}

// ============= Conflicts =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// High and critical conflicts are eligible for resolution.
    pub fn is_escalated(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

/// Cross-agent disagreement surfaced by synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(alias = "modules")]
    pub agents: Vec<String>,
    pub topic: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Conflict,
    CriticalFlag,
}

/// Verdict produced by the resolver for a conflict or standalone critical flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub topic: String,
    pub kind: ResolutionKind,
    #[serde(default)]
    pub agents: Vec<String>,
    pub verdict: String,
    pub updated_recommendation: String,
    #[serde(default)]
    pub sources: Vec<CitedSource>,
    #[serde(default)]
    pub citations_resolved: bool,
}

// ============= Synthesis =============

/// One topic of a RACI matrix: which agent owns it and who else weighs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaciRow {
    pub topic: String,
    pub responsible: String,
    pub accountable: String,
    #[serde(default)]
    pub consulted: Vec<String>,
    #[serde(default)]
    pub informed: Vec<String>,
}

impl RaciRow {
    fn new(topic: &str, owner: &str, consulted: &[&str], informed: &[&str]) -> Self {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Self {
            topic: topic.to_string(),
            responsible: owner.to_string(),
            accountable: owner.to_string(),
            consulted: owned(consulted),
            informed: owned(informed),
        }
    }

    /// Matrix for the default market/cost/risk panel.
    pub fn default_matrix() -> Vec<RaciRow> {
        vec![
            Self::new("Market opportunity & demand", "market", &["cost"], &["risk"]),
            Self::new("Financial viability", "cost", &["market"], &["risk"]),
            Self::new("Risk assessment", "risk", &["cost", "market"], &[]),
        ]
    }
}

// ============= Selection =============

/// Runtime-proposed agent: a name plus its domain prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdHocAgent {
    pub name: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionMetadata {
    pub auto_selected: bool,
    #[serde(default)]
    pub selected_agents: Vec<String>,
    #[serde(default)]
    pub selection_reasoning: String,
    #[serde(default)]
    pub gap_check_reasoning: String,
    #[serde(default)]
    pub ad_hoc_agents: Vec<AdHocAgent>,
}

// ============= Audit =============

/// Pass/fail plus violations for the structural layers (1 and 2).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerVerdict {
    pub passed: bool,
    #[serde(default)]
    pub violations: Vec<String>,
}

impl LayerVerdict {
    pub fn from_violations(violations: Vec<String>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlOutcome {
    Ok,
    BotBlocked,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlCheckResult {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub outcome: UrlOutcome,
}

impl UrlCheckResult {
    pub fn is_ok(&self) -> bool {
        self.outcome == UrlOutcome::Ok
    }

    /// 401/403/429: inconclusive, never a failure.
    pub fn is_bot_blocked(&self) -> bool {
        self.outcome == UrlOutcome::BotBlocked
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == UrlOutcome::Failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReachabilitySummary {
    pub total: usize,
    pub ok: usize,
    pub bot_blocked: usize,
    pub failed: usize,
    #[serde(default)]
    pub results: Vec<UrlCheckResult>,
}

impl ReachabilitySummary {
    pub fn from_results(results: Vec<UrlCheckResult>) -> Self {
        Self {
            total: results.len(),
            ok: results.iter().filter(|r| r.is_ok()).count(),
            bot_blocked: results.iter().filter(|r| r.is_bot_blocked()).count(),
            failed: results.iter().filter(|r| r.is_failed()).count(),
            results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &UrlCheckResult> {
        self.results.iter().filter(|r| r.is_failed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundingVerdict {
    Supported,
    Partial,
    Unsupported,
    FetchFailed,
    Unknown,
}

impl GroundingVerdict {
    /// Scans free text for a verdict keyword. `UNSUPPORTED` is checked before
    /// `SUPPORTED` since the latter is a substring of the former.
    pub fn parse(text: &str) -> Self {
        let upper = text.to_uppercase();
        if upper.contains("UNSUPPORTED") {
            GroundingVerdict::Unsupported
        } else if upper.contains("PARTIAL") {
            GroundingVerdict::Partial
        } else if upper.contains("SUPPORTED") {
            GroundingVerdict::Supported
        } else {
            GroundingVerdict::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingCheck {
    pub sentence: String,
    pub citation: usize,
    pub url: String,
    pub verdict: GroundingVerdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyCheck {
    pub agent: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub layer1: LayerVerdict,
    pub layer2: LayerVerdict,
    pub layer3: ReachabilitySummary,
    /// Sampled grounding checks; `None` when the layer did not run.
    #[serde(default)]
    pub layer4: Option<Vec<GroundingCheck>>,
    /// Round consistency checks; `None` when the layer did not run.
    #[serde(default)]
    pub layer5: Option<Vec<ConsistencyCheck>>,
}

impl AuditSummary {
    /// Non-zero when a structural layer failed or any URL is `failed`.
    /// Bot-blocked URLs never contribute.
    pub fn exit_code(&self) -> i32 {
        if !self.layer1.passed || !self.layer2.passed || self.layer3.failed > 0 {
            1
        } else {
            0
        }
    }
}

// ============= Quality =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Good,
    Degraded,
    Poor,
}

impl QualityTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityTier::Good
        } else if score >= 0.5 {
            QualityTier::Degraded
        } else {
            QualityTier::Poor
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QualityTier::Good => "good",
            QualityTier::Degraded => "degraded",
            QualityTier::Poor => "poor",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQuality {
    pub score: f64,
    pub tier: QualityTier,
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ============= Telemetry =============

/// Run-wide token counters, split by call kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub analyze_input: u64,
    pub analyze_output: u64,
    pub coordinate_input: u64,
    pub coordinate_output: u64,
    pub total_input: u64,
    pub total_output: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub selection_ms: u64,
    pub round1_ms: u64,
    pub round2_ms: u64,
    pub synthesis_ms: u64,
    pub resolution_ms: u64,
    pub audit_ms: u64,
    pub total_ms: u64,
}

/// A dispatched unit that did not produce a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent: String,
    pub round: Round,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub topic: String,
    pub reason: String,
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Select,
    Round1,
    Round2,
    Synthesize,
    Resolve,
    Done,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Select => "select",
            RunPhase::Round1 => "round1",
            RunPhase::Round2 => "round2",
            RunPhase::Synthesize => "synthesize",
            RunPhase::Resolve => "resolve",
            RunPhase::Done => "done",
            RunPhase::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTelemetry {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub token_usage: UsageTotals,
    #[serde(default)]
    pub timings: PhaseTimings,
    pub modules_attempted: usize,
    pub modules_completed: usize,
    /// Sources claimed by every emitter before URL filtering.
    pub sources_claimed: usize,
    #[serde(default)]
    pub failures: Vec<AgentFailure>,
    #[serde(default)]
    pub resolution_failures: Vec<ResolutionFailure>,
    pub phase: RunPhase,
    #[serde(default)]
    pub cancelled: bool,
}

impl Default for RunTelemetry {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            token_usage: UsageTotals::default(),
            timings: PhaseTimings::default(),
            modules_attempted: 0,
            modules_completed: 0,
            sources_claimed: 0,
            failures: Vec::new(),
            resolution_failures: Vec::new(),
            phase: RunPhase::Select,
            cancelled: false,
        }
    }
}

// ============= Final Analysis =============

/// The run's aggregate record, handed to exporters and audit tooling.
///
/// Purely additive: whatever completed before a cancellation stays valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnalysis {
    pub problem: String,
    #[serde(default)]
    pub agent_outputs: Vec<AgentOutput>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub synthesis: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub priority_flags: Vec<String>,
    /// Global, 1-indexed source list.
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub deactivated_disclaimer: String,
    #[serde(default)]
    pub selection_metadata: Option<SelectionMetadata>,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub search_enabled: bool,
    #[serde(default)]
    pub conflict_resolutions: Vec<ConflictResolution>,
    #[serde(default)]
    pub audit: Option<AuditSummary>,
    #[serde(default)]
    pub quality: Option<RunQuality>,
    #[serde(default)]
    pub telemetry: RunTelemetry,
}

impl FinalAnalysis {
    pub fn new(problem: impl Into<String>) -> Self {
        Self {
            problem: problem.into(),
            agent_outputs: Vec::new(),
            conflicts: Vec::new(),
            synthesis: String::new(),
            recommendations: Vec::new(),
            priority_flags: Vec::new(),
            sources: Vec::new(),
            deactivated_disclaimer: String::new(),
            selection_metadata: None,
            weights: BTreeMap::new(),
            search_enabled: false,
            conflict_resolutions: Vec::new(),
            audit: None,
            quality: None,
            telemetry: RunTelemetry::default(),
        }
    }

    pub fn outputs_for(&self, round: Round) -> impl Iterator<Item = &AgentOutput> {
        self.agent_outputs.iter().filter(move |o| o.round == round)
    }

    /// Priority flags tagged `red:` (case-insensitive).
    pub fn red_flag_count(&self) -> usize {
        self.priority_flags
            .iter()
            .filter(|f| FlagLevel::of(f) == FlagLevel::Red)
            .count()
    }
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Provider or transport failure of a reasoning call.
    #[error("Reasoning error: {0}")]
    Reasoning(String),

    /// A structured result did not match its expected schema.
    #[error("Schema violation ({schema}): {message}")]
    Schema { schema: String, message: String },

    #[error("Search error: {0}")]
    Search(String),

    /// Zero agents could be dispatched.
    #[error("Fatal dispatch failure: {0}")]
    FatalDispatch(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Audit error: {0}")]
    Audit(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
