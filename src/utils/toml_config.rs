//! TOML-based configuration for mediator
//!
//! Declarative configuration for the reasoning provider, the agent roster,
//! orchestration limits, search grounding and the audit layers, loaded from a
//! TOML file (`mediator.toml`). Every field has a default, so an empty file is
//! a valid configuration. API keys are referenced by environment-variable
//! name and never stored in the file.

use crate::agents::{AgentSpec, BuiltinDomain, DEFAULT_ROSTER};
use crate::audit::AuditOptions;
use crate::llm::Provider;
use crate::research::{DispatchMode, DispatchPolicy, OrchestratorOptions};
use crate::search::grounding::GroundingLimits;
use crate::types::{AdHocAgent, RaciRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "mediator.toml";

/// Root configuration structure loaded from mediator.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediatorConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    #[serde(rename = "openai")]
    OpenAI {
        /// Environment variable containing API key
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        #[serde(default = "default_openai_base")]
        api_base: String,
    },
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::OpenAI {
            api_key_env: default_api_key_env(),
            api_base: default_openai_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Kept last so the rendered TOML puts the table after plain values
    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

// ============= Agent Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Built-in domains dispatched when adaptive selection is off or fails
    #[serde(default = "default_enabled_agents")]
    pub enabled: Vec<String>,

    /// Agent name to relative weight; 0 deactivates
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,

    /// Extra specialists defined by name and system prompt
    #[serde(default)]
    pub ad_hoc: Vec<AdHocAgent>,

    #[serde(default)]
    pub auto_select: bool,
}

fn default_enabled_agents() -> Vec<String> {
    DEFAULT_ROSTER.iter().map(|d| d.name().to_string()).collect()
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_agents(),
            weights: BTreeMap::new(),
            ad_hoc: Vec::new(),
            auto_select: false,
        }
    }
}

// ============= Orchestration Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub mode: DispatchMode,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-agent call timeout
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,

    /// Deadline for one round's whole batch
    #[serde(default = "default_round_timeout")]
    pub round_timeout_secs: u64,

    /// Coordinated mode: consecutive passes acknowledging nothing new before
    /// the pending agents are dispatched directly
    #[serde(default = "default_stalled_passes")]
    pub max_stalled_passes: usize,

    /// Whole-run budget; unset means unbounded
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_agent_timeout() -> u64 {
    180
}

fn default_round_timeout() -> u64 {
    600
}

fn default_stalled_passes() -> usize {
    3
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            max_concurrency: default_max_concurrency(),
            agent_timeout_secs: default_agent_timeout(),
            round_timeout_secs: default_round_timeout(),
            max_stalled_passes: default_stalled_passes(),
            run_timeout_secs: None,
        }
    }
}

// ============= Search Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,

    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    #[serde(default = "default_agent_result_cap")]
    pub agent_result_cap: usize,

    #[serde(default = "default_conflict_result_cap")]
    pub conflict_result_cap: usize,
}

fn default_true() -> bool {
    true
}

fn default_results_per_query() -> usize {
    5
}

fn default_max_queries() -> usize {
    4
}

fn default_agent_result_cap() -> usize {
    8
}

fn default_conflict_result_cap() -> usize {
    6
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            results_per_query: default_results_per_query(),
            max_queries: default_max_queries(),
            agent_result_cap: default_agent_result_cap(),
            conflict_result_cap: default_conflict_result_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Remove markers whose source was dropped instead of leaving them as-is
    #[serde(default = "default_true")]
    pub drop_on_miss: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self { drop_on_miss: true }
    }
}

// ============= Synthesis Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Give the synthesis lead the RACI matrix for weighing disagreements
    #[serde(default)]
    pub raci: bool,

    #[serde(default = "RaciRow::default_matrix")]
    pub matrix: Vec<RaciRow>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            raci: false,
            matrix: RaciRow::default_matrix(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ============= Audit Configuration =============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    #[serde(default)]
    pub grounding: GroundingAuditConfig,
    #[serde(default)]
    pub consistency: ConsistencyAuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachabilityConfig {
    #[serde(default = "default_reachability_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_reachability_concurrency")]
    pub concurrency: usize,
}

fn default_reachability_timeout() -> u64 {
    8
}

fn default_reachability_concurrency() -> usize {
    10
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_reachability_timeout(),
            concurrency: default_reachability_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingAuditConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fraction of cited sentences to verify, in (0, 1]
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_sample_rate() -> f64 {
    0.2
}

impl Default for GroundingAuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: default_sample_rate(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyAuditConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Configuration warnings that don't prevent operation but may indicate issues
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub kind: ConfigWarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarningKind {
    UnknownBuiltin,
    UnknownWeight,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Duplicate agent name '{0}'")]
    DuplicateAgent(String),
}

impl MediatorConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Like [`MediatorConfig::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::FileNotFound(path)) => {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: MediatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, weight) in &self.agents.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "weight for '{}' must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }

        let mut names = HashSet::new();
        for name in self.agents.enabled.iter().map(|n| n.trim().to_lowercase()) {
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateAgent(name));
            }
        }
        for agent in &self.agents.ad_hoc {
            if agent.name.trim().is_empty() || agent.system_prompt.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "ad-hoc agents need a name and a system_prompt".to_string(),
                ));
            }
            if !names.insert(agent.name.clone()) {
                return Err(ConfigError::DuplicateAgent(agent.name.clone()));
            }
        }

        let rate = self.audit.grounding.sample_rate;
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "audit.grounding.sample_rate must be in (0, 1], got {}",
                rate
            )));
        }
        if self.orchestration.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "orchestration.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.orchestration.agent_timeout_secs == 0 || self.orchestration.round_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestration timeouts must be greater than zero".to_string(),
            ));
        }
        if self.synthesis.raci && self.synthesis.matrix.is_empty() {
            return Err(ConfigError::ValidationError(
                "synthesis.raci is enabled but synthesis.matrix has no rows".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate configuration with warnings for suspicious entries
    ///
    /// Returns Ok with warnings, or Err if validation fails
    pub fn validate_with_warnings(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.validate()?;

        let mut warnings: Vec<ConfigWarning> = self
            .agents
            .enabled
            .iter()
            .filter(|name| BuiltinDomain::from_name(name).is_none())
            .map(|name| ConfigWarning {
                kind: ConfigWarningKind::UnknownBuiltin,
                message: format!("Agent '{}' is not a built-in domain and will be ignored", name),
            })
            .collect();

        warnings.extend(
            self.agents
                .weights
                .keys()
                .filter(|name| {
                    BuiltinDomain::from_name(name).is_none()
                        && !self.agents.ad_hoc.iter().any(|a| &a.name == *name)
                })
                .map(|name| ConfigWarning {
                    kind: ConfigWarningKind::UnknownWeight,
                    message: format!("Weight given for unknown agent '{}'", name),
                }),
        );

        Ok(warnings)
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Configured roster: known built-ins in order, then ad-hoc agents
    pub fn agent_specs(&self) -> Vec<AgentSpec> {
        self.agents
            .enabled
            .iter()
            .filter_map(|name| BuiltinDomain::from_name(name))
            .map(AgentSpec::Builtin)
            .chain(self.agents.ad_hoc.iter().cloned().map(AgentSpec::AdHoc))
            .collect()
    }

    /// Provider with its API key resolved from the environment
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        let llm = &self.llm;
        match &llm.provider {
            ProviderConfig::OpenAI {
                api_key_env,
                api_base,
            } => Ok(Provider::OpenAI {
                api_key: self
                    .resolve_env(api_key_env)
                    .ok_or_else(|| ConfigError::MissingEnvVar(api_key_env.clone()))?,
                api_base: api_base.clone(),
                model: llm.model.clone(),
                max_tokens: llm.max_tokens,
                temperature: llm.temperature,
            }),
            ProviderConfig::Ollama { base_url } => Ok(Provider::Ollama {
                base_url: base_url.clone(),
                model: llm.model.clone(),
            }),
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        let o = &self.orchestration;
        OrchestratorOptions {
            mode: o.mode,
            policy: DispatchPolicy {
                max_concurrency: o.max_concurrency,
                unit_timeout: Duration::from_secs(o.agent_timeout_secs),
                batch_timeout: Duration::from_secs(o.round_timeout_secs),
            },
            max_stalled_passes: o.max_stalled_passes,
            run_timeout: o.run_timeout_secs.map(Duration::from_secs),
            resolve_conflicts: self.resolution.enabled,
            drop_on_miss: self.consolidation.drop_on_miss,
            raci: self.synthesis.raci.then(|| self.synthesis.matrix.clone()),
        }
    }

    pub fn grounding_limits(&self) -> GroundingLimits {
        GroundingLimits {
            max_queries: self.search.max_queries,
            agent_result_cap: self.search.agent_result_cap,
            conflict_result_cap: self.search.conflict_result_cap,
        }
    }

    pub fn audit_options(&self) -> AuditOptions {
        let audit = &self.audit;
        AuditOptions {
            reachability_timeout: Duration::from_secs(audit.reachability.timeout_secs),
            reachability_concurrency: audit.reachability.concurrency,
            grounding: audit.grounding.enabled,
            grounding_sample_rate: audit.grounding.sample_rate,
            grounding_seed: audit.grounding.seed,
            consistency: audit.consistency.enabled,
        }
    }
}
