//! # mediator
//!
//! Staged multi-agent reasoning over a single decision problem: independent
//! analysis, informed revision, synthesis and an optional evidence-backed
//! resolution pass, followed by citation consolidation and a layered audit of
//! the merged record.
//!
//! ## Overview
//!
//! mediator can be used in two ways:
//!
//! 1. **As a CLI** - Run the `mediator` binary (`mediator analyze "..."`)
//! 2. **As a library** - Drive [`RoundOrchestrator`] with your own
//!    [`LLMClient`] and [`search::SearchBackend`]
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use mediator::{
//!     AgentRoster, AuditPipeline, Grounding, MediatorConfig, Reasoner, RoundOrchestrator,
//!     SearchCache,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = MediatorConfig::load_or_default("mediator.toml")?;
//! let reasoner = Arc::new(Reasoner::new(config.provider()?.create_client()?));
//! let cache = Arc::new(SearchCache::disabled());
//! let grounding = Arc::new(Grounding::new(reasoner.clone(), cache, config.grounding_limits()));
//!
//! let roster = AgentRoster::from_specs(config.agent_specs(), reasoner.clone(), &config.agents.weights)?;
//! let orchestrator = RoundOrchestrator::new(reasoner.clone(), grounding, config.orchestrator_options());
//! let mut analysis = orchestrator
//!     .run("Should we open a second warehouse?", &roster, &CancellationToken::new())
//!     .await?;
//!
//! let audit = AuditPipeline::new(Some(reasoner), None, config.audit_options())
//!     .run(&mut analysis)
//!     .await;
//! std::process::exit(audit.exit_code());
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `openai` | OpenAI API and compatible endpoints (default) |
//! | `ollama` | Ollama local inference |
//!
//! ## Modules
//!
//! - [`agents`] - Agent trait, built-in catalogue, roster and adaptive selection
//! - [`audit`] - Five audit layers and the run quality gate
//! - [`llm`] - LLM client implementations and structured reasoning
//! - [`research`] - Fan-out dispatch, round orchestration and conflict resolution
//! - [`search`] - Search backend seam, run-scoped cache and grounding
//! - [`sources`] - Source parsing, citation markers and consolidation
//! - [`types`] - Data model and error handling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Analysis agents, catalogue and selection.
pub mod agents;
/// Prompt linting, citation integrity, reachability, grounding and consistency checks.
pub mod audit;
/// Command-line parsing and terminal output for the binary.
pub mod cli;
/// LLM provider clients and abstractions.
pub mod llm;
/// Multi-round orchestration.
pub mod research;
/// Web search, caching and grounding.
pub mod search;
/// Citation handling and source consolidation.
pub mod sources;
/// Core types (records, telemetry, errors).
pub mod types;
/// Configuration utilities (TOML).
pub mod utils;

// Re-export commonly used types
pub use agents::{AgentRoster, AgentSelector, AgentSpec, BuiltinDomain, DomainAgent};
pub use audit::{AuditOptions, AuditPipeline, QualityGate};
pub use llm::{LLMClient, LLMResponse, Provider, Reasoner};
pub use research::{ConflictResolver, DispatchMode, OrchestratorOptions, RoundOrchestrator};
pub use search::{DaedraBackend, Grounding, PageFetcher, SearchBackend, SearchCache};
pub use sources::SourceConsolidator;
pub use types::{AppError, FinalAnalysis, Result};
pub use utils::toml_config::{ConfigError, MediatorConfig};
