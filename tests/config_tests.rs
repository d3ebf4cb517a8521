//! Configuration file, CLI overrides and roster construction end to end.

mod common;

use clap::Parser;
use common::mocks::ScriptedLLM;
use mediator::agents::{Agent, AgentRoster};
use mediator::cli::init::{self, InitResult};
use mediator::cli::output::Output;
use mediator::cli::{Cli, Commands};
use mediator::llm::{LLMClient, Reasoner};
use mediator::research::DispatchMode;
use mediator::utils::toml_config::{ConfigError, MediatorConfig};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

const PANEL_CONFIG: &str = r#"
[agents]
enabled = ["market", "cost", "legal"]

[agents.weights]
legal = 0.0

[[agents.ad_hoc]]
name = "logistics"
system_prompt = "You analyse warehouse throughput and carrier capacity."

[orchestration]
mode = "coordinated"
agent_timeout_secs = 30

[search]
enabled = true
max_queries = 2
"#;

fn reasoner() -> Arc<Reasoner> {
    Arc::new(Reasoner::new(
        Arc::new(ScriptedLLM::panel()) as Arc<dyn LLMClient>
    ))
}

fn analyze_args(argv: &[&str]) -> mediator::cli::AnalyzeArgs {
    let mut full = vec!["mediator", "analyze"];
    full.extend_from_slice(argv);
    match Cli::try_parse_from(full).expect("valid arguments").command {
        Commands::Analyze(args) => args,
        other => panic!("expected analyze, got {:?}", other),
    }
}

#[test]
fn test_file_config_builds_weighted_roster() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mediator.toml");
    fs::write(&path, PANEL_CONFIG).unwrap();

    let config = MediatorConfig::load(&path).unwrap();
    assert!(config.validate_with_warnings().unwrap().is_empty());

    let roster =
        AgentRoster::from_specs(config.agent_specs(), reasoner(), &config.agents.weights).unwrap();
    assert_eq!(roster.len(), 4);
    assert_eq!(roster.deactivated(), vec!["legal".to_string()]);

    let active: Vec<String> = roster.active().iter().map(|a| a.name().to_string()).collect();
    assert_eq!(active, vec!["market", "cost", "logistics"]);

    let options = config.orchestrator_options();
    assert_eq!(options.mode, DispatchMode::Coordinated);
    assert_eq!(options.policy.unit_timeout, Duration::from_secs(30));
    assert_eq!(config.grounding_limits().max_queries, 2);
}

#[test]
fn test_cli_flags_override_file() {
    let mut config = MediatorConfig::parse(PANEL_CONFIG).unwrap();
    let args = analyze_args(&[
        "Should we open a second warehouse?",
        "--deep-research",
        "--no-search",
        "--weight",
        "Legal=1.5",
        "--verify-grounding",
    ]);
    args.apply_to(&mut config);

    assert!(config.resolution.enabled);
    assert!(!config.search.enabled);
    assert!(config.audit.grounding.enabled);
    assert!(!config.audit.consistency.enabled);
    assert_eq!(config.agents.weights.get("legal"), Some(&1.5));

    let roster =
        AgentRoster::from_specs(config.agent_specs(), reasoner(), &config.agents.weights).unwrap();
    assert!(roster.deactivated().is_empty());
    assert_eq!(roster.weight("legal"), 1.5);
}

#[test]
fn test_invalid_weight_argument_rejected() {
    let result = Cli::try_parse_from(["mediator", "analyze", "problem", "--weight", "market=-2"]);
    assert!(result.is_err());
}

#[test]
fn test_init_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let output = Output::no_color();

    assert!(matches!(init::run(dir.path(), false, &output), InitResult::Success));
    assert!(matches!(init::run(dir.path(), false, &output), InitResult::AlreadyExists));

    let config = MediatorConfig::load(dir.path().join("mediator.toml")).unwrap();
    assert_eq!(config.agents.enabled, vec!["market", "cost", "risk"]);
    assert_eq!(config.audit.reachability.timeout_secs, 8);
    assert!(config.search.enabled);
}

#[test]
fn test_broken_file_reports_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mediator.toml");
    fs::write(&path, "[orchestration\nmode = ").unwrap();

    assert!(matches!(
        MediatorConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
    assert!(matches!(
        MediatorConfig::load_or_default(&path),
        Err(ConfigError::ParseError(_))
    ));
}
