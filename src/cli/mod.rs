//! CLI module for mediator
//!
//! Command-line parsing for the `mediator` binary. Uses clap for argument
//! parsing and owo-colors for colored terminal output.

pub mod init;
pub mod output;

use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::utils::toml_config::MediatorConfig;

/// mediator - staged multi-agent analysis with audited citations
#[derive(Parser, Debug)]
#[command(
    name = "mediator",
    version,
    about = "Staged multi-agent analysis with consolidated citations and a layered audit",
    long_about = "Runs a panel of domain analysts over a decision problem in two rounds,\n\
                  synthesizes their views, consolidates every cited source into one list\n\
                  and audits the merged record.",
    after_help = "EXAMPLES:\n    \
                  mediator analyze \"Should we open a second warehouse?\"\n    \
                  mediator analyze --auto-select --weight risk=2 \"Enter the EU market?\"\n    \
                  mediator audit report.json --verify-grounding\n    \
                  mediator init                  # Write a default mediator.toml"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mediator.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a decision problem and audit the result
    Analyze(AnalyzeArgs),

    /// Re-run the audit layers over a saved JSON record
    Audit {
        /// Path to a JSON record written by `analyze --json`
        report: PathBuf,

        /// Also run the sampled grounding verification
        #[arg(long)]
        verify_grounding: bool,

        /// Also run the round consistency check
        #[arg(long)]
        check_consistency: bool,

        /// Write the updated audit back into the record
        #[arg(short, long)]
        write: bool,
    },

    /// Show configuration information
    Config {
        /// Validate the configuration file and print warnings
        #[arg(long)]
        validate: bool,
    },

    /// List the built-in analysis domains
    Agents,

    /// Write a default mediator.toml
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing mediator.toml
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct AnalyzeArgs {
    /// The decision problem to analyze
    pub problem: String,

    /// Resolve escalated conflicts and red flags after synthesis
    #[arg(long)]
    pub deep_research: bool,

    /// Run without web-search grounding
    #[arg(long)]
    pub no_search: bool,

    /// Let the model pick the panel for this problem
    #[arg(long)]
    pub auto_select: bool,

    /// Agent weight as name=N (repeatable); 0 deactivates the agent
    #[arg(long = "weight", value_name = "NAME=N", value_parser = parse_weight)]
    pub weights: Vec<(String, f64)>,

    /// Give the synthesis lead the RACI matrix for weighing disagreements
    #[arg(long)]
    pub raci: bool,

    /// Run the sampled grounding verification after the run
    #[arg(long)]
    pub verify_grounding: bool,

    /// Run the round consistency check after the run
    #[arg(long)]
    pub check_consistency: bool,

    /// Print the full record as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl AnalyzeArgs {
    /// Folds the flags into the file configuration. Flags only ever switch
    /// features on; weights given here replace file weights of the same name.
    pub fn apply_to(&self, config: &mut MediatorConfig) {
        if self.deep_research {
            config.resolution.enabled = true;
        }
        if self.no_search {
            config.search.enabled = false;
        }
        if self.auto_select {
            config.agents.auto_select = true;
        }
        if self.raci {
            config.synthesis.raci = true;
        }
        if self.verify_grounding {
            config.audit.grounding.enabled = true;
        }
        if self.check_consistency {
            config.audit.consistency.enabled = true;
        }
        let overrides: BTreeMap<String, f64> = self.weights.iter().cloned().collect();
        config.agents.weights.extend(overrides);
    }
}

/// Parses `name=N` into a lowercase name and a non-negative weight.
pub fn parse_weight(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=N, got '{}'", raw))?;
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err("agent name must not be empty".to_string());
    }
    let weight: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    if !weight.is_finite() || weight < 0.0 {
        return Err(format!("weight must be non-negative, got {}", weight));
    }
    Ok((name, weight))
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
