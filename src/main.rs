use anyhow::{Context, Result};
use mediator::agents::{AgentRoster, BuiltinDomain};
use mediator::audit::AuditPipeline;
use mediator::cli::init::{self, InitResult};
use mediator::cli::output::Output;
use mediator::cli::{AnalyzeArgs, Cli, Commands};
use mediator::llm::Reasoner;
use mediator::research::RoundOrchestrator;
use mediator::search::{DaedraBackend, Grounding, PageFetcher, SearchBackend, SearchCache};
use mediator::types::FinalAnalysis;
use mediator::utils::toml_config::{LoggingConfig, MediatorConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let Cli {
        config,
        verbose,
        no_color,
        command,
    } = Cli::parse_args();
    let output = if no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let code = match command {
        Commands::Analyze(args) => analyze(&config, verbose, args, &output).await?,
        Commands::Audit {
            report,
            verify_grounding,
            check_consistency,
            write,
        } => {
            let mut settings = load_config(&config)?;
            settings.audit.grounding.enabled |= verify_grounding;
            settings.audit.consistency.enabled |= check_consistency;
            init_logging(&settings.logging, verbose);
            audit_report(&settings, &report, write, &output).await?
        }
        Commands::Config { validate } => show_config(&config, validate, &output)?,
        Commands::Agents => {
            list_agents(&output);
            0
        }
        Commands::Init { path, force } => match init::run(&path, force, &output) {
            InitResult::Success | InitResult::AlreadyExists => 0,
            InitResult::Error(_) => 1,
        },
    };

    std::process::exit(code);
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
/// `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,mediator={}", level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> Result<MediatorConfig> {
    MediatorConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

async fn analyze(config_path: &Path, verbose: bool, args: AnalyzeArgs, output: &Output) -> Result<i32> {
    let mut config = load_config(config_path)?;
    args.apply_to(&mut config);
    init_logging(&config.logging, verbose);

    for warning in config.validate_with_warnings()? {
        tracing::warn!(%warning, "Configuration warning");
    }

    let client = config.provider()?.create_client()?;
    let reasoner = Arc::new(Reasoner::new(client));
    let daedra = Arc::new(DaedraBackend::new());
    let cache = if config.search.enabled {
        SearchCache::new(
            Some(daedra.clone() as Arc<dyn SearchBackend>),
            config.search.results_per_query,
        )
    } else {
        SearchCache::disabled()
    };
    let grounding = Arc::new(Grounding::new(
        reasoner.clone(),
        Arc::new(cache),
        config.grounding_limits(),
    ));
    let orchestrator =
        RoundOrchestrator::new(reasoner.clone(), grounding.clone(), config.orchestrator_options());

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing with the partial record");
                cancel.cancel();
            }
        })
    };

    let specs = config.agent_specs();
    let mut analysis = if config.agents.auto_select {
        orchestrator
            .run_with_selection(&args.problem, &specs, &config.agents.weights, &cancel)
            .await?
    } else {
        let roster = AgentRoster::from_specs(specs, reasoner.clone(), &config.agents.weights)?;
        orchestrator.run(&args.problem, &roster, &cancel).await?
    };
    interrupt.abort();

    let stats = grounding.cache().stats();
    tracing::info!(
        lookups = stats.lookups,
        backend_calls = stats.backend_calls,
        hit_rate = stats.hit_rate(),
        "Search cache"
    );

    let audit_started = Instant::now();
    let pipeline = AuditPipeline::new(
        Some(reasoner),
        Some(daedra as Arc<dyn PageFetcher>),
        config.audit_options(),
    );
    let audit = pipeline.run(&mut analysis).await;
    analysis.telemetry.timings.audit_ms =
        u64::try_from(audit_started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        output.banner();
        output.analysis(&analysis);
        output.audit(&audit);
    }
    Ok(audit.exit_code())
}

async fn audit_report(config: &MediatorConfig, report: &Path, write: bool, output: &Output) -> Result<i32> {
    let raw = fs::read_to_string(report)
        .with_context(|| format!("failed to read {}", report.display()))?;
    let mut analysis: FinalAnalysis = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a mediator record", report.display()))?;

    let reasoner = if config.audit.grounding.enabled || config.audit.consistency.enabled {
        Some(Arc::new(Reasoner::new(config.provider()?.create_client()?)))
    } else {
        None
    };
    let fetcher: Arc<dyn PageFetcher> = Arc::new(DaedraBackend::new());
    let audit = AuditPipeline::new(reasoner, Some(fetcher), config.audit_options())
        .run(&mut analysis)
        .await;

    output.audit(&audit);
    if write {
        fs::write(report, serde_json::to_string_pretty(&analysis)?)
            .with_context(|| format!("failed to write {}", report.display()))?;
        output.created("record", &report.display().to_string());
    }
    Ok(audit.exit_code())
}

fn show_config(path: &Path, validate: bool, output: &Output) -> Result<i32> {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) if validate => {
            output.error(&format!("{:#}", e));
            return Ok(1);
        }
        Err(e) => return Err(e),
    };

    output.header("Configuration");
    output.kv("file", &path.display().to_string());
    output.kv("model", &config.llm.model);
    output.kv("mode", &format!("{:?}", config.orchestration.mode).to_lowercase());
    output.kv("agents", &config.agents.enabled.join(", "));
    output.kv("auto select", &config.agents.auto_select.to_string());
    output.kv("search", &config.search.enabled.to_string());
    output.kv("resolution", &config.resolution.enabled.to_string());

    if validate {
        let warnings = config.validate_with_warnings()?;
        if warnings.is_empty() {
            output.success("Configuration is valid");
        } else {
            for warning in &warnings {
                output.warning(&warning.to_string());
            }
        }
    }
    Ok(0)
}

fn list_agents(output: &Output) {
    output.header("Built-in agents");
    output.table_header(&["Name", "Focus"]);
    for (name, description) in BuiltinDomain::catalogue() {
        output.table_row(&[name, description]);
    }
}
