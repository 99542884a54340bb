//! Krisis CLI - run scripted agent evaluations

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use krisis_core::prelude::*;
use krisis_sandbox::SandboxedDriver;

#[derive(Parser)]
#[command(name = "krisis")]
#[command(about = "Scripted evaluations for AI-agent backends", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: krisis.toml, KRISIS_* variables, then KRISIS_CONFIG_PATH)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available scenarios
    List,
    /// Run a scenario and print its report
    Run(RunArgs),
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Scenario name (see `krisis list`)
    scenario: String,

    /// Backend driver: direct or sandboxed
    #[arg(short, long)]
    driver: Option<DriverKind>,

    /// Model override
    #[arg(short, long)]
    model: Option<String>,

    /// Attempt number
    #[arg(short, long)]
    attempt: Option<u32>,

    /// System prompt override
    #[arg(long)]
    system_prompt: Option<String>,

    /// Project directory the agent works on
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<KrisisConfig> {
    let config = match path {
        Some(path) => KrisisConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KrisisConfig::load()?,
    };
    Ok(config)
}

fn apply_overrides(config: &mut KrisisConfig, args: &RunArgs) -> Result<()> {
    if let Some(driver) = args.driver {
        config.runner.driver = driver;
    }
    if let Some(model) = &args.model {
        config.runner.model = model.clone();
    }
    if let Some(attempt) = args.attempt {
        config.runner.attempt = attempt;
    }
    if let Some(prompt) = &args.system_prompt {
        config.runner.system_prompt = prompt.clone();
    }
    if let Some(target) = &args.target {
        let target = target
            .canonicalize()
            .with_context(|| format!("target directory {}", target.display()))?;
        config.sandbox.target_dir = Some(target);
    }
    config.validate()?;
    Ok(())
}

fn build_driver(config: &KrisisConfig) -> Arc<dyn Driver> {
    match config.runner.driver {
        DriverKind::Direct => Arc::new(DirectDriver::llm(config.llm.clone())),
        DriverKind::Sandboxed => Arc::new(SandboxedDriver::docker(config.sandbox.clone())),
    }
}

async fn run(config_path: Option<&PathBuf>, args: RunArgs) -> Result<ExitCode> {
    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, &args)?;

    let scenario = scenarios::find(&args.scenario)?;
    let runner = EvalRunner::from_config(&config);
    let context = EvalContext::new(runner, build_driver(&config));
    let steps = scenario.steps(context.runner());

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the current turn");
            canceller.cancel();
        }
    });

    let mut ctx = TurnContext::new()
        .with_eval_name(scenario.name)
        .with_cancellation(token);
    if config.runner.driver == DriverKind::Sandboxed {
        if let Some(limit) = config.sandbox.turn_timeout {
            ctx = ctx.with_turn_timeout(limit);
        }
    }

    info!(
        scenario = scenario.name,
        driver = %config.runner.driver,
        model = %config.runner.model,
        "Starting evaluation"
    );
    let report = Orchestrator::new(context)
        .with_name(scenario.name)
        .run(&ctx, &steps)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.report);
    }

    Ok(if report.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            for scenario in scenarios::all() {
                println!("{:<20} {}", scenario.name, scenario.description);
            }
        }
        Commands::Run(args) => return run(cli.config.as_ref(), args).await,
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("krisis {}", env!("CARGO_PKG_VERSION"));
            println!("krisis-core {}", krisis_core::VERSION);
        }
    }

    Ok(ExitCode::SUCCESS)
}
