use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bleep_chain_reader::{GatewayNodeClient, NodeClient, NodeEndpoints};
use bleep_e2e::scenarios::find;
use bleep_e2e::{
    registry, CommandLifecycle, ConfigError, ConnectionSet, E2EConfig, HarnessSettings, Scenario,
};

#[derive(Parser)]
#[command(name = "bleep-e2e")]
#[command(about = "BLEEP end-to-end scenario harness", long_about = None)]
struct Cli {
    /// Harness settings file (yaml, toml or json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered scenarios
    List,

    /// Print a scenario's effective configuration
    Show { scenario: String },

    /// Run a scenario against the running cluster
    Run {
        scenario: String,

        /// Write the JSON run report here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ScenarioSummary<'a> {
    name: &'a str,
    description: &'a str,
    skip: Option<&'a str>,
    evaluators: Vec<String>,
    interceptor: Option<String>,
    config: &'a E2EConfig,
}

fn load_settings(path: Option<&Path>) -> Result<HarnessSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    builder
        .add_source(config::Environment::with_prefix("BLEEP_E2E").try_parsing(true))
        .build()
        .context("could not load harness settings")?
        .try_deserialize()
        .context("invalid harness settings")
}

fn lookup(name: &str) -> Result<Scenario> {
    find(name)?.ok_or_else(|| anyhow!("unknown scenario `{}`", name))
}

fn effective_config(scenario: &Scenario, settings: &HarnessSettings) -> Result<E2EConfig> {
    let mut config = scenario.config.clone();
    settings.apply_to(&mut config)?;
    Ok(config)
}

fn connect(config: &E2EConfig) -> Result<ConnectionSet, ConfigError> {
    let clients = (0..config.beacon_node_count)
        .map(|index| {
            let endpoints =
                NodeEndpoints::for_index(&config.host, &config.ports, config.node_type, index)
                    .map_err(ConfigError::Invalid)?;
            let client = GatewayNodeClient::new(endpoints, config.query_timeout())
                .map_err(|source| ConfigError::Client { node: index, source })?;
            Ok(Arc::new(client) as Arc<dyn NodeClient>)
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    Ok(ConnectionSet::from_clients(clients, config.query_timeout()))
}

fn list() -> Result<()> {
    for scenario in registry()? {
        match scenario.skip {
            Some(reason) => println!("{:<40} (skipped: {})", scenario.name, reason),
            None => println!("{:<40} {}", scenario.name, scenario.description),
        }
    }
    Ok(())
}

fn show(name: &str, settings: &HarnessSettings) -> Result<()> {
    let scenario = lookup(name)?;
    let config = effective_config(&scenario, settings)?;
    let summary = ScenarioSummary {
        name: scenario.name,
        description: scenario.description,
        skip: scenario.skip,
        evaluators: scenario
            .evaluators()
            .names()
            .into_iter()
            .map(String::from)
            .collect(),
        interceptor: scenario.interceptor()?.map(|i| i.name().to_string()),
        config: &config,
    };
    print!("{}", serde_yaml::to_string(&summary)?);
    Ok(())
}

/// Returns whether the run passed.
async fn run(name: &str, settings: &HarnessSettings, report_path: Option<PathBuf>) -> Result<bool> {
    let scenario = lookup(name)?;
    if let Some(reason) = scenario.skip {
        bail!("scenario `{}` is skipped: {}", name, reason);
    }
    let config = effective_config(&scenario, settings)?;
    let conns = connect(&config)?;
    let mut lifecycle = CommandLifecycle::new(settings.lifecycle.clone());
    if let Some(secs) = settings.command_timeout_secs {
        lifecycle = lifecycle.with_timeout(Duration::from_secs(secs));
    }
    let lifecycle = Arc::new(lifecycle);
    let runner = scenario.runner(config, conns, lifecycle)?;

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting run");
            cancel.cancel();
        }
    });

    let report = runner.run().await;
    let json = serde_json::to_string_pretty(&report)?;
    match report_path {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("could not write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{}", json),
    }
    Ok(report.passed())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let result = match load_settings(cli.config.as_deref()) {
        Ok(settings) => match cli.command {
            Commands::List => list().map(|_| true),
            Commands::Show { scenario } => show(&scenario, &settings).map(|_| true),
            Commands::Run { scenario, report } => run(&scenario, &settings, report).await,
        },
        Err(err) => Err(err),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
