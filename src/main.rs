use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mantis_dispatch::config::{DispatcherConfig, ResultOrder, Server};
use mantis_dispatch::pool::ServerPool;
use mantis_dispatch::results::{ResultAggregator, ResultPercentile};
use mantis_dispatch::run::{MemoryRunStore, Run, RunRecord, RunSpec};
use mantis_dispatch::service::DispatchService;
use mantis_dispatch::shutdown::install_shutdown_handler;
use mantis_dispatch::RunDispatcher;

#[derive(Parser, Debug)]
#[command(name = "mantis-dispatch")]
#[command(version)]
#[command(about = "Dispatches groundwater-nitrate model runs to Mantis servers")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Probe every configured server and report its status
    Probe,

    /// Print the wire command for a run definition without sending it
    Encode {
        /// Run definition (JSON)
        run: PathBuf,
    },

    /// Dispatch one run and report the outcome
    Dispatch {
        /// Run definition (JSON)
        run: PathBuf,

        /// Percentiles to report per year (repeatable)
        #[arg(long = "percentile", short = 'p')]
        percentiles: Vec<f64>,
    },

    /// Queue runs and keep dispatching until all are done (or Ctrl-C)
    Serve {
        /// Run definitions (JSON)
        #[arg(required = true)]
        runs: Vec<PathBuf>,
    },
}

// =============================================================================
// Global Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Mantis server as host[:port] (repeatable). Adds to MANTIS_SERVERS.
    #[arg(long = "server", short = 's', global = true)]
    servers: Vec<Server>,

    /// Order Mantis streams results in
    #[arg(long, global = true)]
    result_order: Option<OrderArg>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    WellMajor,
    YearMajor,
}

impl From<OrderArg> for ResultOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::WellMajor => ResultOrder::WellMajor,
            OrderArg::YearMajor => ResultOrder::YearMajor,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct ProbeOutput {
    server: String,
    health: String,
}

#[derive(Serialize)]
struct DispatchOutput {
    run_id: String,
    state: String,
    status_message: String,
    server: Option<String>,
    values: usize,
    wells: usize,
    percentiles: Vec<ResultPercentile>,
}

#[derive(Serialize)]
struct RunSummary {
    run_id: String,
    name: String,
    state: String,
    status_message: String,
}

// =============================================================================
// Command Handlers
// =============================================================================

fn build_config(global: &GlobalArgs) -> Result<DispatcherConfig, Box<dyn std::error::Error>> {
    let mut config = DispatcherConfig::from_env()?;
    config.servers.extend(global.servers.iter().cloned());
    if let Some(order) = global.result_order {
        config.result_order = order.into();
    }
    Ok(config)
}

fn load_ready_run(path: &Path) -> Result<Arc<Run>, Box<dyn std::error::Error>> {
    let spec = RunSpec::load(path)?;
    let run = Arc::new(Run::new(spec));
    run.mark_ready()?;
    Ok(run)
}

async fn handle_probe(
    config: DispatcherConfig,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.servers.is_empty() {
        return Err("no servers configured (use --server or MANTIS_SERVERS)".into());
    }
    let pool = Arc::new(ServerPool::from_config(&config));
    pool.probe_all().await;
    let mut statuses = pool.snapshot();
    statuses.sort_by_key(|s| s.server.to_string());

    match output {
        OutputFormat::Json => {
            let rows: Vec<ProbeOutput> = statuses
                .into_iter()
                .map(|s| ProbeOutput {
                    server: s.server.to_string(),
                    health: s.health.to_string(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            println!("{:<40} {:<8}", "SERVER", "HEALTH");
            println!("{}", "-".repeat(49));
            for s in statuses {
                println!("{:<40} {:<8}", s.server.to_string(), s.health.to_string());
            }
        }
    }
    Ok(())
}

async fn handle_encode(
    config: DispatcherConfig,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let run = Run::new(RunSpec::load(path)?);
    let pool = Arc::new(ServerPool::from_config(&config));
    let dispatcher = RunDispatcher::new(&config, pool, Arc::new(MemoryRunStore::new()));
    let command = dispatcher.command_for(&run)?;
    print!("{}", String::from_utf8_lossy(&command));
    Ok(())
}

async fn handle_dispatch(
    config: DispatcherConfig,
    path: &Path,
    percentiles: &[f64],
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let run = load_ready_run(path)?;
    let pool = Arc::new(ServerPool::from_config(&config));
    pool.probe_all().await;

    let dispatcher = RunDispatcher::new(&config, pool, Arc::new(MemoryRunStore::new()));
    let outcome = dispatcher.dispatch(&run).await;
    let record = run.snapshot().await;

    let percentiles = if record.result.is_some() && !percentiles.is_empty() {
        ResultAggregator.percentiles(&record, percentiles)?
    } else {
        Vec::new()
    };

    match output {
        OutputFormat::Json => {
            let out = DispatchOutput {
                run_id: record.id.to_string(),
                state: record.state.to_string(),
                status_message: record.status_message.clone(),
                server: outcome.as_ref().ok().map(|o| o.server.to_string()),
                values: outcome.as_ref().map_or(0, |o| o.values),
                wells: record.n_wells(),
                percentiles,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!("Run ID:  {}", record.id);
            println!("State:   {}", record.state);
            println!("Status:  {}", record.status_message);
            if let Ok(ref o) = outcome {
                println!("Server:  {}", o.server);
                println!("Values:  {} ({} wells)", o.values, o.wells);
            }
            for p in &percentiles {
                let series: Vec<String> = p.values.iter().map(|v| format!("{v:.3}")).collect();
                println!("p{:<5} {}", p.percentile, series.join(" "));
            }
        }
    }

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_serve(
    config: DispatcherConfig,
    paths: &[PathBuf],
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = DispatchService::new(config, Arc::new(MemoryRunStore::new()));
    for path in paths {
        let run = load_ready_run(path)?;
        if !service.submit(run).await {
            return Err(format!("could not queue run from {}", path.display()).into());
        }
    }

    let shutdown = install_shutdown_handler();
    service.run_until_settled(shutdown).await;

    let runs = service.queue.read().await.all_runs();
    let mut records: Vec<RunRecord> = Vec::with_capacity(runs.len());
    for run in runs {
        records.push(run.snapshot().await);
    }

    match output {
        OutputFormat::Json => {
            let rows: Vec<RunSummary> = records
                .iter()
                .map(|r| RunSummary {
                    run_id: r.id.to_string(),
                    name: r.spec.name.clone(),
                    state: r.state.to_string(),
                    status_message: r.status_message.clone(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            println!("{:<36} {:<20} {:<9} STATUS", "RUN ID", "NAME", "STATE");
            println!("{}", "-".repeat(90));
            for r in &records {
                let name: String = r.spec.name.chars().take(20).collect();
                println!(
                    "{:<36} {:<20} {:<9} {}",
                    r.id, name, r.state, r.status_message
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args.global)?;
    let output = &args.global.output;

    match args.command {
        Commands::Probe => handle_probe(config, output).await?,
        Commands::Encode { run } => handle_encode(config, &run).await?,
        Commands::Dispatch { run, percentiles } => {
            handle_dispatch(config, &run, &percentiles, output).await?
        }
        Commands::Serve { runs } => handle_serve(config, &runs, output).await?,
    }

    Ok(())
}
