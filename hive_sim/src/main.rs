//! Hive Simulator CLI
//!
//! Run many independent worlds in parallel, online against an
//! OpenAI-compatible backend or offline with the scripted reasoner.

use clap::Parser;
use hive_core::cache::{CacheConfig, ResponseCache};
use hive_core::config::WorldConfig;
use hive_core::llm::{layered, HttpReasoner, ReasonerConfig, RetryPolicy};
use hive_core::world::WorldSettings;
use hive_env::{ReasoningService, SwarmError};
use hive_sim::scenarios::ScenarioId;
use hive_sim::{ParallelRunner, ReasonerFactory, RunExport, RunnerConfig, ScriptedReasoner, WorkItem};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Simulated backend response time in offline mode.
const OFFLINE_LATENCY: Duration = Duration::from_millis(200);

/// Hive parallel world simulator
#[derive(Parser, Debug)]
#[command(name = "hive-sim")]
#[command(about = "Run concurrent multi-agent worlds in parallel", long_about = None)]
struct Args {
    /// Number of independent worlds to run
    #[arg(short, long, default_value = "4")]
    worlds: usize,

    /// Worker threads (default: logical core count)
    #[arg(long)]
    workers: Option<usize>,

    /// Per-world timeout in seconds
    #[arg(long, default_value = "300")]
    timeout: u64,

    /// Simulated duration of each world in seconds
    #[arg(short, long, default_value = "30")]
    duration: f64,

    /// Simulated seconds per real second
    #[arg(long, default_value = "1.0")]
    time_scale: f64,

    /// Scenario preset (organization, urban, economic)
    #[arg(short = 'S', long, default_value = "organization")]
    scenario: String,

    /// World configuration JSON file (overrides the scenario's demo world)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Free-form world description; the backend turns it into a configuration
    #[arg(short, long, conflicts_with = "config")]
    prompt: Option<String>,

    /// Use the scripted reasoner instead of the HTTP backend
    #[arg(long)]
    offline: bool,

    /// Base seed for offline runs (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Directory of the persistent response cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// JSON output for scripting
    #[arg(long)]
    json: bool,

    /// Export the run to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the default level
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), SwarmError> {
    let scenario: ScenarioId = args.scenario.parse().map_err(SwarmError::config)?;

    // Missing backend configuration fails here, before any world exists
    let backend = if args.offline {
        None
    } else {
        Some(Backend::from_env(args.cache_dir.clone())?)
    };

    let config = match (&args.config, &args.prompt) {
        (Some(path), _) => WorldConfig::from_file(path)?,
        (None, Some(prompt)) => {
            let backend = backend.as_ref().ok_or_else(|| {
                SwarmError::config("--prompt needs the reasoning backend, drop --offline")
            })?;
            info!("Analyzing world description");
            config_from_prompt(backend.reasoner()?, prompt)?
        }
        (None, None) => scenario.config()?,
    };

    let duration = Duration::try_from_secs_f64(args.duration)
        .map_err(|_| SwarmError::config(format!("invalid duration: {}", args.duration)))?;
    let settings = WorldSettings {
        duration: Some(duration),
        time_scale: args.time_scale,
        ..WorldSettings::default()
    };
    settings.validate()?;

    let factory = reasoner_factory(backend);

    let mut runner_config = RunnerConfig::default().with_item_timeout(Duration::from_secs(args.timeout));
    if let Some(workers) = args.workers {
        runner_config = runner_config.with_workers(workers);
    }
    let runner = ParallelRunner::new(runner_config)?;

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let items: Vec<WorkItem> = (0..args.worlds)
        .map(|i| {
            WorkItem::new(format!("{}_{}", scenario, i))
                .with_config(config.clone())
                .with_settings(settings.clone())
                .with_metrics(scenario.metrics())
                .with_seed(base_seed.wrapping_add(i as u64))
        })
        .collect();

    if !args.json {
        info!("Hive Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "{} worlds | {} workers | scenario={} | offline={}",
            items.len(),
            runner.config().workers,
            scenario,
            args.offline
        );
    }

    let scenario_name = (args.config.is_none() && args.prompt.is_none()).then(|| scenario.name());
    let mut export = RunExport::new(
        scenario_name,
        runner.config().workers,
        runner.config().item_timeout.as_secs_f64(),
        items.len(),
    );

    let reports = runner.run_worlds(items, factory)?;
    runner.shutdown();
    export.finalize(reports);

    if args.json {
        let text = serde_json::to_string_pretty(&export)?;
        println!("{}", text);
    } else {
        for report in &export.reports {
            info!(
                "✓ {} | {} agents | {} actions | {:.1}s simulated in {:.1}s",
                report.world_id,
                report.agent_count,
                report.actions,
                report.simulated_secs,
                report.wall_secs
            );
            for (name, value) in &report.metrics {
                info!("    {} = {}", name, value);
            }
        }
        if export.omitted > 0 {
            warn!("{} of {} worlds failed or timed out", export.omitted, export.requested);
        }
        info!("{} worlds completed, {} actions total", export.reports.len(), export.total_actions());
    }

    if let Some(path) = &args.export {
        export
            .write_to_file(path)
            .map_err(|e| SwarmError::config(format!("write export failed ({}): {}", path, e)))?;
        info!("Exported run {} to {}", export.run_id, path);
    }

    if export.reports.is_empty() && export.requested > 0 {
        return Err(SwarmError::lifecycle("no world completed"));
    }
    Ok(())
}

/// Online reasoning backend shared by every worker.
struct Backend {
    config: ReasonerConfig,
    cache: Arc<ResponseCache>,
}

impl Backend {
    fn from_env(cache_dir: Option<PathBuf>) -> Result<Self, SwarmError> {
        let config = ReasonerConfig::from_env()?;
        let cache = Arc::new(ResponseCache::from_config(&CacheConfig {
            directory: cache_dir,
            ..CacheConfig::default()
        })?);
        Ok(Self { config, cache })
    }

    /// Builds a client on the calling thread's runtime.
    fn reasoner(&self) -> Result<Arc<dyn ReasoningService>, SwarmError> {
        let client = HttpReasoner::new(self.config.clone())?;
        Ok(layered(client, RetryPolicy::default(), Some(Arc::clone(&self.cache)), &self.config.model))
    }
}

/// Runs the world analysis on a short-lived runtime of its own.
fn config_from_prompt(
    reasoner: Arc<dyn ReasoningService>,
    prompt: &str,
) -> Result<WorldConfig, SwarmError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SwarmError::config(format!("runtime start failed: {}", e)))?;
    runtime.block_on(WorldConfig::from_prompt(reasoner.as_ref(), prompt))
}

fn reasoner_factory(backend: Option<Backend>) -> ReasonerFactory {
    match backend {
        None => Arc::new(|item: &WorkItem| {
            let reasoner = ScriptedReasoner::new(item.seed).with_latency(OFFLINE_LATENCY);
            Ok(Arc::new(reasoner) as Arc<dyn ReasoningService>)
        }),
        // The HTTP client is built per item, on the worker's own runtime
        Some(backend) => Arc::new(move |_item: &WorkItem| backend.reasoner()),
    }
}
