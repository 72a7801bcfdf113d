mod config;
mod error;
mod ledger;
mod metrics;
mod pipeline;
mod profile;
mod report;
mod search;
mod summary;
mod sweep;

use std::{
    fs::{self, File},
    io::Write,
    path::PathBuf,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};

use config::ExplorerConfig;
use ledger::Ledger;
use pipeline::ToolchainEvaluator;
use search::GreedySearch;

#[derive(Parser)]
#[command(name = "uarch-dse", version, about = "Microarchitecture design-space exploration driver")]
struct Cli {
    /// TOML file with tool paths, workload, baseline and parameter space
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the output directory from the configuration
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Log every external command line
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Greedy coordinate descent on EDP, one parameter at a time
    Greedy {
        /// Workload to optimise for (default: the first configured)
        #[arg(long)]
        workload: Option<String>,
    },
    /// Evaluate every combination of the parameter space
    Sweep {
        /// Restrict the sweep to these workloads (repeatable)
        #[arg(long = "workload")]
        workloads: Vec<String>,
    },
    /// Simulate every workload under each named profile and rank them
    Profile,
    /// Rank the trials of an existing history ledger
    Summarize {
        /// Ledger to read (default: <output_dir>/history.csv)
        #[arg(long)]
        history: Option<PathBuf>,
        /// Rows per ranking
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

fn setup_logger(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logger(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ExplorerConfig::load(path)
            .with_context(|| format!("Unable to load configuration {}", path.display()))?,
        None => ExplorerConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    match cli.command {
        Commands::Greedy { workload } => run_greedy(&config, workload.as_deref()),
        Commands::Sweep { workloads } => run_sweep(&config, &workloads),
        Commands::Profile => run_profile(&config),
        Commands::Summarize { history, top } => {
            run_summary(history.unwrap_or_else(|| config.history_path()), top)
        }
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn run_greedy(config: &ExplorerConfig, workload: Option<&str>) -> Result<()> {
    let workload = config.workload(workload)?;
    let history = config.history_path();
    let mut ledger = Ledger::open(&history)
        .with_context(|| format!("Unable to open history {}", history.display()))?;
    let mut evaluator = ToolchainEvaluator::new(config);

    let outcome = GreedySearch::new(&config.parameters, &config.baseline, workload)
        .run(&mut evaluator, &mut ledger)
        .context("Greedy search aborted")?;
    info!(
        "{} trials over {} passes, {} rows written",
        outcome.trials,
        outcome.passes,
        ledger.rows()
    );

    println!("Best configuration:\n{}", outcome.configuration.to_pretty_json()?);
    println!("Final EDP: {:.6}", outcome.best.edp);
    println!("History saved to {}", history.display());
    Ok(())
}

fn run_sweep(config: &ExplorerConfig, workloads: &[String]) -> Result<()> {
    let workloads = config.select_workloads(workloads)?;
    let points = sweep::full_factorial(&config.parameters, &config.baseline, &workloads);
    info!(
        "Sweeping {} configurations on {} workloads",
        config.parameters.point_count(),
        workloads.len()
    );

    let mut evaluator = ToolchainEvaluator::new(config);
    let results = sweep::run_sweep(&points, &mut evaluator).context("Sweep aborted")?;

    let path = config.sweep_results_path();
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Unable to create {}", config.output_dir.display()))?;
    let file = File::create(&path).with_context(|| format!("Unable to create {}", path.display()))?;
    sweep::write_results(&results, &config.parameters, file)?;

    let best = sweep::best_per_workload(&results);
    if best.is_empty() {
        bail!("No configuration could be measured; results in {}", path.display());
    }
    for point in best {
        println!("Best configuration by EDP:\n{point}");
    }
    println!("Results saved to {}", path.display());
    Ok(())
}

fn run_profile(config: &ExplorerConfig) -> Result<()> {
    let workloads = profile::available(&config.select_workloads(&[])?, &config.tools.working_dir);
    if workloads.is_empty() {
        bail!("None of the configured workload binaries exist");
    }
    info!(
        "Profiling {} workloads under {} profiles",
        workloads.len(),
        config.profiles.len()
    );

    let mut evaluator = ToolchainEvaluator::new(config);
    let rows = profile::run_profiling(&workloads, &config.profiles, &config.baseline, &mut evaluator)
        .context("Profiling aborted")?;

    let path = config.profiling_path();
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Unable to create {}", config.output_dir.display()))?;
    let file = File::create(&path).with_context(|| format!("Unable to create {}", path.display()))?;
    profile::write_profiles(&rows, &config.profiles, file)?;

    for (rank, group) in profile::rank_groups(&rows).iter().enumerate() {
        print!("{}. {group}", rank + 1);
    }
    println!("Profiles saved to {}", path.display());
    Ok(())
}

fn run_summary(history: PathBuf, top: usize) -> Result<()> {
    let records = ledger::read_ledger(&history)
        .with_context(|| format!("Unable to read history {}", history.display()))?;
    if records.is_empty() {
        bail!("History {} has no trials", history.display());
    }
    let summary = summary::summarize(&records, top);
    print!("{summary}");

    let path = history.with_file_name("summary.csv");
    let file = File::create(&path).with_context(|| format!("Unable to create {}", path.display()))?;
    summary::write_summary(&summary, file)?;
    println!("Summary saved to {}", path.display());
    Ok(())
}
