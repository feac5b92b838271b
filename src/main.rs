//! ALCD CLI - Active-learning cloud detection
//!
//! Usage:
//!   alcd init -l Orleans -d 20180214 -c 20180319   # Set up the run, create class layers
//!   alcd iterate                                   # Split, train, classify, evaluate
//!   alcd kfold                                     # K-fold cross-validation
//!   alcd stage model --force                       # Re-run one stage
//!   alcd status                                    # Where the run stands

use alcd_core::{
    create_classifier, dates, AlcdError, Collaborators, ConfigSources, FileVectorStore,
    IterationReport, ModelsConfig, Orchestrator, OtbRasterEngine, PathsConfig, RunConfig, Stage,
    StageOutcome, SystemRunner,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

mod config;
mod logging;

use config::{Config, LastRun};

// ============================================================================
// CLI STRUCTURE
// ============================================================================

#[derive(Parser)]
#[command(name = "alcd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "ALCD - Active-learning cloud detection\n\nBuilds reference cloud masks for Sentinel-2 L1C scenes.", long_about = None)]
#[command(after_help = "Workflow:\n  $ alcd init -l LOC -d DATE -c CLEAR   then label points in In_data/Masks\n  $ alcd iterate                         review, edit labels, iterate again")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Global parameters document (JSON)
    #[arg(long, global = true)]
    global_parameters: Option<PathBuf>,

    /// Paths parameters document (JSON)
    #[arg(long, global = true)]
    paths_parameters: Option<PathBuf>,

    /// Model hyperparameters document (JSON)
    #[arg(long, global = true)]
    model_parameters: Option<PathBuf>,

    /// Location name, e.g. Orleans (defaults to the last init)
    #[arg(short, long, global = true)]
    location: Option<String>,

    /// Acquisition date to classify, YYYYMMDD
    #[arg(short = 'd', long = "date", global = true)]
    current_date: Option<String>,

    /// Cloud-free reference date, YYYYMMDD
    #[arg(short = 'c', long = "clear-date", global = true)]
    clear_date: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the run directory, compose the scene and empty class layers
    Init {
        /// Recompose the scene even if it exists
        #[arg(long)]
        force: bool,
    },

    /// Run one iteration: split, features, model, evaluate, contour
    Iterate {
        #[arg(long)]
        force: bool,

        /// Seed for the train/validation split
        #[arg(long)]
        seed: Option<u64>,
    },

    /// K-fold cross-validation on the current labels
    Kfold {
        #[arg(long)]
        force: bool,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run a single stage
    Stage {
        /// layers, split, features, model, evaluate or contour (or 1..6)
        stage: String,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Show iteration, completed stages and the last report
    Status,

    /// List the L1C acquisition dates available for a location
    Dates,

    /// Iteration snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// List snapshots
    List,
    /// Snapshot the working directories now
    Take,
    /// Restore a snapshot
    Restore {
        id: u32,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set a configuration value
    Set {
        key: String,
        value: String,
    },
    /// Get a configuration value
    Get {
        key: String,
    },
    /// List all configuration
    List,
    /// Show config file path
    Path,
}

// ============================================================================
// MAIN
// ============================================================================

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("{} {:#}", style("Error:").red().bold(), err);
        if let Some(output) = err
            .chain()
            .find_map(|e| e.downcast_ref::<AlcdError>())
            .and_then(AlcdError::tool_output)
        {
            eprintln!("{}", output);
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Init { force } => init_cmd(cli, *force),
        Commands::Iterate { force, seed } => iterate_cmd(cli, *force, *seed),
        Commands::Kfold { force, seed } => kfold_cmd(cli, *force, *seed),
        Commands::Stage { stage, force, seed } => stage_cmd(cli, stage, *force, *seed),
        Commands::Status => status_cmd(cli),
        Commands::Dates => dates_cmd(cli),
        Commands::Snapshot { action } => snapshot_cmd(cli, action),
        Commands::Config { action } => match action {
            ConfigCommands::Set { key, value } => config_set(key, value),
            ConfigCommands::Get { key } => config_get(key),
            ConfigCommands::List => config_list(),
            ConfigCommands::Path => config_path(),
        },
    }
}

// ============================================================================
// SESSION
// ============================================================================

fn global_parameters(cli: &Cli, prefs: &Config) -> Result<PathBuf> {
    cli.global_parameters
        .clone()
        .or_else(|| prefs.global_parameters.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No global parameters document. Pass --global-parameters or run: alcd config set global-parameters <file>"
            )
        })
}

fn paths_parameters(cli: &Cli, prefs: &Config) -> Result<PathBuf> {
    cli.paths_parameters
        .clone()
        .or_else(|| prefs.paths_parameters.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No paths parameters document. Pass --paths-parameters or run: alcd config set paths-parameters <file>"
            )
        })
}

/// Scene from the command line, completed from the last init
fn scene(cli: &Cli, prefs: &Config) -> Result<LastRun> {
    let last = prefs.last_run.as_ref();
    let pick = |given: &Option<String>, saved: Option<&String>, flag: &str| {
        given
            .clone()
            .or_else(|| saved.cloned())
            .ok_or_else(|| anyhow::anyhow!("No {} given and no previous run. Pass {}", flag, flag))
    };
    Ok(LastRun {
        location: pick(&cli.location, last.map(|l| &l.location), "--location")?,
        current_date: pick(&cli.current_date, last.map(|l| &l.current_date), "--date")?,
        clear_date: pick(&cli.clear_date, last.map(|l| &l.clear_date), "--clear-date")?,
    })
}

fn orchestrator(cli: &Cli, prefs: &Config, scene: &LastRun, seed: Option<u64>) -> Result<Orchestrator> {
    let global = global_parameters(cli, prefs)?;
    let paths_file = paths_parameters(cli, prefs)?;

    let config = RunConfig::load(&global)
        .with_context(|| format!("Failed to load {}", global.display()))?;
    let paths = PathsConfig::load(&paths_file)
        .with_context(|| format!("Failed to load {}", paths_file.display()))?;
    let run = config.initialize(&paths, &scene.location, &scene.current_date, &scene.clear_date)?;

    let models = match cli.model_parameters.as_ref().or(prefs.model_parameters.as_ref()) {
        Some(path) => ModelsConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ModelsConfig::default(),
    };

    let method = run.method()?;
    let collaborators = Collaborators {
        vectors: Box::new(FileVectorStore::new(SystemRunner)),
        raster: Box::new(OtbRasterEngine::new(SystemRunner).with_tools(prefs.tools.clone())),
        classifier: create_classifier(&method, SystemRunner, &prefs.scikit)?,
    };

    let orchestrator = Orchestrator::new(
        run,
        models,
        ConfigSources {
            global_parameters: global,
            paths_parameters: paths_file,
        },
        collaborators,
    )?;
    Ok(match seed {
        Some(seed) => orchestrator.with_seed(seed),
        None => orchestrator,
    })
}

fn print_outcome(stage: Stage, outcome: StageOutcome) {
    match outcome {
        StageOutcome::Completed => {
            println!("  {} {:<9} done", style("✓").green(), stage.name())
        }
        StageOutcome::AlreadyPresent => println!(
            "  {} {:<9} already present (use --force to recompute)",
            style("•").dim(),
            stage.name()
        ),
    }
}

fn print_report(report: &IterationReport) {
    println!();
    println!("{}", style(report.summary()).bold());
    for rec in &report.recommendations {
        let marker = match rec.level.as_str() {
            "error" => style("✗").red(),
            "warning" => style("⚠").yellow(),
            _ => style("ℹ").blue(),
        };
        println!("  {} {}", marker, rec.message);
    }
}

// ============================================================================
// RUN COMMANDS
// ============================================================================

fn init_cmd(cli: &Cli, force: bool) -> Result<()> {
    let mut prefs = Config::load()?;
    let scene = scene(cli, &prefs)?;

    let paths_file = paths_parameters(cli, &prefs)?;
    let paths = PathsConfig::load(&paths_file)
        .with_context(|| format!("Failed to load {}", paths_file.display()))?;
    let l1c = &paths.global_chains_paths.l1c;
    for date in [&scene.current_date, &scene.clear_date] {
        if !dates::is_valid_date(l1c, &scene.location, date)? {
            anyhow::bail!(
                "No L1C product for {} on {}. Run: alcd dates -l {}",
                scene.location,
                date,
                scene.location
            );
        }
    }

    let mut orchestrator = orchestrator(cli, &prefs, &scene, None)?;
    println!("{}", style("ALCD - Initialization").bold().cyan());
    let outcome = orchestrator.run_stage(Stage::Layers, force)?;
    print_outcome(Stage::Layers, outcome);

    prefs.last_run = Some(scene);
    prefs.save()?;

    println!();
    println!(
        "  Label points in {} then run {}",
        style(orchestrator.layout().masks_dir().display()).dim(),
        style("alcd iterate").cyan()
    );
    Ok(())
}

fn iterate_cmd(cli: &Cli, force: bool, seed: Option<u64>) -> Result<()> {
    let prefs = Config::load()?;
    let scene = scene(cli, &prefs)?;
    let mut orchestrator = orchestrator(cli, &prefs, &scene, seed)?;

    let iteration = orchestrator.state()?.iteration;
    println!(
        "{} {} ({})",
        style("ALCD - Iteration").bold().cyan(),
        iteration,
        orchestrator.layout().main_dir().display()
    );

    for (stage, outcome) in orchestrator.run_iteration(force)? {
        print_outcome(stage, outcome);
    }

    let report = IterationReport::load(&orchestrator.artifacts().iteration_report)?;
    print_report(&report);
    println!();
    println!(
        "  Review {} and edit the class layers, then run {} again",
        style(orchestrator.artifacts().contour_overlay.display()).dim(),
        style("alcd iterate").cyan()
    );
    Ok(())
}

fn kfold_cmd(cli: &Cli, force: bool, seed: Option<u64>) -> Result<()> {
    let prefs = Config::load()?;
    let scene = scene(cli, &prefs)?;
    let mut orchestrator = orchestrator(cli, &prefs, &scene, seed)?;

    let folds = orchestrator.config().training_parameters.kfold;
    println!("{} ({} folds)", style("ALCD - K-fold cross-validation").bold().cyan(), folds);

    let pb = ProgressBar::new(folds as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] fold {pos}/{len}")?
            .progress_chars("#>-"),
    );
    let result = orchestrator.run_kfold(force, &mut |done, _| pb.set_position(done as u64));
    pb.finish_and_clear();
    let summary = result?;

    println!();
    println!("{}", style(summary.summary()).bold());
    for (class, f1) in &summary.class_f1 {
        println!("  class {:>3}  F1 {:.3} ± {:.3}", class, f1.mean, f1.std);
    }
    println!();
    println!(
        "  Fold outputs in {}",
        style(orchestrator.layout().statistics_dir().display()).dim()
    );
    Ok(())
}

fn stage_cmd(cli: &Cli, stage: &str, force: bool, seed: Option<u64>) -> Result<()> {
    let stage: Stage = stage.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let prefs = Config::load()?;
    let scene = scene(cli, &prefs)?;
    let mut orchestrator = orchestrator(cli, &prefs, &scene, seed)?;

    let outcome = orchestrator.run_stage(stage, force)?;
    print_outcome(stage, outcome);
    Ok(())
}

fn status_cmd(cli: &Cli) -> Result<()> {
    let prefs = Config::load()?;
    let scene = scene(cli, &prefs)?;
    let orchestrator = orchestrator(cli, &prefs, &scene, None)?;
    let state = orchestrator.state()?;

    println!();
    println!("{}", style("ALCD - Status").bold().cyan());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Run:        {}", orchestrator.layout().main_dir().display());
    println!("  Iteration:  {}", state.iteration);
    println!("  State:      {}", state.state);
    let completed: Vec<&str> = state.completed.iter().map(|s| s.name()).collect();
    println!(
        "  Completed:  {}",
        if completed.is_empty() { "(none)".to_string() } else { completed.join(", ") }
    );
    if !state.snapshots.is_empty() {
        let ids: Vec<String> = state.snapshots.iter().map(|id| id.to_string()).collect();
        println!("  Snapshots:  {}", ids.join(", "));
    }
    if let Some(seed) = state.seed {
        println!("  Seed:       {}", seed);
    }

    let report_path = &orchestrator.artifacts().iteration_report;
    if report_path.exists() {
        print_report(&IterationReport::load(report_path)?);
    }
    println!();
    Ok(())
}

fn dates_cmd(cli: &Cli) -> Result<()> {
    let prefs = Config::load()?;
    let location = cli
        .location
        .clone()
        .or_else(|| prefs.last_run.as_ref().map(|l| l.location.clone()))
        .ok_or_else(|| anyhow::anyhow!("No location given. Pass --location"))?;
    let paths_file = paths_parameters(cli, &prefs)?;
    let paths = PathsConfig::load(&paths_file)
        .with_context(|| format!("Failed to load {}", paths_file.display()))?;

    let available = dates::available_dates(&paths.global_chains_paths.l1c, &location)?;
    if available.is_empty() {
        println!("{}  No L1C product found for {}", style("ℹ").blue(), location);
    }
    for date in available {
        println!("{}", date);
    }
    Ok(())
}

fn snapshot_cmd(cli: &Cli, action: &SnapshotCommands) -> Result<()> {
    let prefs = Config::load()?;
    let scene = scene(cli, &prefs)?;
    let orchestrator = orchestrator(cli, &prefs, &scene, None)?;

    match action {
        SnapshotCommands::List => {
            let snapshots = orchestrator.snapshots()?;
            if snapshots.is_empty() {
                println!("{}  No snapshots yet", style("ℹ").blue());
            }
            for snapshot in snapshots {
                println!("  {:>3}  {}", snapshot.id, style(snapshot.path.display()).dim());
            }
        }
        SnapshotCommands::Take => {
            let snapshot = orchestrator.take_snapshot()?;
            println!("{} Saved snapshot {}", style("✓").green(), snapshot.id);
        }
        SnapshotCommands::Restore { id } => {
            orchestrator.restore_snapshot(*id)?;
            println!("{} Restored snapshot {}", style("✓").green(), id);
        }
    }
    Ok(())
}

// ============================================================================
// CONFIG COMMANDS
// ============================================================================

fn config_set(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

fn config_get(key: &str) -> Result<()> {
    println!("{}", Config::load()?.get(key)?);
    Ok(())
}

fn config_list() -> Result<()> {
    let config = Config::load()?;

    println!();
    println!("{}", style("Configuration").bold().cyan());
    println!("{}", style("─".repeat(40)).dim());
    println!();
    for key in config::KEYS {
        println!("  {:<18} {}", format!("{}:", key), config.get(key)?);
    }
    if let Some(last) = &config.last_run {
        println!(
            "  {:<18} {} {} (clear {})",
            "last-run:", last.location, last.current_date, last.clear_date
        );
    }
    println!();
    println!("  Config file: {}", Config::path()?.display());
    println!();
    Ok(())
}

fn config_path() -> Result<()> {
    println!("{}", Config::path()?.display());
    Ok(())
}
