use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use dialoguer::Confirm;
use imgcompare::config::Config;
use imgcompare::core::{Reduction, SimilarityMatrix, ThumbnailReducer};
use imgcompare::report::Report;
use imgcompare::scan;
use imgcompare::script::{self, ScriptWriter, Timings};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufWriter, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "imgcompare",
    version,
    about = "Find near-duplicate images and write a script to review them pairwise"
)]
struct Cli {
    /// Image files to compare (directories need --recursive)
    #[arg(required = true, value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Script to write
    #[arg(short, long, value_name = "FILE", default_value = script::DEFAULT_SCRIPT_NAME)]
    output: PathBuf,

    /// Also write a JSON report
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,

    /// Walk directories for image files instead of ignoring them
    #[arg(short, long)]
    recursive: bool,

    /// JSON config file (thumbnail shape, thresholds, viewer)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Upper bound (exclusive) of the near-duplicate band
    #[arg(long)]
    near: Option<f64>,

    /// Upper bound (exclusive) of the similar band
    #[arg(long)]
    similar: Option<f64>,

    /// Viewer command written into the script
    #[arg(long)]
    viewer: Option<String>,

    /// Overwrite existing output files without asking
    #[arg(short, long)]
    force: bool,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors, no progress bars
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = load_config(&cli)?;
    debug!("Using {:?}", config);

    confirm_overwrite(&cli.output, cli.force)?;
    if let Some(json) = &cli.json {
        confirm_overwrite(json, cli.force)?;
    }

    let started = Instant::now();
    let inputs = scan::collect_inputs(&cli.files, cli.recursive);
    println!("▶ {} filenames given on command line.", inputs.len());

    // Reduce every input to a grayscale thumbnail
    let reducer = ThumbnailReducer::new(config.thumbnail);
    let bar = progress_bar(inputs.len() as u64, "Reading files", cli.quiet)?;
    let (reduction, reading) = benchmark("reading files", || {
        reducer.reduce_all(&inputs, |_| bar.inc(1))
    });
    bar.finish_and_clear();

    let Reduction { accepted, rejected } = reduction;
    for rejection in &rejected {
        warn!(
            "ignoring \"{}\" ({}. file from command line): {}",
            rejection.path.display(),
            rejection.position,
            rejection.error
        );
    }
    println!("▶ Comparing {} files…", accepted.len());

    // Pairwise comparison over the lower triangle
    let accepted_count = accepted.len();
    let bar = progress_bar(accepted_count.saturating_sub(1) as u64, "Comparing", cli.quiet)?;
    let (matrix, comparing) = benchmark("comparing thumbnails", || {
        SimilarityMatrix::build_with_progress(accepted, |_| bar.inc(1))
    });
    bar.finish_and_clear();
    let matrix = matrix
        .context("Thumbnails of differing size reached the comparison")?
        .with_thresholds(config.thresholds);

    let generated_at = Local::now();
    let output_started = Instant::now();
    let file = File::create(&cli.output)
        .with_context(|| format!("Failed to create script {:?}", cli.output))?;
    let mut writer = ScriptWriter::new(BufWriter::new(file), config.viewer.clone());
    writer.write_header(inputs.len(), generated_at)?;
    writer.write_comparing(matrix.len())?;
    let counts = writer.write_pairs(matrix.classify())?;
    let output = output_started.elapsed();
    writer.write_timings(&Timings {
        reading,
        comparing,
        output,
        total: started.elapsed(),
    })?;
    writer
        .finish()
        .with_context(|| format!("Failed to write script {:?}", cli.output))?;
    script::make_executable(&cli.output)
        .with_context(|| format!("Failed to make {:?} executable", cli.output))?;

    if let Some(json) = &cli.json {
        Report::new(generated_at, &config, inputs.len(), &rejected, &matrix)
            .save(json)
            .with_context(|| format!("Failed to write report {:?}", json))?;
        info!("Report written to {}", json.display());
    }

    if matrix.is_empty() {
        println!("No images could be read.");
    }
    println!(
        "✅ {} near-duplicate and {} similar pair(s); result has been written to \"{}\"",
        counts.near_duplicate,
        counts.similar,
        cli.output.display()
    );

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

/// Defaults, then the config file, then flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => Config::default(),
    };
    if let Some(near) = cli.near {
        config.thresholds.near = near;
    }
    if let Some(similar) = cli.similar {
        config.thresholds.similar = similar;
    }
    if let Some(viewer) = &cli.viewer {
        config.viewer = viewer.clone();
    }
    config.validate()?;
    Ok(config)
}

fn confirm_overwrite(path: &Path, force: bool) -> Result<()> {
    if force || !path.exists() {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
    }
    let overwrite = Confirm::new()
        .with_prompt(format!("{} already exists. Overwrite?", path.display()))
        .default(false)
        .interact()?;
    if !overwrite {
        anyhow::bail!("Aborted; {} left untouched", path.display());
    }
    Ok(())
}

fn progress_bar(len: u64, message: &'static str, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(len);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}",
    )?);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

/// Run `f()`, log how long it took (with `label`), and return its result
/// together with the elapsed time.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> (T, Duration) {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    info!("⏱ {} took {:.2?}", label, elapsed);
    (result, elapsed)
}
