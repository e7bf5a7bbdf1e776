use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pulseflow_lib::batch::RunTarget;
use pulseflow_lib::config::{Channel, ProcessingConfig};
use pulseflow_lib::io::export::{write_hrv_csv, write_ppi_csv};
use pulseflow_lib::io::raw::RawEncoding;
use pulseflow_lib::metrics::hrv::OverallMetrics;
use pulseflow_lib::pipeline::RunResults;
use pulseflow_lib::timefilter::ClockRange;
use pulseflow_lib::worker::{self, WorkerEvent};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

mod options;

#[derive(Parser)]
#[command(
    name = "pulseflow",
    version,
    about = "PPG recordings to pulse intervals and windowed HRV metrics"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single raw PPG file
    File {
        /// Raw headerless CSV recording
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        opts: PipelineOpts,
    },
    /// Process a directory whose numeric subfolders are recording epochs
    Dir {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        opts: PipelineOpts,
    },
    /// Process a directory of participant folders, each holding epochs
    Batch {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        opts: PipelineOpts,
    },
}

#[derive(Args)]
struct PipelineOpts {
    /// HRV window size in minutes
    #[arg(long, default_value_t = 5)]
    window_minutes: u32,
    /// Channels to process
    #[arg(long, default_value = "P0,P1,P2", value_delimiter = ',')]
    channels: Vec<String>,
    /// Skip HRV windowing (PPI tables are still produced)
    #[arg(long)]
    skip_hrv: bool,
    /// Lower PPI outlier bound, milliseconds
    #[arg(long, default_value_t = 667)]
    ppi_low_ms: u32,
    /// Upper PPI outlier bound, milliseconds
    #[arg(long, default_value_t = 2000)]
    ppi_high_ms: u32,
    /// Keep only samples after this clock time (HH:MM)
    #[arg(long, requires = "time_end")]
    time_start: Option<String>,
    /// Keep only samples before this clock time (HH:MM)
    #[arg(long, requires = "time_start")]
    time_end: Option<String>,
    /// Force the raw first-column encoding (absolute|delta)
    #[arg(long)]
    encoding: Option<String>,
    /// Load the pipeline options from a TOML file instead of flags
    #[arg(long, conflicts_with_all = [
        "window_minutes", "channels", "skip_hrv", "ppi_low_ms",
        "ppi_high_ms", "time_start", "time_end", "encoding",
    ])]
    config: Option<PathBuf>,
    /// Directory for the output CSV tables
    #[arg(long, default_value = "pulseflow-out")]
    out_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::File { input, opts } => run(RunTarget::SingleFile(input), opts),
        Commands::Dir { input, opts } => run(RunTarget::Directory(input), opts),
        Commands::Batch { input, opts } => run(RunTarget::ParticipantBatch(input), opts),
    }
}

fn build_config(opts: &PipelineOpts) -> Result<ProcessingConfig> {
    if let Some(path) = &opts.config {
        return options::load_options(path);
    }
    let channels = opts
        .channels
        .iter()
        .map(|c| c.parse::<Channel>())
        .collect::<Result<Vec<_>, _>>()?;
    let time_range = match (&opts.time_start, &opts.time_end) {
        (Some(start), Some(end)) => Some(ClockRange::parse(start, end)?),
        _ => None,
    };
    let encoding = opts
        .encoding
        .as_deref()
        .map(str::parse::<RawEncoding>)
        .transpose()?;
    let config = ProcessingConfig {
        window_minutes: opts.window_minutes,
        channels,
        calculate_hrv: !opts.skip_hrv,
        ppi_low_ms: opts.ppi_low_ms,
        ppi_high_ms: opts.ppi_high_ms,
        time_range,
        encoding,
    };
    config.validate()?;
    Ok(config)
}

fn run(target: RunTarget, opts: PipelineOpts) -> Result<()> {
    let config = build_config(&opts)?;
    let handle = worker::spawn(target, config);

    let mut results: Option<RunResults> = None;
    for event in handle.events.iter() {
        match event {
            WorkerEvent::Status(message) => log::info!("{}", message),
            WorkerEvent::Progress(pct) => log::debug!("progress: {}%", pct),
            WorkerEvent::Failed(message) => bail!("{}", message),
            WorkerEvent::Finished(run_results) => {
                results = Some(run_results);
                break;
            }
        }
    }
    handle.join();
    let results = results.context("worker exited without a result")?;

    write_outputs(&opts.out_dir, &results)?;

    let summary: BTreeMap<&str, &OverallMetrics> = results
        .channels
        .iter()
        .filter_map(|c| c.overall.as_ref().map(|o| (c.channel.as_str(), o)))
        .collect();
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn write_outputs(out_dir: &Path, results: &RunResults) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;
    for output in &results.channels {
        let ppi_path = out_dir.join(format!("{}_ppi.csv", output.channel));
        write_ppi_csv(&ppi_path, output.channel, &output.ppi)
            .with_context(|| format!("writing {}", ppi_path.display()))?;
        if !output.windows.is_empty() {
            let hrv_path = out_dir.join(format!("{}_hrv.csv", output.channel));
            write_hrv_csv(&hrv_path, &output.windows)
                .with_context(|| format!("writing {}", hrv_path.display()))?;
        }
    }
    Ok(())
}
