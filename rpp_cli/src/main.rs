use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use rpp::denoise::{outliers_rejection, DenoiseMethod};
use rpp::{
    aerobic_meta_model, read_power_series, AerobicMarkers, FitMethod, PowerProfile,
    RecordPowerProfile, Rider, RidePowerProfile,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Record power-profile computation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute ride and record power-profiles from FIT files
    Profile(ProfileArgs),
    /// Estimate aerobic markers (MAP, t_MAP, AEI) from FIT files
    Markers(MarkersArgs),
}

#[derive(Parser, Debug)]
struct ProfileArgs {
    /// FIT files to ingest
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path for the per-ride table (`-` for stdout)
    #[arg(short, long, default_value = "profiles.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional CSV path for the aggregated record profile
    #[arg(long, value_hint = ValueHint::FilePath)]
    record_output: Option<PathBuf>,

    /// Maximum profile duration in minutes
    #[arg(long, default_value_t = 240)]
    max_duration: usize,

    /// Rider weight in kilograms; enables the normalized column
    #[arg(long)]
    weight: Option<f64>,

    /// Discard power readings above this many watts before fitting
    #[arg(long)]
    max_power: Option<f64>,

    /// Restrict the record profile to rides from this date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Restrict the record profile to rides up to this date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct MarkersArgs {
    /// FIT files to ingest
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Maximum profile duration in minutes
    #[arg(long, default_value_t = 240)]
    max_duration: usize,

    /// Rider weight in kilograms
    #[arg(long)]
    weight: Option<f64>,

    /// Fit the weight-normalized profile
    #[arg(long, action = ArgAction::SetTrue)]
    normalized: bool,

    /// Regression method
    #[arg(long, value_enum, default_value_t = MethodOpt::Lsq)]
    method: MethodOpt,

    /// Sample durations in minutes (comma separated); defaults to the WKO grid
    #[arg(long)]
    samples: Option<String>,

    /// Emit machine-readable JSON on stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodOpt {
    Lsq,
    Lm,
}

impl From<MethodOpt> for FitMethod {
    fn from(value: MethodOpt) -> Self {
        match value {
            MethodOpt::Lsq => FitMethod::Lsq,
            MethodOpt::Lm => FitMethod::Lm,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = match &cli.command {
        Command::Profile(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
        Command::Markers(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Profile(args) => handle_profile(args),
        Command::Markers(args) => handle_markers(args),
    }
}

fn fit_rides(
    inputs: &[PathBuf],
    max_duration: usize,
    weight: Option<f64>,
    max_power: Option<f64>,
) -> Result<Vec<RidePowerProfile>> {
    inputs
        .par_iter()
        .map(|path| -> Result<RidePowerProfile> {
            let mut series = read_power_series(path)
                .with_context(|| format!("failed to ingest {}", path.display()))?;
            if let Some(ceiling) = max_power {
                series.power = outliers_rejection(&series.power, DenoiseMethod::Threshold, ceiling)
                    .with_context(|| format!("failed to clean {}", path.display()))?;
            }
            let mut ride = RidePowerProfile::new(max_duration, weight)?;
            ride.fit(&series.power, series.date, false)?;
            Ok(ride)
        })
        .collect()
}

fn date_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Option<(NaiveDate, NaiveDate)>> {
    match (from, to) {
        (Some(start), Some(finish)) => Ok(Some((start, finish))),
        (None, None) => Ok(None),
        _ => Err(anyhow!("--from and --to must be supplied together")),
    }
}

fn handle_profile(args: ProfileArgs) -> Result<()> {
    let range = date_range(args.from, args.to)?;
    let rides = fit_rides(&args.inputs, args.max_duration, args.weight, args.max_power)?;
    info!("fitted {} rides at {} min", rides.len(), args.max_duration);

    let mut rider = Rider::with_rides(args.max_duration, args.weight, rides)?;
    rider.compute_record(range)?;

    if args.output.as_os_str() == "-" {
        write_rider_stdout(&rider)?;
    } else {
        rider.save_csv(&args.output)?;
        info!("wrote ride profiles: {}", args.output.display());
    }

    if let Some(path) = args.record_output.as_ref() {
        write_record_csv(rider.record(), path)?;
        info!("wrote record profile: {}", path.display());
    }
    Ok(())
}

fn handle_markers(args: MarkersArgs) -> Result<()> {
    let samples = args
        .samples
        .as_deref()
        .map(parse_sample_list)
        .transpose()?;
    let rides = fit_rides(&args.inputs, args.max_duration, args.weight, None)?;
    let mut rider = Rider::with_rides(args.max_duration, args.weight, rides)?;
    rider.compute_record(None)?;

    let markers = aerobic_meta_model(
        rider.record(),
        samples.as_deref(),
        args.normalized,
        args.method.into(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&markers)?);
    } else {
        print_markers(&markers, args.normalized);
    }
    Ok(())
}

fn parse_sample_list(raw: &str) -> Result<Vec<f64>> {
    let mut samples = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let value: f64 = token
            .parse()
            .with_context(|| format!("invalid sample duration '{}'", token))?;
        if value < 0.0 {
            warn!("ignoring negative sample duration {}", value);
            continue;
        }
        samples.push(value);
    }
    if samples.is_empty() {
        return Err(anyhow!("--samples list was empty"));
    }
    Ok(samples)
}

fn print_markers(markers: &AerobicMarkers, normalized: bool) {
    let unit = if normalized { "W/kg" } else { "W" };
    println!(
        "MAP: {:.2} {} attained at {} min",
        markers.pma, unit, markers.t_pma
    );
    println!("AEI: {:.2} %/ln(min)", markers.aei);
    println!(
        "MAP fit: slope {:.3}, intercept {:.3}, std err {:.3}, R2 {:.4}",
        markers.pma_fit.slope,
        markers.pma_fit.intercept,
        markers.pma_fit.std_err,
        markers.pma_fit.coeff_det
    );
    println!(
        "AEI fit: slope {:.3}, intercept {:.3}, std err {:.3}, R2 {:.4}",
        markers.aei_fit.slope,
        markers.aei_fit.intercept,
        markers.aei_fit.std_err,
        markers.aei_fit.coeff_det
    );
}

fn write_rider_stdout(rider: &Rider) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    rider.write_csv(handle)?;
    Ok(())
}

fn write_record_csv(record: &RecordPowerProfile, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    let values = record
        .values()
        .ok_or_else(|| anyhow!("record profile has not been fitted"))?;
    let normalized = record.normalized_values();

    if normalized.is_some() {
        writer.write_record(["duration_s", "power_w", "power_w_per_kg"])?;
    } else {
        writer.write_record(["duration_s", "power_w"])?;
    }
    for (idx, value) in values.iter().enumerate() {
        let duration = (idx + 1).to_string();
        match normalized {
            Some(norm) => writer.write_record([
                duration,
                format!("{:.6}", value),
                format!("{:.6}", norm[idx]),
            ])?,
            None => writer.write_record([duration, format!("{:.6}", value)])?,
        }
    }
    writer.flush()?;
    Ok(())
}
