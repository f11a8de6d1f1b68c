//! Record power-profile analysis library.
//!
//! For every effort duration up to a configured maximum, this crate computes
//! the best sustained average power a rider has ever produced, merges per-ride
//! profiles into a rider-level record profile, resamples profiles onto
//! arbitrary duration grids, and estimates the aerobic markers (maximal
//! aerobic power, time to attain it, aerobic endurance index) through a
//! two-stage log-linear regression.

use thiserror::Error;

pub mod aerobic;
pub mod denoise;
pub mod io;
pub mod metrics;
pub mod mmp;
pub mod profile;
pub mod rider;

pub use aerobic::{
    aerobic_meta_model, log_linear_fitting, AerobicMarkers, FitDiagnostics, FitMethod,
    SAMPLING_WKO,
};
pub use io::{load_power_from_fit, read_power_series, PowerSeries};
pub use mmp::max_mean_power;
pub use profile::{merge, Interpolation, PowerProfile, RecordPowerProfile, RidePowerProfile};
pub use rider::Rider;

#[derive(Error, Debug)]
pub enum RppError {
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),
    #[error("profile already fitted; build a new profile to recompute")]
    AlreadyFitted,
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv failure: {0}")]
    Csv(#[from] csv::Error),
}
