//! Aerobic metabolism markers from a power profile.
//!
//! Implements the two-stage log-linear regression of Pinot & Grappe,
//! "Determination of Maximal Aerobic Power on the Field in Cycling" (2014).
//! A first fit over the 10-240 minute range locates the maximal aerobic power
//! as the earliest 3-7 minute record entering the fit's confidence band; a
//! second fit of power expressed as a percentage of that marker yields the
//! aerobic endurance index.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::profile::{Interpolation, PowerProfile};
use crate::RppError;

/// Default sampling grid in minutes, matching the WKO+ landmark durations.
pub const SAMPLING_WKO: [f64; 21] = [
    0.016, 0.083, 0.5, 1.0, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0, 6.5, 7.0, 10.0, 20.0, 30.0, 45.0,
    60.0, 120.0, 180.0, 240.0,
];

const MAP_REGRESSION_RANGE_MIN: (f64, f64) = (10.0, 240.0);
const MAP_SEARCH_RANGE_MIN: (f64, f64) = (3.0, 7.0);

/// Regression backend for the log-linear fits.
///
/// Both backends minimize the same least-squares objective and agree on
/// well-conditioned data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FitMethod {
    /// Closed-form ordinary least squares on log-transformed durations.
    Lsq,
    /// Iterative Levenberg-Marquardt on the same model.
    Lm,
}

impl Default for FitMethod {
    fn default() -> Self {
        FitMethod::Lsq
    }
}

impl std::str::FromStr for FitMethod {
    type Err = RppError;

    fn from_str(s: &str) -> Result<Self, RppError> {
        match s {
            "lsq" => Ok(FitMethod::Lsq),
            "lm" => Ok(FitMethod::Lm),
            other => Err(RppError::UnsupportedOption(format!(
                "unknown regression method '{}'",
                other
            ))),
        }
    }
}

/// Quality summary of one log-linear fit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub slope: f64,
    pub intercept: f64,
    /// Residual standard deviation (n - 2 degrees of freedom).
    pub std_err: f64,
    /// Coefficient of determination.
    pub coeff_det: f64,
}

/// Physiological markers estimated from a record power-profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AerobicMarkers {
    /// Maximal aerobic power, in watts (or W/kg on a normalized fit).
    pub pma: f64,
    /// Duration at which the maximal aerobic power is attained, in minutes.
    pub t_pma: f64,
    /// Aerobic endurance index: decay of sustainable power in % of PMA per
    /// log-minute.
    pub aei: f64,
    pub pma_fit: FitDiagnostics,
    pub aei_fit: FitDiagnostics,
}

fn res_std_dev(observed: &[f64], estimated: &[f64]) -> f64 {
    let ss: f64 = observed
        .iter()
        .zip(estimated)
        .map(|(o, e)| (o - e).powi(2))
        .sum();
    (ss / (observed.len() as f64 - 2.0)).sqrt()
}

fn r_squared(observed: &[f64], estimated: &[f64]) -> f64 {
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_tot: f64 = observed.iter().map(|o| (o - mean).powi(2)).sum();
    let ss_res: f64 = observed
        .iter()
        .zip(estimated)
        .map(|(o, e)| (o - e).powi(2))
        .sum();
    1.0 - ss_res / ss_tot
}

fn ols(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let xm = x.iter().sum::<f64>() / n;
    let ym = y.iter().sum::<f64>() / n;
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - xm) * (b - ym)).sum();
    let sxx: f64 = x.iter().map(|a| (a - xm).powi(2)).sum();
    let slope = sxy / sxx;
    (slope, ym - slope * xm)
}

fn sum_squared_residuals(x: &[f64], y: &[f64], slope: f64, intercept: f64) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| (yi - (slope * xi + intercept)).powi(2))
        .sum()
}

/// Levenberg-Marquardt on the linear model `y = slope * x + intercept`.
///
/// The damping factor shrinks on accepted steps and grows on rejected ones;
/// for a model linear in its parameters this converges to the least-squares
/// solution.
fn levenberg_marquardt(x: &[f64], y: &[f64]) -> (f64, f64) {
    let mut slope = 0.0;
    let mut intercept = y.iter().sum::<f64>() / y.len() as f64;
    let mut lambda = 1e-3;
    let mut sse = sum_squared_residuals(x, y, slope, intercept);

    for _ in 0..200 {
        let (mut jtj00, mut jtj01, mut jtj11) = (0.0, 0.0, 0.0);
        let (mut jtr0, mut jtr1) = (0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            let r = yi - (slope * xi + intercept);
            jtj00 += xi * xi;
            jtj01 += xi;
            jtj11 += 1.0;
            jtr0 += xi * r;
            jtr1 += r;
        }
        let a00 = jtj00 * (1.0 + lambda);
        let a11 = jtj11 * (1.0 + lambda);
        let det = a00 * a11 - jtj01 * jtj01;
        if det.abs() < f64::EPSILON {
            break;
        }
        let delta_slope = (jtr0 * a11 - jtr1 * jtj01) / det;
        let delta_intercept = (jtr1 * a00 - jtr0 * jtj01) / det;
        let candidate = (slope + delta_slope, intercept + delta_intercept);
        let candidate_sse = sum_squared_residuals(x, y, candidate.0, candidate.1);
        if candidate_sse <= sse {
            let improvement = sse - candidate_sse;
            slope = candidate.0;
            intercept = candidate.1;
            sse = candidate_sse;
            lambda = (lambda * 0.5).max(1e-12);
            if improvement <= 1e-12 * sse.max(1e-12) {
                break;
            }
        } else {
            lambda *= 4.0;
            if lambda > 1e12 {
                break;
            }
        }
    }
    (slope, intercept)
}

/// Fit `y ≈ slope * ln(x) + intercept` and report the fit diagnostics.
pub fn log_linear_fitting(
    x: &[f64],
    y: &[f64],
    method: FitMethod,
) -> Result<FitDiagnostics, RppError> {
    if x.len() != y.len() {
        return Err(RppError::InvalidArgument(
            "x and y must have the same length".into(),
        ));
    }
    if x.len() < 3 {
        return Err(RppError::InsufficientData(format!(
            "log-linear fit needs at least 3 samples, got {}",
            x.len()
        )));
    }
    let log_x: Vec<f64> = x.iter().map(|v| v.ln()).collect();
    let (slope, intercept) = match method {
        FitMethod::Lsq => ols(&log_x, y),
        FitMethod::Lm => levenberg_marquardt(&log_x, y),
    };
    let estimated: Vec<f64> = log_x.iter().map(|&lx| slope * lx + intercept).collect();
    Ok(FitDiagnostics {
        slope,
        intercept,
        std_err: res_std_dev(y, &estimated),
        coeff_det: r_squared(y, &estimated),
    })
}

fn select_range(points: &[(f64, f64)], lo: f64, hi: f64) -> (Vec<f64>, Vec<f64>) {
    points
        .iter()
        .filter(|&&(t, _)| t >= lo && t <= hi)
        .copied()
        .unzip()
}

/// Estimate the aerobic markers of a fitted profile.
///
/// `ts` overrides the WKO sampling grid (minutes); points beyond the profile
/// maximum are dropped with a warning. Zero-power samples mark durations the
/// profile never observed and are excluded from the fits, as are zero
/// durations, which cannot enter the log transform.
pub fn aerobic_meta_model<P: PowerProfile>(
    profile: &P,
    ts: Option<&[f64]>,
    normalized: bool,
    method: FitMethod,
) -> Result<AerobicMarkers, RppError> {
    let grid: Vec<f64> = ts.map_or_else(|| SAMPLING_WKO.to_vec(), |s| s.to_vec());
    let max_duration = profile.max_duration_min() as f64;
    let kept: Vec<f64> = grid.iter().copied().filter(|&t| t <= max_duration).collect();
    if kept.len() < grid.len() {
        warn!(
            "dropped {} sample durations beyond the {} min profile",
            grid.len() - kept.len(),
            profile.max_duration_min()
        );
    }

    let powers = profile.resample(&kept, Interpolation::Linear, normalized)?;
    let points: Vec<(f64, f64)> = kept
        .into_iter()
        .zip(powers)
        .filter(|&(t, p)| t > 0.0 && p != 0.0)
        .collect();

    let (reg_t, reg_p) = select_range(&points, MAP_REGRESSION_RANGE_MIN.0, MAP_REGRESSION_RANGE_MIN.1);
    let pma_fit = log_linear_fitting(&reg_t, &reg_p, method)?;

    let (band_t, band_p) = select_range(&points, MAP_SEARCH_RANGE_MIN.0, MAP_SEARCH_RANGE_MIN.1);
    let mut attained = None;
    for (&t, &p) in band_t.iter().zip(&band_p) {
        let model = pma_fit.slope * t.ln() + pma_fit.intercept;
        if (p - model).abs() < 2.0 * pma_fit.std_err {
            attained = Some((t, p));
            break;
        }
    }
    let (t_pma, pma) = attained.ok_or_else(|| {
        RppError::InsufficientData(
            "no record between 3 and 7 minutes enters the confidence band of the fit".into(),
        )
    })?;

    let (aei_t, aei_p) = select_range(&points, t_pma, MAP_REGRESSION_RANGE_MIN.1);
    let percent: Vec<f64> = aei_p.iter().map(|p| p / pma * 100.0).collect();
    let aei_fit = log_linear_fitting(&aei_t, &percent, method)?;

    Ok(AerobicMarkers {
        pma,
        t_pma,
        aei: aei_fit.slope,
        pma_fit,
        aei_fit,
    })
}
