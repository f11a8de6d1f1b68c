//! Descriptive scores for a single activity.
//!
//! All functions read a 1 Hz power series and a reference power (FTP or PMA)
//! and reduce to one scalar; the record power-profile machinery is not
//! involved.

use ndarray::Array1;

use crate::denoise::moving_average;
use crate::RppError;

/// Grappe ESIE zones: training-stress scale factor and intensity band as a
/// fraction of PMA, zones I1 through I7.
const GRAPPE_ZONES: [(f64, (f64, f64)); 7] = [
    (2.0, (0.3, 0.5)),
    (2.5, (0.5, 0.6)),
    (3.0, (0.6, 0.75)),
    (3.5, (0.75, 0.85)),
    (4.5, (0.85, 1.0)),
    (7.0, (1.0, 1.8)),
    (11.0, (1.8, 3.0)),
];

/// Ratio between functional threshold power and maximal aerobic power.
const FTP_PMA_RATIO: f64 = 0.76;

const NP_SMOOTHING_WINDOW_S: usize = 30;

pub fn pma2ftp(pma: f64) -> f64 {
    FTP_PMA_RATIO * pma
}

pub fn ftp2pma(ftp: f64) -> f64 {
    ftp / FTP_PMA_RATIO
}

fn check_reference_power(value: f64, what: &str) -> Result<(), RppError> {
    if !(value > 0.0) {
        return Err(RppError::InvalidArgument(format!(
            "{} must be strictly positive",
            what
        )));
    }
    Ok(())
}

/// Normalized power: 30 s moving average, samples below 30 % of PMA
/// discarded, fourth-power mean.
pub fn normalized_power(x: &Array1<f64>, pma: f64) -> Result<f64, RppError> {
    check_reference_power(pma, "pma")?;
    let smoothed = moving_average(x, NP_SMOOTHING_WINDOW_S)?;
    let floor = GRAPPE_ZONES[0].1 .0 * pma;
    let mut fourth = 0.0;
    let mut count = 0usize;
    for &v in smoothed.iter() {
        if v >= floor {
            fourth += v.powi(4);
            count += 1;
        }
    }
    if count == 0 {
        return Err(RppError::InsufficientData(
            "no smoothed sample reaches 30% of PMA".into(),
        ));
    }
    Ok((fourth / count as f64).powf(0.25))
}

/// Intensity factor relative to the functional threshold power.
pub fn intensity_factor_ftp(x: &Array1<f64>, ftp: f64) -> Result<f64, RppError> {
    check_reference_power(ftp, "ftp")?;
    Ok(normalized_power(x, ftp2pma(ftp))? / ftp)
}

/// Intensity factor relative to the maximal aerobic power.
pub fn intensity_factor_pma(x: &Array1<f64>, pma: f64) -> Result<f64, RppError> {
    check_reference_power(pma, "pma")?;
    intensity_factor_ftp(x, pma2ftp(pma))
}

/// Training-stress score against the functional threshold power.
pub fn training_stress_ftp(x: &Array1<f64>, ftp: f64) -> Result<f64, RppError> {
    let intensity = intensity_factor_ftp(x, ftp)?;
    Ok(x.len() as f64 * intensity * intensity / 3600.0)
}

/// Training-stress score against the maximal aerobic power.
pub fn training_stress_pma(x: &Array1<f64>, pma: f64) -> Result<f64, RppError> {
    check_reference_power(pma, "pma")?;
    training_stress_ftp(x, pma2ftp(pma))
}

/// Training-stress score over the Grappe ESIE zones: minutes spent in each
/// intensity band, weighted by the band's scale factor.
pub fn training_stress_pma_grappe(x: &Array1<f64>, pma: f64) -> Result<f64, RppError> {
    check_reference_power(pma, "pma")?;
    if x.is_empty() {
        return Err(RppError::InsufficientData(
            "cannot score an empty power series".into(),
        ));
    }
    let mut stress = 0.0;
    for (scale, (lo, hi)) in GRAPPE_ZONES {
        let seconds = x
            .iter()
            .filter(|&&v| v >= lo * pma && v < hi * pma)
            .count();
        stress += seconds as f64 / 60.0 * scale;
    }
    Ok(stress)
}

/// Grappe ESIE training-stress score with an FTP reference.
pub fn training_stress_ftp_grappe(x: &Array1<f64>, ftp: f64) -> Result<f64, RppError> {
    check_reference_power(ftp, "ftp")?;
    training_stress_pma_grappe(x, ftp2pma(ftp))
}
