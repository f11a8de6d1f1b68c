//! Power-series restoration helpers.

use ndarray::Array1;

use crate::RppError;

/// Power ceiling above which a sample is treated as a sensor glitch.
pub const DEFAULT_OUTLIER_THRESHOLD_W: f64 = 2500.0;

/// Outlier detection strategies for [`outliers_rejection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenoiseMethod {
    /// Replace samples above a power ceiling (or negative) by the series mean.
    Threshold,
}

impl Default for DenoiseMethod {
    fn default() -> Self {
        DenoiseMethod::Threshold
    }
}

impl std::str::FromStr for DenoiseMethod {
    type Err = RppError;

    fn from_str(s: &str) -> Result<Self, RppError> {
        match s {
            "threshold" => Ok(DenoiseMethod::Threshold),
            other => Err(RppError::UnsupportedOption(format!(
                "unknown outlier detection method '{}'",
                other
            ))),
        }
    }
}

/// Replace implausible samples by the series mean. With
/// [`DenoiseMethod::Threshold`], a sample is implausible when it exceeds
/// `threshold` watts or is negative. The mean is taken over the raw series,
/// outliers included.
pub fn outliers_rejection(
    x: &Array1<f64>,
    method: DenoiseMethod,
    threshold: f64,
) -> Result<Array1<f64>, RppError> {
    if !(threshold > 0.0) {
        return Err(RppError::InvalidArgument(
            "outlier threshold must be strictly positive".into(),
        ));
    }
    if x.is_empty() {
        return Err(RppError::InsufficientData(
            "cannot clean an empty power series".into(),
        ));
    }
    match method {
        DenoiseMethod::Threshold => {
            let mean = x.sum() / x.len() as f64;
            Ok(x.mapv(|v| if v > threshold || v < 0.0 { mean } else { v }))
        }
    }
}

/// Moving-average filter over a sliding window, computed with a running
/// cumulative sum. Output length is `len - window + 1`.
pub fn moving_average(x: &Array1<f64>, window: usize) -> Result<Array1<f64>, RppError> {
    if window == 0 {
        return Err(RppError::InvalidArgument(
            "window must be strictly positive".into(),
        ));
    }
    if x.len() < window {
        return Err(RppError::InsufficientData(format!(
            "series of {} samples is shorter than the {} sample window",
            x.len(),
            window
        )));
    }
    let mut out = Vec::with_capacity(x.len() - window + 1);
    let mut sum = 0.0;
    for (i, &v) in x.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= x[i - window];
        }
        if i + 1 >= window {
            out.push(sum / window as f64);
        }
    }
    Ok(Array1::from_vec(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outliers_are_replaced_by_the_series_mean() {
        let x = Array1::from_vec(vec![100.0, 3000.0, -5.0, 200.0]);
        let cleaned =
            outliers_rejection(&x, DenoiseMethod::Threshold, DEFAULT_OUTLIER_THRESHOLD_W).unwrap();
        let mean = (100.0 + 3000.0 - 5.0 + 200.0) / 4.0;
        assert!((cleaned[0] - 100.0).abs() < 1e-9);
        assert!((cleaned[1] - mean).abs() < 1e-9);
        assert!((cleaned[2] - mean).abs() < 1e-9);
        assert!((cleaned[3] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn non_positive_threshold_is_rejected() {
        let x = Array1::from_vec(vec![100.0]);
        assert!(matches!(
            outliers_rejection(&x, DenoiseMethod::Threshold, 0.0),
            Err(RppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_detection_method_is_unsupported() {
        assert_eq!(
            "threshold".parse::<DenoiseMethod>().unwrap(),
            DenoiseMethod::Threshold
        );
        assert!(matches!(
            "wavelet".parse::<DenoiseMethod>(),
            Err(RppError::UnsupportedOption(_))
        ));
    }

    #[test]
    fn moving_average_shortens_by_window() {
        let x = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let avg = moving_average(&x, 2).unwrap();
        assert_eq!(avg.len(), 3);
        assert!((avg[0] - 1.5).abs() < 1e-9);
        assert!((avg[1] - 2.5).abs() < 1e-9);
        assert!((avg[2] - 3.5).abs() < 1e-9);
    }

    #[test]
    fn moving_average_needs_a_full_window() {
        let x = Array1::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            moving_average(&x, 3),
            Err(RppError::InsufficientData(_))
        ));
    }
}
