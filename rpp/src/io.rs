//! FIT activity ingestion.
//!
//! Decodes the power stream of a FIT activity into the strict 1 Hz series the
//! profile machinery expects. Outlier handling beyond missing-sample
//! substitution is left to [`crate::denoise`].

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use fitparser::de::from_bytes;
use fitparser::profile::MesgNum;
use ndarray::Array1;
use tracing::warn;

use crate::RppError;

/// A 1 Hz power series together with the date it was recorded.
#[derive(Clone, Debug)]
pub struct PowerSeries {
    pub power: Array1<f64>,
    pub date: NaiveDate,
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::Float32(v) => Some(f64::from(*v)),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::SInt8(v) => Some(f64::from(*v)),
        fitparser::Value::UInt8(v) => Some(f64::from(*v)),
        fitparser::Value::SInt16(v) => Some(f64::from(*v)),
        fitparser::Value::UInt16(v) => Some(f64::from(*v)),
        fitparser::Value::SInt32(v) => Some(f64::from(*v)),
        fitparser::Value::UInt32(v) => Some(f64::from(*v)),
        fitparser::Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

/// Decode the power stream of a FIT activity into a strict 1 Hz series.
///
/// Records without a power value count as zero watts; irregularly spaced
/// records are linearly resampled onto the one-second grid.
pub fn load_power_from_fit(input: &[u8]) -> Result<PowerSeries, RppError> {
    let records = from_bytes(input).map_err(|e| RppError::FitParse(e.to_string()))?;

    let mut points: Vec<(f64, f64)> = Vec::new();
    let mut t0: Option<DateTime<Utc>> = None;
    let mut missing = 0usize;

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut timestamp: Option<DateTime<Utc>> = None;
        let mut power: Option<f64> = None;
        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        let utc = ts.with_timezone(&Utc);
                        if t0.is_none() {
                            t0 = Some(utc);
                        }
                        timestamp = Some(utc);
                    }
                }
                "power" => {
                    if let Some(v) = fit_value_to_f64(field.value()) {
                        power = Some(v);
                    }
                }
                _ => {}
            }
        }
        if let (Some(ts), Some(base)) = (timestamp, t0) {
            let t = (ts - base).num_milliseconds() as f64 / 1000.0;
            match power {
                Some(p) => points.push((t, p)),
                None => {
                    points.push((t, 0.0));
                    missing += 1;
                }
            }
        }
    }

    let date = match t0 {
        Some(base) => base.date_naive(),
        None => {
            return Err(RppError::InsufficientData(
                "FIT file contains no record messages".into(),
            ))
        }
    };
    if missing == points.len() {
        warn!("FIT file contains no power data; the profile will be all zeros");
    } else if missing > 0 {
        warn!(
            "{} of {} records carry no power value; treated as 0 W",
            missing,
            points.len()
        );
    }

    let power = resample_1hz(&points);
    Ok(PowerSeries {
        power: Array1::from_vec(power),
        date,
    })
}

/// Read a `.fit` activity from disk.
pub fn read_power_series(path: &Path) -> Result<PowerSeries, RppError> {
    let is_fit = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("fit"))
        .unwrap_or(false);
    if !is_fit {
        return Err(RppError::UnsupportedFormat(path.display().to_string()));
    }
    let data = fs::read(path)?;
    load_power_from_fit(&data)
}

/// Linearly interpolate `(time, value)` points onto a one-second grid.
fn resample_1hz(points: &[(f64, f64)]) -> Vec<f64> {
    if points.is_empty() {
        return Vec::new();
    }
    let start = points[0].0.floor();
    let end = points[points.len() - 1].0.ceil();
    let len = (end - start) as usize + 1;
    let mut out = Vec::with_capacity(len);
    let mut idx = 0;
    for step in 0..len {
        let target = start + step as f64;
        while idx + 1 < points.len() && points[idx + 1].0 < target {
            idx += 1;
        }
        let (t0, v0) = points[idx];
        if idx + 1 < points.len() {
            let (t1, v1) = points[idx + 1];
            let frac = if (t1 - t0).abs() > f64::EPSILON {
                ((target - t0) / (t1 - t0)).clamp(0.0, 1.0)
            } else {
                0.0
            };
            out.push(v0 + (v1 - v0) * frac);
        } else {
            out.push(v0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let bogus = [0u8, 1, 2, 3, 4, 5, 6, 7];
        assert!(matches!(
            load_power_from_fit(&bogus),
            Err(RppError::FitParse(_))
        ));
    }

    #[test]
    fn non_fit_extension_is_rejected_before_reading() {
        let path = PathBuf::from("ride.gpx");
        assert!(matches!(
            read_power_series(&path),
            Err(RppError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn resample_fills_one_second_gaps() {
        let points = [(0.0, 100.0), (2.0, 300.0)];
        let out = resample_1hz(&points);
        assert_eq!(out, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn resample_keeps_a_steady_cadence_untouched() {
        let points = [(0.0, 100.0), (1.0, 150.0), (2.0, 125.0)];
        let out = resample_1hz(&points);
        assert_eq!(out, vec![100.0, 150.0, 125.0]);
    }
}
