//! Ride-level and rider-level power profiles.
//!
//! Both profile kinds share one capability surface: access to the fitted
//! buffers (raw and weight-normalized) and resampling onto arbitrary duration
//! grids. Aggregation across rides is a pure element-wise maximum.

use chrono::NaiveDate;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::mmp::max_mean_power;
use crate::RppError;

/// Interpolation kinds understood by the resampler.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Nearest,
}

impl Default for Interpolation {
    fn default() -> Self {
        Interpolation::Linear
    }
}

impl std::str::FromStr for Interpolation {
    type Err = RppError;

    fn from_str(s: &str) -> Result<Self, RppError> {
        match s {
            "linear" => Ok(Interpolation::Linear),
            "nearest" => Ok(Interpolation::Nearest),
            other => Err(RppError::UnsupportedOption(format!(
                "unknown interpolation method '{}'",
                other
            ))),
        }
    }
}

/// Element-wise maximum of two profiles of identical length.
///
/// Associative and commutative, so a record profile can be folded from any
/// number of ride profiles in any order.
pub fn merge(a: &Array1<f64>, b: &Array1<f64>) -> Result<Array1<f64>, RppError> {
    if a.len() != b.len() {
        return Err(RppError::InvalidArgument(format!(
            "cannot merge profiles of different lengths ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x.max(*y)).collect())
}

fn validate_config(max_duration_min: usize, weight: Option<f64>) -> Result<(), RppError> {
    if max_duration_min == 0 {
        return Err(RppError::MissingConfiguration(
            "a strictly positive maximum profile duration is required".into(),
        ));
    }
    if let Some(w) = weight {
        if !(w > 0.0) {
            return Err(RppError::InvalidArgument(
                "rider weight must be strictly positive".into(),
            ));
        }
    }
    Ok(())
}

fn infer_duration_min(len: usize) -> Result<usize, RppError> {
    if len == 0 || len % 60 != 0 {
        return Err(RppError::InvalidArgument(format!(
            "profile length {} is not a whole number of minutes",
            len
        )));
    }
    Ok(len / 60)
}

/// Interpolate `data` at `ts` (minutes) on the implicit axis
/// `[0, max_duration_min]` with one axis point per stored value.
fn resample_values(
    data: &Array1<f64>,
    max_duration_min: f64,
    ts: &[f64],
    interp: Interpolation,
) -> Result<Vec<f64>, RppError> {
    if data.len() < 2 {
        return Err(RppError::InsufficientData(
            "profile is too short to interpolate".into(),
        ));
    }
    let step = max_duration_min / (data.len() - 1) as f64;
    let mut out = Vec::with_capacity(ts.len());
    for &t in ts {
        if !(0.0..=max_duration_min).contains(&t) {
            return Err(RppError::InvalidArgument(format!(
                "sample point {} min lies outside the profile range [0, {}] min",
                t, max_duration_min
            )));
        }
        let pos = t / step;
        let idx = pos.floor() as usize;
        let value = if idx >= data.len() - 1 {
            data[data.len() - 1]
        } else {
            let frac = pos - idx as f64;
            match interp {
                Interpolation::Linear => data[idx] * (1.0 - frac) + data[idx + 1] * frac,
                Interpolation::Nearest => {
                    if frac < 0.5 {
                        data[idx]
                    } else {
                        data[idx + 1]
                    }
                }
            }
        };
        out.push(value);
    }
    Ok(out)
}

/// Capability surface shared by ride- and record-level profiles.
pub trait PowerProfile {
    /// Maximum profile duration, in minutes.
    fn max_duration_min(&self) -> usize;

    /// Fitted profile values, one per second of duration, or `None` before
    /// fitting.
    fn values(&self) -> Option<&Array1<f64>>;

    /// Weight-normalized profile values, present only when a weight was
    /// configured.
    fn normalized_values(&self) -> Option<&Array1<f64>>;

    /// Interpolate the profile at `ts` (minutes).
    ///
    /// Sample points outside `[0, max_duration_min]` raise rather than
    /// extrapolate, and requesting normalized data without a configured
    /// weight is an error.
    fn resample(
        &self,
        ts: &[f64],
        interp: Interpolation,
        normalized: bool,
    ) -> Result<Vec<f64>, RppError> {
        let data = if normalized {
            self.normalized_values().ok_or_else(|| {
                RppError::InvalidArgument(
                    "cannot resample a normalized profile without a configured rider weight"
                        .into(),
                )
            })?
        } else {
            self.values().ok_or_else(|| {
                RppError::MissingConfiguration("profile has not been fitted".into())
            })?
        };
        resample_values(data, self.max_duration_min() as f64, ts, interp)
    }
}

/// Power profile of a single ride.
///
/// Created unfitted, populated exactly once by [`RidePowerProfile::fit`];
/// fitting twice is an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RidePowerProfile {
    max_duration_min: usize,
    weight: Option<f64>,
    data: Option<Array1<f64>>,
    data_norm: Option<Array1<f64>>,
    date: Option<NaiveDate>,
}

impl RidePowerProfile {
    /// Create an unfitted holder for a profile of `max_duration_min` minutes.
    ///
    /// A `weight` (kilograms) enables the weight-normalized variant.
    pub fn new(max_duration_min: usize, weight: Option<f64>) -> Result<Self, RppError> {
        validate_config(max_duration_min, weight)?;
        Ok(Self {
            max_duration_min,
            weight,
            data: None,
            data_norm: None,
            date: None,
        })
    }

    /// Compute the profile from a 1 Hz power series recorded on `date`.
    pub fn fit(
        &mut self,
        power: &Array1<f64>,
        date: NaiveDate,
        parallel: bool,
    ) -> Result<&mut Self, RppError> {
        if self.data.is_some() {
            return Err(RppError::AlreadyFitted);
        }
        let profile = max_mean_power(power, 60 * self.max_duration_min, parallel)?;
        self.data_norm = self.weight.map(|w| &profile / w);
        self.data = Some(profile);
        self.date = Some(date);
        Ok(self)
    }

    /// Rebuild a fitted profile from persisted parts. The maximum duration is
    /// inferred from the value count.
    pub fn from_parts(
        values: Array1<f64>,
        weight: Option<f64>,
        date: NaiveDate,
    ) -> Result<Self, RppError> {
        let max_duration_min = infer_duration_min(values.len())?;
        validate_config(max_duration_min, weight)?;
        Ok(Self {
            max_duration_min,
            weight,
            data_norm: weight.map(|w| &values / w),
            data: Some(values),
            date: Some(date),
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.data.is_some()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }
}

impl PowerProfile for RidePowerProfile {
    fn max_duration_min(&self) -> usize {
        self.max_duration_min
    }

    fn values(&self) -> Option<&Array1<f64>> {
        self.data.as_ref()
    }

    fn normalized_values(&self) -> Option<&Array1<f64>> {
        self.data_norm.as_ref()
    }
}

/// Best-of-all-rides power profile over an optional date range.
///
/// Unlike a ride profile, the record may be refit: every call to
/// [`RecordPowerProfile::fit`] recomputes from scratch over the supplied
/// rides and replaces prior state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordPowerProfile {
    max_duration_min: usize,
    weight: Option<f64>,
    data: Option<Array1<f64>>,
    data_norm: Option<Array1<f64>>,
    date_range: Option<(NaiveDate, NaiveDate)>,
}

impl RecordPowerProfile {
    pub fn new(max_duration_min: usize, weight: Option<f64>) -> Result<Self, RppError> {
        validate_config(max_duration_min, weight)?;
        Ok(Self {
            max_duration_min,
            weight,
            data: None,
            data_norm: None,
            date_range: None,
        })
    }

    /// Aggregate fitted ride profiles into the record profile.
    ///
    /// Rides must all be fitted with the same maximum duration as this
    /// record. With a `date_range`, only rides dated within `[start, finish]`
    /// (inclusive) contribute; the range must be strictly ordered. Without
    /// one, the stored range is inferred as the min/max ride date.
    pub fn fit(
        &mut self,
        rides: &[RidePowerProfile],
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<&mut Self, RppError> {
        if rides.is_empty() {
            return Err(RppError::InsufficientData(
                "no ride profiles supplied".into(),
            ));
        }
        for ride in rides {
            if !ride.is_fitted() {
                return Err(RppError::InvalidArgument(
                    "every ride profile must be fitted before aggregation".into(),
                ));
            }
            if ride.max_duration_min() != self.max_duration_min {
                return Err(RppError::MissingConfiguration(format!(
                    "ride profile of {} min does not match the record configuration of {} min",
                    ride.max_duration_min(),
                    self.max_duration_min
                )));
            }
        }
        if let Some((start, finish)) = date_range {
            if start >= finish {
                return Err(RppError::InvalidArgument(
                    "date range must be strictly ordered as (start, finish)".into(),
                ));
            }
        }

        let selected: Vec<&RidePowerProfile> = match date_range {
            Some((start, finish)) => rides
                .iter()
                .filter(|r| r.date().map_or(false, |d| d >= start && d <= finish))
                .collect(),
            None => rides.iter().collect(),
        };
        if selected.is_empty() {
            return Err(RppError::InsufficientData(
                "no ride falls within the requested date range".into(),
            ));
        }

        let mut acc: Option<Array1<f64>> = None;
        for ride in &selected {
            let values = ride.values().ok_or_else(|| {
                RppError::InvalidArgument("ride profile lost its data".into())
            })?;
            acc = Some(match acc {
                Some(current) => merge(&current, values)?,
                None => values.clone(),
            });
        }
        let profile = acc.ok_or_else(|| {
            RppError::InsufficientData("no ride profile to aggregate".into())
        })?;

        let range = match date_range {
            Some(range) => range,
            None => {
                let mut dates = selected.iter().filter_map(|r| r.date());
                let first = dates.next().ok_or_else(|| {
                    RppError::InsufficientData("contributing rides carry no date".into())
                })?;
                dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)))
            }
        };

        self.data_norm = self.weight.map(|w| &profile / w);
        self.data = Some(profile);
        self.date_range = Some(range);
        Ok(self)
    }

    /// Rebuild a fitted record from persisted parts. The maximum duration is
    /// inferred from the value count.
    pub fn from_parts(
        values: Array1<f64>,
        weight: Option<f64>,
        date_range: (NaiveDate, NaiveDate),
    ) -> Result<Self, RppError> {
        let max_duration_min = infer_duration_min(values.len())?;
        validate_config(max_duration_min, weight)?;
        Ok(Self {
            max_duration_min,
            weight,
            data_norm: weight.map(|w| &values / w),
            data: Some(values),
            date_range: Some(date_range),
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.data.is_some()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_range
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }
}

impl PowerProfile for RecordPowerProfile {
    fn max_duration_min(&self) -> usize {
        self.max_duration_min
    }

    fn values(&self) -> Option<&Array1<f64>> {
        self.data.as_ref()
    }

    fn normalized_values(&self) -> Option<&Array1<f64>> {
        self.data_norm.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn constant_ride(value: f64, series_len: usize, max_duration_min: usize) -> RidePowerProfile {
        let mut ride = RidePowerProfile::new(max_duration_min, None).unwrap();
        let x = Array1::from_elem(series_len, value);
        ride.fit(&x, date(2014, 5, 7), false).unwrap();
        ride
    }

    #[test]
    fn merge_is_the_pointwise_maximum() {
        let a = Array1::from_vec(vec![5.0, 3.0]);
        let b = Array1::from_vec(vec![2.0, 7.0]);
        let merged = merge(&a, &b).unwrap();
        assert_eq!(merged, Array1::from_vec(vec![5.0, 7.0]));
    }

    #[test]
    fn merge_rejects_length_mismatch() {
        let a = Array1::from_vec(vec![5.0, 3.0]);
        let b = Array1::from_vec(vec![2.0]);
        assert!(matches!(merge(&a, &b), Err(RppError::InvalidArgument(_))));
    }

    #[test]
    fn ride_fit_stores_profile_and_date() {
        let ride = constant_ride(300.0, 90, 1);
        let values = ride.values().unwrap();
        assert_eq!(values.len(), 60);
        assert!((values[0] - 300.0).abs() < 1e-9);
        assert!((values[59] - 300.0).abs() < 1e-9);
        assert_eq!(ride.date(), Some(date(2014, 5, 7)));
    }

    #[test]
    fn ride_refit_raises() {
        let mut ride = constant_ride(300.0, 90, 1);
        let x = Array1::from_elem(90, 250.0);
        assert!(matches!(
            ride.fit(&x, date(2014, 5, 8), false),
            Err(RppError::AlreadyFitted)
        ));
    }

    #[test]
    fn ride_normalizes_against_its_weight() {
        let mut ride = RidePowerProfile::new(1, Some(60.0)).unwrap();
        let x = Array1::from_elem(90, 300.0);
        ride.fit(&x, date(2014, 5, 7), false).unwrap();
        let norm = ride.normalized_values().unwrap();
        assert!((norm[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn zero_duration_configuration_is_rejected() {
        assert!(matches!(
            RidePowerProfile::new(0, None),
            Err(RppError::MissingConfiguration(_))
        ));
        assert!(matches!(
            RecordPowerProfile::new(0, None),
            Err(RppError::MissingConfiguration(_))
        ));
    }

    #[test]
    fn resample_round_trips_the_native_grid() {
        let len = 120;
        let values: Array1<f64> = (0..len).map(|i| i as f64).collect();
        let ride = RidePowerProfile::from_parts(values.clone(), None, date(2014, 5, 7)).unwrap();
        let step = 2.0 / (len - 1) as f64;
        let ts: Vec<f64> = (0..len).map(|i| i as f64 * step).collect();
        let resampled = ride.resample(&ts, Interpolation::Linear, false).unwrap();
        for (got, want) in resampled.iter().zip(values.iter()) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn resample_interpolates_between_grid_points() {
        let values: Array1<f64> = (0..120).map(|i| i as f64 * 2.0).collect();
        let ride = RidePowerProfile::from_parts(values, None, date(2014, 5, 7)).unwrap();
        // Axis spans [0, 2] min over 120 points; 1 min sits between indices
        // 59 and 60, so linear interpolation lands on 119.0.
        let resampled = ride.resample(&[1.0], Interpolation::Linear, false).unwrap();
        assert!((resampled[0] - 119.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_resampling_snaps_to_grid_points() {
        let values: Array1<f64> = (0..120).map(|i| i as f64 * 2.0).collect();
        let ride = RidePowerProfile::from_parts(values, None, date(2014, 5, 7)).unwrap();
        let step = 2.0 / 119.0;
        // Just short of halfway between indices 10 and 11 snaps down.
        let t = step * 10.4;
        let resampled = ride.resample(&[t], Interpolation::Nearest, false).unwrap();
        assert!((resampled[0] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn resample_rejects_out_of_range_points() {
        let ride = constant_ride(300.0, 90, 1);
        assert!(matches!(
            ride.resample(&[1.5], Interpolation::Linear, false),
            Err(RppError::InvalidArgument(_))
        ));
        assert!(matches!(
            ride.resample(&[-0.1], Interpolation::Linear, false),
            Err(RppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn normalized_resample_without_weight_raises() {
        let ride = constant_ride(300.0, 90, 1);
        assert!(matches!(
            ride.resample(&[0.5], Interpolation::Linear, true),
            Err(RppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn record_is_the_pointwise_maximum_of_rides() {
        // Ride A: 200 W but only 90 s of data; ride B: 150 W for 120 s.
        let a = constant_ride(200.0, 90, 2);
        let b = constant_ride(150.0, 120, 2);
        let mut record = RecordPowerProfile::new(2, None).unwrap();
        record.fit(&[a, b], None).unwrap();
        let values = record.values().unwrap();
        assert!((values[0] - 200.0).abs() < 1e-9);
        assert!((values[88] - 200.0).abs() < 1e-9);
        // Beyond A's reach only B contributes; beyond both, the sentinel.
        assert!((values[89] - 150.0).abs() < 1e-9);
        assert!((values[118] - 150.0).abs() < 1e-9);
        assert_eq!(values[119], 0.0);
    }

    #[test]
    fn record_requires_matching_durations() {
        let a = constant_ride(200.0, 90, 1);
        let b = constant_ride(150.0, 120, 2);
        let mut record = RecordPowerProfile::new(1, None).unwrap();
        assert!(matches!(
            record.fit(&[a, b], None),
            Err(RppError::MissingConfiguration(_))
        ));
    }

    #[test]
    fn record_rejects_unfitted_rides() {
        let fitted = constant_ride(200.0, 90, 1);
        let unfitted = RidePowerProfile::new(1, None).unwrap();
        let mut record = RecordPowerProfile::new(1, None).unwrap();
        assert!(matches!(
            record.fit(&[fitted, unfitted], None),
            Err(RppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn record_rejects_unordered_date_range() {
        let a = constant_ride(200.0, 90, 1);
        let mut record = RecordPowerProfile::new(1, None).unwrap();
        let range = Some((date(2014, 6, 1), date(2014, 5, 1)));
        assert!(matches!(
            record.fit(&[a], range),
            Err(RppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn record_with_empty_date_filter_raises() {
        let a = constant_ride(200.0, 90, 1);
        let mut record = RecordPowerProfile::new(1, None).unwrap();
        let range = Some((date(2015, 1, 1), date(2015, 2, 1)));
        assert!(matches!(
            record.fit(&[a], range),
            Err(RppError::InsufficientData(_))
        ));
    }

    #[test]
    fn record_infers_its_date_range() {
        let mut early = RidePowerProfile::new(1, None).unwrap();
        early
            .fit(&Array1::from_elem(90, 180.0), date(2014, 5, 7), false)
            .unwrap();
        let mut late = RidePowerProfile::new(1, None).unwrap();
        late.fit(&Array1::from_elem(90, 220.0), date(2014, 7, 11), false)
            .unwrap();
        let mut record = RecordPowerProfile::new(1, None).unwrap();
        record.fit(&[late, early], None).unwrap();
        assert_eq!(
            record.date_range(),
            Some((date(2014, 5, 7), date(2014, 7, 11)))
        );
    }

    #[test]
    fn record_refit_replaces_prior_state() {
        let a = constant_ride(200.0, 90, 1);
        let b = constant_ride(260.0, 90, 1);
        let mut record = RecordPowerProfile::new(1, None).unwrap();
        record.fit(&[a.clone(), b], None).unwrap();
        assert!((record.values().unwrap()[0] - 260.0).abs() < 1e-9);
        record.fit(&[a], None).unwrap();
        assert!((record.values().unwrap()[0] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn record_normalizes_against_its_own_weight() {
        let a = constant_ride(200.0, 90, 1);
        let mut record = RecordPowerProfile::new(1, Some(50.0)).unwrap();
        record.fit(&[a], None).unwrap();
        let norm = record.normalized_values().unwrap();
        assert!((norm[0] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn from_parts_rejects_ragged_lengths() {
        let values = Array1::from_vec(vec![1.0; 61]);
        assert!(matches!(
            RidePowerProfile::from_parts(values, None, date(2014, 5, 7)),
            Err(RppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn interpolation_parses_known_methods_only() {
        assert_eq!("linear".parse::<Interpolation>().unwrap(), Interpolation::Linear);
        assert_eq!("nearest".parse::<Interpolation>().unwrap(), Interpolation::Nearest);
        assert!(matches!(
            "cubic".parse::<Interpolation>(),
            Err(RppError::UnsupportedOption(_))
        ));
    }
}
