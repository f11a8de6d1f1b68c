//! Rider-level aggregation and persistence.
//!
//! A [`Rider`] owns the ride profiles collected from activities and the
//! record profile computed from them. Persistence uses one CSV table with a
//! duration row per second and a column per ride date, which together with
//! the rider weight is enough to rebuild the whole aggregate.

use std::path::Path;
use std::{fs, io};

use chrono::NaiveDate;
use ndarray::Array1;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::io::read_power_series;
use crate::profile::{PowerProfile, RecordPowerProfile, RidePowerProfile};
use crate::RppError;

pub struct Rider {
    max_duration_min: usize,
    weight: Option<f64>,
    rides: Vec<RidePowerProfile>,
    record: RecordPowerProfile,
}

impl Rider {
    /// Create a rider with no rides yet.
    pub fn new(max_duration_min: usize, weight: Option<f64>) -> Result<Self, RppError> {
        Ok(Self {
            max_duration_min,
            weight,
            rides: Vec::new(),
            record: RecordPowerProfile::new(max_duration_min, weight)?,
        })
    }

    /// Create a rider from already-fitted ride profiles.
    ///
    /// Every ride must be fitted and share this rider's maximum duration.
    pub fn with_rides(
        max_duration_min: usize,
        weight: Option<f64>,
        rides: Vec<RidePowerProfile>,
    ) -> Result<Self, RppError> {
        let mut rider = Self::new(max_duration_min, weight)?;
        for ride in &rides {
            if !ride.is_fitted() {
                return Err(RppError::InvalidArgument(
                    "every ride profile must be fitted".into(),
                ));
            }
            if ride.max_duration_min() != max_duration_min {
                return Err(RppError::MissingConfiguration(format!(
                    "ride profile of {} min does not match the rider configuration of {} min",
                    ride.max_duration_min(),
                    max_duration_min
                )));
            }
        }
        rider.rides = rides;
        Ok(rider)
    }

    pub fn rides(&self) -> &[RidePowerProfile] {
        &self.rides
    }

    pub fn record(&self) -> &RecordPowerProfile {
        &self.record
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    pub fn max_duration_min(&self) -> usize {
        self.max_duration_min
    }

    /// Fit one FIT activity and append it to the ride list.
    pub fn add_ride_from_fit(&mut self, path: &Path) -> Result<(), RppError> {
        let series = read_power_series(path)?;
        let mut ride = RidePowerProfile::new(self.max_duration_min, self.weight)?;
        ride.fit(&series.power, series.date, true)?;
        self.rides.push(ride);
        Ok(())
    }

    /// Fit every `.fit` file under `dir` in parallel and return how many were
    /// added. `overwrite` replaces the current ride list instead of extending
    /// it.
    pub fn add_rides_from_dir(&mut self, dir: &Path, overwrite: bool) -> Result<usize, RppError> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("fit"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let max_duration_min = self.max_duration_min;
        let weight = self.weight;
        let fitted = paths
            .par_iter()
            .map(|path| -> Result<RidePowerProfile, RppError> {
                info!("processing {}", path.display());
                let series = read_power_series(path)?;
                let mut ride = RidePowerProfile::new(max_duration_min, weight)?;
                ride.fit(&series.power, series.date, false)?;
                Ok(ride)
            })
            .collect::<Result<Vec<_>, RppError>>()?;

        let count = fitted.len();
        if overwrite {
            self.rides = fitted;
        } else {
            self.rides.extend(fitted);
        }
        Ok(count)
    }

    /// Remove the rides recorded on `date`. A date with no match only warns.
    pub fn delete_ride(&mut self, date: NaiveDate) {
        let before = self.rides.len();
        self.rides.retain(|ride| ride.date() != Some(date));
        if self.rides.len() == before {
            warn!("no ride removed: no profile dated {}", date);
        }
    }

    /// Recompute the record profile, optionally restricted to a date range.
    pub fn compute_record(
        &mut self,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<&RecordPowerProfile, RppError> {
        self.record.fit(&self.rides, date_range)?;
        Ok(&self.record)
    }

    /// Write all ride profiles as one table: a duration row per second, a
    /// column per ride date.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), RppError> {
        if self.rides.is_empty() {
            return Err(RppError::InsufficientData(
                "no ride profiles to save".into(),
            ));
        }
        let mut writer = csv::Writer::from_writer(writer);
        let mut header = vec!["duration_s".to_string()];
        for ride in &self.rides {
            header.push(ride.date().map(|d| d.to_string()).unwrap_or_default());
        }
        writer.write_record(&header)?;

        let rows = 60 * self.max_duration_min;
        for idx in 0..rows {
            let mut row = Vec::with_capacity(self.rides.len() + 1);
            row.push((idx + 1).to_string());
            for ride in &self.rides {
                let value = ride.values().map_or(0.0, |v| v[idx]);
                row.push(format!("{:.6}", value));
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the profile table to a file. See [`Rider::write_csv`].
    pub fn save_csv(&self, path: &Path) -> Result<(), RppError> {
        self.write_csv(fs::File::create(path)?)
    }

    /// Rebuild a rider from a profile table written by [`Rider::save_csv`].
    ///
    /// The maximum duration is inferred from the row count; the weight is
    /// not part of the table and must be supplied again.
    pub fn load_csv(path: &Path, weight: Option<f64>) -> Result<Self, RppError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.len() < 2 {
            return Err(RppError::InvalidArgument(
                "profile table carries no ride columns".into(),
            ));
        }
        let mut dates = Vec::with_capacity(headers.len() - 1);
        for raw in headers.iter().skip(1) {
            let date = raw.parse::<NaiveDate>().map_err(|_| {
                RppError::InvalidArgument(format!("invalid ride date '{}' in header", raw))
            })?;
            dates.push(date);
        }

        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); dates.len()];
        for result in reader.records() {
            let record = result?;
            if record.len() != dates.len() + 1 {
                return Err(RppError::InvalidArgument(
                    "profile table row width does not match its header".into(),
                ));
            }
            for (column, cell) in columns.iter_mut().zip(record.iter().skip(1)) {
                let value = cell.parse::<f64>().map_err(|_| {
                    RppError::InvalidArgument(format!("invalid power value '{}'", cell))
                })?;
                column.push(value);
            }
        }

        let rows = columns.first().map_or(0, Vec::len);
        if rows == 0 || rows % 60 != 0 {
            return Err(RppError::InvalidArgument(
                "profile table length is not a whole number of minutes".into(),
            ));
        }
        let mut rider = Rider::new(rows / 60, weight)?;
        for (date, column) in dates.into_iter().zip(columns) {
            let ride = RidePowerProfile::from_parts(Array1::from_vec(column), weight, date)?;
            rider.rides.push(ride);
        }
        Ok(rider)
    }
}
