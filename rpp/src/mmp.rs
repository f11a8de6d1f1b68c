//! Maximal-mean-power extraction.
//!
//! For one power series and one maximum duration, computes the best rolling
//! mean for every window length. A prefix-sum pass makes every window mean an
//! O(1) lookup, so each duration costs O(n); durations are independent of one
//! another and can be evaluated in parallel, each writing its own output slot.

use ndarray::Array1;
use rayon::prelude::*;

use crate::RppError;

/// Best mean over all contiguous windows of `duration` samples.
///
/// `prefix` holds the cumulative sums with a leading zero. Durations the
/// series cannot cover yield the zero sentinel.
fn best_window_mean(prefix: &[f64], duration: usize) -> f64 {
    let n = prefix.len() - 1;
    if duration == 0 || duration >= n {
        return 0.0;
    }
    let mut best = f64::NEG_INFINITY;
    for start in 0..=n - duration {
        let sum = prefix[start + duration] - prefix[start];
        if sum > best {
            best = sum;
        }
    }
    best / duration as f64
}

/// Compute the maximal-mean-power profile of `x` for every duration from one
/// second up to `max_duration_s`.
///
/// `profile[d - 1]` holds the best average power over any window of `d`
/// seconds. Durations not observable for this series (`d >= x.len()`) are
/// zero; the sentinel also means downstream consumers must not assume the
/// profile is monotonically non-increasing.
pub fn max_mean_power(
    x: &Array1<f64>,
    max_duration_s: usize,
    parallel: bool,
) -> Result<Array1<f64>, RppError> {
    if max_duration_s == 0 {
        return Err(RppError::InvalidArgument(
            "maximum duration must be strictly positive".into(),
        ));
    }
    if x.is_empty() {
        return Ok(Array1::zeros(max_duration_s));
    }

    let mut prefix = Vec::with_capacity(x.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &v in x.iter() {
        acc += v;
        prefix.push(acc);
    }

    let values: Vec<f64> = if parallel {
        (1..=max_duration_s)
            .into_par_iter()
            .map(|d| best_window_mean(&prefix, d))
            .collect()
    } else {
        (1..=max_duration_s)
            .map(|d| best_window_mean(&prefix, d))
            .collect()
    };
    Ok(Array1::from_vec(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random_series(len: usize) -> Array1<f64> {
        // Deterministic LCG.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            out.push(100.0 + (state >> 33) as f64 % 400.0);
        }
        Array1::from_vec(out)
    }

    #[test]
    fn zero_duration_is_rejected() {
        let x = Array1::from_vec(vec![200.0, 210.0]);
        assert!(matches!(
            max_mean_power(&x, 0, false),
            Err(RppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_series_yields_all_zeros() {
        let x = Array1::from_vec(Vec::new());
        let profile = max_mean_power(&x, 5, false).unwrap();
        assert_eq!(profile.len(), 5);
        assert!(profile.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn durations_beyond_series_length_are_zero() {
        let x = Array1::from_vec(vec![100.0, 200.0, 300.0, 400.0, 500.0]);
        let profile = max_mean_power(&x, 8, false).unwrap();
        // d = 4 is the longest observable window (d >= n hits the sentinel).
        assert!((profile[3] - 350.0).abs() < 1e-9);
        for d in 5..=8 {
            assert_eq!(profile[d - 1], 0.0, "duration {} should be sentinel", d);
        }
    }

    #[test]
    fn constant_series_reproduces_its_value() {
        let x = Array1::from_elem(100, 213.0);
        let profile = max_mean_power(&x, 100, false).unwrap();
        for d in 1..100 {
            assert!(
                (profile[d - 1] - 213.0).abs() < 1e-9,
                "duration {} drifted: {}",
                d,
                profile[d - 1]
            );
        }
        assert_eq!(profile[99], 0.0);
    }

    #[test]
    fn peak_plateau_dominates_its_duration() {
        let mut values = vec![100.0; 60];
        for v in values.iter_mut().skip(20).take(10) {
            *v = 300.0;
        }
        let x = Array1::from_vec(values);
        let profile = max_mean_power(&x, 30, false).unwrap();
        assert!((profile[0] - 300.0).abs() < 1e-9);
        assert!((profile[9] - 300.0).abs() < 1e-9);
        // A 20 s window can cover at most the 10 s plateau plus 10 s of base.
        assert!((profile[19] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_and_serial_paths_agree() {
        let x = pseudo_random_series(500);
        let serial = max_mean_power(&x, 600, false).unwrap();
        let parallel = max_mean_power(&x, 600, true).unwrap();
        for (s, p) in serial.iter().zip(parallel.iter()) {
            assert_eq!(s, p);
        }
    }
}
