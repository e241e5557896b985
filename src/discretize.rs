//! Ratio-range discretizer.
//!
//! Turns a positive scalar series (rates, prices) into ordinal classes: each
//! step is the ratio `series[i + 1] / series[i]`, and a monotone threshold
//! table maps ratios to class indices. With `k` thresholds there are `k + 1`
//! classes; a ratio equal to a threshold belongs to the lower class.

use crate::{Error, Result};

fn ratios(series: &[f64]) -> Result<Vec<f64>> {
    if let Some(v) = series.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        return Err(Error::InvalidData(format!(
            "series values must be finite and > 0, got {v}"
        )));
    }
    Ok(series.windows(2).map(|w| w[1] / w[0]).collect())
}

/// Class index of `value`: the first threshold with `value <= threshold`,
/// or `ranges.len()` if `value` is above all of them.
pub fn detect_class(ranges: &[f64], value: f64) -> Result<usize> {
    if !(value >= 0.0) {
        return Err(Error::InvalidData(format!(
            "value must be >= 0, got {value}"
        )));
    }
    if ranges.is_empty() {
        return Err(Error::InvalidConfig(
            "threshold table must not be empty".to_owned(),
        ));
    }
    Ok(ranges
        .iter()
        .position(|&t| value <= t)
        .unwrap_or(ranges.len()))
}

/// Class of every consecutive ratio in `series` (one fewer than the series length).
pub fn calculate_classes(series: &[f64], ranges: &[f64]) -> Result<Vec<usize>> {
    if series.len() < 2 {
        return Err(Error::InvalidData(
            "series needs at least two values".to_owned(),
        ));
    }
    ratios(series)?
        .into_iter()
        .map(|r| detect_class(ranges, r))
        .collect()
}

/// `count - 1` thresholds splitting the sorted ratios of `series` into
/// `count` groups of roughly equal ratio mass.
///
/// Each threshold sits halfway between the ratio at which the running sum
/// first exceeds `i * total / count` and the ratio before it.
pub fn calculate_ranges(series: &[f64], count: usize) -> Result<Vec<f64>> {
    if count < 2 {
        return Err(Error::InvalidConfig(format!(
            "range count must be >= 2, got {count}"
        )));
    }
    if series.len() <= count {
        return Err(Error::InvalidData(format!(
            "series of {} values is too short for {count} ranges",
            series.len()
        )));
    }
    let mut sorted = ratios(series)?;
    sorted.sort_by(f64::total_cmp);
    let total: f64 = sorted.iter().sum();
    let step = total / count as f64;

    let mut ranges = Vec::with_capacity(count - 1);
    for i in 1..count {
        let level = step * i as f64;
        let mut sum = 0.0;
        let mut prev = 0.0;
        let mut threshold = sorted[sorted.len() - 1];
        for &r in &sorted {
            sum += r;
            if sum > level {
                threshold = 0.5 * (r + prev);
                break;
            }
            prev = r;
        }
        ranges.push(threshold);
    }

    if ranges.len() > 1 && ranges.windows(2).all(|w| w[0] == w[1]) {
        return Err(Error::InvalidData(
            "series ratios are too uniform to separate into ranges".to_owned(),
        ));
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_value_falls_into_lower_class() {
        let ranges = [0.99, 1.0, 1.01];
        assert_eq!(detect_class(&ranges, 1.0).unwrap(), 1);
        assert_eq!(detect_class(&ranges, 0.5).unwrap(), 0);
        assert_eq!(detect_class(&ranges, 1.005).unwrap(), 2);
        assert_eq!(detect_class(&ranges, 2.0).unwrap(), 3);
    }

    #[test]
    fn detect_class_rejects_bad_input() {
        assert!(detect_class(&[1.0], -0.1).is_err());
        assert!(detect_class(&[1.0], f64::NAN).is_err());
        assert!(detect_class(&[], 1.0).is_err());
    }

    #[test]
    fn classes_follow_ratios() {
        let series = [1.0, 2.0, 1.0, 1.0];
        let classes = calculate_classes(&series, &[0.9, 1.1]).unwrap();
        assert_eq!(classes, vec![2, 0, 1]);
        assert!(calculate_classes(&[1.0], &[1.0]).is_err());
        assert!(calculate_classes(&[1.0, 0.0], &[1.0]).is_err());
    }

    #[test]
    fn ranges_split_ratio_mass() {
        // ratios 0.5, 2.0, 1.0, 1.0, 1.5 sorted: 0.5 1.0 1.0 1.5 2.0, total 6
        let series = [2.0, 1.0, 2.0, 2.0, 2.0, 3.0];
        let ranges = calculate_ranges(&series, 3).unwrap();
        // level 2: 0.5, 1.5, 2.5 > 2 at the second 1.0
        // level 4: 2.5, 4.0, 6.0 > 4 at 2.0
        assert_eq!(ranges, vec![1.0, 1.75]);
        let classes = calculate_classes(&series, &ranges).unwrap();
        assert!(classes.iter().all(|&c| c <= 2));
    }

    #[test]
    fn ranges_validate_arguments() {
        let series = [1.0, 1.1, 1.2, 1.3];
        assert!(calculate_ranges(&series, 1).is_err());
        assert!(calculate_ranges(&series, 4).is_err());
        assert!(calculate_ranges(&[1.0; 10], 4).is_err());
    }
}
