use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::linalg::sqrt_decimal;

/// Added to the standard deviation so a constant series maps to zeros
/// instead of dividing by zero.
pub const STANDARDIZE_EPSILON: Decimal = dec!(0.000000001);

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Cross-sectional z-score: `(x - mean) / (std + 1e-9)`.
///
/// Mean and standard deviation are population moments (denominator N)
/// computed over the observed entries only. Missing entries stay missing;
/// callers fill them beforehand according to each factor's policy.
pub fn standardize(series: &[Option<Decimal>]) -> Vec<Option<Decimal>> {
    let observed: Vec<Decimal> = series.iter().flatten().copied().collect();
    let Some((mean, std)) = population_moments(&observed) else {
        return vec![None; series.len()];
    };
    let denom = std + STANDARDIZE_EPSILON;
    series
        .iter()
        .map(|v| v.map(|x| (x - mean) / denom))
        .collect()
}

/// `standardize` for a fully observed series.
pub fn standardize_dense(series: &[Decimal]) -> Vec<Decimal> {
    let Some((mean, std)) = population_moments(series) else {
        return Vec::new();
    };
    let denom = std + STANDARDIZE_EPSILON;
    series.iter().map(|x| (*x - mean) / denom).collect()
}

/// Z-score with the sample standard deviation (denominator N-1) plus 1e-9.
///
/// Used where a score is rescaled for a mapping rather than for the factor
/// table. Fewer than two values map to zero.
pub fn standardize_sample(series: &[Decimal]) -> Vec<Decimal> {
    if series.len() < 2 {
        return vec![Decimal::ZERO; series.len()];
    }
    let n = Decimal::from(series.len() as i64);
    let mean = series.iter().sum::<Decimal>() / n;
    let ss: Decimal = series.iter().map(|x| (*x - mean) * (*x - mean)).sum();
    let denom = sqrt_decimal(ss / (n - Decimal::ONE)) + STANDARDIZE_EPSILON;
    series.iter().map(|x| (*x - mean) / denom).collect()
}

/// Median of the observed values; `None` for an empty slice.
pub fn median(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / dec!(2))
    } else {
        Some(sorted[mid])
    }
}

/// Replace missing entries with a constant.
pub fn fill_missing(series: &[Option<Decimal>], fill: Decimal) -> Vec<Decimal> {
    series.iter().map(|v| v.unwrap_or(fill)).collect()
}

/// Replace missing entries with the median of the observed ones. A series
/// with no observations is filled with zero.
pub fn fill_with_median(series: &[Option<Decimal>]) -> Vec<Decimal> {
    let observed: Vec<Decimal> = series.iter().flatten().copied().collect();
    fill_missing(series, median(&observed).unwrap_or(Decimal::ZERO))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Population mean and standard deviation.
pub(crate) fn population_moments(values: &[Decimal]) -> Option<(Decimal, Decimal)> {
    if values.is_empty() {
        return None;
    }
    let n = Decimal::from(values.len() as i64);
    let mean = values.iter().sum::<Decimal>() / n;
    let variance = values.iter().map(|x| (*x - mean) * (*x - mean)).sum::<Decimal>() / n;
    Some((mean, sqrt_decimal(variance)))
}
