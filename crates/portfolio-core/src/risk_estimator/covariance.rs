use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::types::InstrumentId;
use crate::universe::{CovarianceMatrix, Universe};
use crate::PortfolioResult;

/// Default weight on the scaled-identity target.
pub const DEFAULT_SHRINK_INTENSITY: Decimal = dec!(0.1);

/// Minimum number of periods for a sample covariance.
const MIN_PERIODS: usize = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Periodic (typically daily) returns: one row per period, one column per
/// instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnHistory {
    pub instruments: Vec<InstrumentId>,
    pub returns: Vec<Vec<Decimal>>,
    /// Optional period end dates, strictly increasing, one per row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dates: Option<Vec<NaiveDate>>,
}

impl ReturnHistory {
    pub fn periods(&self) -> usize {
        self.returns.len()
    }

    /// Validate shape and return the universe of the columns.
    pub fn validate(&self) -> PortfolioResult<Universe> {
        let universe = Universe::new(self.instruments.clone())?;
        if self.returns.len() < MIN_PERIODS {
            return Err(PortfolioError::InsufficientData(format!(
                "At least {} return periods required for covariance estimation, got {}",
                MIN_PERIODS,
                self.returns.len()
            )));
        }
        for (t, row) in self.returns.iter().enumerate() {
            if row.len() != universe.len() {
                return Err(PortfolioError::DimensionMismatch {
                    field: format!("returns[{}]", t),
                    expected: universe.len(),
                    actual: row.len(),
                });
            }
        }
        if let Some(ref dates) = self.dates {
            if dates.len() != self.returns.len() {
                return Err(PortfolioError::DimensionMismatch {
                    field: "dates".into(),
                    expected: self.returns.len(),
                    actual: dates.len(),
                });
            }
            if let Some(pair) = dates.windows(2).find(|w| w[1] <= w[0]) {
                return Err(PortfolioError::InvalidInput {
                    field: "dates".into(),
                    reason: format!("Dates must be strictly increasing ({} then {})", pair[0], pair[1]),
                });
            }
        }
        Ok(universe)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Shrinkage covariance: `(1 - d) * S + d * avg_var * I`.
///
/// `S` is the sample covariance (denominator T-1) and `avg_var` its mean
/// diagonal. Diagonal loading keeps the estimate well conditioned when the
/// history is short relative to the number of instruments.
pub fn shrink_cov(
    history: &ReturnHistory,
    shrink_intensity: Decimal,
) -> PortfolioResult<CovarianceMatrix> {
    if shrink_intensity < Decimal::ZERO || shrink_intensity > Decimal::ONE {
        return Err(PortfolioError::InvalidInput {
            field: "shrink_intensity".into(),
            reason: format!("Must lie in [0, 1], got {}", shrink_intensity),
        });
    }
    let sample = sample_covariance(history)?;
    let n = sample.dim();
    let avg_var = average_variance(&sample);
    let keep = Decimal::ONE - shrink_intensity;

    let values = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let target = if i == j { avg_var } else { Decimal::ZERO };
                    keep * sample.values[i][j] + shrink_intensity * target
                })
                .collect()
        })
        .collect();

    Ok(CovarianceMatrix {
        instruments: sample.instruments,
        values,
    })
}

/// Unbiased sample covariance of the return history.
#[allow(clippy::needless_range_loop)]
pub fn sample_covariance(history: &ReturnHistory) -> PortfolioResult<CovarianceMatrix> {
    let universe = history.validate()?;
    let n = universe.len();
    let t = history.periods();
    let t_dec = Decimal::from(t as i64);

    let means: Vec<Decimal> = (0..n)
        .map(|j| history.returns.iter().map(|row| row[j]).sum::<Decimal>() / t_dec)
        .collect();

    let denom = Decimal::from((t - 1) as i64);
    let mut values = vec![vec![Decimal::ZERO; n]; n];
    for i in 0..n {
        for j in i..n {
            let s: Decimal = history
                .returns
                .iter()
                .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                .sum();
            let c = s / denom;
            values[i][j] = c;
            values[j][i] = c;
        }
    }

    Ok(CovarianceMatrix {
        instruments: history.instruments.clone(),
        values,
    })
}

/// trace(S) / N
pub(crate) fn average_variance(cov: &CovarianceMatrix) -> Decimal {
    let variances = cov.variances();
    if variances.is_empty() {
        return Decimal::ZERO;
    }
    let trace: Decimal = variances.iter().sum();
    trace / Decimal::from(variances.len() as i64)
}
