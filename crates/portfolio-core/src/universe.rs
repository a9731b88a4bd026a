use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::PortfolioError;
use crate::types::{InstrumentId, InstrumentMap};
use crate::PortfolioResult;

const SYMMETRY_TOLERANCE: Decimal = dec!(0.0000001);

// ---------------------------------------------------------------------------
// Universe
// ---------------------------------------------------------------------------

/// Ordered, duplicate-free set of instruments defining the index space of a
/// single run. Every dense vector handed to the solver is aligned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    instruments: Vec<InstrumentId>,
}

impl Universe {
    pub fn new(instruments: Vec<InstrumentId>) -> PortfolioResult<Self> {
        if instruments.is_empty() {
            return Err(PortfolioError::InsufficientData(
                "Universe must contain at least one instrument".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(instruments.len());
        for id in &instruments {
            if id.trim().is_empty() {
                return Err(PortfolioError::InvalidInput {
                    field: "universe".into(),
                    reason: "Instrument identifiers must be non-empty".into(),
                });
            }
            if !seen.insert(id.as_str()) {
                return Err(PortfolioError::InvalidInput {
                    field: "universe".into(),
                    reason: format!("Duplicate instrument '{}'", id),
                });
            }
        }
        Ok(Universe { instruments })
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn instruments(&self) -> &[InstrumentId] {
        &self.instruments
    }

    pub fn index_of(&self, instrument: &str) -> Option<usize> {
        self.instruments.iter().position(|id| id == instrument)
    }

    /// Align a keyed vector that must cover the universe exactly.
    pub fn align_dense(&self, field: &str, values: &InstrumentMap) -> PortfolioResult<Vec<Decimal>> {
        self.reject_unknown(field, values.keys())?;
        self.instruments
            .iter()
            .map(|id| {
                values
                    .get(id)
                    .copied()
                    .ok_or_else(|| PortfolioError::InvalidInput {
                        field: field.into(),
                        reason: format!("Missing value for instrument '{}'", id),
                    })
            })
            .collect()
    }

    /// Align a sparse weight vector: absent instruments weigh zero, but keys
    /// outside the universe are rejected.
    pub fn align_sparse(&self, field: &str, values: &InstrumentMap) -> PortfolioResult<Vec<Decimal>> {
        self.reject_unknown(field, values.keys())?;
        Ok(self
            .instruments
            .iter()
            .map(|id| values.get(id).copied().unwrap_or(Decimal::ZERO))
            .collect())
    }

    /// Align a label mapping (e.g. sectors) that must cover the universe exactly.
    pub fn align_labels(
        &self,
        field: &str,
        labels: &BTreeMap<InstrumentId, String>,
    ) -> PortfolioResult<Vec<String>> {
        self.reject_unknown(field, labels.keys())?;
        self.instruments
            .iter()
            .map(|id| {
                labels
                    .get(id)
                    .cloned()
                    .ok_or_else(|| PortfolioError::InvalidInput {
                        field: field.into(),
                        reason: format!("Missing label for instrument '{}'", id),
                    })
            })
            .collect()
    }

    fn reject_unknown<'a>(
        &self,
        field: &str,
        keys: impl Iterator<Item = &'a InstrumentId>,
    ) -> PortfolioResult<()> {
        for key in keys {
            if self.index_of(key).is_none() {
                return Err(PortfolioError::InvalidInput {
                    field: field.into(),
                    reason: format!("Instrument '{}' is not part of the universe", key),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Covariance matrix
// ---------------------------------------------------------------------------

/// Square covariance matrix labelled by instrument. Row/column `i` belongs to
/// `instruments[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    pub instruments: Vec<InstrumentId>,
    pub values: Vec<Vec<Decimal>>,
}

impl CovarianceMatrix {
    pub fn dim(&self) -> usize {
        self.instruments.len()
    }

    /// Check shape, symmetry and non-negative variances, returning the
    /// universe the matrix is indexed by.
    #[allow(clippy::needless_range_loop)]
    pub fn validate(&self) -> PortfolioResult<Universe> {
        let universe = Universe::new(self.instruments.clone())?;
        let n = universe.len();
        if self.values.len() != n {
            return Err(PortfolioError::DimensionMismatch {
                field: "covariance.values".into(),
                expected: n,
                actual: self.values.len(),
            });
        }
        for (i, row) in self.values.iter().enumerate() {
            if row.len() != n {
                return Err(PortfolioError::DimensionMismatch {
                    field: format!("covariance.values[{}]", i),
                    expected: n,
                    actual: row.len(),
                });
            }
        }
        for i in 0..n {
            if self.values[i][i] < Decimal::ZERO {
                return Err(PortfolioError::InvalidInput {
                    field: "covariance.values".into(),
                    reason: format!(
                        "Negative variance {} for '{}'",
                        self.values[i][i], self.instruments[i]
                    ),
                });
            }
            for j in (i + 1)..n {
                if (self.values[i][j] - self.values[j][i]).abs() > SYMMETRY_TOLERANCE {
                    return Err(PortfolioError::InvalidInput {
                        field: "covariance.values".into(),
                        reason: format!(
                            "Not symmetric: [{},{}]={} != [{},{}]={}",
                            i, j, self.values[i][j], j, i, self.values[j][i]
                        ),
                    });
                }
            }
        }
        Ok(universe)
    }

    /// Diagonal entries.
    pub fn variances(&self) -> Vec<Decimal> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, row)| row.get(i).copied().unwrap_or(Decimal::ZERO))
            .collect()
    }
}
