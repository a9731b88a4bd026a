use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PortfolioError;
use crate::PortfolioResult;

/// Notional values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates and returns expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Portfolio weights as fractions of NAV.
pub type Weight = Decimal;

/// Instrument identifier (ticker).
pub type InstrumentId = String;

/// A scalar per instrument, keyed by identifier.
pub type InstrumentMap = BTreeMap<InstrumentId, Decimal>;

/// A value attached to one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentValue {
    pub instrument: InstrumentId,
    pub value: Decimal,
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}

/// Instrument × factor table of exposures. `values[i][f]` is the loading of
/// `instruments[i]` on `factors[f]`; `None` marks a missing observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorTable {
    pub instruments: Vec<InstrumentId>,
    pub factors: Vec<String>,
    pub values: Vec<Vec<Option<Decimal>>>,
}

impl FactorTable {
    pub fn factor_index(&self, factor: &str) -> Option<usize> {
        self.factors.iter().position(|f| f == factor)
    }

    pub fn instrument_index(&self, instrument: &str) -> Option<usize> {
        self.instruments.iter().position(|i| i == instrument)
    }

    /// Column for one factor, aligned to `instruments`.
    pub fn column(&self, factor: &str) -> Option<Vec<Option<Decimal>>> {
        let f = self.factor_index(factor)?;
        Some(
            self.values
                .iter()
                .map(|row| row.get(f).copied().flatten())
                .collect(),
        )
    }

    /// Check that every row has one cell per factor and that instrument and
    /// factor labels are unique.
    pub fn validate(&self) -> PortfolioResult<()> {
        if self.values.len() != self.instruments.len() {
            return Err(PortfolioError::DimensionMismatch {
                field: "factor_table.values".into(),
                expected: self.instruments.len(),
                actual: self.values.len(),
            });
        }
        for (i, row) in self.values.iter().enumerate() {
            if row.len() != self.factors.len() {
                return Err(PortfolioError::DimensionMismatch {
                    field: format!("factor_table.values[{}]", i),
                    expected: self.factors.len(),
                    actual: row.len(),
                });
            }
        }
        for (label, names) in [("instruments", &self.instruments), ("factors", &self.factors)] {
            let mut sorted: Vec<&String> = names.iter().collect();
            sorted.sort();
            if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
                return Err(PortfolioError::InvalidInput {
                    field: format!("factor_table.{}", label),
                    reason: format!("Duplicate label '{}'", pair[0]),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, instrument: &str, factor: &str) -> Option<Decimal> {
        let i = self.instrument_index(instrument)?;
        let f = self.factor_index(factor)?;
        self.values.get(i)?.get(f).copied().flatten()
    }
}
