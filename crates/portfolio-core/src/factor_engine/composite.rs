use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::standardize::{standardize_dense, standardize_sample};
use super::style_factors::StyleFactor;
use crate::types::{FactorTable, InstrumentMap, InstrumentValue, Rate};
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Blended, re-standardized composite score per instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSignal {
    /// Scores in factor-table instrument order
    pub scores: Vec<InstrumentValue>,
    /// Weight-map entries that matched no factor column
    pub ignored_factors: Vec<String>,
}

impl CompositeSignal {
    pub fn to_map(&self) -> InstrumentMap {
        self.scores
            .iter()
            .map(|s| (s.instrument.clone(), s.value))
            .collect()
    }
}

/// Linear map from a composite z-score to an annualized expected return,
/// clipped to a plausible band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnMapping {
    /// Expected return of an average-signal name (default 5%)
    pub base_return: Rate,
    /// Expected return per unit of z-score (default 10%)
    pub return_per_sigma: Rate,
    /// Lower clip (default -5%)
    pub floor: Rate,
    /// Upper clip (default 25%)
    pub cap: Rate,
}

impl Default for ReturnMapping {
    fn default() -> Self {
        ReturnMapping {
            base_return: dec!(0.05),
            return_per_sigma: dec!(0.10),
            floor: dec!(-0.05),
            cap: dec!(0.25),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Default blend: momentum 35%, value 25%, quality 20%, size 10%, low-vol 10%.
pub fn default_factor_weights() -> BTreeMap<String, Decimal> {
    [
        (StyleFactor::Momentum, dec!(0.35)),
        (StyleFactor::Value, dec!(0.25)),
        (StyleFactor::Quality, dec!(0.20)),
        (StyleFactor::Size, dec!(0.10)),
        (StyleFactor::LowVol, dec!(0.10)),
    ]
    .iter()
    .map(|(f, w)| (f.name().to_string(), *w))
    .collect()
}

/// Weighted sum of factor columns, re-standardized so the composite is on a
/// comparable scale regardless of the number or magnitude of weights.
///
/// Factors absent from `weights` weigh zero; missing cells contribute zero.
pub fn blend_signal(
    factors: &FactorTable,
    weights: &BTreeMap<String, Decimal>,
) -> PortfolioResult<CompositeSignal> {
    factors.validate()?;

    let factor_weights: Vec<Decimal> = factors
        .factors
        .iter()
        .map(|f| weights.get(f).copied().unwrap_or(Decimal::ZERO))
        .collect();
    let ignored_factors: Vec<String> = weights
        .keys()
        .filter(|k| factors.factor_index(k).is_none())
        .cloned()
        .collect();

    let raw: Vec<Decimal> = factors
        .values
        .iter()
        .map(|row| {
            row.iter()
                .zip(factor_weights.iter())
                .map(|(v, w)| v.map(|x| x * *w).unwrap_or(Decimal::ZERO))
                .sum()
        })
        .collect();
    let z = standardize_dense(&raw);

    let scores = factors
        .instruments
        .iter()
        .zip(z)
        .map(|(id, value)| InstrumentValue {
            instrument: id.clone(),
            value,
        })
        .collect();

    Ok(CompositeSignal {
        scores,
        ignored_factors,
    })
}

/// Map a composite signal to expected returns:
/// `clip(base + per_sigma * zscore(signal), floor, cap)`, where the z-score
/// uses the sample standard deviation.
pub fn signal_to_expected_returns(signal: &InstrumentMap, mapping: &ReturnMapping) -> InstrumentMap {
    let ids: Vec<&String> = signal.keys().collect();
    let values: Vec<Decimal> = signal.values().copied().collect();
    let z = standardize_sample(&values);
    ids.into_iter()
        .zip(z)
        .map(|(id, zi)| {
            let mu = mapping.base_return + mapping.return_per_sigma * zi;
            (id.clone(), mu.max(mapping.floor).min(mapping.cap))
        })
        .collect()
}
