use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::linalg::sqrt_decimal;
use crate::types::{InstrumentMap, Rate};

/// Half-spread charged per unit of weight traded when none is supplied (5bp).
pub const DEFAULT_SPREAD: Rate = dec!(0.0005);

/// Square-root impact coefficient when none is supplied (15bp).
pub const DEFAULT_IMPACT: Rate = dec!(0.0015);

/// Estimated cost of a rebalance as a fraction of NAV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCostEstimate {
    pub spread_cost: Rate,
    pub impact_cost: Rate,
    pub total: Rate,
}

/// Linear spread plus square-root market impact:
/// `sum |dw| * spread + sqrt(|dw|) * impact`.
///
/// Covers every instrument held before or after the trade; names being
/// exited completely count with their full previous weight.
pub fn estimate_transaction_cost(
    target: &InstrumentMap,
    previous: &InstrumentMap,
    spreads: &InstrumentMap,
    impacts: &InstrumentMap,
) -> TransactionCostEstimate {
    let names: BTreeSet<&String> = target.keys().chain(previous.keys()).collect();

    let mut spread_cost = Decimal::ZERO;
    let mut impact_cost = Decimal::ZERO;
    for name in names {
        let new = target.get(name).copied().unwrap_or(Decimal::ZERO);
        let old = previous.get(name).copied().unwrap_or(Decimal::ZERO);
        let dw = (new - old).abs();
        if dw.is_zero() {
            continue;
        }
        let spread = spreads.get(name).copied().unwrap_or(DEFAULT_SPREAD);
        let impact = impacts.get(name).copied().unwrap_or(DEFAULT_IMPACT);
        spread_cost += dw * spread;
        impact_cost += sqrt_decimal(dw) * impact;
    }

    TransactionCostEstimate {
        spread_cost,
        impact_cost,
        total: spread_cost + impact_cost,
    }
}

/// `sum c[i] * |w[i] - previous[i]|`, the cost term the optimizer penalizes.
pub fn linear_cost(w: &[Decimal], previous: &[Decimal], rates: &[Rate]) -> Rate {
    w.iter()
        .zip(previous.iter())
        .zip(rates.iter())
        .map(|((a, b), c)| (*a - *b).abs() * *c)
        .sum()
}
