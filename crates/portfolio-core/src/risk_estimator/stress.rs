//! Fixed linear stress shocks.
//!
//! Each scenario applies one hard-coded percentage move to total notional.
//! This is a coarse placeholder with no empirical calibration and no
//! per-position repricing; the rates shock in particular is a crude duration
//! proxy for an equity book.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::types::{InstrumentMap, Money, Rate};
use crate::PortfolioResult;

/// Scenario name and its shock to total notional.
const SCENARIOS: [(&str, Decimal); 5] = [
    ("market_down_10pct", dec!(-0.10)),
    ("market_down_20pct", dec!(-0.20)),
    ("rates_up_100bps", dec!(-0.02)),
    ("credit_spread_widening", dec!(-0.03)),
    ("volatility_spike", dec!(-0.05)),
];

/// Dollar impact of one stress scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressImpact {
    pub scenario: String,
    pub shock_pct: Rate,
    pub impact: Money,
}

/// Apply every fixed scenario to the total notional of `positions`
/// (instrument -> current market value).
pub fn stress_scenarios(positions: &InstrumentMap) -> PortfolioResult<Vec<StressImpact>> {
    for (instrument, value) in positions {
        if *value < Decimal::ZERO {
            return Err(PortfolioError::InvalidInput {
                field: format!("positions.{}", instrument),
                reason: "Market value must be non-negative".into(),
            });
        }
    }
    let total: Money = positions.values().sum();

    Ok(SCENARIOS
        .iter()
        .map(|(name, shock)| StressImpact {
            scenario: name.to_string(),
            shock_pct: *shock,
            impact: total * *shock,
        })
        .collect())
}
