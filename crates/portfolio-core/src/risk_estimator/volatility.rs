use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::linalg::{quad_form, sqrt_decimal};
use crate::types::{InstrumentMap, Rate};
use crate::universe::CovarianceMatrix;
use crate::PortfolioResult;

/// Trading days per year used to annualize daily risk.
pub const TRADING_DAYS_PER_YEAR: Decimal = dec!(252);

/// One-sided 95% normal quantile.
const Z_95: Decimal = dec!(1.65);

/// Standard normal density at 1.65.
const NORMAL_PDF_AT_Z_95: Decimal = dec!(0.1022649);

/// Parametric tail-risk estimate for a normal return distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametricTailRisk {
    /// 95% value-at-risk as a positive loss fraction
    pub var_95: Rate,
    /// 95% conditional VaR (expected shortfall) as a positive loss fraction
    pub cvar_95: Rate,
}

/// Annualized ex-ante volatility: `sqrt(w' * Sigma * w) * sqrt(252)`.
///
/// `cov` is assumed to be estimated on daily returns. Instruments missing from
/// `weights` weigh zero; weights on instruments outside the covariance
/// universe are rejected.
pub fn ex_ante_vol(weights: &InstrumentMap, cov: &CovarianceMatrix) -> PortfolioResult<Rate> {
    let universe = cov.validate()?;
    let w = universe.align_sparse("weights", weights)?;
    Ok(annualized_vol(&w, &cov.values))
}

/// `ex_ante_vol` on vectors already aligned to the covariance matrix.
pub fn annualized_vol(w: &[Decimal], cov: &[Vec<Decimal>]) -> Rate {
    sqrt_decimal(quad_form(w, cov)) * sqrt_decimal(TRADING_DAYS_PER_YEAR)
}

/// Normal VaR/CVaR at 95%: `VaR = -(mu - z*sigma)`,
/// `CVaR = -(mu - sigma * pdf(z) / (1 - alpha))`, floored at zero.
pub fn parametric_tail_risk(expected_return: Rate, volatility: Rate) -> ParametricTailRisk {
    let tail_mass = Decimal::ONE - dec!(0.95);
    let var_95 = (-(expected_return - Z_95 * volatility)).max(Decimal::ZERO);
    let cvar_95 =
        (-(expected_return - volatility * NORMAL_PDF_AT_Z_95 / tail_mass)).max(Decimal::ZERO);
    ParametricTailRisk { var_95, cvar_95 }
}
