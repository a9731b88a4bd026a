pub mod covariance;
pub mod exposures;
pub mod stress;
pub mod volatility;

pub use covariance::{sample_covariance, shrink_cov, ReturnHistory, DEFAULT_SHRINK_INTENSITY};
pub use exposures::{factor_exposures, FactorExposure};
pub use stress::{stress_scenarios, StressImpact};
pub use volatility::{
    annualized_vol, ex_ante_vol, parametric_tail_risk, ParametricTailRisk, TRADING_DAYS_PER_YEAR,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::types::{with_metadata, ComputationOutput, FactorTable, InstrumentMap, Rate};
use crate::universe::CovarianceMatrix;
use crate::PortfolioResult;

/// Input for a full risk report on one set of holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReportInput {
    pub returns: ReturnHistory,
    /// Portfolio weights keyed by instrument (absent = 0)
    pub weights: InstrumentMap,
    /// Shrinkage intensity towards scaled identity (default 0.1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shrink_intensity: Option<Decimal>,
    /// Annual expected portfolio return used for VaR/CVaR (default 0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_return: Option<Rate>,
    /// Factor loadings for exposure attribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_loadings: Option<FactorTable>,
    /// Market values for stress testing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<InstrumentMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReportOutput {
    pub covariance: CovarianceMatrix,
    pub ex_ante_volatility: Rate,
    pub tail_risk: ParametricTailRisk,
    pub factor_exposures: Vec<FactorExposure>,
    pub stress: Vec<StressImpact>,
}

/// Shrunk covariance, ex-ante volatility, tail risk, factor exposures and
/// stress impacts in one pass.
pub fn run_risk_report(input: &RiskReportInput) -> PortfolioResult<ComputationOutput<RiskReportOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let intensity = input.shrink_intensity.unwrap_or(DEFAULT_SHRINK_INTENSITY);
    let covariance = shrink_cov(&input.returns, intensity)?;
    if input.returns.periods() <= covariance.dim() {
        warnings.push(format!(
            "Only {} periods for {} instruments; sample covariance is rank deficient before shrinkage",
            input.returns.periods(),
            covariance.dim()
        ));
    }

    let vol = ex_ante_vol(&input.weights, &covariance)?;
    let mu = input.expected_return.unwrap_or(Decimal::ZERO);
    let tail_risk = parametric_tail_risk(mu, vol);

    let exposures = match input.factor_loadings {
        Some(ref loadings) => factor_exposures(&input.weights, loadings)?,
        None => Vec::new(),
    };
    let stress = match input.positions {
        Some(ref positions) => stress_scenarios(positions)?,
        None => Vec::new(),
    };

    let output = RiskReportOutput {
        covariance,
        ex_ante_volatility: vol,
        tail_risk,
        factor_exposures: exposures,
        stress,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Shrinkage covariance with annualized ex-ante volatility and normal VaR/CVaR",
        &serde_json::json!({
            "shrink_intensity": intensity.to_string(),
            "periods": input.returns.periods(),
            "annualization_days": TRADING_DAYS_PER_YEAR.to_string(),
            "var_confidence": "0.95",
            "expected_return": mu.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}
