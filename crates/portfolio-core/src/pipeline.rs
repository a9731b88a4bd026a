//! End-to-end rebalance: fundamentals to factor signal to expected returns,
//! return history to shrunk covariance, then the constrained optimizer and a
//! risk report on the resulting weights.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::error::PortfolioError;
use crate::factor_engine::{
    run_factor_signal, CompositeSignal, FactorSignalInput, FundamentalsRecord, ReturnMapping,
};
use crate::portfolio_optimizer::{
    optimize, OptimizationInput, OptimizationOutput, SolverSettings, CASH_INSTRUMENT,
};
use crate::risk_estimator::{
    factor_exposures, parametric_tail_risk, shrink_cov, stress_scenarios, FactorExposure,
    ParametricTailRisk, ReturnHistory, StressImpact, DEFAULT_SHRINK_INTENSITY,
};
use crate::types::{
    with_metadata, ComputationOutput, FactorTable, InstrumentId, InstrumentMap, Money, Rate, Weight,
};
use crate::universe::CovarianceMatrix;
use crate::PortfolioResult;

/// Cost rate assumed for instruments without one.
pub const DEFAULT_COST_RATE: Rate = dec!(0.002);

/// Sector assigned to instruments without one.
pub const DEFAULT_SECTOR: &str = "Other";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    /// Fundamentals for every instrument in the return history
    pub panel: Vec<FundamentalsRecord>,
    pub returns: ReturnHistory,
    #[serde(default)]
    pub previous_weights: InstrumentMap,
    /// Missing instruments default to "Other"
    #[serde(default)]
    pub sector_map: BTreeMap<InstrumentId, String>,
    /// Missing instruments default to 20bp
    #[serde(default)]
    pub cost_rates: InstrumentMap,
    pub max_weight_per_name: Weight,
    pub max_weight_per_sector: Weight,
    pub turnover_budget: Weight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_weights: Option<BTreeMap<String, Decimal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_mapping: Option<ReturnMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shrink_intensity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_min: Option<Weight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_aversion: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_cash_asset: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_rates: Option<InstrumentMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<SolverSettings>,
    /// Portfolio notional used for stress impacts (default 1, i.e. NAV fractions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_value: Option<Money>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub factors: FactorTable,
    pub composite: CompositeSignal,
    pub expected_returns: InstrumentMap,
    pub covariance: CovarianceMatrix,
    pub optimization: OptimizationOutput,
    pub factor_exposures: Vec<FactorExposure>,
    pub tail_risk: ParametricTailRisk,
    pub stress: Vec<StressImpact>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn run_pipeline(input: &PipelineInput) -> PortfolioResult<ComputationOutput<PipelineOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let universe = input.returns.validate()?;
    check_panel_covers(&input.panel, universe.instruments())?;

    let signal = run_factor_signal(&FactorSignalInput {
        panel: input.panel.clone(),
        factor_weights: input.factor_weights.clone(),
        return_mapping: input.return_mapping.clone(),
    })?;
    warnings.extend(signal.warnings);
    let signal = signal.result;

    let intensity = input.shrink_intensity.unwrap_or(DEFAULT_SHRINK_INTENSITY);
    let covariance = shrink_cov(&input.returns, intensity)?;

    let mut sector_map = input.sector_map.clone();
    let mut cost_rates = input.cost_rates.clone();
    let mut defaulted_sectors = 0usize;
    let mut defaulted_costs = 0usize;
    for id in universe.instruments() {
        if !sector_map.contains_key(id) {
            sector_map.insert(id.clone(), DEFAULT_SECTOR.to_string());
            defaulted_sectors += 1;
        }
        if !cost_rates.contains_key(id) {
            cost_rates.insert(id.clone(), DEFAULT_COST_RATE);
            defaulted_costs += 1;
        }
    }
    if defaulted_sectors > 0 {
        warnings.push(format!(
            "{} instrument(s) without a sector assigned to '{}'",
            defaulted_sectors, DEFAULT_SECTOR
        ));
    }
    if defaulted_costs > 0 {
        warnings.push(format!(
            "{} instrument(s) without a cost rate charged {}",
            defaulted_costs, DEFAULT_COST_RATE
        ));
    }

    let optimized = optimize(&OptimizationInput {
        covariance: covariance.clone(),
        expected_returns: signal.expected_returns.clone(),
        previous_weights: input.previous_weights.clone(),
        sector_map,
        cost_rates,
        max_weight_per_name: input.max_weight_per_name,
        max_weight_per_sector: input.max_weight_per_sector,
        turnover_budget: input.turnover_budget,
        cash_min: input.cash_min,
        risk_aversion: input.risk_aversion,
        include_cash_asset: input.include_cash_asset,
        impact_rates: input.impact_rates.clone(),
        solver: input.solver.clone(),
    })?;
    warnings.extend(optimized.warnings);
    let optimization = optimized.result;

    let exposures = factor_exposures(&optimization.weights, &signal.factors)?;
    let tail_risk =
        parametric_tail_risk(optimization.expected_return, optimization.ex_ante_volatility);

    let notional = input.portfolio_value.unwrap_or(Decimal::ONE);
    let positions: InstrumentMap = optimization
        .weights
        .iter()
        .filter(|(id, _)| id.as_str() != CASH_INSTRUMENT)
        .map(|(id, w)| (id.clone(), *w * notional))
        .collect();
    let stress = stress_scenarios(&positions)?;

    let output = PipelineOutput {
        factors: signal.factors,
        composite: signal.composite,
        expected_returns: signal.expected_returns,
        covariance,
        optimization,
        factor_exposures: exposures,
        tail_risk,
        stress,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Style-factor signal, shrinkage covariance and cost-aware mean-variance rebalance",
        &serde_json::json!({
            "n_instruments": universe.len(),
            "periods": input.returns.periods(),
            "shrink_intensity": intensity.to_string(),
            "default_cost_rate": DEFAULT_COST_RATE.to_string(),
            "default_sector": DEFAULT_SECTOR,
            "portfolio_value": notional.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// The panel and the return history must describe the same instruments.
fn check_panel_covers(panel: &[FundamentalsRecord], instruments: &[InstrumentId]) -> PortfolioResult<()> {
    let in_panel: BTreeSet<&str> = panel.iter().map(|r| r.instrument.as_str()).collect();
    let in_returns: BTreeSet<&str> = instruments.iter().map(|s| s.as_str()).collect();

    if let Some(missing) = in_returns.difference(&in_panel).next() {
        return Err(PortfolioError::InvalidInput {
            field: "panel".into(),
            reason: format!("No fundamentals for instrument '{}'", missing),
        });
    }
    if let Some(extra) = in_panel.difference(&in_returns).next() {
        return Err(PortfolioError::InvalidInput {
            field: "panel".into(),
            reason: format!("Instrument '{}' has no return history", extra),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(id: &str, cap: Decimal, pe: Decimal, r12: Decimal, vol: Decimal) -> FundamentalsRecord {
        FundamentalsRecord {
            instrument: id.into(),
            market_cap: Some(cap),
            pe_ratio: Some(pe),
            pb_ratio: Some(dec!(3)),
            roe: Some(dec!(0.15)),
            gross_margin: Some(dec!(0.4)),
            volatility_60d: Some(vol),
            return_12m: Some(r12),
            return_1m: Some(dec!(0.01)),
        }
    }

    fn input() -> PipelineInput {
        PipelineInput {
            panel: vec![
                record("AAA", dec!(500000000000), dec!(25), dec!(0.30), dec!(0.25)),
                record("BBB", dec!(80000000000), dec!(12), dec!(0.10), dec!(0.20)),
                record("CCC", dec!(5000000000), dec!(9), dec!(-0.05), dec!(0.35)),
                record("DDD", dec!(20000000000), dec!(15), dec!(0.18), dec!(0.18)),
            ],
            returns: ReturnHistory {
                instruments: vec!["AAA".into(), "BBB".into(), "CCC".into(), "DDD".into()],
                returns: vec![
                    vec![dec!(0.012), dec!(0.004), dec!(-0.010), dec!(0.006)],
                    vec![dec!(-0.008), dec!(0.002), dec!(0.015), dec!(-0.003)],
                    vec![dec!(0.005), dec!(-0.006), dec!(0.004), dec!(0.002)],
                    vec![dec!(0.009), dec!(0.003), dec!(-0.012), dec!(0.007)],
                    vec![dec!(-0.004), dec!(0.001), dec!(0.008), dec!(-0.001)],
                    vec![dec!(0.003), dec!(0.005), dec!(-0.002), dec!(0.004)],
                ],
                dates: None,
            },
            previous_weights: [("AAA".to_string(), dec!(0.25)), ("BBB".to_string(), dec!(0.25))]
                .into_iter()
                .collect(),
            sector_map: [("AAA".to_string(), "Tech".to_string())].into_iter().collect(),
            cost_rates: InstrumentMap::new(),
            max_weight_per_name: dec!(0.4),
            max_weight_per_sector: dec!(0.8),
            turnover_budget: dec!(0.5),
            factor_weights: None,
            return_mapping: None,
            shrink_intensity: None,
            cash_min: None,
            risk_aversion: None,
            include_cash_asset: None,
            impact_rates: None,
            solver: None,
            portfolio_value: Some(dec!(1000000)),
        }
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let out = run_pipeline(&input()).unwrap();
        let r = &out.result;
        let total: Decimal = r.optimization.weights.values().sum();
        assert!((total - Decimal::ONE).abs() < dec!(0.000001));
        for w in r.optimization.weights.values() {
            assert!(*w >= dec!(-0.000001) && *w <= dec!(0.4) + dec!(0.000001));
        }
        assert_eq!(r.factor_exposures.len(), 5);
        assert_eq!(r.stress.len(), 5);
        assert_eq!(r.covariance.dim(), 4);
    }

    #[test]
    fn test_pipeline_reports_defaults() {
        let out = run_pipeline(&input()).unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("'Other'")));
        assert!(out.warnings.iter().any(|w| w.contains("cost rate")));
    }

    #[test]
    fn test_pipeline_stress_scales_with_notional() {
        let out = run_pipeline(&input()).unwrap();
        let down10 = out
            .result
            .stress
            .iter()
            .find(|s| s.scenario == "market_down_10pct")
            .unwrap();
        assert!((down10.impact - dec!(-100000)).abs() < dec!(1));
    }

    #[test]
    fn test_pipeline_rejects_panel_mismatch() {
        let mut i = input();
        i.panel.pop();
        let err = run_pipeline(&i).unwrap_err();
        assert!(err.to_string().contains("DDD"));
    }
}
