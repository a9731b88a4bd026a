use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::constraints::{sector_caps, sector_weights, turnover, WeightConstraints};
use super::qp_solver::{solve_qp, SolverSettings, SolverStatus};
use super::transaction_costs::{estimate_transaction_cost, linear_cost, TransactionCostEstimate};
use crate::error::PortfolioError;
use crate::linalg::{quad_form, vec_dot};
use crate::risk_estimator::annualized_vol;
use crate::types::{with_metadata, ComputationOutput, InstrumentId, InstrumentMap, Rate, Weight};
use crate::universe::CovarianceMatrix;
use crate::PortfolioResult;

/// Identifier of the synthetic cash holding.
pub const CASH_INSTRUMENT: &str = "CASH";

/// Default minimum cash reserve.
pub const DEFAULT_CASH_MIN: Weight = dec!(0.02);

/// Default risk aversion lambda.
pub const DEFAULT_RISK_AVERSION: Decimal = dec!(4.0);

/// Slack allowed when checking a solver result against the constraints.
pub const VERIFICATION_TOLERANCE: Decimal = dec!(0.000001);

/// Weight changes at or below this size are reported as holds.
pub const TRADE_THRESHOLD: Weight = dec!(0.0001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input to the constrained mean-variance rebalance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationInput {
    /// Covariance matrix; its instrument order defines the universe
    pub covariance: CovarianceMatrix,
    /// Expected return per instrument (must cover the universe)
    pub expected_returns: InstrumentMap,
    /// Current holdings (absent = 0, sum <= 1, remainder is cash)
    #[serde(default)]
    pub previous_weights: InstrumentMap,
    /// Sector label per instrument (must cover the universe)
    pub sector_map: BTreeMap<InstrumentId, String>,
    /// Linear cost per unit of weight traded (must cover the universe)
    pub cost_rates: InstrumentMap,
    pub max_weight_per_name: Weight,
    pub max_weight_per_sector: Weight,
    /// Maximum one-way turnover (half the L1 distance to previous weights)
    pub turnover_budget: Weight,
    /// Minimum cash reserve (default 0.02), enforced only with the cash asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_min: Option<Weight>,
    /// Risk aversion lambda (default 4.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_aversion: Option<Decimal>,
    /// Add a zero-risk CASH holding floored at `cash_min` (default false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_cash_asset: Option<bool>,
    /// Square-root impact coefficients for the cost estimate (default 15bp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_rates: Option<InstrumentMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<SolverSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub instrument: InstrumentId,
    pub previous_weight: Weight,
    pub target_weight: Weight,
    pub delta: Weight,
    pub side: TradeSide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutput {
    /// Target weights, summing to one
    pub weights: InstrumentMap,
    /// True when the equal-weight fallback replaced the solver result
    pub used_fallback: bool,
    pub solver_status: SolverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub iterations: u32,
    pub polished: bool,
    /// `mu'w - lambda * w'Sigma w - sum c|w - prev|` at the returned weights
    pub objective: Decimal,
    pub expected_return: Rate,
    /// Annualized assuming a daily covariance
    pub ex_ante_volatility: Rate,
    pub turnover: Weight,
    pub transaction_cost: TransactionCostEstimate,
    pub sector_weights: BTreeMap<String, Weight>,
    pub trades: Vec<Trade>,
}

/// Everything aligned to one index space, cash slot included.
struct Prepared {
    instruments: Vec<InstrumentId>,
    mu: Vec<Decimal>,
    sigma: Vec<Vec<Decimal>>,
    costs: Vec<Rate>,
    sectors: Vec<String>,
    constraints: WeightConstraints,
    cash_index: Option<usize>,
    risk_aversion: Decimal,
    cash_min: Weight,
}

struct SolveSummary {
    status: SolverStatus,
    iterations: u32,
    polished: bool,
    used_fallback: bool,
    fallback_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Maximize `mu'w - lambda * w'Sigma w - sum c|w - prev|` subject to full
/// investment, name caps, sector caps and a turnover budget.
///
/// Invalid inputs are errors. A problem the solver cannot solve (empty
/// feasible set, no convergence, or a result that fails the post-solve check)
/// is not: the result falls back to equal weight clipped to the name cap and
/// is flagged with `used_fallback`.
pub fn optimize(input: &OptimizationInput) -> PortfolioResult<ComputationOutput<OptimizationOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let prep = prepare(input)?;
    let settings = input.solver.clone().unwrap_or_default();
    let n_risky = prep.instruments.len() - usize::from(prep.cash_index.is_some());

    if prep.cash_index.is_none()
        && input.max_weight_per_name * Decimal::from(n_risky as i64) < Decimal::ONE
    {
        warnings.push(format!(
            "Name cap {} across {} instruments cannot reach full investment; \
             equal-weight fallback will exceed the cap",
            input.max_weight_per_name, n_risky
        ));
    }

    let mut status = SolverStatus::PrimalInfeasible;
    let mut iterations = 0u32;
    let mut polished = false;
    let mut solved: Option<Vec<Weight>> = None;
    let mut fallback_reason: Option<String> = None;

    match prep.constraints.infeasibility() {
        Some(reason) => fallback_reason = Some(reason),
        None => {
            let two_lambda = dec!(2) * prep.risk_aversion;
            let risk: Vec<Vec<Decimal>> = prep
                .sigma
                .iter()
                .map(|row| row.iter().map(|v| two_lambda * *v).collect())
                .collect();
            let linear: Vec<Decimal> = prep.mu.iter().map(|m| -*m).collect();
            let qp = prep.constraints.to_qp(&risk, &linear, &prep.costs);

            let solution = solve_qp(&qp, &settings)?;
            status = solution.status;
            iterations = solution.iterations;
            polished = solution.polished;

            if status.is_solved() {
                let mut w = solution.x[..prep.instruments.len()].to_vec();
                let violations = prep.constraints.violations(&w, VERIFICATION_TOLERANCE);
                if violations.is_empty() {
                    prep.constraints.clip_to_bounds(&mut w);
                    solved = Some(w);
                } else {
                    fallback_reason = Some(format!(
                        "Solution failed verification: {}",
                        violations.join("; ")
                    ));
                }
            } else {
                fallback_reason = Some(format!("Solver stopped with status {}", status));
            }
        }
    }

    let used_fallback = solved.is_none();
    let weights = match solved {
        Some(w) => w,
        None => {
            let reason = fallback_reason.clone().unwrap_or_default();
            tracing::warn!(
                status = %status,
                iterations,
                reason = %reason,
                "optimizer fell back to equal weight"
            );
            warnings.push(format!("Equal-weight fallback used: {}", reason));
            fallback_weights(
                n_risky,
                input.max_weight_per_name,
                prep.cash_index.map(|_| prep.cash_min),
            )
        }
    };

    let output = analyse(
        input,
        &prep,
        weights,
        SolveSummary {
            status,
            iterations,
            polished,
            used_fallback,
            fallback_reason,
        },
    );
    tracing::debug!(
        instruments = prep.instruments.len(),
        status = %output.solver_status,
        used_fallback,
        iterations,
        "optimization finished"
    );

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Mean-variance with L1 transaction costs, solved as a QP by ADMM with active-set polishing",
        &serde_json::json!({
            "risk_aversion": prep.risk_aversion.to_string(),
            "max_weight_per_name": input.max_weight_per_name.to_string(),
            "max_weight_per_sector": input.max_weight_per_sector.to_string(),
            "turnover_budget": input.turnover_budget.to_string(),
            "cash_min": prep.cash_min.to_string(),
            "cash_floor_enforced": prep.cash_index.is_some(),
            "verification_tolerance": VERIFICATION_TOLERANCE.to_string(),
            "max_iterations": settings.max_iterations,
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Equal weight clipped to `max_name` and renormalized to one.
///
/// With a cash slot the risky names share `1 - cash_min` (still clipped) and
/// cash, exempt from the cap, takes the remainder as the last element.
pub fn fallback_weights(n_risky: usize, max_name: Weight, cash_min: Option<Weight>) -> Vec<Weight> {
    if n_risky == 0 {
        return if cash_min.is_some() { vec![Decimal::ONE] } else { Vec::new() };
    }
    let count = Decimal::from(n_risky as i64);

    match cash_min {
        Some(floor) => {
            let each = ((Decimal::ONE - floor) / count).min(max_name).max(Decimal::ZERO);
            let mut w = vec![each; n_risky];
            w.push(Decimal::ONE - each * count);
            w
        }
        None => {
            let equal = Decimal::ONE / count;
            let mut w = vec![equal.min(max_name).max(Decimal::ZERO); n_risky];
            let total: Decimal = w.iter().sum();
            if total.is_zero() {
                return vec![equal; n_risky];
            }
            for wi in w.iter_mut() {
                *wi /= total;
            }
            w
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare(input: &OptimizationInput) -> PortfolioResult<Prepared> {
    let universe = input.covariance.validate()?;

    let non_negative = [
        ("max_weight_per_name", input.max_weight_per_name),
        ("max_weight_per_sector", input.max_weight_per_sector),
        ("turnover_budget", input.turnover_budget),
    ];
    for (field, value) in non_negative {
        if value < Decimal::ZERO {
            return Err(PortfolioError::InvalidInput {
                field: field.into(),
                reason: format!("Must be non-negative, got {}", value),
            });
        }
    }
    let risk_aversion = input.risk_aversion.unwrap_or(DEFAULT_RISK_AVERSION);
    if risk_aversion < Decimal::ZERO {
        return Err(PortfolioError::InvalidInput {
            field: "risk_aversion".into(),
            reason: format!("Must be non-negative, got {}", risk_aversion),
        });
    }
    let cash_min = input.cash_min.unwrap_or(DEFAULT_CASH_MIN);
    if cash_min < Decimal::ZERO || cash_min > Decimal::ONE {
        return Err(PortfolioError::InvalidInput {
            field: "cash_min".into(),
            reason: format!("Must lie in [0, 1], got {}", cash_min),
        });
    }

    let mut mu = universe.align_dense("expected_returns", &input.expected_returns)?;
    let mut costs = universe.align_dense("cost_rates", &input.cost_rates)?;
    if let Some((id, c)) = input.cost_rates.iter().find(|(_, c)| **c < Decimal::ZERO) {
        return Err(PortfolioError::InvalidInput {
            field: format!("cost_rates.{}", id),
            reason: format!("Cost rate must be non-negative, got {}", c),
        });
    }
    let mut sectors = universe.align_labels("sector_map", &input.sector_map)?;
    let mut previous = universe.align_sparse("previous_weights", &input.previous_weights)?;
    if let Some((id, w)) = input.previous_weights.iter().find(|(_, w)| **w < Decimal::ZERO) {
        return Err(PortfolioError::InvalidInput {
            field: format!("previous_weights.{}", id),
            reason: format!("Weights must be non-negative, got {}", w),
        });
    }
    let invested: Decimal = previous.iter().sum();
    if invested > Decimal::ONE + VERIFICATION_TOLERANCE {
        return Err(PortfolioError::InvalidInput {
            field: "previous_weights".into(),
            reason: format!("Weights sum to {} > 1", invested),
        });
    }

    let mut instruments = universe.instruments().to_vec();
    let mut sigma = input.covariance.values.clone();
    let n = instruments.len();
    let mut lower = vec![Decimal::ZERO; n];
    let mut upper = vec![input.max_weight_per_name; n];

    let cash_index = if input.include_cash_asset.unwrap_or(false) {
        if universe.index_of(CASH_INSTRUMENT).is_some() {
            return Err(PortfolioError::InvalidInput {
                field: "covariance.instruments".into(),
                reason: format!(
                    "'{}' is reserved for the synthetic cash holding",
                    CASH_INSTRUMENT
                ),
            });
        }
        instruments.push(CASH_INSTRUMENT.to_string());
        for row in sigma.iter_mut() {
            row.push(Decimal::ZERO);
        }
        sigma.push(vec![Decimal::ZERO; n + 1]);
        mu.push(Decimal::ZERO);
        costs.push(Decimal::ZERO);
        sectors.push(CASH_INSTRUMENT.to_string());
        previous.push((Decimal::ONE - invested).max(Decimal::ZERO));
        lower.push(cash_min);
        upper.push(Decimal::ONE);
        Some(n)
    } else {
        None
    };

    let constraints = WeightConstraints {
        lower,
        upper,
        sector_caps: sector_caps(&sectors, input.max_weight_per_sector, cash_index),
        previous,
        max_l1_change: dec!(2) * input.turnover_budget,
    };

    Ok(Prepared {
        instruments,
        mu,
        sigma,
        costs,
        sectors,
        constraints,
        cash_index,
        risk_aversion,
        cash_min,
    })
}

fn analyse(
    input: &OptimizationInput,
    prep: &Prepared,
    weights: Vec<Weight>,
    summary: SolveSummary,
) -> OptimizationOutput {
    let previous = &prep.constraints.previous;
    let expected_return = vec_dot(&weights, &prep.mu);
    let objective = expected_return
        - prep.risk_aversion * quad_form(&weights, &prep.sigma)
        - linear_cost(&weights, previous, &prep.costs);

    let target_map: InstrumentMap = prep
        .instruments
        .iter()
        .cloned()
        .zip(weights.iter().copied())
        .collect();
    let previous_map: InstrumentMap = prep
        .instruments
        .iter()
        .cloned()
        .zip(previous.iter().copied())
        .collect();
    let mut spreads = input.cost_rates.clone();
    if prep.cash_index.is_some() {
        spreads.insert(CASH_INSTRUMENT.to_string(), Decimal::ZERO);
    }
    let mut impacts = input.impact_rates.clone().unwrap_or_default();
    if prep.cash_index.is_some() {
        impacts.insert(CASH_INSTRUMENT.to_string(), Decimal::ZERO);
    }
    let transaction_cost = estimate_transaction_cost(&target_map, &previous_map, &spreads, &impacts);

    let trades = prep
        .instruments
        .iter()
        .zip(weights.iter().zip(previous.iter()))
        .map(|(id, (w, p))| {
            let delta = *w - *p;
            let side = if delta.abs() <= TRADE_THRESHOLD {
                TradeSide::Hold
            } else if delta > Decimal::ZERO {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            };
            Trade {
                instrument: id.clone(),
                previous_weight: *p,
                target_weight: *w,
                delta,
                side,
            }
        })
        .collect();

    OptimizationOutput {
        ex_ante_volatility: annualized_vol(&weights, &prep.sigma),
        turnover: turnover(&weights, previous),
        sector_weights: sector_weights(&prep.sectors, &weights),
        used_fallback: summary.used_fallback,
        weights: target_map,
        solver_status: summary.status,
        fallback_reason: summary.fallback_reason,
        iterations: summary.iterations,
        polished: summary.polished,
        objective,
        expected_return,
        transaction_cost,
        trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TOL: Decimal = dec!(0.000001);

    fn map(items: &[(&str, Decimal)]) -> InstrumentMap {
        items.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn base_input() -> OptimizationInput {
        let ids = ["A", "B", "C"];
        OptimizationInput {
            covariance: CovarianceMatrix {
                instruments: ids.iter().map(|s| s.to_string()).collect(),
                values: (0..3)
                    .map(|i| (0..3).map(|j| if i == j { dec!(0.04) } else { dec!(0) }).collect())
                    .collect(),
            },
            expected_returns: map(&[("A", dec!(0.10)), ("B", dec!(0.08)), ("C", dec!(0.06))]),
            previous_weights: map(&[("A", dec!(1))]),
            sector_map: [("A", "Tech"), ("B", "Tech"), ("C", "Fin")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            cost_rates: map(&[("A", dec!(0.001)), ("B", dec!(0.001)), ("C", dec!(0.001))]),
            max_weight_per_name: dec!(0.8),
            max_weight_per_sector: dec!(0.9),
            turnover_budget: dec!(0.25),
            cash_min: None,
            risk_aversion: None,
            include_cash_asset: None,
            impact_rates: None,
            solver: None,
        }
    }

    #[test]
    fn test_fallback_weights_equal() {
        let w = fallback_weights(4, dec!(0.5), None);
        assert_eq!(w, vec![dec!(0.25); 4]);
    }

    #[test]
    fn test_fallback_weights_tight_cap_keeps_full_investment() {
        let w = fallback_weights(3, dec!(0.2), None);
        let total: Decimal = w.iter().sum();
        assert!((total - Decimal::ONE).abs() < TOL);
    }

    #[test]
    fn test_fallback_weights_with_cash_absorbs_remainder() {
        let w = fallback_weights(3, dec!(0.2), Some(dec!(0.02)));
        assert_eq!(w.len(), 4);
        assert_eq!(w[0], dec!(0.2));
        assert_eq!(w[3], dec!(0.4));
    }

    #[test]
    fn test_turnover_bound_binds() {
        let out = optimize(&base_input()).unwrap();
        let r = &out.result;
        assert!(!r.used_fallback, "{:?}", r.fallback_reason);
        assert_eq!(r.solver_status, SolverStatus::Solved);
        assert!((r.weights["A"] - dec!(0.75)).abs() < dec!(0.0001));
        assert!((r.weights["B"] - dec!(0.15)).abs() < dec!(0.0001));
        assert!((r.weights["C"] - dec!(0.10)).abs() < dec!(0.0001));
        assert!(r.turnover <= dec!(0.25) + TOL);
        assert!(r.sector_weights["Tech"] <= dec!(0.9) + TOL);
    }

    #[test]
    fn test_trade_list() {
        let out = optimize(&base_input()).unwrap();
        let trades = &out.result.trades;
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].instrument, "A");
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[1].side, TradeSide::Buy);
    }

    #[test]
    fn test_infeasible_turnover_uses_fallback() {
        let mut input = base_input();
        input.turnover_budget = dec!(0.05);
        let out = optimize(&input).unwrap();
        let r = &out.result;
        assert!(r.used_fallback);
        assert_eq!(r.solver_status, SolverStatus::PrimalInfeasible);
        assert_eq!(r.iterations, 0);
        let total: Decimal = r.weights.values().sum();
        assert!((total - Decimal::ONE).abs() < TOL);
        assert!(out.warnings.iter().any(|w| w.contains("fallback")));
    }

    #[test]
    fn test_cash_absorbs_rejected_risk() {
        let mut input = base_input();
        input.include_cash_asset = Some(true);
        input.cash_min = Some(dec!(0.05));
        input.turnover_budget = dec!(1);
        input.previous_weights = map(&[("A", dec!(0.5)), ("B", dec!(0.3))]);
        let out = optimize(&input).unwrap();
        let r = &out.result;
        assert!(!r.used_fallback, "{:?}", r.fallback_reason);
        let total: Decimal = r.weights.values().sum();
        assert!((total - Decimal::ONE).abs() < TOL);
        // Each risky name stops where its marginal return hits zero:
        // A = 0.101 / 0.32, B = 0.081 / 0.32, C = 0.059 / 0.32
        assert!((r.weights[CASH_INSTRUMENT] - dec!(0.246875)).abs() < dec!(0.0001));
        assert!((r.weights["A"] - dec!(0.315625)).abs() < dec!(0.0001));
    }

    #[test]
    fn test_cash_floor_binds_when_risk_is_cheap() {
        let mut input = base_input();
        input.include_cash_asset = Some(true);
        input.cash_min = Some(dec!(0.05));
        input.risk_aversion = Some(dec!(1));
        input.turnover_budget = dec!(1);
        input.previous_weights = map(&[("A", dec!(0.5)), ("B", dec!(0.3))]);
        let out = optimize(&input).unwrap();
        let r = &out.result;
        assert!(!r.used_fallback, "{:?}", r.fallback_reason);
        assert!(r.weights[CASH_INSTRUMENT] >= dec!(0.05) - TOL);
        assert!((r.weights[CASH_INSTRUMENT] - dec!(0.05)).abs() < dec!(0.0001));
        assert!(r.sector_weights["Tech"] <= dec!(0.9) + TOL);
    }

    #[test]
    fn test_reserved_cash_id_rejected() {
        let mut input = base_input();
        input.include_cash_asset = Some(true);
        input.covariance.instruments[2] = CASH_INSTRUMENT.to_string();
        for m in [&mut input.expected_returns, &mut input.cost_rates] {
            let v = m.remove("C").unwrap();
            m.insert(CASH_INSTRUMENT.to_string(), v);
        }
        input.sector_map.remove("C");
        input.sector_map.insert(CASH_INSTRUMENT.to_string(), "Fin".into());
        let err = optimize(&input).unwrap_err();
        assert!(err.to_string().contains("reserved"), "{}", err);
    }

    #[test]
    fn test_invalid_inputs() {
        let mut input = base_input();
        input.max_weight_per_name = dec!(-0.1);
        assert!(optimize(&input).is_err());

        let mut input = base_input();
        input.previous_weights = map(&[("A", dec!(0.7)), ("B", dec!(0.5))]);
        assert!(optimize(&input).is_err());

        let mut input = base_input();
        input.expected_returns.remove("C");
        assert!(matches!(
            optimize(&input),
            Err(PortfolioError::InvalidInput { .. })
        ));

        let mut input = base_input();
        input.previous_weights = map(&[("ZZZ", dec!(0.1))]);
        assert!(optimize(&input).is_err());
    }

    #[test]
    fn test_tight_name_cap_warns() {
        let mut input = base_input();
        input.max_weight_per_name = dec!(0.3);
        input.turnover_budget = dec!(1);
        let out = optimize(&input).unwrap();
        assert!(out.result.used_fallback);
        assert!(out.warnings.iter().any(|w| w.contains("cannot reach full investment")));
        let total: Decimal = out.result.weights.values().sum();
        assert!((total - Decimal::ONE).abs() < TOL);
    }

    fn assert_full_and_boxed(r: &OptimizationOutput, max_name: Decimal) {
        let total: Decimal = r.weights.values().sum();
        assert!((total - Decimal::ONE).abs() < TOL, "sum {}", total);
        for (id, w) in &r.weights {
            assert!(*w >= -TOL && *w <= max_name + TOL, "{} = {}", id, w);
        }
    }

    #[test]
    fn test_solver_detected_infeasibility_uses_fallback() {
        // Tech (A, B) capped at 0.5 forces selling half of A, but only 0.3
        // of one-way turnover is allowed. Name and sector capacity both
        // admit full investment, so only the solver can see the conflict.
        let mut input = base_input();
        input.max_weight_per_sector = dec!(0.5);
        input.turnover_budget = dec!(0.3);
        let out = optimize(&input).unwrap();
        let r = &out.result;
        assert!(r.used_fallback);
        assert_eq!(r.solver_status, SolverStatus::PrimalInfeasible);
        assert!(r.iterations > 0);
        assert!(r.fallback_reason.as_deref().unwrap_or("").contains("primal_infeasible"));
        assert_full_and_boxed(r, dec!(0.8));
        assert!(out.warnings.iter().any(|w| w.contains("fallback")));
    }

    #[test]
    fn test_iteration_cap_uses_fallback() {
        let mut input = base_input();
        input.solver = Some(SolverSettings {
            max_iterations: 3,
            ..SolverSettings::default()
        });
        let out = optimize(&input).unwrap();
        let r = &out.result;
        assert!(r.used_fallback);
        assert_eq!(r.solver_status, SolverStatus::MaxIterationsReached);
        assert!(r.iterations <= 3);
        assert_full_and_boxed(r, dec!(0.8));
        let third = Decimal::ONE / dec!(3);
        assert!((r.weights["A"] - third).abs() < TOL);
    }
}
