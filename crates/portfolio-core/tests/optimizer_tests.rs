use portfolio_core::portfolio_optimizer::{
    optimize, OptimizationInput, OptimizationOutput, SolverStatus,
};
use portfolio_core::risk_estimator::{ex_ante_vol, shrink_cov, ReturnHistory};
use portfolio_core::universe::CovarianceMatrix;
use portfolio_core::InstrumentMap;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

const TOL: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn map(items: &[(&str, Decimal)]) -> InstrumentMap {
    items.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn diag_cov(ids: &[&str], var: Decimal) -> CovarianceMatrix {
    let n = ids.len();
    CovarianceMatrix {
        instruments: ids.iter().map(|s| s.to_string()).collect(),
        values: (0..n)
            .map(|i| (0..n).map(|j| if i == j { var } else { Decimal::ZERO }).collect())
            .collect(),
    }
}

/// Three names, A and B in one sector, C in another, fully invested in A.
fn three_name_input(turnover_budget: Decimal) -> OptimizationInput {
    OptimizationInput {
        covariance: diag_cov(&["A", "B", "C"], dec!(0.04)),
        expected_returns: map(&[("A", dec!(0.10)), ("B", dec!(0.08)), ("C", dec!(0.06))]),
        previous_weights: map(&[("A", dec!(1.0))]),
        sector_map: [("A", "Tech"), ("B", "Tech"), ("C", "Energy")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        cost_rates: map(&[("A", dec!(0.001)), ("B", dec!(0.001)), ("C", dec!(0.001))]),
        max_weight_per_name: dec!(0.8),
        max_weight_per_sector: dec!(0.9),
        turnover_budget,
        cash_min: None,
        risk_aversion: None,
        include_cash_asset: None,
        impact_rates: None,
        solver: None,
    }
}

fn assert_fully_invested(out: &OptimizationOutput) {
    let total: Decimal = out.weights.values().sum();
    assert!(
        (total - Decimal::ONE).abs() < TOL,
        "weights sum to {}",
        total
    );
}

fn assert_within_box(out: &OptimizationOutput, max_name: Decimal) {
    for (id, w) in &out.weights {
        assert!(*w >= -TOL, "{} has negative weight {}", id, w);
        assert!(*w <= max_name + TOL, "{} exceeds name cap: {}", id, w);
    }
}

// ---------------------------------------------------------------------------
// Feasible rebalances
// ---------------------------------------------------------------------------

#[test]
fn test_solution_respects_every_constraint() {
    let input = three_name_input(dec!(0.25));
    let out = optimize(&input).unwrap().result;

    assert!(!out.used_fallback);
    assert!(out.solver_status.is_solved());
    assert_fully_invested(&out);
    assert_within_box(&out, dec!(0.8));
    for (sector, w) in &out.sector_weights {
        assert!(*w <= dec!(0.9) + TOL, "sector {} at {}", sector, w);
    }
    assert!(out.turnover <= dec!(0.25) + TOL);
}

#[test]
fn test_turnover_budget_is_spent_on_best_names() {
    // Without the budget the optimum sells 0.6 of A; the budget stops it
    // after selling 0.25 of A into B and C.
    let out = optimize(&three_name_input(dec!(0.25))).unwrap().result;
    assert!((out.turnover - dec!(0.25)).abs() < dec!(0.0001));
    assert!((out.weights["A"] - dec!(0.75)).abs() < dec!(0.0001));
    assert!(out.weights["B"] > out.weights["C"]);
}

#[test]
fn test_generous_budget_reaches_interior_optimum() {
    let out = optimize(&three_name_input(dec!(1))).unwrap().result;
    assert!(!out.used_fallback);
    assert_fully_invested(&out);
    assert_within_box(&out, dec!(0.8));
    // (r_i + c_i * side - nu) / (2 * lambda * 0.04) with nu = -0.027
    assert!((out.weights["A"] - dec!(0.4)).abs() < dec!(0.0001));
    assert!((out.weights["B"] - dec!(0.33125)).abs() < dec!(0.0001));
    assert!((out.turnover - dec!(0.6)).abs() < dec!(0.0001));
}

#[test]
fn test_idempotent() {
    let input = three_name_input(dec!(0.25));
    let first = optimize(&input).unwrap().result;
    let second = optimize(&input).unwrap().result;
    assert_eq!(first.weights, second.weights);
    assert_eq!(first.solver_status, second.solver_status);
    assert_eq!(first.iterations, second.iterations);
}

#[test]
fn test_identical_names_from_empty_book_split_evenly() {
    let mut input = three_name_input(dec!(1));
    input.previous_weights = InstrumentMap::new();
    input.expected_returns = map(&[("A", dec!(0.05)), ("B", dec!(0.05)), ("C", dec!(0.05))]);
    let out = optimize(&input).unwrap().result;
    assert!(!out.used_fallback);
    for w in out.weights.values() {
        assert!((*w - dec!(1) / dec!(3)).abs() < dec!(0.0001));
    }
}

/// Deterministic pseudo-random daily return in [-0.01, 0.01].
fn next_return(state: &mut u64) -> Decimal {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    let draw = ((*state >> 33) % 2001) as i64 - 1000;
    Decimal::new(draw, 5)
}

/// Twelve names in four sectors driven by a common market factor, with a
/// partial previous book in the first six names.
fn twelve_name_input(seed: u64) -> OptimizationInput {
    let ids: Vec<String> = (0..12).map(|i| format!("N{:02}", i)).collect();
    let betas: Vec<Decimal> = (0..12).map(|i| dec!(0.6) + Decimal::new(i, 1)).collect();

    let mut state = seed;
    let returns: Vec<Vec<Decimal>> = (0..60)
        .map(|_| {
            let market = next_return(&mut state);
            betas
                .iter()
                .map(|b| *b * market + next_return(&mut state) / dec!(2))
                .collect()
        })
        .collect();
    let covariance = shrink_cov(
        &ReturnHistory {
            instruments: ids.clone(),
            returns,
            dates: None,
        },
        dec!(0.1),
    )
    .unwrap();

    let sectors = ["Tech", "Energy", "Health", "Utilities"];
    OptimizationInput {
        covariance,
        expected_returns: ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), dec!(0.03) + Decimal::new((i as i64 * 7) % 12, 2)))
            .collect(),
        previous_weights: ids.iter().take(6).map(|id| (id.clone(), dec!(0.1))).collect(),
        sector_map: ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), sectors[i % 4].to_string()))
            .collect(),
        cost_rates: ids.iter().map(|id| (id.clone(), dec!(0.002))).collect(),
        max_weight_per_name: dec!(0.15),
        max_weight_per_sector: dec!(0.35),
        turnover_budget: dec!(1),
        cash_min: None,
        risk_aversion: None,
        include_cash_asset: None,
        impact_rates: None,
        solver: None,
    }
}

#[test]
fn test_correlated_twelve_name_book_respects_every_constraint() {
    for seed in [7u64, 42, 2024] {
        let input = twelve_name_input(seed);
        let out = optimize(&input).unwrap().result;

        assert!(!out.used_fallback, "seed {}: {:?}", seed, out.fallback_reason);
        assert_fully_invested(&out);
        assert_within_box(&out, dec!(0.15));
        assert_eq!(out.sector_weights.len(), 4);
        for (sector, w) in &out.sector_weights {
            assert!(*w <= dec!(0.35) + TOL, "seed {}: sector {} at {}", seed, sector, w);
        }

        let l1: Decimal = out
            .weights
            .iter()
            .map(|(id, w)| {
                let prev = input.previous_weights.get(id).copied().unwrap_or(Decimal::ZERO);
                (*w - prev).abs()
            })
            .sum();
        assert!(l1 <= dec!(2) * input.turnover_budget + TOL, "seed {}: L1 {}", seed, l1);

        let again = optimize(&input).unwrap().result;
        assert_eq!(out.weights, again.weights);
    }
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

#[test]
fn test_unreachable_turnover_budget_falls_back() {
    // Reaching full investment with names capped at 0.8 from 100% in A
    // needs at least 0.2 of one-way turnover, so 0.05 has no solution.
    let out = optimize(&three_name_input(dec!(0.05))).unwrap();
    let r = &out.result;
    assert!(r.used_fallback);
    assert_eq!(r.solver_status, SolverStatus::PrimalInfeasible);
    assert!(r.fallback_reason.is_some());
    assert_fully_invested(r);
    assert_within_box(r, dec!(0.8));
    assert!(out.warnings.iter().any(|w| w.contains("fallback")));
}

#[test]
fn test_zero_sector_cap_falls_back_to_equal_weight() {
    let mut input = three_name_input(dec!(0.25));
    input.max_weight_per_sector = Decimal::ZERO;
    let r = optimize(&input).unwrap().result;
    assert!(r.used_fallback);
    assert_fully_invested(&r);
    assert_within_box(&r, dec!(0.8));
    let third = Decimal::ONE / dec!(3);
    for w in r.weights.values() {
        assert!((*w - third).abs() < TOL);
    }
}

#[test]
fn test_fallback_reports_consistent_analytics() {
    let mut input = three_name_input(dec!(0.25));
    input.max_weight_per_sector = Decimal::ZERO;
    let r = optimize(&input).unwrap().result;
    let expected_vol = ex_ante_vol(&r.weights, &input.covariance).unwrap();
    assert_eq!(r.ex_ante_volatility, expected_vol);
    assert_eq!(r.trades.len(), 3);
}

// ---------------------------------------------------------------------------
// Ex-ante volatility
// ---------------------------------------------------------------------------

#[test]
fn test_single_name_vol_scales_by_root_252() {
    let cov = CovarianceMatrix {
        instruments: vec!["A".into(), "B".into(), "C".into()],
        values: vec![
            vec![dec!(0.0001), dec!(0), dec!(0)],
            vec![dec!(0), dec!(0.0002), dec!(0)],
            vec![dec!(0), dec!(0), dec!(0.0003)],
        ],
    };
    let vol = ex_ante_vol(&map(&[("A", dec!(1))]), &cov).unwrap();
    // 0.01 * sqrt(252)
    assert!((vol - dec!(0.158745079)).abs() < dec!(0.000001));
}
