pub mod constraints;
pub mod mean_variance;
pub mod qp_solver;
pub mod transaction_costs;

pub use constraints::{l1_change, sector_weights, turnover, SectorCap, WeightConstraints};
pub use mean_variance::{
    fallback_weights, optimize, OptimizationInput, OptimizationOutput, Trade, TradeSide,
    CASH_INSTRUMENT, DEFAULT_CASH_MIN, DEFAULT_RISK_AVERSION, TRADE_THRESHOLD,
    VERIFICATION_TOLERANCE,
};
pub use qp_solver::{solve_qp, QpProblem, QpSolution, SolverSettings, SolverStatus};
pub use transaction_costs::{
    estimate_transaction_cost, linear_cost, TransactionCostEstimate, DEFAULT_IMPACT, DEFAULT_SPREAD,
};
