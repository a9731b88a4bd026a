use clap::Args;
use serde::Deserialize;
use serde_json::Value;

use portfolio_core::portfolio_optimizer::{self, OptimizationInput, QpProblem, SolverSettings};

use crate::input;

#[derive(Args)]
pub struct OptimizeArgs {
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Args)]
pub struct SolveQpArgs {
    /// QP in the form min 1/2 x'Px + q'x s.t. l <= Ax <= u, plus optional settings
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Deserialize)]
struct SolveQpInput {
    problem: QpProblem,
    #[serde(default)]
    settings: SolverSettings,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let opt_input: OptimizationInput = input::load(args.input.as_deref(), "portfolio optimization")?;
    let result = portfolio_optimizer::optimize(&opt_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_solve_qp(args: SolveQpArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let qp: SolveQpInput = input::load(args.input.as_deref(), "QP solve")?;
    let solution = portfolio_optimizer::solve_qp(&qp.problem, &qp.settings)?;
    Ok(serde_json::to_value(solution)?)
}
