use clap::Args;
use serde::Deserialize;
use serde_json::Value;

use portfolio_core::risk_estimator::{self, ReturnHistory, RiskReportInput};
use portfolio_core::InstrumentMap;
use rust_decimal::Decimal;

use crate::input;

#[derive(Args)]
pub struct RiskArgs {
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Args)]
pub struct CovarianceArgs {
    #[arg(long)]
    pub input: Option<String>,
    /// Shrinkage intensity towards the scaled identity, in [0, 1]
    #[arg(long)]
    pub shrink: Option<Decimal>,
}

#[derive(Args)]
pub struct StressArgs {
    /// Instrument -> market value map
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Deserialize)]
struct StressInput {
    positions: InstrumentMap,
}

pub fn run_risk(args: RiskArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let report_input: RiskReportInput = input::load(args.input.as_deref(), "risk report")?;
    let result = risk_estimator::run_risk_report(&report_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_covariance(args: CovarianceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let history: ReturnHistory = input::load(args.input.as_deref(), "covariance estimation")?;
    let intensity = args
        .shrink
        .unwrap_or(risk_estimator::DEFAULT_SHRINK_INTENSITY);
    let cov = risk_estimator::shrink_cov(&history, intensity)?;
    Ok(serde_json::to_value(cov)?)
}

pub fn run_stress(args: StressArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let stress_input: StressInput = input::load(args.input.as_deref(), "stress scenarios")?;
    let impacts = risk_estimator::stress_scenarios(&stress_input.positions)?;
    Ok(serde_json::to_value(impacts)?)
}
