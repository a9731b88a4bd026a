use clap::Args;
use serde_json::Value;

use portfolio_core::factor_engine::{self, FactorSignalInput};

use crate::input;

#[derive(Args)]
pub struct FactorsArgs {
    /// Fundamentals panel, optional factor weights and return mapping (JSON or YAML)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_factors(args: FactorsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let signal_input: FactorSignalInput =
        input::load(args.input.as_deref(), "factor signal computation")?;
    let result = factor_engine::run_factor_signal(&signal_input)?;
    Ok(serde_json::to_value(result)?)
}
