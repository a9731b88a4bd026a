use clap::Args;
use serde_json::Value;

use portfolio_core::pipeline::{self, PipelineInput};

use crate::input;

#[derive(Args)]
pub struct PipelineArgs {
    /// Fundamentals panel, return history, holdings and constraints
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_pipeline(args: PipelineArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let pipeline_input: PipelineInput = input::load(args.input.as_deref(), "rebalance pipeline")?;
    let result = pipeline::run_pipeline(&pipeline_input)?;
    Ok(serde_json::to_value(result)?)
}
