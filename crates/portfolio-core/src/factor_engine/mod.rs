pub mod composite;
pub mod standardize;
pub mod style_factors;

pub use composite::{
    blend_signal, default_factor_weights, signal_to_expected_returns, CompositeSignal,
    ReturnMapping,
};
pub use standardize::{
    fill_missing, fill_with_median, median, standardize, standardize_dense, standardize_sample,
};
pub use style_factors::{compute_factors, FundamentalsRecord, StyleFactor};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::types::{with_metadata, ComputationOutput, FactorTable, InstrumentMap};
use crate::PortfolioResult;

/// Input for the factor signal run: panel in, composite and expected returns out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorSignalInput {
    pub panel: Vec<FundamentalsRecord>,
    /// Factor name -> blend weight (default: momentum-led blend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_weights: Option<BTreeMap<String, Decimal>>,
    /// Signal to expected-return mapping (default: 5% +/- 10% per sigma)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_mapping: Option<ReturnMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorSignalOutput {
    pub factors: FactorTable,
    pub composite: CompositeSignal,
    pub expected_returns: InstrumentMap,
}

/// Compute style factors, blend them and map the composite to expected returns.
pub fn run_factor_signal(
    input: &FactorSignalInput,
) -> PortfolioResult<ComputationOutput<FactorSignalOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let (factors, empty_columns) = style_factors::compute_factors_with_diagnostics(&input.panel)?;
    for name in &empty_columns {
        warnings.push(format!(
            "Factor '{}' had no valid observations; filled with 0",
            name
        ));
    }
    if input.panel.len() < 2 {
        warnings.push(format!(
            "Cross-section of {} instrument(s) is too small for meaningful z-scores",
            input.panel.len()
        ));
    }

    let weights = input
        .factor_weights
        .clone()
        .unwrap_or_else(default_factor_weights);
    let composite = blend_signal(&factors, &weights)?;
    for name in &composite.ignored_factors {
        warnings.push(format!("Unknown factor '{}' in weights ignored", name));
    }

    let mapping = input.return_mapping.clone().unwrap_or_default();
    let expected_returns = signal_to_expected_returns(&composite.to_map(), &mapping);

    let output = FactorSignalOutput {
        factors,
        composite,
        expected_returns,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Cross-sectional style factors (z-scored) blended into a composite signal",
        &serde_json::json!({
            "n_instruments": input.panel.len(),
            "factor_weights": weights.iter().map(|(k, v)| (k.clone(), v.to_string())).collect::<BTreeMap<_, _>>(),
            "base_return": mapping.base_return.to_string(),
            "return_per_sigma": mapping.return_per_sigma.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}
