use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{FactorTable, InstrumentMap};
use crate::PortfolioResult;

/// Portfolio-weighted loading on one factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorExposure {
    pub factor: String,
    pub exposure: Decimal,
}

/// `loadings' * weights`, one exposure per factor column.
///
/// Only instruments present in both structures contribute; missing loadings
/// count as zero, so a factor nobody contributes to has exposure zero.
pub fn factor_exposures(
    weights: &InstrumentMap,
    loadings: &FactorTable,
) -> PortfolioResult<Vec<FactorExposure>> {
    loadings.validate()?;

    let mut totals = vec![Decimal::ZERO; loadings.factors.len()];
    for (instrument, row) in loadings.instruments.iter().zip(loadings.values.iter()) {
        let Some(w) = weights.get(instrument) else {
            continue;
        };
        for (total, cell) in totals.iter_mut().zip(row.iter()) {
            if let Some(loading) = cell {
                *total += *w * *loading;
            }
        }
    }

    Ok(loadings
        .factors
        .iter()
        .cloned()
        .zip(totals)
        .map(|(factor, exposure)| FactorExposure { factor, exposure })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn loadings() -> FactorTable {
        FactorTable {
            instruments: vec!["A".into(), "B".into(), "C".into()],
            factors: vec!["momentum".into(), "value".into()],
            values: vec![
                vec![Some(dec!(1.5)), Some(dec!(-0.5))],
                vec![Some(dec!(-1.0)), None],
                vec![Some(dec!(0.2)), Some(dec!(1.0))],
            ],
        }
    }

    fn weights(items: &[(&str, Decimal)]) -> InstrumentMap {
        items.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_weighted_exposures() {
        let exp = factor_exposures(
            &weights(&[("A", dec!(0.5)), ("B", dec!(0.3)), ("C", dec!(0.2))]),
            &loadings(),
        )
        .unwrap();
        // momentum = 0.75 - 0.3 + 0.04
        assert_eq!(exp[0].factor, "momentum");
        assert_eq!(exp[0].exposure, dec!(0.49));
        // value = -0.25 + (B missing) + 0.2
        assert_eq!(exp[1].exposure, dec!(-0.05));
    }

    #[test]
    fn test_instruments_outside_loadings_ignored() {
        let exp = factor_exposures(&weights(&[("A", dec!(0.5)), ("CASH", dec!(0.5))]), &loadings())
            .unwrap();
        assert_eq!(exp[0].exposure, dec!(0.75));
    }

    #[test]
    fn test_no_overlap_is_zero() {
        let exp = factor_exposures(&weights(&[("Z", dec!(1))]), &loadings()).unwrap();
        assert!(exp.iter().all(|e| e.exposure.is_zero()));
    }
}
