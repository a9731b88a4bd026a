use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::standardize::{fill_missing, fill_with_median, standardize_dense};
use crate::error::PortfolioError;
use crate::types::{FactorTable, InstrumentId, Money, Rate};
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The five cross-sectional style factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleFactor {
    /// Small-cap tilt: negative z-score of ln(1 + market cap)
    Size,
    /// Earnings and book yield
    Value,
    /// ROE plus gross margin
    Quality,
    /// 12-1 month momentum
    Momentum,
    /// Negative 60-day realized volatility
    LowVol,
}

impl StyleFactor {
    pub const ALL: [StyleFactor; 5] = [
        StyleFactor::Size,
        StyleFactor::Value,
        StyleFactor::Quality,
        StyleFactor::Momentum,
        StyleFactor::LowVol,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StyleFactor::Size => "size",
            StyleFactor::Value => "value",
            StyleFactor::Quality => "quality",
            StyleFactor::Momentum => "momentum",
            StyleFactor::LowVol => "low_vol",
        }
    }
}

/// Raw fundamentals and price statistics for one instrument. Every field is
/// optional; missing data is filled per factor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalsRecord {
    pub instrument: InstrumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pe_ratio: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pb_ratio: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roe: Option<Rate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_margin: Option<Rate>,
    /// Annualized 60-day realized volatility
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility_60d: Option<Rate>,
    /// Trailing 12-month total return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_12m: Option<Rate>,
    /// Trailing 1-month total return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_1m: Option<Rate>,
}

/// How a factor's missing proxies were filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillPolicy {
    Median,
    Zero,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Build the standardized style-factor table for a panel of instruments.
///
/// Columns are size, value, quality, momentum, low_vol, in that order. Every
/// cell is observed: invalid or missing raw data is treated as missing and
/// filled (median, or zero for momentum) before standardizing. An empty panel
/// yields an empty table.
pub fn compute_factors(panel: &[FundamentalsRecord]) -> PortfolioResult<FactorTable> {
    compute_factors_with_diagnostics(panel).map(|(table, _)| table)
}

/// `compute_factors` plus the names of factors whose raw proxy was missing
/// for every instrument (and therefore filled entirely by fallback).
pub(crate) fn compute_factors_with_diagnostics(
    panel: &[FundamentalsRecord],
) -> PortfolioResult<(FactorTable, Vec<String>)> {
    validate_panel(panel)?;

    let proxies: Vec<(StyleFactor, Vec<Option<Decimal>>, FillPolicy)> = vec![
        (
            StyleFactor::Size,
            panel.iter().map(size_proxy).collect(),
            FillPolicy::Median,
        ),
        (
            StyleFactor::Value,
            panel.iter().map(value_proxy).collect(),
            FillPolicy::Median,
        ),
        (
            StyleFactor::Quality,
            panel.iter().map(quality_proxy).collect(),
            FillPolicy::Median,
        ),
        (
            StyleFactor::Momentum,
            panel.iter().map(momentum_proxy).collect(),
            FillPolicy::Zero,
        ),
        (
            StyleFactor::LowVol,
            panel.iter().map(low_vol_proxy).collect(),
            FillPolicy::Median,
        ),
    ];

    let mut empty_columns = Vec::new();
    let mut columns: Vec<Vec<Decimal>> = Vec::with_capacity(proxies.len());
    for (factor, raw, policy) in &proxies {
        if !panel.is_empty() && raw.iter().all(Option::is_none) {
            empty_columns.push(factor.name().to_string());
        }
        let filled = match policy {
            FillPolicy::Median => fill_with_median(raw),
            FillPolicy::Zero => fill_missing(raw, Decimal::ZERO),
        };
        let mut z = standardize_dense(&filled);
        if *factor == StyleFactor::Size {
            // Larger caps score lower
            for v in z.iter_mut() {
                *v = -*v;
            }
        }
        columns.push(z);
    }

    let values = (0..panel.len())
        .map(|i| columns.iter().map(|col| Some(col[i])).collect())
        .collect();

    let table = FactorTable {
        instruments: panel.iter().map(|r| r.instrument.clone()).collect(),
        factors: StyleFactor::ALL.iter().map(|f| f.name().to_string()).collect(),
        values,
    };
    Ok((table, empty_columns))
}

// ---------------------------------------------------------------------------
// Raw proxies
// ---------------------------------------------------------------------------

/// ln(1 + market cap); non-positive caps are missing.
fn size_proxy(r: &FundamentalsRecord) -> Option<Decimal> {
    r.market_cap
        .filter(|cap| *cap > Decimal::ZERO)
        .map(|cap| (Decimal::ONE + cap).ln())
}

/// Mean of earnings yield (1/PE) and book yield (1/PB) over the ratios that
/// are positive.
fn value_proxy(r: &FundamentalsRecord) -> Option<Decimal> {
    let yields: Vec<Decimal> = [r.pe_ratio, r.pb_ratio]
        .iter()
        .flatten()
        .filter(|ratio| **ratio > Decimal::ZERO)
        .map(|ratio| Decimal::ONE / *ratio)
        .collect();
    if yields.is_empty() {
        return None;
    }
    Some(yields.iter().sum::<Decimal>() / Decimal::from(yields.len() as i64))
}

fn quality_proxy(r: &FundamentalsRecord) -> Option<Decimal> {
    Some(r.roe? + r.gross_margin?)
}

/// 12-1 momentum: skip the most recent month.
fn momentum_proxy(r: &FundamentalsRecord) -> Option<Decimal> {
    Some(r.return_12m? - r.return_1m?)
}

fn low_vol_proxy(r: &FundamentalsRecord) -> Option<Decimal> {
    r.volatility_60d.filter(|v| *v >= Decimal::ZERO).map(|v| -v)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_panel(panel: &[FundamentalsRecord]) -> PortfolioResult<()> {
    let mut seen = HashSet::with_capacity(panel.len());
    for (i, record) in panel.iter().enumerate() {
        if record.instrument.trim().is_empty() {
            return Err(PortfolioError::InvalidInput {
                field: format!("panel[{}].instrument", i),
                reason: "Instrument identifier must be non-empty".into(),
            });
        }
        if !seen.insert(record.instrument.as_str()) {
            return Err(PortfolioError::InvalidInput {
                field: format!("panel[{}].instrument", i),
                reason: format!("Duplicate instrument '{}'", record.instrument),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(id: &str) -> FundamentalsRecord {
        FundamentalsRecord {
            instrument: id.into(),
            market_cap: Some(dec!(1000000000)),
            pe_ratio: Some(dec!(20)),
            pb_ratio: Some(dec!(4)),
            roe: Some(dec!(0.15)),
            gross_margin: Some(dec!(0.40)),
            volatility_60d: Some(dec!(0.25)),
            return_12m: Some(dec!(0.20)),
            return_1m: Some(dec!(0.02)),
        }
    }

    fn sample_panel() -> Vec<FundamentalsRecord> {
        let mut big = record("BIG");
        big.market_cap = Some(dec!(2000000000000));
        big.pe_ratio = Some(dec!(35));
        big.volatility_60d = Some(dec!(0.18));
        big.return_12m = Some(dec!(0.40));

        let mut small = record("SMALL");
        small.market_cap = Some(dec!(500000000));
        small.pe_ratio = Some(dec!(8));
        small.pb_ratio = Some(dec!(1));
        small.volatility_60d = Some(dec!(0.55));
        small.return_12m = Some(dec!(-0.10));

        let mid = record("MID");
        vec![big, small, mid]
    }

    fn cell(table: &FactorTable, id: &str, factor: StyleFactor) -> Decimal {
        table.get(id, factor.name()).unwrap()
    }

    #[test]
    fn test_factor_columns_in_order() {
        let table = compute_factors(&sample_panel()).unwrap();
        assert_eq!(
            table.factors,
            vec!["size", "value", "quality", "momentum", "low_vol"]
        );
        assert_eq!(table.instruments, vec!["BIG", "SMALL", "MID"]);
    }

    #[test]
    fn test_size_favours_small_caps() {
        let table = compute_factors(&sample_panel()).unwrap();
        assert!(cell(&table, "SMALL", StyleFactor::Size) > cell(&table, "BIG", StyleFactor::Size));
    }

    #[test]
    fn test_value_favours_cheap_names() {
        let table = compute_factors(&sample_panel()).unwrap();
        assert!(cell(&table, "SMALL", StyleFactor::Value) > cell(&table, "BIG", StyleFactor::Value));
    }

    #[test]
    fn test_low_vol_favours_quiet_names() {
        let table = compute_factors(&sample_panel()).unwrap();
        assert!(
            cell(&table, "BIG", StyleFactor::LowVol) > cell(&table, "SMALL", StyleFactor::LowVol)
        );
    }

    #[test]
    fn test_momentum_skips_last_month() {
        let mut a = record("A");
        a.return_12m = Some(dec!(0.30));
        a.return_1m = Some(dec!(0.25)); // 12-1 = 0.05
        let mut b = record("B");
        b.return_12m = Some(dec!(0.20));
        b.return_1m = Some(dec!(0.00)); // 12-1 = 0.20
        let table = compute_factors(&[a, b]).unwrap();
        assert!(cell(&table, "B", StyleFactor::Momentum) > cell(&table, "A", StyleFactor::Momentum));
    }

    #[test]
    fn test_columns_are_standardized() {
        let table = compute_factors(&sample_panel()).unwrap();
        for f in StyleFactor::ALL {
            let col: Vec<Decimal> = table.column(f.name()).unwrap().into_iter().flatten().collect();
            assert_eq!(col.len(), 3);
            let mean: Decimal = col.iter().sum::<Decimal>() / dec!(3);
            assert!(mean.abs() < dec!(0.000001), "{} mean = {}", f.name(), mean);
        }
    }

    #[test]
    fn test_invalid_ratios_are_excluded_from_value() {
        let mut neg = record("NEG");
        neg.pe_ratio = Some(dec!(-5));
        neg.pb_ratio = Some(dec!(2));
        // Only book yield survives: 1/2
        assert_eq!(value_proxy(&neg), Some(dec!(0.5)));

        let mut zero = record("ZERO");
        zero.pe_ratio = Some(Decimal::ZERO);
        zero.pb_ratio = None;
        assert_eq!(value_proxy(&zero), None);
    }

    #[test]
    fn test_zero_market_cap_is_missing() {
        let mut r = record("X");
        r.market_cap = Some(Decimal::ZERO);
        assert_eq!(size_proxy(&r), None);
    }

    #[test]
    fn test_missing_data_filled_not_propagated() {
        let mut sparse = record("SPARSE");
        sparse.market_cap = None;
        sparse.roe = None;
        sparse.return_12m = None;
        sparse.volatility_60d = None;
        let mut panel = sample_panel();
        panel.push(sparse);
        let table = compute_factors(&panel).unwrap();
        for f in StyleFactor::ALL {
            assert!(table.get("SPARSE", f.name()).is_some(), "{} missing", f.name());
        }
    }

    #[test]
    fn test_momentum_missing_filled_with_zero_raw() {
        // Missing momentum sits at raw 0, between -0.10 and +0.30
        let mut a = record("A");
        a.return_12m = Some(dec!(0.30));
        a.return_1m = Some(Decimal::ZERO);
        let mut b = record("B");
        b.return_12m = Some(dec!(-0.10));
        b.return_1m = Some(Decimal::ZERO);
        let mut c = record("C");
        c.return_12m = None;
        let table = compute_factors(&[a, b, c]).unwrap();
        let m_c = cell(&table, "C", StyleFactor::Momentum);
        assert!(m_c < cell(&table, "A", StyleFactor::Momentum));
        assert!(m_c > cell(&table, "B", StyleFactor::Momentum));
    }

    #[test]
    fn test_all_missing_column_reports_and_zeroes() {
        let panel: Vec<FundamentalsRecord> = ["A", "B"]
            .iter()
            .map(|id| FundamentalsRecord {
                instrument: id.to_string(),
                ..Default::default()
            })
            .collect();
        let (table, empty) = compute_factors_with_diagnostics(&panel).unwrap();
        assert_eq!(empty.len(), 5);
        for row in &table.values {
            for v in row {
                assert_eq!(*v, Some(Decimal::ZERO));
            }
        }
    }

    #[test]
    fn test_empty_panel() {
        let table = compute_factors(&[]).unwrap();
        assert!(table.instruments.is_empty());
        assert!(table.values.is_empty());
        assert_eq!(table.factors.len(), 5);
    }

    #[test]
    fn test_duplicate_instrument_rejected() {
        let panel = vec![record("A"), record("A")];
        assert!(compute_factors(&panel).is_err());
    }
}
