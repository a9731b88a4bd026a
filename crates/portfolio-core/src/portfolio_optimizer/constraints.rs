use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use super::qp_solver::QpProblem;
use crate::types::Weight;

/// Slack used when checking whether a constraint set is trivially empty.
const CAPACITY_TOLERANCE: Decimal = dec!(0.000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Cap on the summed weight of one sector.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorCap {
    pub sector: String,
    pub members: Vec<usize>,
    pub cap: Weight,
}

/// Feasible set of one rebalance, in the index space of the optimizer
/// universe:
///
/// - `sum(w) = 1`
/// - `lower[i] <= w[i] <= upper[i]`
/// - `sum(w[s]) <= cap` for every capped sector
/// - `sum |w[i] - previous[i]| <= max_l1_change`
#[derive(Debug, Clone)]
pub struct WeightConstraints {
    pub lower: Vec<Weight>,
    pub upper: Vec<Weight>,
    pub sector_caps: Vec<SectorCap>,
    pub previous: Vec<Weight>,
    pub max_l1_change: Decimal,
}

impl WeightConstraints {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Lift the problem into `x = [w; u]` with `u[i] >= |w[i] - previous[i]|`.
    ///
    /// `risk` is the Hessian block on `w` (already `2 * lambda * Sigma`),
    /// `linear` the linear term on `w` and `costs` the per-unit trading cost
    /// charged on `u`.
    pub fn to_qp(&self, risk: &[Vec<Decimal>], linear: &[Decimal], costs: &[Decimal]) -> QpProblem {
        let n = self.len();
        let dim = 2 * n;

        let mut p = vec![vec![Decimal::ZERO; dim]; dim];
        for (i, row) in risk.iter().enumerate() {
            p[i][..n].copy_from_slice(row);
        }
        let q: Vec<Decimal> = linear.iter().chain(costs.iter()).copied().collect();

        let mut a: Vec<Vec<Decimal>> = Vec::new();
        let mut lower: Vec<Option<Decimal>> = Vec::new();
        let mut upper: Vec<Option<Decimal>> = Vec::new();
        let mut push = |coeffs: Vec<(usize, Decimal)>, l: Option<Decimal>, u: Option<Decimal>| {
            let mut row = vec![Decimal::ZERO; dim];
            for (j, c) in coeffs {
                row[j] = c;
            }
            a.push(row);
            lower.push(l);
            upper.push(u);
        };

        // Fully invested
        push(
            (0..n).map(|i| (i, Decimal::ONE)).collect(),
            Some(Decimal::ONE),
            Some(Decimal::ONE),
        );
        for i in 0..n {
            push(vec![(i, Decimal::ONE)], Some(self.lower[i]), Some(self.upper[i]));
        }
        for sc in &self.sector_caps {
            push(
                sc.members.iter().map(|&i| (i, Decimal::ONE)).collect(),
                None,
                Some(sc.cap),
            );
        }
        // u - w >= -prev and u + w >= prev
        for i in 0..n {
            push(
                vec![(n + i, Decimal::ONE), (i, -Decimal::ONE)],
                Some(-self.previous[i]),
                None,
            );
            push(
                vec![(n + i, Decimal::ONE), (i, Decimal::ONE)],
                Some(self.previous[i]),
                None,
            );
        }
        push(
            (0..n).map(|i| (n + i, Decimal::ONE)).collect(),
            None,
            Some(self.max_l1_change),
        );

        QpProblem {
            p,
            q,
            a,
            lower,
            upper,
        }
    }

    /// Cheap emptiness checks run before solving. Returns the reason when the
    /// feasible set is provably empty.
    pub fn infeasibility(&self) -> Option<String> {
        let total_lower: Decimal = self.lower.iter().sum();
        if total_lower > Decimal::ONE + CAPACITY_TOLERANCE {
            return Some(format!("Minimum weights sum to {} > 1", total_lower));
        }

        let total_upper: Decimal = self.upper.iter().sum();
        if total_upper < Decimal::ONE - CAPACITY_TOLERANCE {
            return Some(format!(
                "Name caps admit at most {} of capital",
                total_upper.normalize()
            ));
        }

        let mut capped = vec![false; self.len()];
        let mut capacity = Decimal::ZERO;
        for sc in &self.sector_caps {
            let member_lower: Decimal = sc.members.iter().map(|&i| self.lower[i]).sum();
            if member_lower > sc.cap + CAPACITY_TOLERANCE {
                return Some(format!(
                    "Minimum weights in sector '{}' exceed its cap {}",
                    sc.sector, sc.cap
                ));
            }
            let member_upper: Decimal = sc.members.iter().map(|&i| self.upper[i]).sum();
            capacity += member_upper.min(sc.cap);
            for &i in &sc.members {
                capped[i] = true;
            }
        }
        capacity += (0..self.len())
            .filter(|&i| !capped[i])
            .map(|i| self.upper[i])
            .sum::<Decimal>();
        if capacity < Decimal::ONE - CAPACITY_TOLERANCE {
            return Some(format!(
                "Sector and name caps admit at most {} of capital",
                capacity.normalize()
            ));
        }

        let required = self.min_l1_change();
        if required > self.max_l1_change + CAPACITY_TOLERANCE {
            return Some(format!(
                "Turnover budget allows {} one-way but bounds force at least {}",
                (self.max_l1_change / dec!(2)).normalize(),
                (required / dec!(2)).normalize()
            ));
        }
        None
    }

    /// Lower bound on `sum |w - previous|` over weights meeting the budget and
    /// the name bounds. Sells must cover the excess above caps, buys the
    /// shortfall below floors, and the two differ by `1 - sum(previous)`.
    fn min_l1_change(&self) -> Decimal {
        let inflow = Decimal::ONE - self.previous.iter().sum::<Decimal>();
        let forced_sells: Decimal = self
            .previous
            .iter()
            .zip(self.upper.iter())
            .map(|(p, u)| (*p - *u).max(Decimal::ZERO))
            .sum();
        let forced_buys: Decimal = self
            .previous
            .iter()
            .zip(self.lower.iter())
            .map(|(p, l)| (*l - *p).max(Decimal::ZERO))
            .sum();
        let sells = forced_sells
            .max(forced_buys - inflow)
            .max(-inflow)
            .max(Decimal::ZERO);
        dec!(2) * sells + inflow
    }

    /// Describe every constraint `w` breaks by more than `tol`.
    pub fn violations(&self, w: &[Weight], tol: Decimal) -> Vec<String> {
        let mut out = Vec::new();
        let total: Decimal = w.iter().sum();
        if (total - Decimal::ONE).abs() > tol {
            out.push(format!("Weights sum to {}", total));
        }
        for (i, wi) in w.iter().enumerate() {
            if *wi < self.lower[i] - tol || *wi > self.upper[i] + tol {
                out.push(format!(
                    "Weight {} at index {} outside [{}, {}]",
                    wi, i, self.lower[i], self.upper[i]
                ));
            }
        }
        for sc in &self.sector_caps {
            let s: Decimal = sc.members.iter().map(|&i| w[i]).sum();
            if s > sc.cap + tol {
                out.push(format!("Sector '{}' at {} above cap {}", sc.sector, s, sc.cap));
            }
        }
        let l1 = l1_change(w, &self.previous);
        if l1 > self.max_l1_change + tol {
            out.push(format!(
                "Total change {} above limit {}",
                l1, self.max_l1_change
            ));
        }
        out
    }

    /// Snap solver noise back into the name bounds.
    pub fn clip_to_bounds(&self, w: &mut [Weight]) {
        for (i, wi) in w.iter_mut().enumerate() {
            *wi = (*wi).clamp(self.lower[i], self.upper[i]);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `sum |a - b|`
pub fn l1_change(a: &[Weight], b: &[Weight]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| (*x - *y).abs()).sum()
}

/// One-way turnover: half the L1 change.
pub fn turnover(w: &[Weight], previous: &[Weight]) -> Weight {
    l1_change(w, previous) / dec!(2)
}

/// Group instrument indices by sector label (ordered by label) and attach
/// one cap to every group. Indices in `exempt` get no sector row.
pub fn sector_caps(labels: &[String], cap: Weight, exempt: Option<usize>) -> Vec<SectorCap> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        if Some(i) == exempt {
            continue;
        }
        groups.entry(label.as_str()).or_default().push(i);
    }
    groups
        .into_iter()
        .map(|(sector, members)| SectorCap {
            sector: sector.to_string(),
            members,
            cap,
        })
        .collect()
}

/// Summed weight per sector label.
pub fn sector_weights(labels: &[String], w: &[Weight]) -> BTreeMap<String, Weight> {
    let mut out: BTreeMap<String, Weight> = BTreeMap::new();
    for (label, wi) in labels.iter().zip(w.iter()) {
        *out.entry(label.clone()).or_insert(Decimal::ZERO) += *wi;
    }
    out
}
