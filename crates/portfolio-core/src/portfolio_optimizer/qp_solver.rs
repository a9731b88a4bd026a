//! Operator-splitting (ADMM) solver for convex quadratic programs of the form
//!
//! ```text
//! minimize    0.5 * x'Px + q'x
//! subject to  l <= Ax <= u
//! ```
//!
//! The iteration follows the OSQP scheme: one cached solve against
//! `P + sigma*I + A' diag(rho) A` per step, over-relaxation, projection onto
//! the bound box and a dual ascent step. Convergence and primal infeasibility
//! are checked on a fixed schedule, and a converged iterate can be refined by
//! solving the KKT system restricted to the detected active set.
//!
//! All state is owned by a single call; there is nothing shared between
//! solves.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PortfolioError;
use crate::linalg::{mat_inverse, mat_vec_multiply, norm_inf, sqrt_decimal};
use crate::PortfolioResult;

const RHO_MIN: Decimal = dec!(0.000001);
const RHO_MAX: Decimal = dec!(1000000);
/// Step-size multiplier on equality rows.
const RHO_EQ_SCALE: Decimal = dec!(1000);
/// Refactor only when the suggested step size moves by more than this factor.
const RHO_ADAPT_FACTOR: Decimal = dec!(5);
const RATIO_FLOOR: Decimal = dec!(0.000000000001);
/// Tolerance multiplier for reporting an inaccurate solution at the iteration cap.
const INACCURATE_FACTOR: Decimal = dec!(10);
/// Iterates beyond this magnitude are treated as divergence.
const DIVERGENCE_LIMIT: Decimal = dec!(1000000000000000);
const DELTA_Y_FLOOR: Decimal = dec!(0.00000000000000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Termination state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Solved,
    /// Residuals within 10x tolerance when the iteration cap was hit
    SolvedInaccurate,
    PrimalInfeasible,
    MaxIterationsReached,
    NumericalError,
}

impl SolverStatus {
    pub fn is_solved(&self) -> bool {
        matches!(self, SolverStatus::Solved | SolverStatus::SolvedInaccurate)
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolverStatus::Solved => "solved",
            SolverStatus::SolvedInaccurate => "solved_inaccurate",
            SolverStatus::PrimalInfeasible => "primal_infeasible",
            SolverStatus::MaxIterationsReached => "max_iterations_reached",
            SolverStatus::NumericalError => "numerical_error",
        };
        write!(f, "{}", s)
    }
}

/// ADMM parameters. Every field has a default, so a partial JSON object is a
/// valid override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Initial ADMM step size
    pub rho: Decimal,
    /// Primal regularization
    pub sigma: Decimal,
    /// Over-relaxation parameter in (0, 2)
    pub alpha: Decimal,
    pub max_iterations: u32,
    pub eps_abs: Decimal,
    pub eps_rel: Decimal,
    /// Tolerance of the primal infeasibility certificate
    pub eps_prim_inf: Decimal,
    /// Residuals are evaluated every `check_interval` iterations
    pub check_interval: u32,
    pub adaptive_rho: bool,
    pub adaptive_rho_interval: u32,
    /// Refine a converged iterate on its active set
    pub polish: bool,
    /// KKT regularization used while polishing
    pub polish_delta: Decimal,
    pub polish_refine_iterations: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            rho: dec!(0.1),
            sigma: dec!(0.000001),
            alpha: dec!(1.6),
            max_iterations: 20_000,
            eps_abs: dec!(0.00000001),
            eps_rel: dec!(0.00000001),
            eps_prim_inf: dec!(0.00001),
            check_interval: 5,
            adaptive_rho: true,
            adaptive_rho_interval: 25,
            polish: true,
            polish_delta: dec!(0.0000001),
            polish_refine_iterations: 5,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> PortfolioResult<()> {
        let positive = [
            ("solver.rho", self.rho),
            ("solver.sigma", self.sigma),
            ("solver.polish_delta", self.polish_delta),
        ];
        for (field, value) in positive {
            if value <= Decimal::ZERO {
                return Err(PortfolioError::InvalidInput {
                    field: field.into(),
                    reason: format!("Must be positive, got {}", value),
                });
            }
        }
        if self.alpha <= Decimal::ZERO || self.alpha >= dec!(2) {
            return Err(PortfolioError::InvalidInput {
                field: "solver.alpha".into(),
                reason: format!("Must lie in (0, 2), got {}", self.alpha),
            });
        }
        if self.eps_abs < Decimal::ZERO || self.eps_rel < Decimal::ZERO {
            return Err(PortfolioError::InvalidInput {
                field: "solver.eps_abs".into(),
                reason: "Tolerances must be non-negative".into(),
            });
        }
        if self.eps_abs.is_zero() && self.eps_rel.is_zero() {
            return Err(PortfolioError::InvalidInput {
                field: "solver.eps_abs".into(),
                reason: "At least one of eps_abs and eps_rel must be positive".into(),
            });
        }
        if self.max_iterations == 0 || self.check_interval == 0 || self.adaptive_rho_interval == 0 {
            return Err(PortfolioError::InvalidInput {
                field: "solver.max_iterations".into(),
                reason: "Iteration counts and intervals must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Dense QP data. `None` bounds are infinite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QpProblem {
    pub p: Vec<Vec<Decimal>>,
    pub q: Vec<Decimal>,
    pub a: Vec<Vec<Decimal>>,
    pub lower: Vec<Option<Decimal>>,
    pub upper: Vec<Option<Decimal>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QpSolution {
    pub x: Vec<Decimal>,
    pub y: Vec<Decimal>,
    pub status: SolverStatus,
    pub iterations: u32,
    pub polished: bool,
    pub primal_residual: Decimal,
    pub dual_residual: Decimal,
}

impl QpProblem {
    pub fn num_variables(&self) -> usize {
        self.q.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.a.len()
    }

    pub fn validate(&self) -> PortfolioResult<()> {
        let n = self.num_variables();
        let m = self.num_constraints();
        if self.p.len() != n || self.p.iter().any(|row| row.len() != n) {
            return Err(PortfolioError::DimensionMismatch {
                field: "qp.p".into(),
                expected: n,
                actual: self.p.len(),
            });
        }
        if let Some(row) = self.a.iter().find(|row| row.len() != n) {
            return Err(PortfolioError::DimensionMismatch {
                field: "qp.a".into(),
                expected: n,
                actual: row.len(),
            });
        }
        if self.lower.len() != m || self.upper.len() != m {
            return Err(PortfolioError::DimensionMismatch {
                field: "qp.bounds".into(),
                expected: m,
                actual: self.lower.len().min(self.upper.len()),
            });
        }
        for (i, (l, u)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            if let (Some(l), Some(u)) = (l, u) {
                if l > u {
                    return Err(PortfolioError::InvalidInput {
                        field: format!("qp.bounds[{}]", i),
                        reason: format!("Lower bound {} exceeds upper bound {}", l, u),
                    });
                }
            }
        }
        Ok(())
    }

    /// `0.5 x'Px + q'x`
    pub fn objective(&self, x: &[Decimal]) -> Decimal {
        let px = mat_vec_multiply(&self.p, x);
        let quad: Decimal = x.iter().zip(px.iter()).map(|(a, b)| *a * *b).sum();
        let lin: Decimal = x.iter().zip(self.q.iter()).map(|(a, b)| *a * *b).sum();
        quad / dec!(2) + lin
    }

    fn is_equality(&self, i: usize) -> bool {
        matches!((self.lower[i], self.upper[i]), (Some(l), Some(u)) if l == u)
    }

    fn clamp_row(&self, i: usize, value: Decimal) -> Decimal {
        let mut v = value;
        if let Some(l) = self.lower[i] {
            v = v.max(l);
        }
        if let Some(u) = self.upper[i] {
            v = v.min(u);
        }
        v
    }

    /// Largest distance of `Ax` outside the bound box.
    pub fn bound_violation(&self, x: &[Decimal]) -> Decimal {
        mat_vec_multiply(&self.a, x)
            .iter()
            .enumerate()
            .map(|(i, v)| (*v - self.clamp_row(i, *v)).abs())
            .fold(Decimal::ZERO, Decimal::max)
    }

    fn a_transpose_mul(&self, y: &[Decimal]) -> Vec<Decimal> {
        let mut out = vec![Decimal::ZERO; self.num_variables()];
        for (row, yi) in self.a.iter().zip(y.iter()) {
            if yi.is_zero() {
                continue;
            }
            for (o, a) in out.iter_mut().zip(row.iter()) {
                *o += *a * *yi;
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Solve the QP. Shape errors are returned; numerical trouble is reported
/// through `SolverStatus` instead.
pub fn solve_qp(problem: &QpProblem, settings: &SolverSettings) -> PortfolioResult<QpSolution> {
    problem.validate()?;
    settings.validate()?;

    let mut solution = match Admm::new(problem, settings) {
        Ok(mut admm) => admm.run(),
        Err(_) => QpSolution {
            x: vec![Decimal::ZERO; problem.num_variables()],
            y: vec![Decimal::ZERO; problem.num_constraints()],
            status: SolverStatus::NumericalError,
            iterations: 0,
            polished: false,
            primal_residual: Decimal::ZERO,
            dual_residual: Decimal::ZERO,
        },
    };

    if settings.polish && solution.status.is_solved() {
        if let Some((x, y, res)) = polish(problem, settings, &solution) {
            solution.x = x;
            solution.y = y;
            solution.status = SolverStatus::Solved;
            solution.polished = true;
            solution.primal_residual = res.primal;
            solution.dual_residual = res.dual;
        }
    }

    tracing::debug!(
        status = %solution.status,
        iterations = solution.iterations,
        polished = solution.polished,
        primal_residual = %solution.primal_residual,
        dual_residual = %solution.dual_residual,
        "qp solve finished"
    );
    Ok(solution)
}

// ---------------------------------------------------------------------------
// ADMM iteration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Residuals {
    primal: Decimal,
    dual: Decimal,
    eps_primal: Decimal,
    eps_dual: Decimal,
    primal_scale: Decimal,
    dual_scale: Decimal,
}

impl Residuals {
    fn compute(
        problem: &QpProblem,
        settings: &SolverSettings,
        x: &[Decimal],
        z: &[Decimal],
        y: &[Decimal],
    ) -> Self {
        let ax = mat_vec_multiply(&problem.a, x);
        let px = mat_vec_multiply(&problem.p, x);
        let aty = problem.a_transpose_mul(y);

        let primal_gap: Vec<Decimal> = ax.iter().zip(z.iter()).map(|(a, b)| *a - *b).collect();
        let stationarity: Vec<Decimal> = px
            .iter()
            .zip(problem.q.iter())
            .zip(aty.iter())
            .map(|((a, b), c)| *a + *b + *c)
            .collect();

        let primal_scale = norm_inf(&ax).max(norm_inf(z));
        let dual_scale = norm_inf(&px)
            .max(norm_inf(&aty))
            .max(norm_inf(&problem.q));

        Residuals {
            primal: norm_inf(&primal_gap),
            dual: norm_inf(&stationarity),
            eps_primal: settings.eps_abs + settings.eps_rel * primal_scale,
            eps_dual: settings.eps_abs + settings.eps_rel * dual_scale,
            primal_scale,
            dual_scale,
        }
    }

    fn converged(&self, factor: Decimal) -> bool {
        self.primal <= factor * self.eps_primal && self.dual <= factor * self.eps_dual
    }
}

struct Admm<'a> {
    problem: &'a QpProblem,
    settings: &'a SolverSettings,
    rho: Decimal,
    rho_vec: Vec<Decimal>,
    kkt_inverse: Vec<Vec<Decimal>>,
    x: Vec<Decimal>,
    z: Vec<Decimal>,
    y: Vec<Decimal>,
}

impl<'a> Admm<'a> {
    fn new(problem: &'a QpProblem, settings: &'a SolverSettings) -> PortfolioResult<Self> {
        let rho = settings.rho;
        let rho_vec = step_sizes(problem, rho);
        let kkt_inverse = mat_inverse(&reduced_kkt(problem, settings.sigma, &rho_vec))?;
        Ok(Admm {
            problem,
            settings,
            rho,
            rho_vec,
            kkt_inverse,
            x: vec![Decimal::ZERO; problem.num_variables()],
            z: vec![Decimal::ZERO; problem.num_constraints()],
            y: vec![Decimal::ZERO; problem.num_constraints()],
        })
    }

    fn run(&mut self) -> QpSolution {
        let s = self.settings;
        let mut last = Residuals::default();

        for iter in 1..=s.max_iterations {
            let is_check = iter % s.check_interval == 0 || iter == s.max_iterations;
            let y_prev = if is_check { Some(self.y.clone()) } else { None };

            self.step();

            let Some(y_prev) = y_prev else {
                continue;
            };
            let res = Residuals::compute(self.problem, s, &self.x, &self.z, &self.y);
            if norm_inf(&self.x) > DIVERGENCE_LIMIT || norm_inf(&self.y) > DIVERGENCE_LIMIT {
                return self.finish(SolverStatus::NumericalError, iter, &res);
            }
            if res.converged(Decimal::ONE) {
                return self.finish(SolverStatus::Solved, iter, &res);
            }
            if self.primal_infeasible(&y_prev) {
                return self.finish(SolverStatus::PrimalInfeasible, iter, &res);
            }
            if s.adaptive_rho && iter % s.adaptive_rho_interval == 0 && self.adapt_rho(&res).is_err() {
                return self.finish(SolverStatus::NumericalError, iter, &res);
            }
            last = res;
        }

        let status = if last.converged(INACCURATE_FACTOR) {
            SolverStatus::SolvedInaccurate
        } else {
            SolverStatus::MaxIterationsReached
        };
        self.finish(status, s.max_iterations, &last)
    }

    fn step(&mut self) {
        let sigma = self.settings.sigma;
        let alpha = self.settings.alpha;
        let problem = self.problem;

        let weighted: Vec<Decimal> = self
            .rho_vec
            .iter()
            .zip(self.z.iter())
            .zip(self.y.iter())
            .map(|((r, z), y)| *r * *z - *y)
            .collect();
        let at = problem.a_transpose_mul(&weighted);
        let rhs: Vec<Decimal> = self
            .x
            .iter()
            .zip(problem.q.iter())
            .zip(at.iter())
            .map(|((x, q), a)| sigma * *x - *q + *a)
            .collect();

        let x_tilde = mat_vec_multiply(&self.kkt_inverse, &rhs);
        let z_tilde = mat_vec_multiply(&problem.a, &x_tilde);

        for (x, xt) in self.x.iter_mut().zip(x_tilde.iter()) {
            *x = alpha * *xt + (Decimal::ONE - alpha) * *x;
        }
        for i in 0..problem.num_constraints() {
            let z_hat = alpha * z_tilde[i] + (Decimal::ONE - alpha) * self.z[i];
            let z_new = problem.clamp_row(i, z_hat + self.y[i] / self.rho_vec[i]);
            self.y[i] += self.rho_vec[i] * (z_hat - z_new);
            self.z[i] = z_new;
        }
    }

    /// Certificate: `A'dy ~ 0` and `u'max(dy, 0) + l'min(dy, 0) < 0`, with
    /// `dy` restricted to the directions finite bounds allow.
    fn primal_infeasible(&self, y_prev: &[Decimal]) -> bool {
        let problem = self.problem;
        let delta_y: Vec<Decimal> = self
            .y
            .iter()
            .zip(y_prev.iter())
            .enumerate()
            .map(|(i, (y, yp))| {
                let mut d = *y - *yp;
                if problem.upper[i].is_none() {
                    d = d.min(Decimal::ZERO);
                }
                if problem.lower[i].is_none() {
                    d = d.max(Decimal::ZERO);
                }
                d
            })
            .collect();

        let norm = norm_inf(&delta_y);
        if norm <= DELTA_Y_FLOOR {
            return false;
        }
        let tol = self.settings.eps_prim_inf * norm;

        let support: Decimal = delta_y
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let up = problem.upper[i].map_or(Decimal::ZERO, |u| u * (*d).max(Decimal::ZERO));
                let lo = problem.lower[i].map_or(Decimal::ZERO, |l| l * (*d).min(Decimal::ZERO));
                up + lo
            })
            .sum();
        if support >= -tol {
            return false;
        }
        norm_inf(&problem.a_transpose_mul(&delta_y)) < tol
    }

    /// Rebalance primal and dual progress by rescaling rho; refactor only on a
    /// material change.
    fn adapt_rho(&mut self, res: &Residuals) -> PortfolioResult<()> {
        let primal_rel = res.primal.checked_div(res.primal_scale.max(RATIO_FLOOR));
        let dual_rel = res.dual.checked_div(res.dual_scale.max(RATIO_FLOOR));
        let ratio = match (primal_rel, dual_rel) {
            (Some(p), Some(d)) => p.checked_div(d.max(RATIO_FLOOR)),
            _ => None,
        };
        let Some(ratio) = ratio else {
            return Ok(());
        };

        let candidate = (self.rho * sqrt_decimal(ratio)).clamp(RHO_MIN, RHO_MAX);
        if candidate > self.rho * RHO_ADAPT_FACTOR || candidate * RHO_ADAPT_FACTOR < self.rho {
            self.rho = candidate;
            self.rho_vec = step_sizes(self.problem, candidate);
            self.kkt_inverse =
                mat_inverse(&reduced_kkt(self.problem, self.settings.sigma, &self.rho_vec))?;
        }
        Ok(())
    }

    fn finish(&self, status: SolverStatus, iterations: u32, res: &Residuals) -> QpSolution {
        QpSolution {
            x: self.x.clone(),
            y: self.y.clone(),
            status,
            iterations,
            polished: false,
            primal_residual: res.primal,
            dual_residual: res.dual,
        }
    }
}

/// Per-row step sizes: stiff on equalities, negligible on free rows.
fn step_sizes(problem: &QpProblem, rho: Decimal) -> Vec<Decimal> {
    (0..problem.num_constraints())
        .map(|i| {
            if problem.is_equality(i) {
                rho * RHO_EQ_SCALE
            } else if problem.lower[i].is_none() && problem.upper[i].is_none() {
                RHO_MIN
            } else {
                rho
            }
        })
        .collect()
}

/// `P + sigma*I + A' diag(rho) A`
fn reduced_kkt(problem: &QpProblem, sigma: Decimal, rho_vec: &[Decimal]) -> Vec<Vec<Decimal>> {
    let n = problem.num_variables();
    let mut m = problem.p.clone();
    for (j, row) in m.iter_mut().enumerate() {
        row[j] += sigma;
    }
    for (row, rho) in problem.a.iter().zip(rho_vec.iter()) {
        for j in 0..n {
            if row[j].is_zero() {
                continue;
            }
            let scaled = *rho * row[j];
            for k in 0..n {
                m[j][k] += scaled * row[k];
            }
        }
    }
    m
}

// ---------------------------------------------------------------------------
// Polishing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum ActiveBound {
    Equality,
    Lower,
    Upper,
}

/// Solve the equality-constrained QP on the active set guessed from the ADMM
/// duals. Returns `None` when the polished point is infeasible, has duals of
/// the wrong sign, or is not stationary.
fn polish(
    problem: &QpProblem,
    settings: &SolverSettings,
    solution: &QpSolution,
) -> Option<(Vec<Decimal>, Vec<Decimal>, Residuals)> {
    let n = problem.num_variables();
    let m = problem.num_constraints();
    let z = mat_vec_multiply(&problem.a, &solution.x);

    let mut active: Vec<(usize, ActiveBound, Decimal)> = Vec::new();
    for i in 0..m {
        let y = solution.y[i];
        let zi = problem.clamp_row(i, z[i]);
        if problem.is_equality(i) {
            active.push((i, ActiveBound::Equality, problem.lower[i]?));
        } else if let Some(l) = problem.lower[i].filter(|l| zi - *l < -y) {
            active.push((i, ActiveBound::Lower, l));
        } else if let Some(u) = problem.upper[i].filter(|u| *u - zi < y) {
            active.push((i, ActiveBound::Upper, u));
        }
    }

    let k = active.len();
    let dim = n + k;
    let delta = settings.polish_delta;
    let mut kkt = vec![vec![Decimal::ZERO; dim]; dim];
    for i in 0..n {
        kkt[i][..n].copy_from_slice(&problem.p[i]);
    }
    for (r, (row, _, _)) in active.iter().enumerate() {
        for c in 0..n {
            kkt[n + r][c] = problem.a[*row][c];
            kkt[c][n + r] = problem.a[*row][c];
        }
    }
    let mut regularized = kkt.clone();
    for (i, row) in regularized.iter_mut().enumerate() {
        row[i] += if i < n { delta } else { -delta };
    }

    let rhs: Vec<Decimal> = problem
        .q
        .iter()
        .map(|q| -*q)
        .chain(active.iter().map(|(_, _, b)| *b))
        .collect();

    let inverse = mat_inverse(&regularized).ok()?;
    let mut sol = mat_vec_multiply(&inverse, &rhs);
    for _ in 0..settings.polish_refine_iterations {
        let residual: Vec<Decimal> = rhs
            .iter()
            .zip(mat_vec_multiply(&kkt, &sol).iter())
            .map(|(b, ks)| *b - *ks)
            .collect();
        let correction = mat_vec_multiply(&inverse, &residual);
        for (s, c) in sol.iter_mut().zip(correction.iter()) {
            *s += *c;
        }
    }

    let x = sol[..n].to_vec();
    let mut y = vec![Decimal::ZERO; m];
    for (r, (row, bound, _)) in active.iter().enumerate() {
        let dual = sol[n + r];
        let consistent = match bound {
            ActiveBound::Equality => true,
            ActiveBound::Lower => dual <= settings.eps_abs,
            ActiveBound::Upper => dual >= -settings.eps_abs,
        };
        if !consistent {
            return None;
        }
        y[*row] = dual;
    }

    if problem.bound_violation(&x) > settings.eps_abs {
        return None;
    }
    let z_polished: Vec<Decimal> = mat_vec_multiply(&problem.a, &x)
        .iter()
        .enumerate()
        .map(|(i, v)| problem.clamp_row(i, *v))
        .collect();
    let res = Residuals::compute(problem, settings, &x, &z_polished, &y);
    if res.dual > res.eps_dual {
        return None;
    }
    Some((x, y, res))
}
