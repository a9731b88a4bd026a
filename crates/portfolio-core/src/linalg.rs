//! Dense linear-algebra helpers over `Decimal`.
//!
//! All arithmetic uses `rust_decimal::Decimal`. No `f64`. Matrices are
//! row-major `Vec<Vec<Decimal>>`; callers are responsible for shape checks.

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::error::PortfolioError;
use crate::PortfolioResult;

/// Pivots smaller than this are treated as zero during elimination.
pub const PIVOT_TOLERANCE: Decimal = dec!(0.000000000000000001);

/// Dot product.
pub fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

/// Matrix-vector multiplication.
pub fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

/// Quadratic form w' * M * w.
pub fn quad_form(w: &[Decimal], mat: &[Vec<Decimal>]) -> Decimal {
    vec_dot(w, &mat_vec_multiply(mat, w))
}

/// Infinity norm.
pub fn norm_inf(v: &[Decimal]) -> Decimal {
    v.iter().fold(Decimal::ZERO, |acc, x| acc.max(x.abs()))
}

pub fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

/// Matrix inverse via Gauss-Jordan with partial pivoting.
#[allow(clippy::needless_range_loop)]
pub fn mat_inverse(mat: &[Vec<Decimal>]) -> PortfolioResult<Vec<Vec<Decimal>>> {
    let n = mat.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut aug: Vec<Vec<Decimal>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut row = Vec::with_capacity(2 * n);
        row.extend_from_slice(&mat[i]);
        for j in 0..n {
            row.push(if i == j { Decimal::ONE } else { Decimal::ZERO });
        }
        aug.push(row);
    }

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < PIVOT_TOLERANCE {
            return Err(PortfolioError::SingularMatrix(
                "Matrix cannot be inverted".into(),
            ));
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for cell in aug[col].iter_mut() {
            *cell /= pivot;
        }

        let pivot_row = aug[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor.is_zero() {
                continue;
            }
            for (cell, &pv) in aug[row].iter_mut().zip(pivot_row.iter()) {
                *cell -= factor * pv;
            }
        }
    }

    Ok(aug.iter().map(|row| row[n..].to_vec()).collect())
}
