//! Dense linear algebra for the closed-form fit.
//!
//! Ordinary least squares on the bias-augmented design matrix `A = [1 | X]`,
//! solved with a Householder QR factorization of `A` itself. The normal
//! equations are never formed, so the conditioning of the problem is that of
//! `A` and not of `AᵀA`. A diagonal entry of `R` that is negligible next to
//! the norm of its column means `A` is rank deficient (collinear features or
//! fewer rows than unknowns).

use crate::{Error, MatrixView, Result};

/// Relative rank tolerance on the diagonal of `R`.
const RANK_TOLERANCE: f64 = 1e-10;

/// Solve `min ||[1 | X] W - Y||²` for `W` with shape `(x.cols() + 1, y.cols())`.
///
/// Row 0 of the result holds the intercepts.
pub(crate) fn least_squares_with_bias(x: MatrixView<'_>, y: MatrixView<'_>) -> Result<Vec<f64>> {
    debug_assert_eq!(x.rows(), y.rows());

    let m = x.rows();
    let n = x.cols() + 1;
    let k = y.cols();
    if m < n {
        return Err(Error::NumericalFailure(format!(
            "design is singular ({m} rows for {n} unknowns)"
        )));
    }

    let mut a = vec![0.0_f64; m * n];
    for r in 0..m {
        a[r * n] = 1.0;
        a[r * n + 1..(r + 1) * n].copy_from_slice(x.row(r));
    }
    let mut b = y.as_slice().to_vec();

    let col_norms: Vec<f64> = (0..n).map(|j| column_norm(&a, m, n, j, 0)).collect();
    let mut v = vec![0.0_f64; m];

    for j in 0..n {
        let norm = column_norm(&a, m, n, j, j);
        if !(norm > RANK_TOLERANCE * col_norms[j]) {
            return Err(Error::NumericalFailure(format!(
                "design is singular (column {j} has residual norm {norm:e})"
            )));
        }

        // Reflector `H = I - 2 v vᵀ / vᵀv` mapping a[j.., j] onto alpha * e1.
        let a_jj = a[j * n + j];
        let alpha = if a_jj >= 0.0 { -norm } else { norm };
        let v = &mut v[..m - j];
        for (i, vi) in v.iter_mut().enumerate() {
            *vi = a[(j + i) * n + j];
        }
        v[0] -= alpha;
        let v_norm2: f64 = v.iter().map(|vi| vi * vi).sum();

        for c in j..n {
            reflect(v, v_norm2, &mut a, n, j, c);
        }
        for c in 0..k {
            reflect(v, v_norm2, &mut b, k, j, c);
        }
    }

    // Back substitution: R W = (Qᵀ Y)[..n]
    let mut solution = vec![0.0_f64; n * k];
    for c in 0..k {
        for i in (0..n).rev() {
            let mut sum = b[i * k + c];
            for p in (i + 1)..n {
                sum -= a[i * n + p] * solution[p * k + c];
            }
            solution[i * k + c] = sum / a[i * n + i];
        }
    }

    if solution.iter().any(|v| !v.is_finite()) {
        return Err(Error::NumericalFailure(
            "least-squares solution is not finite".to_owned(),
        ));
    }
    Ok(solution)
}

/// Euclidean norm of column `col` from row `from` down, for a row-major matrix.
fn column_norm(a: &[f64], rows: usize, cols: usize, col: usize, from: usize) -> f64 {
    (from..rows)
        .map(|r| a[r * cols + col])
        .fold(0.0_f64, |acc, v| acc.hypot(v))
}

/// Apply the reflector `v` (acting on rows `from..`) to column `col`.
fn reflect(v: &[f64], v_norm2: f64, a: &mut [f64], cols: usize, from: usize, col: usize) {
    let dot: f64 = v
        .iter()
        .enumerate()
        .map(|(i, vi)| vi * a[(from + i) * cols + col])
        .sum();
    let scale = 2.0 * dot / v_norm2;
    for (i, vi) in v.iter().enumerate() {
        a[(from + i) * cols + col] -= scale * vi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_line() {
        // y = 2x + 1
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let w = least_squares_with_bias(
            MatrixView::new(&x, 4, 1).unwrap(),
            MatrixView::new(&y, 4, 1).unwrap(),
        )
        .unwrap();
        assert!((w[0] - 1.0).abs() < 1e-9);
        assert!((w[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn solves_each_output_column() {
        // y0 = x0 - x1, y1 = 3 + x1
        let x = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 3.0, 1.0, 3.0, -1.0, 4.0, -1.0, 6.0];
        let w = least_squares_with_bias(
            MatrixView::new(&x, 4, 2).unwrap(),
            MatrixView::new(&y, 4, 2).unwrap(),
        )
        .unwrap();
        let expected = [0.0, 3.0, 1.0, 0.0, -1.0, 1.0];
        for (got, want) in w.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
        }
    }

    #[test]
    fn collinear_design_is_singular() {
        let x = [1.0, 1.0, 1.0];
        let y = [1.0, 2.0, 3.0];
        let err = least_squares_with_bias(
            MatrixView::new(&x, 3, 1).unwrap(),
            MatrixView::new(&y, 3, 1).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NumericalFailure(_)));
    }

    #[test]
    fn large_feature_scale_is_not_singular() {
        // y = 2e-6 x + 1
        for x in [[1e6, 2e6, 3e6, 4e6], [1e6, 1e6 + 1.0, 1e6 + 2.0, 1e6 + 3.0]] {
            let y: Vec<f64> = x.iter().map(|v| 2e-6 * v + 1.0).collect();
            let w = least_squares_with_bias(
                MatrixView::new(&x, 4, 1).unwrap(),
                MatrixView::new(&y, 4, 1).unwrap(),
            )
            .unwrap();
            assert!((w[0] - 1.0).abs() < 1e-6, "intercept {}", w[0]);
            assert!((w[1] - 2e-6).abs() < 1e-12, "slope {}", w[1]);
        }
    }

    #[test]
    fn zero_feature_column_is_singular() {
        let x = [0.0, 1.0, 0.0, 2.0, 0.0, 3.0];
        let y = [1.0, 2.0, 3.0];
        let err = least_squares_with_bias(
            MatrixView::new(&x, 3, 2).unwrap(),
            MatrixView::new(&y, 3, 1).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NumericalFailure(_)));
    }
}
