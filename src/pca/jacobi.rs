//! Two-sided Jacobi eigendecomposition of a symmetric matrix
//!
//! Rotation parameters use the LAPACK formula to avoid cancellation:
//!
//! ```text
//! τ = (a_qq − a_pp) / (2·a_pq)
//! t = sign(τ) / (|τ| + sqrt(1 + τ²))
//! c = 1 / sqrt(1 + t²),  s = t·c
//! ```

use crate::error::{Error, Result};

/// Sweeps before giving up
pub(super) const MAX_SWEEPS: usize = 50;

/// Cosine and sine of one Givens rotation
#[derive(Debug, Clone, Copy)]
struct JacobiRotation {
    c: f64,
    s: f64,
}

impl JacobiRotation {
    /// Rotation zeroing the off-diagonal element of a 2×2 symmetric block
    fn compute(a_pp: f64, a_qq: f64, a_pq: f64) -> Self {
        if a_pq.abs() < 1e-300 {
            return Self { c: 1.0, s: 0.0 };
        }
        let tau = (a_qq - a_pp) / (2.0 * a_pq);
        let t = if tau >= 0.0 {
            1.0 / (tau + (1.0 + tau * tau).sqrt())
        } else {
            -1.0 / (-tau + (1.0 + tau * tau).sqrt())
        };
        let c = 1.0 / (1.0 + t * t).sqrt();
        Self { c, s: t * c }
    }
}

/// `A' = Jᵀ·A·J`, zeroing `A[p,q]` and `A[q,p]`
fn rotate_two_sided(work: &mut [f64], n: usize, p: usize, q: usize, rot: JacobiRotation) {
    let JacobiRotation { c, s } = rot;
    let a_pp = work[p * n + p];
    let a_qq = work[q * n + q];
    let a_pq = work[p * n + q];

    for k in 0..n {
        if k == p || k == q {
            continue;
        }
        let a_kp = work[k * n + p];
        let a_kq = work[k * n + q];
        let new_kp = c * a_kp - s * a_kq;
        let new_kq = s * a_kp + c * a_kq;
        work[k * n + p] = new_kp;
        work[p * n + k] = new_kp;
        work[k * n + q] = new_kq;
        work[q * n + k] = new_kq;
    }

    work[p * n + p] = c * c * a_pp - 2.0 * c * s * a_pq + s * s * a_qq;
    work[q * n + q] = s * s * a_pp + 2.0 * c * s * a_pq + c * c * a_qq;
    work[p * n + q] = 0.0;
    work[q * n + p] = 0.0;
}

/// `V = V·J` on columns `p` and `q` of a square matrix
fn rotate_columns(v: &mut [f64], n: usize, p: usize, q: usize, rot: JacobiRotation) {
    rotate_columns_of(v, n, n, p, q, rot);
}

/// `U = U·J` on columns `p` and `q` of an `m × n` matrix
fn rotate_columns_of(u: &mut [f64], m: usize, n: usize, p: usize, q: usize, rot: JacobiRotation) {
    let JacobiRotation { c, s } = rot;
    for i in 0..m {
        let up = u[i * n + p];
        let uq = u[i * n + q];
        u[i * n + p] = c * up - s * uq;
        u[i * n + q] = s * up + c * uq;
    }
}

/// Eigenpairs of the symmetric `n × n` row-major matrix `a`
///
/// Returns eigenvalues in descending order and the matching eigenvectors as
/// rows of an `n × n` matrix. Each eigenvector's largest-magnitude entry is
/// positive.
pub(super) fn symmetric_eigen(a: &[f64], n: usize, max_sweeps: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut work = a.to_vec();
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let scale = a.iter().fold(0.0f64, |m, x| m.max(x.abs())).max(f64::MIN_POSITIVE);
    let tol = n as f64 * f64::EPSILON * scale;

    let mut converged = n < 2;
    for sweep in 0..max_sweeps {
        let mut max_off = 0.0f64;
        for i in 0..n {
            for j in i + 1..n {
                max_off = max_off.max(work[i * n + j].abs());
            }
        }
        if max_off < tol {
            tracing::trace!(sweep, "jacobi converged");
            converged = true;
            break;
        }
        for p in 0..n {
            for q in p + 1..n {
                let a_pq = work[p * n + q];
                if a_pq.abs() < tol {
                    continue;
                }
                let rot = JacobiRotation::compute(work[p * n + p], work[q * n + q], a_pq);
                rotate_two_sided(&mut work, n, p, q, rot);
                rotate_columns(&mut v, n, p, q, rot);
            }
        }
    }
    if !converged {
        return Err(Error::NonConvergence {
            algorithm: "pca",
            iterations: max_sweeps,
        });
    }

    let diag: Vec<f64> = (0..n).map(|k| work[k * n + k]).collect();
    Ok(sorted_pairs(&diag, &v, n))
}

/// Values in descending order with the matching columns of `v` as rows
///
/// Each returned vector is flipped so its largest-magnitude entry is
/// positive.
fn sorted_pairs(values: &[f64], v: &[f64], n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[j].total_cmp(&values[i]));

    let sorted = order.iter().map(|&k| values[k]).collect();
    let mut vectors = Vec::with_capacity(n * n);
    for &k in &order {
        let column: Vec<f64> = (0..n).map(|i| v[i * n + k]).collect();
        let pivot = column
            .iter()
            .copied()
            .fold(0.0f64, |m, x| if x.abs() > m.abs() { x } else { m });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        vectors.extend(column.into_iter().map(|x| x * sign));
    }
    (sorted, vectors)
}

/// Singular values and right singular vectors of the `m × n` row-major
/// matrix `a`, by one-sided (Hestenes) Jacobi
///
/// Columns are rotated pairwise until every pair is orthogonal; the rotation
/// is the two-sided one applied to the implicit Gram matrix `AᵀA`. Returns
/// singular values in descending order and the right singular vectors as
/// rows of an `n × n` matrix, signed as in [`symmetric_eigen`].
pub(super) fn singular_values(
    a: &[f64],
    m: usize,
    n: usize,
    max_sweeps: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut u = a.to_vec();
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }
    let tol = m.max(n) as f64 * f64::EPSILON;
    // Columns below this squared norm are numerically zero
    let floor = a.iter().map(|x| x * x).sum::<f64>() * f64::EPSILON * f64::EPSILON;

    let mut converged = n < 2;
    for sweep in 0..max_sweeps {
        let mut rotated = false;
        for p in 0..n {
            for q in p + 1..n {
                let (mut alpha, mut beta, mut gamma) = (0.0, 0.0, 0.0);
                for row in u.chunks_exact(n) {
                    alpha += row[p] * row[p];
                    beta += row[q] * row[q];
                    gamma += row[p] * row[q];
                }
                if alpha.min(beta) <= floor || gamma.abs() <= tol * (alpha * beta).sqrt() {
                    continue;
                }
                rotated = true;
                let rot = JacobiRotation::compute(alpha, beta, gamma);
                rotate_columns_of(&mut u, m, n, p, q, rot);
                rotate_columns(&mut v, n, p, q, rot);
            }
        }
        if !rotated {
            tracing::trace!(sweep, "one-sided jacobi converged");
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(Error::NonConvergence {
            algorithm: "pca",
            iterations: max_sweeps,
        });
    }

    let norms: Vec<f64> = (0..n)
        .map(|j| u.chunks_exact(n).map(|row| row[j] * row[j]).sum::<f64>().sqrt())
        .collect();
    Ok(sorted_pairs(&norms, &v, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_identity_for_diagonal_block() {
        let rot = JacobiRotation::compute(1.0, 2.0, 0.0);
        assert_eq!((rot.c, rot.s), (1.0, 0.0));
    }

    #[test]
    fn test_two_by_two_correlation() {
        // [[1, r], [r, 1]] has eigenvalues 1 ± r
        let r = 0.6;
        let (values, vectors) = symmetric_eigen(&[1.0, r, r, 1.0], 2, MAX_SWEEPS).unwrap();
        assert!((values[0] - 1.6).abs() < 1e-12);
        assert!((values[1] - 0.4).abs() < 1e-12);
        let h = 1.0 / 2.0f64.sqrt();
        assert!((vectors[0] - h).abs() < 1e-12 && (vectors[1] - h).abs() < 1e-12);
    }

    #[test]
    fn test_reconstructs_matrix() {
        let a = [4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 1.0];
        let (values, vectors) = symmetric_eigen(&a, 3, MAX_SWEEPS).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let r: f64 = (0..3).map(|k| values[k] * vectors[k * 3 + i] * vectors[k * 3 + j]).sum();
                assert!((r - a[i * 3 + j]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_singular_values_match_gram_eigenvalues() {
        // 4 × 3, rank 3
        let a = [1.0, 2.0, 0.0, 0.5, -1.0, 1.0, 2.0, 0.0, 3.0, -1.0, 1.0, 0.5];
        let (sigma, right) = singular_values(&a, 4, 3, MAX_SWEEPS).unwrap();
        let mut gram = [0.0; 9];
        for row in a.chunks_exact(3) {
            for i in 0..3 {
                for j in 0..3 {
                    gram[i * 3 + j] += row[i] * row[j];
                }
            }
        }
        let (values, vectors) = symmetric_eigen(&gram, 3, MAX_SWEEPS).unwrap();
        for k in 0..3 {
            assert!((sigma[k] * sigma[k] - values[k]).abs() < 1e-10);
        }
        for (x, y) in right.iter().zip(&vectors) {
            assert!((x - y).abs() < 1e-8);
        }
    }

    #[test]
    fn test_singular_values_of_rank_deficient_matrix() {
        // Second column is twice the first
        let a = [1.0, 2.0, 2.0, 4.0, -1.0, -2.0];
        let (sigma, _) = singular_values(&a, 3, 2, MAX_SWEEPS).unwrap();
        assert!((sigma[0] - 30.0f64.sqrt()).abs() < 1e-12);
        assert!(sigma[1].abs() < 1e-12);
    }

    #[test]
    fn test_zero_sweeps_reports_non_convergence() {
        let err = symmetric_eigen(&[1.0, 0.5, 0.5, 1.0], 2, 0).unwrap_err();
        assert!(matches!(err, Error::NonConvergence { .. }));
    }
}
