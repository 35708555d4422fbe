extern crate nalgebra as na;
use na::Normed;

const DARE_MAX_ITERATIONS: usize = 100_000;
const DARE_TOLERANCE: f64 = 1.0e-11;
const RANK_EPS: f64 = 1.0e-9;

pub fn to_dynamic<const R: usize, const C: usize>(m: &na::SMatrix<f64, R, C>) -> na::DMatrix<f64> {
    na::DMatrix::from_column_slice(R, C, m.as_slice())
}

#[allow(non_snake_case)]
/// Determine if closed loop system is stable.
/// A_clp: closed loop system. Assumed to be discrete
pub fn is_stable(A_clp: &na::DMatrix<f64>) -> bool {
    assert!(A_clp.is_square());
    A_clp
        .complex_eigenvalues()
        .iter()
        .all(|eigenvalue| eigenvalue.norm() < 1.0)
}

#[allow(non_snake_case)]
/// Determine if A and C is detectable
/// See PHB-test: https://en.wikipedia.org/wiki/Hautus_lemma
pub fn is_detectable(A: &na::DMatrix<f64>, C: &na::DMatrix<f64>) -> bool {
    phb_test_fulfilled(A, C, true)
}

#[allow(non_snake_case)]
pub fn is_stabilizable(A: &na::DMatrix<f64>, B: &na::DMatrix<f64>) -> bool {
    phb_test_fulfilled(A, B, false)
}

#[allow(non_snake_case)]
fn phb_test_fulfilled(A: &na::DMatrix<f64>, L: &na::DMatrix<f64>, vertical_stack: bool) -> bool {
    assert!(A.is_square());
    if vertical_stack {
        assert!(A.ncols() == L.ncols());
    } else {
        assert!(A.nrows() == L.nrows());
    }

    let n = A.nrows();
    for eigenvalue in A.complex_eigenvalues().iter() {
        if eigenvalue.norm() < 1.0 {
            continue;
        }
        // rank [A - eigenvalue*I; L] (or [A - eigenvalue*I, L]) must be n
        let shifted = |i: usize, j: usize| {
            let a = na::Complex::new(A[(i, j)], 0.0);
            if i == j {
                a - eigenvalue
            } else {
                a
            }
        };
        let phb_matrix = if vertical_stack {
            na::DMatrix::from_fn(n + L.nrows(), n, |i, j| {
                if i < n {
                    shifted(i, j)
                } else {
                    na::Complex::new(L[(i - n, j)], 0.0)
                }
            })
        } else {
            na::DMatrix::from_fn(n, n + L.ncols(), |i, j| {
                if j < n {
                    shifted(i, j)
                } else {
                    na::Complex::new(L[(i, j - n)], 0.0)
                }
            })
        };

        if phb_matrix.rank(RANK_EPS) != n {
            return false;
        }
    }
    true
}

#[allow(non_snake_case)]
/// [B, AB, A^2B, ...]
pub fn controllability_matrix(A: &na::DMatrix<f64>, B: &na::DMatrix<f64>) -> na::DMatrix<f64> {
    assert!(A.is_square() && A.nrows() == B.nrows());
    let n = A.nrows();
    let m = B.ncols();
    let mut ctrb = na::DMatrix::zeros(n, n * m);
    let mut block = B.clone();
    for i in 0..n {
        ctrb.view_mut((0, i * m), (n, m)).copy_from(&block);
        block = A * block;
    }
    ctrb
}

#[allow(non_snake_case)]
/// [C; CA; CA^2; ...]
pub fn observability_matrix(A: &na::DMatrix<f64>, C: &na::DMatrix<f64>) -> na::DMatrix<f64> {
    assert!(A.is_square() && A.ncols() == C.ncols());
    let n = A.nrows();
    let p = C.nrows();
    let mut obsv = na::DMatrix::zeros(n * p, n);
    let mut block = C.clone();
    for i in 0..n {
        obsv.view_mut((i * p, 0), (p, n)).copy_from(&block);
        block = block * A;
    }
    obsv
}

#[allow(non_snake_case)]
pub fn is_controllable(A: &na::DMatrix<f64>, B: &na::DMatrix<f64>) -> bool {
    controllability_matrix(A, B).rank(RANK_EPS) == A.nrows()
}

#[allow(non_snake_case)]
pub fn is_observable(A: &na::DMatrix<f64>, C: &na::DMatrix<f64>) -> bool {
    observability_matrix(A, C).rank(RANK_EPS) == A.nrows()
}

/// Zero-order-hold discretization of dx/dt = A*x + B*u.
/// Returns (A_d, B_d) from expm([[A, B], [0, 0]] * dt).
pub fn c2d<const NX: usize, const NU: usize>(
    a_matrix: &na::SMatrix<f64, NX, NX>,
    b_matrix: &na::SMatrix<f64, NX, NU>,
    dt: f64,
) -> (na::SMatrix<f64, NX, NX>, na::SMatrix<f64, NX, NU>) {
    let mut block = na::DMatrix::<f64>::zeros(NX + NU, NX + NU);
    block
        .view_mut((0, 0), (NX, NX))
        .copy_from(&to_dynamic(a_matrix));
    block
        .view_mut((0, NX), (NX, NU))
        .copy_from(&to_dynamic(b_matrix));
    let phi = (block * dt).exp();

    let a_d = na::SMatrix::<f64, NX, NX>::from_fn(|i, j| phi[(i, j)]);
    let b_d = na::SMatrix::<f64, NX, NU>::from_fn(|i, j| phi[(i, NX + j)]);
    (a_d, b_d)
}

/// Discretizes continuous noise intensities for a sample period dt.
/// Process noise uses the Van Loan method, measurement noise is R/dt.
pub fn discretize_noise<const NX: usize, const NY: usize>(
    a_matrix: &na::SMatrix<f64, NX, NX>,
    q_noise: &na::SMatrix<f64, NX, NX>,
    r_noise: &na::SMatrix<f64, NY, NY>,
    dt: f64,
) -> (na::SMatrix<f64, NX, NX>, na::SMatrix<f64, NY, NY>) {
    let mut block = na::DMatrix::<f64>::zeros(2 * NX, 2 * NX);
    block
        .view_mut((0, 0), (NX, NX))
        .copy_from(&to_dynamic(&(-a_matrix)));
    block
        .view_mut((0, NX), (NX, NX))
        .copy_from(&to_dynamic(q_noise));
    block
        .view_mut((NX, NX), (NX, NX))
        .copy_from(&to_dynamic(&a_matrix.transpose()));
    let g = (block * dt).exp();

    let g12 = na::SMatrix::<f64, NX, NX>::from_fn(|i, j| g[(i, NX + j)]);
    let g22 = na::SMatrix::<f64, NX, NX>::from_fn(|i, j| g[(NX + i, NX + j)]);
    (g22.transpose() * g12, r_noise / dt)
}

/// Solves P = A'PA - A'PB (R + B'PB)^-1 B'PA + Q by fixed-point iteration.
/// None if an intermediate inverse fails or the iteration does not settle.
pub fn dare<const NX: usize, const NU: usize>(
    a_matrix: &na::SMatrix<f64, NX, NX>,
    b_matrix: &na::SMatrix<f64, NX, NU>,
    q_matrix: &na::SMatrix<f64, NX, NX>,
    r_matrix: &na::SMatrix<f64, NU, NU>,
) -> Option<na::SMatrix<f64, NX, NX>> {
    let a_t = a_matrix.transpose();
    let b_t = b_matrix.transpose();
    let mut p_matrix = *q_matrix;
    for _ in 0..DARE_MAX_ITERATIONS {
        let s_inv = (r_matrix + b_t * p_matrix * b_matrix).try_inverse()?;
        let p_next = a_t * p_matrix * a_matrix
            - a_t * p_matrix * b_matrix * s_inv * b_t * p_matrix * a_matrix
            + q_matrix;
        // keep it symmetric against round-off drift
        let p_next = (p_next + p_next.transpose()) * 0.5;
        if (p_next - p_matrix).norm() <= DARE_TOLERANCE * (1.0 + p_next.norm()) {
            return Some(p_next);
        }
        p_matrix = p_next;
    }
    log::warn!("DARE iteration did not converge");
    None
}

/// Optimal state feedback u = -K*x for the discrete system (A, B).
/// K = (R + B'PB)^-1 B'PA
pub fn dlqr<const NX: usize, const NU: usize>(
    a_matrix: &na::SMatrix<f64, NX, NX>,
    b_matrix: &na::SMatrix<f64, NX, NU>,
    q_weight: &na::SMatrix<f64, NX, NX>,
    r_weight: &na::SMatrix<f64, NU, NU>,
) -> Option<na::SMatrix<f64, NU, NX>> {
    let p_matrix = dare(a_matrix, b_matrix, q_weight, r_weight)?;
    let b_t = b_matrix.transpose();
    let s_inv = (r_weight + b_t * p_matrix * b_matrix).try_inverse()?;
    Some(s_inv * b_t * p_matrix * a_matrix)
}

/// Steady-state Kalman filter gain M for the predict-then-correct form
/// x_hat = x_pred + M*(y - C*x_pred), so that (I - M*C)*A is stable.
/// M = P*C'*(C*P*C' + R)^-1 with P from the dual Riccati equation on (A', C').
pub fn discrete_kalman_gain<const NX: usize, const NY: usize>(
    a_matrix: &na::SMatrix<f64, NX, NX>,
    c_matrix: &na::SMatrix<f64, NY, NX>,
    q_noise: &na::SMatrix<f64, NX, NX>,
    r_noise: &na::SMatrix<f64, NY, NY>,
) -> Option<na::SMatrix<f64, NX, NY>> {
    let c_t = c_matrix.transpose();
    let p_matrix = dare(&a_matrix.transpose(), &c_t, q_noise, r_noise)?;
    let innovation_inv = (c_matrix * p_matrix * c_t + r_noise).try_inverse()?;
    Some(p_matrix * c_t * innovation_inv)
}

/// Kff = (B'QB + R)^-1 B'Q
pub fn feedforward_gain<const NX: usize, const NU: usize>(
    b_matrix: &na::SMatrix<f64, NX, NU>,
    q_weight: &na::SMatrix<f64, NX, NX>,
    r_weight: &na::SMatrix<f64, NU, NU>,
) -> Option<na::SMatrix<f64, NU, NX>> {
    let b_t = b_matrix.transpose();
    let inv = (b_t * q_weight * b_matrix + r_weight).try_inverse()?;
    Some(inv * b_t * q_weight)
}
