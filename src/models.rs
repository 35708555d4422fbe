extern crate nalgebra as na;

use rand::distributions::Distribution;

use crate::error::ConfigError;

/// A discrete plant that can be stepped forward, used to close the loop in simulation.
pub trait Plant<const NX: usize, const NY: usize, const NU: usize> {
    fn state_model(
        &self,
        x: &na::SVector<f64, NX>,
        u: &na::SVector<f64, NU>,
        w: &na::SVector<f64, NX>,
    ) -> na::SVector<f64, NX>;

    fn meas_model(
        &self,
        x: &na::SVector<f64, NX>,
        u: &na::SVector<f64, NU>,
        v: &na::SVector<f64, NY>,
    ) -> na::SVector<f64, NY>;

    fn gen_state_noise(&self, num_noise_samples: usize) -> Vec<na::SVector<f64, NX>>;

    fn gen_meas_noise(&self, num_noise_samples: usize) -> Vec<na::SVector<f64, NY>>;

    /// Returns (x(k+1), y(k)) for a single sample with fresh noise.
    fn simulate_step(
        &self,
        x: &na::SVector<f64, NX>,
        u: &na::SVector<f64, NU>,
    ) -> (na::SVector<f64, NX>, na::SVector<f64, NY>) {
        let w = self.gen_state_noise(1)[0];
        let v = self.gen_meas_noise(1)[0];
        let y = self.meas_model(x, u, &v);
        (self.state_model(x, u, &w), y)
    }

    /// Open-loop run. x_series[k] and y_series[k] both belong to sample k.
    fn simulate(
        &self,
        x0: &na::SVector<f64, NX>,
        u_series: &[na::SVector<f64, NU>],
    ) -> (Vec<na::SVector<f64, NX>>, Vec<na::SVector<f64, NY>>) {
        let num_steps = u_series.len();
        let v_series = self.gen_meas_noise(num_steps);
        let w_series = self.gen_state_noise(num_steps);

        let mut y_series = Vec::with_capacity(num_steps);
        let mut x_series = Vec::with_capacity(num_steps);

        let mut x_k = *x0;

        for ((u_k, v_k), w_k) in u_series.iter().zip(&v_series).zip(&w_series) {
            let y_k = self.meas_model(&x_k, u_k, v_k);
            let x_k_next = self.state_model(&x_k, u_k, w_k);

            y_series.push(y_k);
            x_series.push(x_k);

            x_k = x_k_next;
        }

        (x_series, y_series)
    }
}

/// Linear Time-Invariant System
/// x(k+1) = A*x(k) + B*u(k)
/// y(k) = C*x(k) + D*u(k)
/// No noise is considered
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinearSystem<const NX: usize, const NY: usize, const NU: usize> {
    pub a_matrix: na::SMatrix<f64, NX, NX>,
    pub b_matrix: na::SMatrix<f64, NX, NU>,
    pub c_matrix: na::SMatrix<f64, NY, NX>,
    pub d_matrix: na::SMatrix<f64, NY, NU>,
}

impl<const NX: usize, const NY: usize, const NU: usize> LinearSystem<NX, NY, NU> {
    pub fn new(
        a_matrix: na::SMatrix<f64, NX, NX>,
        b_matrix: na::SMatrix<f64, NX, NU>,
        c_matrix: na::SMatrix<f64, NY, NX>,
        d_matrix: na::SMatrix<f64, NY, NU>,
    ) -> Self {
        Self {
            a_matrix,
            b_matrix,
            c_matrix,
            d_matrix,
        }
    }
}

impl<const NX: usize, const NY: usize, const NU: usize> Plant<NX, NY, NU>
    for LinearSystem<NX, NY, NU>
{
    fn state_model(
        &self,
        x: &na::SVector<f64, NX>,
        u: &na::SVector<f64, NU>,
        w: &na::SVector<f64, NX>,
    ) -> na::SVector<f64, NX> {
        _ = w;
        self.a_matrix * x + self.b_matrix * u
    }

    fn meas_model(
        &self,
        x: &na::SVector<f64, NX>,
        u: &na::SVector<f64, NU>,
        v: &na::SVector<f64, NY>,
    ) -> na::SVector<f64, NY> {
        _ = v;
        self.c_matrix * x + self.d_matrix * u
    }

    fn gen_state_noise(&self, num_noise_samples: usize) -> Vec<na::SVector<f64, NX>> {
        vec![na::SVector::<f64, NX>::zeros(); num_noise_samples]
    }

    fn gen_meas_noise(&self, num_noise_samples: usize) -> Vec<na::SVector<f64, NY>> {
        vec![na::SVector::<f64, NY>::zeros(); num_noise_samples]
    }
}

/// Linear Time-Invariant System with Gaussian noise
/// x(k+1) = A*x(k) + B*u(k) + w(k)
/// y(k) = C*x(k) + D*u(k) + v(k)
#[derive(Copy, Clone, Debug)]
pub struct GaussianLinearSystem<const NX: usize, const NY: usize, const NU: usize> {
    pub system: LinearSystem<NX, NY, NU>,
    w_cov: na::SMatrix<f64, NX, NX>,
    v_cov: na::SMatrix<f64, NY, NY>,
    // Lower Cholesky factors, zero when the covariance is zero
    w_sqrt: na::SMatrix<f64, NX, NX>,
    v_sqrt: na::SMatrix<f64, NY, NY>,
}

impl<const NX: usize, const NY: usize, const NU: usize> GaussianLinearSystem<NX, NY, NU> {
    pub fn new(
        system: LinearSystem<NX, NY, NU>,
        w_cov: na::SMatrix<f64, NX, NX>,
        v_cov: na::SMatrix<f64, NY, NY>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            system,
            w_cov,
            v_cov,
            w_sqrt: covariance_factor(&w_cov, "process noise")?,
            v_sqrt: covariance_factor(&v_cov, "measurement noise")?,
        })
    }

    pub fn w_cov(&self) -> &na::SMatrix<f64, NX, NX> {
        &self.w_cov
    }

    pub fn v_cov(&self) -> &na::SMatrix<f64, NY, NY> {
        &self.v_cov
    }
}

fn covariance_factor<const N: usize>(
    cov: &na::SMatrix<f64, N, N>,
    what: &'static str,
) -> Result<na::SMatrix<f64, N, N>, ConfigError> {
    if *cov == na::SMatrix::<f64, N, N>::zeros() {
        return Ok(*cov);
    }
    na::Cholesky::new(*cov)
        .map(|chol| chol.l())
        .ok_or(ConfigError::NotPositiveDefinite { what })
}

/// Draws zero-mean samples with covariance sqrt * sqrt^T.
fn correlated_normal_samples<const N: usize>(
    sqrt: &na::SMatrix<f64, N, N>,
    num_samples: usize,
) -> Vec<na::SVector<f64, N>> {
    if *sqrt == na::SMatrix::<f64, N, N>::zeros() {
        return vec![na::SVector::<f64, N>::zeros(); num_samples];
    }
    let unit = statrs::distribution::Normal::new(0.0, 1.0).expect("unit normal parameters");
    let mut rng = rand::thread_rng();
    (0..num_samples)
        .map(|_| sqrt * na::SVector::<f64, N>::from_fn(|_, _| unit.sample(&mut rng)))
        .collect()
}

impl<const NX: usize, const NY: usize, const NU: usize> Plant<NX, NY, NU>
    for GaussianLinearSystem<NX, NY, NU>
{
    fn state_model(
        &self,
        x: &na::SVector<f64, NX>,
        u: &na::SVector<f64, NU>,
        w: &na::SVector<f64, NX>,
    ) -> na::SVector<f64, NX> {
        self.system.a_matrix * x + self.system.b_matrix * u + w
    }

    fn meas_model(
        &self,
        x: &na::SVector<f64, NX>,
        u: &na::SVector<f64, NU>,
        v: &na::SVector<f64, NY>,
    ) -> na::SVector<f64, NY> {
        self.system.c_matrix * x + self.system.d_matrix * u + v
    }

    fn gen_state_noise(&self, num_noise_samples: usize) -> Vec<na::SVector<f64, NX>> {
        correlated_normal_samples(&self.w_sqrt, num_noise_samples)
    }

    fn gen_meas_noise(&self, num_noise_samples: usize) -> Vec<na::SVector<f64, NY>> {
        correlated_normal_samples(&self.v_sqrt, num_noise_samples)
    }
}
