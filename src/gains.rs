extern crate nalgebra as na;

use crate::error::{ConfigError, LoopError};
use crate::linsystheory::{self, to_dynamic};
use crate::models::LinearSystem;

/// Tuned coefficients for one linearization of the plant.
///
/// x(k+1) = A*x(k) + B*u(k)
/// y(k)   = C*x(k) + D*u(k)
///
/// The controller applies u = K*(r - x_hat) + Kff*(r - A*r) and the observer
/// predicts x_pred = A*x_hat + B*u, then corrects with
/// x_hat = x_pred + L*(y - C*x_pred - D*u).
#[allow(non_snake_case)]
#[derive(Clone, Debug, PartialEq)]
pub struct GainSet<const NX: usize, const NY: usize, const NU: usize> {
    name: String,
    plant: LinearSystem<NX, NY, NU>,
    K: na::SMatrix<f64, NU, NX>,
    Kff: na::SMatrix<f64, NU, NX>,
    L: na::SMatrix<f64, NX, NY>,
    dt: f64,
}

#[allow(non_snake_case)]
impl<const NX: usize, const NY: usize, const NU: usize> GainSet<NX, NY, NU> {
    pub fn new(
        name: impl Into<String>,
        plant: LinearSystem<NX, NY, NU>,
        K: na::SMatrix<f64, NU, NX>,
        Kff: na::SMatrix<f64, NU, NX>,
        L: na::SMatrix<f64, NX, NY>,
        dt: f64,
    ) -> Result<Self, ConfigError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ConfigError::InvalidPeriod(dt));
        }
        Ok(Self {
            name: name.into(),
            plant,
            K,
            Kff,
            L,
            dt,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plant(&self) -> &LinearSystem<NX, NY, NU> {
        &self.plant
    }

    pub fn A(&self) -> &na::SMatrix<f64, NX, NX> {
        &self.plant.a_matrix
    }
    pub fn B(&self) -> &na::SMatrix<f64, NX, NU> {
        &self.plant.b_matrix
    }
    pub fn C(&self) -> &na::SMatrix<f64, NY, NX> {
        &self.plant.c_matrix
    }
    pub fn D(&self) -> &na::SMatrix<f64, NY, NU> {
        &self.plant.d_matrix
    }
    pub fn K(&self) -> &na::SMatrix<f64, NU, NX> {
        &self.K
    }
    pub fn Kff(&self) -> &na::SMatrix<f64, NU, NX> {
        &self.Kff
    }
    pub fn L(&self) -> &na::SMatrix<f64, NX, NY> {
        &self.L
    }

    /// Sample period the matrices were discretized for, in seconds.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn is_controllable(&self) -> bool {
        linsystheory::is_controllable(&to_dynamic(self.A()), &to_dynamic(self.B()))
    }

    pub fn is_observable(&self) -> bool {
        linsystheory::is_observable(&to_dynamic(self.A()), &to_dynamic(self.C()))
    }

    /// A - B*K, the nominal closed-loop dynamics.
    pub fn closed_loop_stable(&self) -> bool {
        linsystheory::is_stable(&to_dynamic(&(self.A() - self.B() * self.K)))
    }

    /// (I - L*C)*A, the estimation error dynamics.
    pub fn observer_stable(&self) -> bool {
        let error_dynamics = (na::SMatrix::<f64, NX, NX>::identity() - self.L * self.C()) * self.A();
        linsystheory::is_stable(&to_dynamic(&error_dynamics))
    }
}

/// Ordered, non-empty collection of gain sets for the same physical system.
/// Shared read-only between the observer and controller of a loop.
#[derive(Clone, Debug)]
pub struct GainSchedule<const NX: usize, const NY: usize, const NU: usize> {
    gains: Vec<GainSet<NX, NY, NU>>,
}

impl<const NX: usize, const NY: usize, const NU: usize> GainSchedule<NX, NY, NU> {
    pub fn new(gains: Vec<GainSet<NX, NY, NU>>) -> Result<Self, ConfigError> {
        if gains.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        for (index, set) in gains.iter().enumerate() {
            if !set.is_controllable() {
                log::warn!("gain set {index} `{}` is not controllable", set.name());
            }
            if !set.is_observable() {
                log::warn!("gain set {index} `{}` is not observable", set.name());
            }
        }
        Ok(Self { gains })
    }

    pub fn single(gains: GainSet<NX, NY, NU>) -> Self {
        Self { gains: vec![gains] }
    }

    pub fn len(&self) -> usize {
        self.gains.len()
    }

    /// Never true for a schedule built through `new` or `single`.
    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }

    pub fn check_index(&self, index: usize) -> Result<(), LoopError> {
        if index < self.gains.len() {
            Ok(())
        } else {
            Err(LoopError::GainIndexOutOfRange {
                index,
                len: self.gains.len(),
            })
        }
    }

    pub fn get(&self, index: usize) -> Result<&GainSet<NX, NY, NU>, LoopError> {
        self.check_index(index)?;
        Ok(&self.gains[index])
    }

    /// Index lookup by gain set name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.gains.iter().position(|set| set.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GainSet<NX, NY, NU>> {
        self.gains.iter()
    }

    // Callers validate the index when it is selected, not on every cycle.
    pub(crate) fn active(&self, index: usize) -> &GainSet<NX, NY, NU> {
        &self.gains[index]
    }
}
