extern crate nalgebra as na;

use std::sync::Arc;

use crate::gains::GainSchedule;

/// One-step predictor/corrector over the active gain set:
/// x_pred = A*x_hat + B*u
/// x_hat  = x_pred + L*(y - C*x_pred - D*u)
pub struct StateObserver<const NX: usize, const NY: usize, const NU: usize> {
    gains: Arc<GainSchedule<NX, NY, NU>>,
    gain_index: usize,
    x_hat: na::SVector<f64, NX>,
}

impl<const NX: usize, const NY: usize, const NU: usize> StateObserver<NX, NY, NU> {
    /// Starts on gain set 0.
    pub fn new(gains: Arc<GainSchedule<NX, NY, NU>>, x_hat: na::SVector<f64, NX>) -> Self {
        Self {
            gains,
            gain_index: 0,
            x_hat,
        }
    }

    /// `u` must be the output that was actually applied during the last cycle,
    /// `y` the measurement taken at the start of this one.
    pub fn update(
        &mut self,
        u: &na::SVector<f64, NU>,
        y: &na::SVector<f64, NY>,
    ) -> &na::SVector<f64, NX> {
        let gains = self.gains.active(self.gain_index);

        let x_pred = gains.A() * self.x_hat + gains.B() * u;
        let y_est = gains.C() * x_pred + gains.D() * u;

        self.x_hat = x_pred + gains.L() * (y - y_est);
        &self.x_hat
    }

    pub fn estimate(&self) -> &na::SVector<f64, NX> {
        &self.x_hat
    }

    pub fn set_estimate(&mut self, x_hat: na::SVector<f64, NX>) {
        self.x_hat = x_hat;
    }

    pub fn gain_index(&self) -> usize {
        self.gain_index
    }

    // The estimate is kept: all gain sets describe the same physical state.
    pub(crate) fn set_gain_index(&mut self, index: usize) {
        debug_assert!(self.gains.check_index(index).is_ok());
        self.gain_index = index;
    }
}
