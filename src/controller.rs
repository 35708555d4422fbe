extern crate nalgebra as na;

use std::sync::Arc;

use crate::error::ConfigError;
use crate::gains::GainSchedule;

/// Element-wise output bounds. Infinite bounds are allowed, NaN is not.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Envelope<const NU: usize> {
    u_min: na::SVector<f64, NU>,
    u_max: na::SVector<f64, NU>,
}

impl<const NU: usize> Envelope<NU> {
    pub fn new(
        u_min: na::SVector<f64, NU>,
        u_max: na::SVector<f64, NU>,
    ) -> Result<Self, ConfigError> {
        for index in 0..NU {
            let (min, max) = (u_min[index], u_max[index]);
            if min.is_nan() || max.is_nan() {
                return Err(ConfigError::NanBound { index });
            }
            if min > max {
                return Err(ConfigError::InvertedEnvelope { index, min, max });
            }
        }
        Ok(Self { u_min, u_max })
    }

    /// [-limit, limit] per element.
    pub fn symmetric(limit: na::SVector<f64, NU>) -> Result<Self, ConfigError> {
        Self::new(-limit, limit)
    }

    pub fn u_min(&self) -> &na::SVector<f64, NU> {
        &self.u_min
    }

    pub fn u_max(&self) -> &na::SVector<f64, NU> {
        &self.u_max
    }

    pub fn contains(&self, u: &na::SVector<f64, NU>) -> bool {
        (0..NU).all(|i| u[i] >= self.u_min[i] && u[i] <= self.u_max[i])
    }

    /// Zero, pulled into the envelope when zero lies outside it.
    pub fn neutral(&self) -> na::SVector<f64, NU> {
        na::SVector::<f64, NU>::from_fn(|i, _| 0.0_f64.clamp(self.u_min[i], self.u_max[i]))
    }

    /// Saturates each element to its bound. NaN elements become the neutral value.
    pub fn clamp(&self, u: &na::SVector<f64, NU>) -> na::SVector<f64, NU> {
        na::SVector::<f64, NU>::from_fn(|i, _| {
            let (min, max) = (self.u_min[i], self.u_max[i]);
            if u[i].is_nan() {
                log::warn!("control output element {i} is NaN, holding neutral");
                0.0_f64.clamp(min, max)
            } else {
                u[i].clamp(min, max)
            }
        })
    }
}

/// Reference-tracking state feedback with a saturated output.
pub struct StateController<const NX: usize, const NY: usize, const NU: usize> {
    gains: Arc<GainSchedule<NX, NY, NU>>,
    gain_index: usize,
    envelope: Envelope<NU>,
}

impl<const NX: usize, const NY: usize, const NU: usize> StateController<NX, NY, NU> {
    /// Starts on gain set 0.
    pub fn new(gains: Arc<GainSchedule<NX, NY, NU>>, envelope: Envelope<NU>) -> Self {
        Self {
            gains,
            gain_index: 0,
            envelope,
        }
    }

    /// u = K*(r - x_hat) + Kff*(r - A*r), before saturation.
    pub fn raw_output(
        &self,
        reference: &na::SVector<f64, NX>,
        x_hat: &na::SVector<f64, NX>,
    ) -> na::SVector<f64, NU> {
        let gains = self.gains.active(self.gain_index);
        let feedback = gains.K() * (reference - x_hat);
        let feedforward = gains.Kff() * (reference - gains.A() * reference);
        feedback + feedforward
    }

    pub fn bounded_output(
        &self,
        reference: &na::SVector<f64, NX>,
        x_hat: &na::SVector<f64, NX>,
    ) -> na::SVector<f64, NU> {
        let raw = self.raw_output(reference, x_hat);
        let bounded = self.envelope.clamp(&raw);
        if bounded != raw {
            log::trace!("output saturated: raw {:?} -> {:?}", raw.as_slice(), bounded.as_slice());
        }
        bounded
    }

    pub fn envelope(&self) -> &Envelope<NU> {
        &self.envelope
    }

    pub fn gain_index(&self) -> usize {
        self.gain_index
    }

    pub(crate) fn set_gain_index(&mut self, index: usize) {
        debug_assert!(self.gains.check_index(index).is_ok());
        self.gain_index = index;
    }
}
