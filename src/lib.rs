//! Gain-scheduled state-space control: a predictor/corrector observer and a
//! saturated full-state feedback controller sharing an indexed set of
//! discrete-time models and gains.

extern crate nalgebra as na;

pub mod config;
pub mod control_loop;
pub mod controller;
pub mod error;
pub mod gains;
pub mod linsystheory;
pub mod models;
pub mod motor;
pub mod observer;
pub mod supervisor;

pub use config::{GainSetConfig, LoopConfig};
pub use control_loop::{ControlLoop, LoopSnapshot};
pub use controller::{Envelope, StateController};
pub use error::{ConfigError, LoopError};
pub use gains::{GainSchedule, GainSet};
pub use models::{GaussianLinearSystem, LinearSystem, Plant};
pub use observer::StateObserver;
pub use supervisor::{Command, Encoder, EncoderReset, Mode, Supervisor};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn it_works() {
        let _ = env_logger::builder().is_test(true).try_init();

        let a_matrix = na::SMatrix::<f64, 1, 1>::new(0.9);
        let b_matrix = na::SMatrix::<f64, 1, 1>::new(1.0);
        let c_matrix = na::SMatrix::<f64, 1, 1>::new(1.0);
        let d_matrix = na::SMatrix::<f64, 1, 1>::new(0.0);
        let system = LinearSystem::new(a_matrix, b_matrix, c_matrix, d_matrix);

        let plant = GaussianLinearSystem::new(
            system,
            na::SMatrix::<f64, 1, 1>::new(1e-4),
            na::SMatrix::<f64, 1, 1>::new(1e-4),
        )
        .unwrap();
        let gains = GainSet::new(
            "scalar",
            system,
            na::SMatrix::<f64, 1, 1>::new(0.5),
            na::SMatrix::<f64, 1, 1>::zeros(),
            na::SMatrix::<f64, 1, 1>::new(0.5),
            0.02,
        )
        .unwrap();
        assert!(gains.closed_loop_stable());
        assert!(gains.observer_stable());

        let mut control = ControlLoop::new(
            Arc::new(GainSchedule::single(gains)),
            Envelope::symmetric(na::SVector::<f64, 1>::new(1.0)).unwrap(),
            na::SVector::<f64, 1>::zeros(),
            na::SVector::<f64, 1>::zeros(),
            0,
        )
        .unwrap();

        let reference = na::SVector::<f64, 1>::new(2.0);
        let mut x = na::SVector::<f64, 1>::new(-1.0);
        for _ in 0..200 {
            let y = plant.meas_model(&x, control.last_output(), &plant.gen_meas_noise(1)[0]);
            let u = control.track_reference(&reference, &y);
            x = plant.state_model(&x, &u, &plant.gen_state_noise(1)[0]);
        }
        // Proportional action alone leaves a steady-state offset below the reference.
        assert!(x[0] > 0.5 && x[0] < reference[0], "settled at {}", x[0]);
    }
}
