extern crate nalgebra as na;

use std::sync::Arc;

use serde::Serialize;

use crate::controller::{Envelope, StateController};
use crate::error::{ConfigError, LoopError};
use crate::gains::GainSchedule;
use crate::observer::StateObserver;

/// Observer and controller for one actuator, stepped once per control cycle.
///
/// Outputs are tracked in the model's sign convention. When the loop is
/// inverted only the value handed back to the caller is negated, so the
/// observer always sees what the model believes was applied.
pub struct ControlLoop<const NX: usize, const NY: usize, const NU: usize> {
    gains: Arc<GainSchedule<NX, NY, NU>>,
    observer: StateObserver<NX, NY, NU>,
    controller: StateController<NX, NY, NU>,
    gain_index: usize,
    last_output: na::SVector<f64, NU>,
    inverted: bool,
}

/// Read-only view for dashboards and logs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoopSnapshot {
    pub estimate: Vec<f64>,
    pub last_output: Vec<f64>,
    pub applied_output: Vec<f64>,
    pub gain_index: usize,
    pub gain_name: String,
    pub inverted: bool,
}

impl<const NX: usize, const NY: usize, const NU: usize> ControlLoop<NX, NY, NU> {
    pub fn new(
        gains: Arc<GainSchedule<NX, NY, NU>>,
        envelope: Envelope<NU>,
        initial_state: na::SVector<f64, NX>,
        initial_output: na::SVector<f64, NU>,
        initial_index: usize,
    ) -> Result<Self, ConfigError> {
        gains
            .check_index(initial_index)
            .map_err(|_| ConfigError::InitialIndexOutOfRange {
                index: initial_index,
                len: gains.len(),
            })?;

        let mut control_loop = Self {
            observer: StateObserver::new(gains.clone(), initial_state),
            controller: StateController::new(gains.clone(), envelope),
            gains,
            gain_index: initial_index,
            last_output: initial_output,
            inverted: false,
        };
        control_loop.apply_gain_index(initial_index);
        log::info!(
            "control loop ready: {} gain set(s), starting on {} `{}`",
            control_loop.gains.len(),
            initial_index,
            control_loop.gains.active(initial_index).name()
        );
        Ok(control_loop)
    }

    /// Closed-loop cycle: estimate from the last output and `measurement`,
    /// then compute, store and return the saturated output for `reference`.
    pub fn track_reference(
        &mut self,
        reference: &na::SVector<f64, NX>,
        measurement: &na::SVector<f64, NY>,
    ) -> na::SVector<f64, NU> {
        let x_hat = self.observer.update(&self.last_output, measurement);
        self.last_output = self.controller.bounded_output(reference, x_hat);
        self.applied_output()
    }

    /// Open-loop cycle: the estimate is still refreshed from the previous output
    /// and `measurement`, then `input` becomes the last output as given.
    /// The controller is not consulted and no clamping happens. `input` is in
    /// the model's sign convention; use [`Self::applied_output`] for the
    /// hardware-facing value.
    pub fn update_with_input(
        &mut self,
        input: &na::SVector<f64, NU>,
        measurement: &na::SVector<f64, NY>,
    ) {
        self.observer.update(&self.last_output, measurement);
        self.last_output = *input;
    }

    /// Switches observer and controller together. Out-of-range indices are
    /// rejected and leave the loop as it was.
    pub fn set_gain_index(&mut self, index: usize) -> Result<(), LoopError> {
        self.gains.check_index(index)?;
        if index != self.gain_index {
            log::debug!(
                "gain set {} -> {} `{}`",
                self.gain_index,
                index,
                self.gains.active(index).name()
            );
        }
        self.apply_gain_index(index);
        Ok(())
    }

    fn apply_gain_index(&mut self, index: usize) {
        self.gain_index = index;
        self.observer.set_gain_index(index);
        self.controller.set_gain_index(index);
    }

    pub fn gain_index(&self) -> usize {
        self.gain_index
    }

    pub fn set_inverted(&mut self, inverted: bool) {
        self.inverted = inverted;
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn estimate(&self) -> &na::SVector<f64, NX> {
        self.observer.estimate()
    }

    pub fn set_estimate(&mut self, x_hat: na::SVector<f64, NX>) {
        self.observer.set_estimate(x_hat);
    }

    /// Force-writes both the estimate and the last output, e.g. after zeroing an encoder.
    pub fn reset(&mut self, x_hat: na::SVector<f64, NX>, output: na::SVector<f64, NU>) {
        self.observer.set_estimate(x_hat);
        self.last_output = output;
    }

    /// Last output in the model's sign convention; this is what the observer consumes.
    pub fn last_output(&self) -> &na::SVector<f64, NU> {
        &self.last_output
    }

    /// Last output with the inversion flag applied.
    pub fn applied_output(&self) -> na::SVector<f64, NU> {
        if self.inverted {
            -self.last_output
        } else {
            self.last_output
        }
    }

    pub fn gains(&self) -> &GainSchedule<NX, NY, NU> {
        &self.gains
    }

    pub fn observer(&self) -> &StateObserver<NX, NY, NU> {
        &self.observer
    }

    pub fn controller(&self) -> &StateController<NX, NY, NU> {
        &self.controller
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            estimate: self.estimate().iter().copied().collect(),
            last_output: self.last_output.iter().copied().collect(),
            applied_output: self.applied_output().iter().copied().collect(),
            gain_index: self.gain_index,
            gain_name: self.gains.active(self.gain_index).name().to_string(),
            inverted: self.inverted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gains::tests::double_integrator;
    use crate::gains::GainSet;
    use crate::models::{LinearSystem, Plant};
    use approx::assert_relative_eq;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn two_speed_loop() -> ControlLoop<2, 2, 1> {
        let gains = Arc::new(
            GainSchedule::new(vec![
                double_integrator("slow", 1.0),
                double_integrator("fast", 2.0),
            ])
            .unwrap(),
        );
        ControlLoop::new(
            gains,
            Envelope::symmetric(na::SVector::<f64, 1>::new(1.0)).unwrap(),
            na::SVector::<f64, 2>::zeros(),
            na::SVector::<f64, 1>::zeros(),
            0,
        )
        .unwrap()
    }

    #[test]
    fn saturates_two_state_scenario() {
        init_logging();
        // identity-like gains, envelope [-1, 1] x [-1, 1]
        let plant = LinearSystem::new(
            na::SMatrix::<f64, 2, 2>::identity(),
            na::SMatrix::<f64, 2, 2>::identity(),
            na::SMatrix::<f64, 2, 2>::identity(),
            na::SMatrix::<f64, 2, 2>::zeros(),
        );
        let set = GainSet::new(
            "identity",
            plant,
            na::SMatrix::<f64, 2, 2>::identity(),
            na::SMatrix::<f64, 2, 2>::identity(),
            na::SMatrix::<f64, 2, 2>::identity(),
            0.02,
        )
        .unwrap();
        let mut control = ControlLoop::new(
            Arc::new(GainSchedule::single(set)),
            Envelope::symmetric(na::SVector::<f64, 2>::new(1.0, 1.0)).unwrap(),
            na::SVector::<f64, 2>::zeros(),
            na::SVector::<f64, 2>::zeros(),
            0,
        )
        .unwrap();

        let u = control.track_reference(
            &na::SVector::<f64, 2>::new(2.0, 2.0),
            &na::SVector::<f64, 2>::zeros(),
        );
        for i in 0..2 {
            assert!(u[i] <= 1.0 && u[i] >= -1.0, "element {i} = {} escaped", u[i]);
        }
        assert_eq!(u, na::SVector::<f64, 2>::new(1.0, 1.0));
    }

    #[test]
    fn initial_index_is_validated() {
        let result = ControlLoop::new(
            Arc::new(GainSchedule::single(double_integrator("only", 1.0))),
            Envelope::symmetric(na::SVector::<f64, 1>::new(1.0)).unwrap(),
            na::SVector::<f64, 2>::zeros(),
            na::SVector::<f64, 1>::zeros(),
            1,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InitialIndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn gain_switch_updates_observer_and_controller() {
        let mut control = two_speed_loop();
        assert_eq!(control.observer().gain_index(), 0);
        assert_eq!(control.controller().gain_index(), 0);

        control.set_gain_index(1).unwrap();
        assert_eq!(control.gain_index(), 1);
        assert_eq!(control.observer().gain_index(), 1);
        assert_eq!(control.controller().gain_index(), 1);

        let err = control.set_gain_index(2).unwrap_err();
        assert_eq!(err, LoopError::GainIndexOutOfRange { index: 2, len: 2 });
        assert_eq!(control.gain_index(), 1);
        assert_eq!(control.observer().gain_index(), 1);
        assert_eq!(control.controller().gain_index(), 1);
    }

    #[test]
    fn gain_switch_keeps_estimate() {
        let mut control = two_speed_loop();
        let x_hat = na::SVector::<f64, 2>::new(0.3, -0.1);
        control.set_estimate(x_hat);
        control.set_gain_index(1).unwrap();
        assert_eq!(control.estimate(), &x_hat);
    }

    #[test]
    fn switched_gains_change_output() {
        let reference = na::SVector::<f64, 2>::new(0.1, 0.0);
        let y = na::SVector::<f64, 2>::zeros();

        let mut slow = two_speed_loop();
        let mut fast = two_speed_loop();
        fast.set_gain_index(1).unwrap();

        let u_slow = slow.track_reference(&reference, &y);
        let u_fast = fast.track_reference(&reference, &y);
        assert_relative_eq!(u_fast[0], 2.0 * u_slow[0], epsilon = 1e-12);
    }

    #[test]
    fn inversion_flips_only_the_applied_output() {
        let reference = na::SVector::<f64, 2>::new(0.2, 0.0);
        let y = na::SVector::<f64, 2>::zeros();

        let mut plain = two_speed_loop();
        let mut inverted = two_speed_loop();
        inverted.set_inverted(true);
        inverted.set_inverted(true);
        assert!(inverted.is_inverted());

        let u_plain = plain.track_reference(&reference, &y);
        let u_inverted = inverted.track_reference(&reference, &y);
        assert_eq!(u_inverted, -u_plain);
        assert_eq!(inverted.last_output(), plain.last_output());

        // the next estimate does not depend on polarity
        plain.track_reference(&reference, &y);
        inverted.track_reference(&reference, &y);
        assert_eq!(inverted.estimate(), plain.estimate());

        inverted.set_inverted(false);
        assert_eq!(inverted.applied_output(), plain.applied_output());
    }

    #[test]
    fn update_with_input_bypasses_controller() {
        let mut control = two_speed_loop();
        // far outside the [-1, 1] envelope
        let input = na::SVector::<f64, 1>::new(7.5);
        let y = na::SVector::<f64, 2>::new(0.4, 0.0);

        control.update_with_input(&input, &y);
        assert_eq!(control.last_output(), &input);
        assert_eq!(control.applied_output(), input);

        // estimate was refreshed with the previous (zero) output and y
        assert_relative_eq!(control.estimate()[0], 0.2, epsilon = 1e-12);

        // the stored input feeds the following prediction
        let before = *control.estimate();
        control.update_with_input(&na::SVector::<f64, 1>::zeros(), &y);
        let gains = control.gains().get(0).unwrap();
        let x_pred = gains.A() * before + gains.B() * input;
        let expected = x_pred + gains.L() * (y - gains.C() * x_pred);
        assert_relative_eq!(*control.estimate(), expected, epsilon = 1e-12);
    }

    #[test]
    fn set_estimate_round_trips() {
        let mut control = two_speed_loop();
        let v = na::SVector::<f64, 2>::new(12.5, -0.001);
        control.set_estimate(v);
        assert_relative_eq!(*control.estimate(), v);
    }

    #[test]
    fn snapshot_serializes() {
        let mut control = two_speed_loop();
        control.set_inverted(true);
        control.reset(
            na::SVector::<f64, 2>::new(1.0, 2.0),
            na::SVector::<f64, 1>::new(0.5),
        );
        let snapshot = control.snapshot();
        assert_eq!(snapshot.applied_output, vec![-0.5]);
        assert_eq!(snapshot.gain_name, "slow");

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["estimate"], serde_json::json!([1.0, 2.0]));
        assert_eq!(json["inverted"], serde_json::json!(true));
    }

    #[test]
    fn regulates_double_integrator_to_reference() {
        init_logging();
        let mut control = two_speed_loop();
        let plant = *control.gains().get(0).unwrap().plant();
        let reference = na::SVector::<f64, 2>::new(1.0, 0.0);

        let mut x = na::SVector::<f64, 2>::zeros();
        let mut u = na::SVector::<f64, 1>::zeros();
        for _ in 0..400 {
            let y = plant.meas_model(&x, &u, &na::SVector::zeros());
            u = control.track_reference(&reference, &y);
            assert!(control.controller().envelope().contains(&u));
            x = plant.state_model(&x, &u, &na::SVector::zeros());
        }

        assert_relative_eq!(x, reference, epsilon = 1e-3);
        assert_relative_eq!(*control.estimate(), x, epsilon = 1e-3);
    }
}
