//! Brushed DC motor characterization and gain design for a position/velocity loop.

extern crate nalgebra as na;

use std::f64::consts::PI;

use crate::error::ConfigError;
use crate::gains::GainSet;
use crate::linsystheory::{c2d, discrete_kalman_gain, discretize_noise, dlqr, feedforward_gain};
use crate::models::LinearSystem;

pub const RPM_TO_RAD_PER_SEC: f64 = 2.0 * PI / 60.0;

/// Datasheet values. Speeds in rad/s, currents in A, torque in N*m, voltage in V.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorConstants {
    pub free_speed: f64,
    pub free_current: f64,
    pub stall_torque: f64,
    pub stall_current: f64,
    pub voltage: f64,
}

impl MotorConstants {
    pub const PRO_775: Self = Self {
        free_speed: 18730.0 * RPM_TO_RAD_PER_SEC,
        free_current: 0.7,
        stall_torque: 0.71,
        stall_current: 134.0,
        voltage: 12.0,
    };
    pub const CIM: Self = Self {
        free_speed: 5310.0 * RPM_TO_RAD_PER_SEC,
        free_current: 2.7,
        stall_torque: 2.42,
        stall_current: 133.0,
        voltage: 12.0,
    };
    pub const MINI_CIM: Self = Self {
        free_speed: 5840.0 * RPM_TO_RAD_PER_SEC,
        free_current: 3.0,
        stall_torque: 1.4,
        stall_current: 89.0,
        voltage: 12.0,
    };
    pub const BAG: Self = Self {
        free_speed: 13180.0 * RPM_TO_RAD_PER_SEC,
        free_current: 1.8,
        stall_torque: 0.4,
        stall_current: 53.0,
        voltage: 12.0,
    };

    /// Torque constant, N*m/A.
    pub fn kt(&self) -> f64 {
        self.stall_torque / self.stall_current
    }

    /// Winding resistance, ohm.
    pub fn resistance(&self) -> f64 {
        self.voltage / self.stall_current
    }

    /// Speed constant, rad/s per V of back-EMF.
    pub fn kv(&self) -> f64 {
        self.free_speed / (self.voltage - self.free_current * self.resistance())
    }

    /// Viscous friction seen at free speed, N*m*s/rad.
    pub fn damping(&self) -> f64 {
        self.free_current * self.kt() / self.free_speed
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mechanism {
    /// Output torque over motor torque, before losses.
    pub gear_ratio: f64,
    pub efficiency: f64,
    /// Moment of inertia at the output, kg*m^2.
    pub inertia: f64,
}

/// Continuous model for x = [theta, omega], u = [volts].
pub fn position_velocity_model(
    motor: &MotorConstants,
    mechanism: &Mechanism,
) -> (na::SMatrix<f64, 2, 2>, na::SMatrix<f64, 2, 1>) {
    let gear_ratio = mechanism.gear_ratio / mechanism.efficiency;
    let (kt, r, kv, j) = (
        motor.kt(),
        motor.resistance(),
        motor.kv(),
        mechanism.inertia,
    );

    let k1 = -gear_ratio * gear_ratio * (kt / (kv * r * j) + motor.damping() / j);
    let k2 = kt * gear_ratio / (r * j);

    (
        na::SMatrix::<f64, 2, 2>::new(0.0, 1.0, 0.0, k1),
        na::SMatrix::<f64, 2, 1>::new(0.0, k2),
    )
}

/// Maps [rad, rad/s] to encoder units [ticks, ticks per 100 ms].
pub fn encoder_output_matrix(ticks_per_rev: f64) -> na::SMatrix<f64, 2, 2> {
    let position_ratio = ticks_per_rev / (2.0 * PI);
    na::SMatrix::<f64, 2, 2>::new(position_ratio, 0.0, 0.0, position_ratio / 10.0)
}

/// Design weights for [`motor_gains`]. Noise intensities are continuous-time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorTuning {
    pub dt: f64,
    pub c_matrix: na::SMatrix<f64, 2, 2>,
    pub q_weight: na::SMatrix<f64, 2, 2>,
    pub r_weight: na::SMatrix<f64, 1, 1>,
    pub q_noise: na::SMatrix<f64, 2, 2>,
    pub r_noise: na::SMatrix<f64, 2, 2>,
}

impl MotorTuning {
    /// Bryson's rule: weight each state by 1/(acceptable error)^2 and the
    /// voltage by 1/(motor voltage)^2.
    pub fn bryson(
        motor: &MotorConstants,
        dt: f64,
        position_tolerance: f64,
        velocity_tolerance: f64,
    ) -> Self {
        Self {
            dt,
            c_matrix: na::SMatrix::<f64, 2, 2>::identity(),
            q_weight: na::SMatrix::<f64, 2, 2>::new(
                1.0 / position_tolerance.powi(2),
                0.0,
                0.0,
                1.0 / velocity_tolerance.powi(2),
            ),
            r_weight: na::SMatrix::<f64, 1, 1>::new(1.0 / motor.voltage.powi(2)),
            q_noise: na::SMatrix::<f64, 2, 2>::new(0.01_f64.powi(2), 0.0, 0.0, 2.5_f64.powi(2)),
            r_noise: na::SMatrix::<f64, 2, 2>::new(0.03_f64.powi(2), 0.0, 0.0, 1.1_f64.powi(2)),
        }
    }
}

/// Discretizes the motor model and designs K, Kff and L for it.
/// None if one of the Riccati solutions fails.
pub fn motor_gains(
    name: &str,
    motor: &MotorConstants,
    mechanism: &Mechanism,
    tuning: &MotorTuning,
) -> Result<Option<GainSet<2, 2, 1>>, ConfigError> {
    if !(tuning.dt.is_finite() && tuning.dt > 0.0) {
        return Err(ConfigError::InvalidPeriod(tuning.dt));
    }
    let (a_c, b_c) = position_velocity_model(motor, mechanism);
    let (a_d, b_d) = c2d(&a_c, &b_c, tuning.dt);
    let (q_d, r_d) = discretize_noise(&a_c, &tuning.q_noise, &tuning.r_noise, tuning.dt);

    let Some(k) = dlqr(&a_d, &b_d, &tuning.q_weight, &tuning.r_weight) else {
        return Ok(None);
    };
    let Some(l) = discrete_kalman_gain(&a_d, &tuning.c_matrix, &q_d, &r_d) else {
        return Ok(None);
    };
    let Some(kff) = feedforward_gain(&b_d, &tuning.q_weight, &tuning.r_weight) else {
        return Ok(None);
    };

    let plant = LinearSystem::new(a_d, b_d, tuning.c_matrix, na::SMatrix::<f64, 2, 1>::zeros());
    GainSet::new(name, plant, k, kff, l, tuning.dt).map(Some)
}
