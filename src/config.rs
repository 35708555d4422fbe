//! JSON tuning data for a control loop.
//!
//! Matrices are written row-major as nested arrays. Every matrix and vector is
//! checked against the loop's compile-time dimensions when the loop is built:
//!
//! ```json
//! {
//!   "gains": [{
//!     "name": "arm-low",
//!     "dt": 0.01,
//!     "a": [[1.0, 0.01], [0.0, 0.99]],
//!     "b": [[0.0], [0.05]],
//!     "c": [[1.0, 0.0]],
//!     "k": [[12.0, 1.1]],
//!     "l": [[0.4], [2.0]]
//!   }],
//!   "u_min": [-12.0],
//!   "u_max": [12.0]
//! }
//! ```
//!
//! `d` and `kff` default to zero, the initial state and output to zero, the
//! initial gain index to 0 and `inverted` to false.

extern crate nalgebra as na;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::control_loop::ControlLoop;
use crate::controller::Envelope;
use crate::error::ConfigError;
use crate::gains::{GainSchedule, GainSet};
use crate::models::LinearSystem;

type Rows = Vec<Vec<f64>>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GainSetConfig {
    pub name: String,
    pub dt: f64,
    pub a: Rows,
    pub b: Rows,
    pub c: Rows,
    #[serde(default)]
    pub d: Option<Rows>,
    pub k: Rows,
    #[serde(default)]
    pub kff: Option<Rows>,
    pub l: Rows,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LoopConfig {
    pub gains: Vec<GainSetConfig>,
    pub u_min: Vec<f64>,
    pub u_max: Vec<f64>,
    #[serde(default)]
    pub initial_state: Option<Vec<f64>>,
    #[serde(default)]
    pub initial_output: Option<Vec<f64>>,
    #[serde(default)]
    pub initial_index: usize,
    #[serde(default)]
    pub inverted: bool,
}

fn matrix_from_rows<const R: usize, const C: usize>(
    what: &'static str,
    rows: &[Vec<f64>],
) -> Result<na::SMatrix<f64, R, C>, ConfigError> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some((row, values)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
        return Err(ConfigError::RaggedMatrix {
            what,
            row,
            len: values.len(),
            expected: cols,
        });
    }
    if rows.len() != R || cols != C {
        return Err(ConfigError::DimensionMismatch {
            what,
            expected_rows: R,
            expected_cols: C,
            rows: rows.len(),
            cols,
        });
    }
    Ok(na::SMatrix::<f64, R, C>::from_fn(|i, j| rows[i][j]))
}

fn optional_matrix<const R: usize, const C: usize>(
    what: &'static str,
    rows: Option<&Rows>,
) -> Result<na::SMatrix<f64, R, C>, ConfigError> {
    match rows {
        Some(rows) => matrix_from_rows(what, rows),
        None => Ok(na::SMatrix::<f64, R, C>::zeros()),
    }
}

fn vector_from_slice<const N: usize>(
    what: &'static str,
    values: &[f64],
) -> Result<na::SVector<f64, N>, ConfigError> {
    if values.len() != N {
        return Err(ConfigError::DimensionMismatch {
            what,
            expected_rows: N,
            expected_cols: 1,
            rows: values.len(),
            cols: 1,
        });
    }
    Ok(na::SVector::<f64, N>::from_column_slice(values))
}

fn optional_vector<const N: usize>(
    what: &'static str,
    values: Option<&Vec<f64>>,
) -> Result<na::SVector<f64, N>, ConfigError> {
    match values {
        Some(values) => vector_from_slice(what, values),
        None => Ok(na::SVector::<f64, N>::zeros()),
    }
}

impl GainSetConfig {
    pub fn build<const NX: usize, const NY: usize, const NU: usize>(
        &self,
    ) -> Result<GainSet<NX, NY, NU>, ConfigError> {
        self.build_inner().map_err(|source| ConfigError::InGainSet {
            name: self.name.clone(),
            source: Box::new(source),
        })
    }

    fn build_inner<const NX: usize, const NY: usize, const NU: usize>(
        &self,
    ) -> Result<GainSet<NX, NY, NU>, ConfigError> {
        let plant = LinearSystem::new(
            matrix_from_rows("A", &self.a)?,
            matrix_from_rows("B", &self.b)?,
            matrix_from_rows("C", &self.c)?,
            optional_matrix("D", self.d.as_ref())?,
        );
        GainSet::new(
            self.name.clone(),
            plant,
            matrix_from_rows("K", &self.k)?,
            optional_matrix("Kff", self.kff.as_ref())?,
            matrix_from_rows("L", &self.l)?,
            self.dt,
        )
    }
}

impl LoopConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::info!("loading loop configuration from {}", path.display());
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn schedule<const NX: usize, const NY: usize, const NU: usize>(
        &self,
    ) -> Result<GainSchedule<NX, NY, NU>, ConfigError> {
        let gains = self
            .gains
            .iter()
            .map(|set| set.build::<NX, NY, NU>())
            .collect::<Result<Vec<_>, _>>()?;
        GainSchedule::new(gains)
    }

    pub fn envelope<const NU: usize>(&self) -> Result<Envelope<NU>, ConfigError> {
        Envelope::new(
            vector_from_slice("u_min", &self.u_min)?,
            vector_from_slice("u_max", &self.u_max)?,
        )
    }

    /// Builds a loop with its own copy of the gain schedule.
    pub fn build<const NX: usize, const NY: usize, const NU: usize>(
        &self,
    ) -> Result<ControlLoop<NX, NY, NU>, ConfigError> {
        self.build_with(Arc::new(self.schedule()?))
    }

    /// Builds a loop around an existing, possibly shared, schedule.
    pub fn build_with<const NX: usize, const NY: usize, const NU: usize>(
        &self,
        gains: Arc<GainSchedule<NX, NY, NU>>,
    ) -> Result<ControlLoop<NX, NY, NU>, ConfigError> {
        let mut control_loop = ControlLoop::new(
            gains,
            self.envelope()?,
            optional_vector("initial_state", self.initial_state.as_ref())?,
            optional_vector("initial_output", self.initial_output.as_ref())?,
            self.initial_index,
        )?;
        control_loop.set_inverted(self.inverted);
        Ok(control_loop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARM: &str = r#"{
        "gains": [
            {
                "name": "empty-arm",
                "dt": 0.01,
                "a": [[1.0, 0.01], [0.0, 0.99]],
                "b": [[0.0], [0.05]],
                "c": [[1.0, 0.0]],
                "k": [[12.0, 1.1]],
                "l": [[0.4], [2.0]]
            },
            {
                "name": "loaded-arm",
                "dt": 0.01,
                "a": [[1.0, 0.01], [0.0, 0.98]],
                "b": [[0.0], [0.02]],
                "c": [[1.0, 0.0]],
                "d": [[0.0]],
                "k": [[20.0, 2.0]],
                "kff": [[0.0, 50.0]],
                "l": [[0.4], [1.5]]
            }
        ],
        "u_min": [-12.0],
        "u_max": [12.0],
        "initial_index": 1,
        "inverted": true
    }"#;

    #[test]
    fn builds_loop_from_json() {
        let config = LoopConfig::from_json(ARM).unwrap();
        let control: ControlLoop<2, 1, 1> = config.build().unwrap();

        assert_eq!(control.gains().len(), 2);
        assert_eq!(control.gain_index(), 1);
        assert!(control.is_inverted());
        assert_eq!(control.estimate(), &na::SVector::<f64, 2>::zeros());

        let loaded = control.gains().get(1).unwrap();
        assert_eq!(loaded.name(), "loaded-arm");
        assert_eq!(loaded.A()[(1, 1)], 0.98);
        assert_eq!(loaded.Kff()[(0, 1)], 50.0);
        assert_eq!(control.gains().get(0).unwrap().Kff(), &na::SMatrix::<f64, 1, 2>::zeros());
        assert_eq!(control.controller().envelope().u_max()[0], 12.0);
    }

    #[test]
    fn wrong_state_dimension_names_matrix_and_set() {
        let config = LoopConfig::from_json(ARM).unwrap();
        let err = config.build::<3, 1, 1>().err().unwrap();
        match err {
            ConfigError::InGainSet { name, source } => {
                assert_eq!(name, "empty-arm");
                assert!(matches!(
                    *source,
                    ConfigError::DimensionMismatch {
                        what: "A",
                        expected_rows: 3,
                        rows: 2,
                        ..
                    }
                ));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = matrix_from_rows::<2, 2>("A", &[vec![1.0, 0.0], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::RaggedMatrix {
                what: "A",
                row: 1,
                len: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn envelope_and_initial_vectors_are_checked() {
        let mut config = LoopConfig::from_json(ARM).unwrap();
        config.u_max = vec![12.0, 12.0];
        assert!(matches!(
            config.build::<2, 1, 1>().err().unwrap(),
            ConfigError::DimensionMismatch { what: "u_max", .. }
        ));

        let mut config = LoopConfig::from_json(ARM).unwrap();
        config.u_min = vec![13.0];
        assert!(matches!(
            config.build::<2, 1, 1>().err().unwrap(),
            ConfigError::InvertedEnvelope { index: 0, .. }
        ));

        let mut config = LoopConfig::from_json(ARM).unwrap();
        config.initial_state = Some(vec![0.0]);
        assert!(matches!(
            config.build::<2, 1, 1>().err().unwrap(),
            ConfigError::DimensionMismatch { what: "initial_state", .. }
        ));

        let mut config = LoopConfig::from_json(ARM).unwrap();
        config.initial_index = 5;
        assert!(matches!(
            config.build::<2, 1, 1>().err().unwrap(),
            ConfigError::InitialIndexOutOfRange { index: 5, len: 2 }
        ));
    }

    #[test]
    fn empty_gain_list_is_rejected() {
        let config = LoopConfig::from_json(r#"{"gains": [], "u_min": [-1.0], "u_max": [1.0]}"#)
            .unwrap();
        assert!(matches!(
            config.build::<2, 1, 1>().err().unwrap(),
            ConfigError::EmptySchedule
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            LoopConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn shared_schedule_serves_two_loops() {
        let config = LoopConfig::from_json(ARM).unwrap();
        let schedule = Arc::new(config.schedule::<2, 1, 1>().unwrap());
        let mut left = config.build_with(schedule.clone()).unwrap();
        let right = config.build_with(schedule.clone()).unwrap();

        left.set_gain_index(0).unwrap();
        assert_eq!(left.gain_index(), 0);
        assert_eq!(right.gain_index(), 1);
        // each loop holds one handle for itself, its observer and its controller
        assert_eq!(Arc::strong_count(&schedule), 7);
    }
}
