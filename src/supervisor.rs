extern crate nalgebra as na;

use crate::control_loop::ControlLoop;
use crate::error::LoopError;

/// Consecutive zero reads needed before an encoder reset counts as done.
pub const CONFIRMED_ZERO_READS: u32 = 5;

/// Encoder access, injected by whoever owns the hardware.
pub trait Encoder {
    /// Requests the position counter be zeroed. May take effect a few cycles later.
    fn reset(&mut self);

    fn position_ticks(&mut self) -> i64;
}

/// Counts consecutive zero reads; any non-zero read starts the count over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderReset {
    confirmed: u32,
    threshold: u32,
}

impl Default for EncoderReset {
    fn default() -> Self {
        Self::new(CONFIRMED_ZERO_READS)
    }
}

impl EncoderReset {
    pub fn new(threshold: u32) -> Self {
        Self {
            confirmed: 0,
            threshold,
        }
    }

    /// Feeds one read, returns true once the reset is confirmed.
    pub fn observe(&mut self, ticks: i64) -> bool {
        if ticks == 0 {
            self.confirmed = self.confirmed.saturating_add(1);
        } else {
            self.confirmed = 0;
        }
        self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.confirmed >= self.threshold
    }

    pub fn confirmed(&self) -> u32 {
        self.confirmed
    }

    pub fn restart(&mut self) {
        self.confirmed = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Neutral output, estimator still fed.
    Idle,
    Tracking,
    /// Operator-supplied output, controller bypassed.
    Manual,
    /// Zeroing the encoder; returns to Idle when confirmed.
    Resetting,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command<const NX: usize, const NU: usize> {
    Track(na::SVector<f64, NX>),
    Manual(na::SVector<f64, NU>),
    ResetEncoder,
    Stop,
    SelectGains(usize),
    SetInverted(bool),
}

/// Drives one [`ControlLoop`] through its modes, one `step` per control cycle.
pub struct Supervisor<const NX: usize, const NY: usize, const NU: usize> {
    control: ControlLoop<NX, NY, NU>,
    mode: Mode,
    reference: na::SVector<f64, NX>,
    manual_input: na::SVector<f64, NU>,
    reset: EncoderReset,
}

impl<const NX: usize, const NY: usize, const NU: usize> Supervisor<NX, NY, NU> {
    pub fn new(control: ControlLoop<NX, NY, NU>) -> Self {
        Self::with_encoder_reset(control, EncoderReset::default())
    }

    pub fn with_encoder_reset(control: ControlLoop<NX, NY, NU>, reset: EncoderReset) -> Self {
        Self {
            control,
            mode: Mode::Idle,
            reference: na::SVector::zeros(),
            manual_input: na::SVector::zeros(),
            reset,
        }
    }

    pub fn handle(&mut self, command: Command<NX, NU>) -> Result<(), LoopError> {
        match command {
            Command::Track(reference) => {
                self.reference = reference;
                self.enter(Mode::Tracking);
            }
            Command::Manual(input) => {
                self.manual_input = input;
                self.enter(Mode::Manual);
            }
            Command::ResetEncoder => {
                let neutral = self.neutral();
                self.control.reset(na::SVector::zeros(), neutral);
                self.reset.restart();
                self.enter(Mode::Resetting);
            }
            Command::Stop => self.enter(Mode::Idle),
            Command::SelectGains(index) => self.control.set_gain_index(index)?,
            Command::SetInverted(inverted) => self.control.set_inverted(inverted),
        }
        Ok(())
    }

    /// Runs exactly one control cycle and returns the output to apply to hardware.
    pub fn step<E: Encoder>(
        &mut self,
        encoder: &mut E,
        measurement: &na::SVector<f64, NY>,
    ) -> na::SVector<f64, NU> {
        match self.mode {
            Mode::Idle => {
                let neutral = self.neutral();
                self.control.update_with_input(&neutral, measurement);
                self.control.applied_output()
            }
            Mode::Tracking => self.control.track_reference(&self.reference, measurement),
            Mode::Manual => {
                self.control
                    .update_with_input(&self.manual_input, measurement);
                self.control.applied_output()
            }
            Mode::Resetting => {
                encoder.reset();
                if self.reset.observe(encoder.position_ticks()) {
                    log::info!(
                        "encoder zero confirmed after {} reads",
                        self.reset.confirmed()
                    );
                    self.enter(Mode::Idle);
                }
                self.control.applied_output()
            }
        }
    }

    fn enter(&mut self, mode: Mode) {
        if self.mode != mode {
            log::info!("{:?} -> {:?}", self.mode, mode);
            self.mode = mode;
        }
    }

    fn neutral(&self) -> na::SVector<f64, NU> {
        self.control.controller().envelope().neutral()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn encoder_reset(&self) -> &EncoderReset {
        &self.reset
    }

    pub fn control(&self) -> &ControlLoop<NX, NY, NU> {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlLoop<NX, NY, NU> {
        &mut self.control
    }

    pub fn into_inner(self) -> ControlLoop<NX, NY, NU> {
        self.control
    }
}
