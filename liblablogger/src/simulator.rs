use std::collections::VecDeque;
use std::sync::Arc;

use super::autorange::RangeCode;
use super::constants::{PHYSICAL_CHANNELS, RANGE_EXPONENT_OFFSET};
use super::context::RunControl;
use super::error::InstrumentError;
use super::instrument::{ChannelSetup, Generation, MassSpectrometer};
use super::session::InstrumentSnapshot;

const SEM_VOLTAGE: &str = "1800";
const DEFAULT_SWEEP_SAMPLES: usize = 640;
const DEFAULT_SWEEP_POLLS: usize = 2;

/// Masses that show up as peaks in simulated sweeps
const PEAKS: [f64; 5] = [2.0, 18.0, 28.0, 32.0, 44.0];

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Idle,
    Cycle,
    Sweep { first: f64, width: f64 },
}

/// Deterministic stand-in for a QMG control unit.
///
/// Readings come from a script of replies first, then from a synthetic spectrum.
/// Every `trigger_cycle` counts as one cycle, including auto-range probes and sweeps.
pub struct SimulatedMassSpec {
    generation: Generation,
    channels: Vec<ChannelSetup>,
    active: u8,
    cursor: u8,
    mode: Mode,
    cycles: usize,
    replies: VecDeque<String>,
    sweep_samples: usize,
    sweep_polls: usize,
    polls_left: usize,
    buffered: usize,
    emitted: usize,
    stop_after: Option<(usize, Arc<RunControl>)>,
    range_history: Vec<(u8, RangeCode)>,
}

impl SimulatedMassSpec {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            channels: vec![ChannelSetup::parked(); PHYSICAL_CHANNELS as usize],
            active: 0,
            cursor: 0,
            mode: Mode::Idle,
            cycles: 0,
            replies: VecDeque::new(),
            sweep_samples: DEFAULT_SWEEP_SAMPLES,
            sweep_polls: DEFAULT_SWEEP_POLLS,
            polls_left: 0,
            buffered: 0,
            emitted: 0,
            stop_after: None,
            range_history: Vec::new(),
        }
    }

    /// Queue replies returned by `read_one` before any synthetic value
    pub fn with_replies<S: Into<String>>(mut self, replies: impl IntoIterator<Item = S>) -> Self {
        self.replies.extend(replies.into_iter().map(Into::into));
        self
    }

    /// Number of samples a sweep buffers, and how many running polls it takes
    pub fn with_sweep(mut self, samples: usize, polls: usize) -> Self {
        self.sweep_samples = samples;
        self.sweep_polls = polls;
        self
    }

    /// Raise the stop flag once `cycles` cycles have been triggered
    pub fn stop_after_cycles(mut self, cycles: usize, control: Arc<RunControl>) -> Self {
        self.stop_after = Some((cycles, control));
        self
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn channel(&self, index: u8) -> Option<&ChannelSetup> {
        self.channels.get(index as usize)
    }

    /// Every range change in order, as (channel, range)
    pub fn range_history(&self) -> &[(u8, RangeCode)] {
        &self.range_history
    }

    fn setup_mut(&mut self, index: u8) -> Result<&mut ChannelSetup, InstrumentError> {
        self.channels
            .get_mut(index as usize)
            .ok_or(InstrumentError::BadChannel(index))
    }

    /// Convert a current in amperes into what the unit would report at `range`
    fn raw(&self, current: f64, range: RangeCode) -> f64 {
        match self.generation {
            Generation::Qmg420 => current * 10f64.powi(range.0 as i32 + RANGE_EXPONENT_OFFSET),
            Generation::Qmg422 => current,
        }
    }

    fn mass_time_value(&self, index: u8) -> String {
        let setup = &self.channels[index as usize];
        let current = 1.0e-10 * (1.0 + setup.mass.rem_euclid(7.0));
        format!("{:e}", self.raw(current, setup.range))
    }

    fn sweep_value(&self, first: f64, width: f64) -> String {
        let mass = first + self.emitted as f64 * width / self.sweep_samples.max(1) as f64;
        let current = PEAKS
            .iter()
            .map(|peak| 1.0e-9 * (-(mass - peak).powi(2) / 0.02).exp())
            .sum::<f64>()
            + 1.0e-12;
        format!("{:e}", self.raw(current, self.channels[0].range))
    }
}

impl MassSpectrometer for SimulatedMassSpec {
    fn generation(&self) -> Generation {
        self.generation
    }

    fn prepare_mass_time(&mut self, channels: u8) -> Result<(), InstrumentError> {
        if channels >= PHYSICAL_CHANNELS {
            return Err(InstrumentError::BadChannel(channels));
        }
        self.active = channels;
        self.mode = Mode::Cycle;
        Ok(())
    }

    fn configure_channel(
        &mut self,
        index: u8,
        setup: &ChannelSetup,
    ) -> Result<(), InstrumentError> {
        *self.setup_mut(index)? = setup.clone();
        Ok(())
    }

    fn set_range(&mut self, index: u8, range: RangeCode) -> Result<(), InstrumentError> {
        self.setup_mut(index)?.range = range;
        self.range_history.push((index, range));
        Ok(())
    }

    fn trigger_cycle(&mut self) -> Result<(), InstrumentError> {
        self.cycles += 1;
        self.cursor = 0;
        if let Mode::Sweep { .. } = self.mode {
            self.buffered = self.sweep_samples;
            self.emitted = 0;
            self.polls_left = self.sweep_polls;
        }
        if let Some((limit, control)) = &self.stop_after {
            if self.cycles >= *limit {
                control.request_stop();
            }
        }
        Ok(())
    }

    fn read_one(&mut self) -> Result<String, InstrumentError> {
        if let Some(reply) = self.replies.pop_front() {
            self.cursor = self.cursor.saturating_add(1);
            if let Mode::Sweep { .. } = self.mode {
                self.emitted += 1;
            }
            return Ok(reply);
        }
        match self.mode {
            Mode::Idle => Ok(String::new()),
            Mode::Cycle => {
                if self.active == 0 {
                    return Ok(String::new());
                }
                let index = 1 + self.cursor % self.active;
                self.cursor = self.cursor.saturating_add(1);
                Ok(self.mass_time_value(index))
            }
            Mode::Sweep { first, width } => {
                if self.emitted >= self.buffered {
                    return Ok(String::new());
                }
                let value = self.sweep_value(first, width);
                self.emitted += 1;
                Ok(value)
            }
        }
    }

    fn is_running(&mut self) -> Result<bool, InstrumentError> {
        if self.polls_left > 0 {
            self.polls_left -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn waiting_samples(&mut self) -> Result<usize, InstrumentError> {
        Ok(self.buffered.saturating_sub(self.emitted))
    }

    fn configure_scan(
        &mut self,
        first: f64,
        width: f64,
        range: RangeCode,
    ) -> Result<(), InstrumentError> {
        let sweep = self.setup_mut(0)?;
        sweep.mass = first;
        sweep.range = range;
        sweep.enabled = true;
        self.mode = Mode::Sweep { first, width };
        self.buffered = 0;
        self.emitted = 0;
        Ok(())
    }

    fn snapshot(&mut self, index: u8) -> Result<InstrumentSnapshot, InstrumentError> {
        let setup = self.setup_mut(index)?;
        Ok(InstrumentSnapshot {
            sem_voltage: SEM_VOLTAGE.to_string(),
            preamp_range: setup.range.to_string(),
            timestep: setup.speed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autorange::RANGE_E;

    #[test]
    fn test_scripted_then_synthetic() {
        let mut sim = SimulatedMassSpec::new(Generation::Qmg422).with_replies(["1.0", "2.0"]);
        sim.prepare_mass_time(2).unwrap();
        sim.trigger_cycle().unwrap();
        assert_eq!(sim.read_one().unwrap(), "1.0");
        assert_eq!(sim.read_one().unwrap(), "2.0");
        assert!(sim.read_one().unwrap().parse::<f64>().is_ok());
    }

    #[test]
    fn test_sweep_buffer() {
        let mut sim = SimulatedMassSpec::new(Generation::Qmg422).with_sweep(10, 1);
        sim.configure_scan(0.0, 50.0, RANGE_E).unwrap();
        sim.trigger_cycle().unwrap();
        assert!(sim.is_running().unwrap());
        assert!(!sim.is_running().unwrap());
        assert_eq!(sim.waiting_samples().unwrap(), 10);
        assert_eq!(sim.read_batch(4).unwrap().len(), 4);
        assert_eq!(sim.waiting_samples().unwrap(), 6);
    }

    #[test]
    fn test_stop_hook() {
        let control = Arc::new(RunControl::new());
        let mut sim = SimulatedMassSpec::new(Generation::Qmg422).stop_after_cycles(2, control.clone());
        sim.trigger_cycle().unwrap();
        assert!(!control.is_stop_requested());
        sim.trigger_cycle().unwrap();
        assert!(control.is_stop_requested());
    }

    #[test]
    fn test_bad_channel() {
        let mut sim = SimulatedMassSpec::new(Generation::Qmg422);
        assert!(matches!(
            sim.set_range(PHYSICAL_CHANNELS, RANGE_E),
            Err(InstrumentError::BadChannel(_))
        ));
    }
}
