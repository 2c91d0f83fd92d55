use serde::{Deserialize, Serialize};

use super::autorange::{RangeCode, PROBE_RANGE};
use super::constants::{PARKED_MASS, PARKED_SPEED, PHYSICAL_CHANNELS, RANGE_EXPONENT_OFFSET};
use super::error::InstrumentError;
use super::session::InstrumentSnapshot;

/// Control unit generation. Older units report readings relative to the active range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    Qmg420,
    #[default]
    Qmg422,
}

impl Generation {
    /// Convert a raw reading to amperes
    pub fn scale(&self, raw: f64, range: RangeCode) -> f64 {
        match self {
            Self::Qmg420 => raw / 10f64.powi(range.0 as i32 + RANGE_EXPONENT_OFFSET),
            Self::Qmg422 => raw,
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Qmg420 => write!(f, "QMG 420"),
            Self::Qmg422 => write!(f, "QMG 422"),
        }
    }
}

/// Parameters pushed to one physical channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSetup {
    pub mass: f64,
    pub speed: u8,
    pub range: RangeCode,
    pub enabled: bool,
}

impl ChannelSetup {
    /// Safe default written to every channel before a run
    pub fn parked() -> Self {
        Self {
            mass: PARKED_MASS,
            speed: PARKED_SPEED,
            range: PROBE_RANGE,
            enabled: false,
        }
    }
}

/// Capabilities the scheduler needs from a quadrupole mass spectrometer.
///
/// Channel 0 is the sweep channel; mass-time channels are 1-based and contiguous.
pub trait MassSpectrometer: Send {
    fn generation(&self) -> Generation;

    /// Park every physical channel
    fn reset_all(&mut self) -> Result<(), InstrumentError> {
        let parked = ChannelSetup::parked();
        for index in 0..PHYSICAL_CHANNELS {
            self.configure_channel(index, &parked)?;
        }
        Ok(())
    }

    /// Put the unit in multi-channel mode cycling over channels `1..=channels`
    fn prepare_mass_time(&mut self, channels: u8) -> Result<(), InstrumentError>;
    fn configure_channel(&mut self, index: u8, setup: &ChannelSetup)
        -> Result<(), InstrumentError>;
    fn set_range(&mut self, index: u8, range: RangeCode) -> Result<(), InstrumentError>;
    /// Start one measurement cycle over the configured channels, or one sweep
    fn trigger_cycle(&mut self) -> Result<(), InstrumentError>;
    /// Read the next value of the running cycle. An empty string means no data.
    fn read_one(&mut self) -> Result<String, InstrumentError>;

    fn read_batch(&mut self, count: usize) -> Result<Vec<String>, InstrumentError> {
        (0..count).map(|_| self.read_one()).collect()
    }

    fn is_running(&mut self) -> Result<bool, InstrumentError>;
    /// Number of sweep samples buffered in the unit
    fn waiting_samples(&mut self) -> Result<usize, InstrumentError>;
    /// Set up channel 0 for a sweep over `first..first + width`
    fn configure_scan(
        &mut self,
        first: f64,
        width: f64,
        range: RangeCode,
    ) -> Result<(), InstrumentError>;
    fn snapshot(&mut self, index: u8) -> Result<InstrumentSnapshot, InstrumentError>;
}

impl<T: MassSpectrometer + ?Sized> MassSpectrometer for Box<T> {
    fn generation(&self) -> Generation {
        (**self).generation()
    }

    fn reset_all(&mut self) -> Result<(), InstrumentError> {
        (**self).reset_all()
    }

    fn prepare_mass_time(&mut self, channels: u8) -> Result<(), InstrumentError> {
        (**self).prepare_mass_time(channels)
    }

    fn configure_channel(
        &mut self,
        index: u8,
        setup: &ChannelSetup,
    ) -> Result<(), InstrumentError> {
        (**self).configure_channel(index, setup)
    }

    fn set_range(&mut self, index: u8, range: RangeCode) -> Result<(), InstrumentError> {
        (**self).set_range(index, range)
    }

    fn trigger_cycle(&mut self) -> Result<(), InstrumentError> {
        (**self).trigger_cycle()
    }

    fn read_one(&mut self) -> Result<String, InstrumentError> {
        (**self).read_one()
    }

    fn read_batch(&mut self, count: usize) -> Result<Vec<String>, InstrumentError> {
        (**self).read_batch(count)
    }

    fn is_running(&mut self) -> Result<bool, InstrumentError> {
        (**self).is_running()
    }

    fn waiting_samples(&mut self) -> Result<usize, InstrumentError> {
        (**self).waiting_samples()
    }

    fn configure_scan(
        &mut self,
        first: f64,
        width: f64,
        range: RangeCode,
    ) -> Result<(), InstrumentError> {
        (**self).configure_scan(first, width, range)
    }

    fn snapshot(&mut self, index: u8) -> Result<InstrumentSnapshot, InstrumentError> {
        (**self).snapshot(index)
    }
}
