use std::sync::Arc;
use std::time::{Duration, Instant};

use super::autorange::{range_for, RangeCode, PROBE_RANGE};
use super::channel_list::{MsChannel, RunSettings};
use super::constants::{
    DEFAULT_CHANNEL_SETTLE_MS, DEFAULT_CYCLE_PAUSE_MS, DEFAULT_INTERLEAVED_SCAN_WIDTH,
    DEFAULT_SCAN_POLL_MS, MAX_CYCLE_ERRORS, MAX_MASS_TIME_CHANNELS, SCAN_BATCH_SIZE, START_SETTLE,
};
use super::context::AcquisitionContext;
use super::error::{InstrumentError, SchedulerError};
use super::instrument::MassSpectrometer;
use super::reading::parse_reading;
use super::session::{RunClock, SessionId, SessionKind, SessionMetadata};
use super::status::{ChannelGauge, OperatingMode};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Wait between reading successive channels of a cycle
    pub channel_settle: Duration,
    /// Wait after each cycle
    pub cycle_pause: Duration,
    pub scan_poll: Duration,
    pub scan_range: RangeCode,
    /// Width of the sweeps interleaved into a mass-time run, starting at mass 0
    pub interleaved_scan_width: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            channel_settle: Duration::from_millis(DEFAULT_CHANNEL_SETTLE_MS),
            cycle_pause: Duration::from_millis(DEFAULT_CYCLE_PAUSE_MS),
            scan_poll: Duration::from_millis(DEFAULT_SCAN_POLL_MS),
            scan_range: PROBE_RANGE,
            interleaved_scan_width: DEFAULT_INTERLEAVED_SCAN_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MassTimeSummary {
    pub sessions: Vec<SessionId>,
    pub cycles: usize,
    pub skipped_cycles: usize,
    pub samples: usize,
    pub scans: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub session: SessionId,
    pub reported: usize,
    pub samples: usize,
}

enum Cycle {
    Complete(usize),
    Aborted(String),
}

struct ActiveChannel {
    index: u8,
    channel: MsChannel,
    session: SessionId,
    range: RangeCode,
    gauge: Arc<ChannelGauge>,
}

/// Drives the mass spectrometer through mass-time runs and sweeps
pub struct ChannelScheduler<I: MassSpectrometer> {
    instrument: I,
    ctx: AcquisitionContext,
    settings: SchedulerSettings,
    run: RunSettings,
    channels: Vec<MsChannel>,
}

impl<I: MassSpectrometer> ChannelScheduler<I> {
    pub fn new(instrument: I, ctx: AcquisitionContext, settings: SchedulerSettings) -> Self {
        Self {
            instrument,
            ctx,
            settings,
            run: RunSettings::default(),
            channels: Vec::new(),
        }
    }

    /// Fix the channels of the next run. Disabled channels are dropped.
    pub fn configure(
        &mut self,
        run: RunSettings,
        channels: &[MsChannel],
    ) -> Result<(), SchedulerError> {
        let enabled: Vec<MsChannel> = channels.iter().filter(|c| c.enabled).cloned().collect();
        if enabled.len() > MAX_MASS_TIME_CHANNELS {
            return Err(SchedulerError::TooManyChannels(enabled.len()));
        }
        self.run = run;
        self.channels = enabled;
        Ok(())
    }

    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    pub fn into_instrument(self) -> I {
        self.instrument
    }

    /// Cycle over the configured channels until a stop is requested
    pub fn run_mass_time(&mut self, timestamp: &str) -> Result<MassTimeSummary, SchedulerError> {
        let mut summary = MassTimeSummary::default();
        if self.channels.is_empty() {
            spdlog::info!("No mass-time channels configured; nothing to run");
            return Ok(summary);
        }
        let board = self.ctx.board.clone();
        let control = self.ctx.control.clone();
        board.set_mode(OperatingMode::MassTime);
        board.set_action("Configuring channels");

        self.instrument.reset_all()?;
        self.arm_instrument()?;
        let mut active = self.open_sessions(timestamp)?;
        summary.sessions = active.iter().map(|a| a.session).collect();

        let clock = RunClock::start();
        let scan_interval = self
            .run
            .mass_scan_interval
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
        let mut last_scan = Instant::now();
        spdlog::info!("Mass-time run started with {} channels", active.len());
        board.set_action("Measuring");

        while !control.is_stop_requested() {
            if let Some(interval) = scan_interval {
                if last_scan.elapsed() >= interval {
                    self.interleaved_scan(timestamp, &active, &mut summary);
                    last_scan = Instant::now();
                }
            }

            match control.range_override() {
                Some(range) => self.apply_override(&mut active, range),
                None if self.run.autorange => self.autorange_pass(&mut active),
                None => (),
            }

            match self.read_cycle(&active, &clock) {
                Ok(Cycle::Complete(written)) => {
                    summary.cycles += 1;
                    summary.samples += written;
                }
                Ok(Cycle::Aborted(reason)) => {
                    spdlog::warn!("Skipped cycle: {reason}");
                    board.record_error(&reason);
                    summary.skipped_cycles += 1;
                }
                Err(e) => {
                    spdlog::error!("Skipped cycle: {e}");
                    board.record_error(&e.to_string());
                    summary.skipped_cycles += 1;
                }
            }
            control.pause(self.settings.cycle_pause);
        }

        spdlog::info!(
            "Mass-time run stopped after {} cycles ({} skipped)",
            summary.cycles,
            summary.skipped_cycles
        );
        board.set_action("");
        board.set_mode(OperatingMode::Idle);
        Ok(summary)
    }

    /// Single sweep over `first..first + width`. Returns once every sample is committed.
    pub fn run_mass_scan(
        &mut self,
        first: f64,
        width: f64,
        comment: &str,
    ) -> Result<ScanSummary, SchedulerError> {
        let board = self.ctx.board.clone();
        board.set_mode(OperatingMode::MassScan);
        let timestamp = super::session::wall_clock_timestamp();
        let summary = self.sweep(&timestamp, first, width, comment);
        board.set_action("Emptying queue");
        self.ctx.saver.wait_for_drain();
        board.set_action("");
        board.set_mode(OperatingMode::Idle);
        summary
    }

    fn sweep(
        &mut self,
        timestamp: &str,
        first: f64,
        width: f64,
        comment: &str,
    ) -> Result<ScanSummary, SchedulerError> {
        if width <= 0.0 || !width.is_finite() {
            return Err(SchedulerError::BadScanWidth(width));
        }
        let range = self.settings.scan_range;
        let generation = self.instrument.generation();
        self.instrument.configure_scan(first, width, range)?;
        let session = self.ctx.registry.open_session(SessionMetadata {
            channel: Some(0),
            timestamp: timestamp.to_string(),
            kind: SessionKind::MassScan,
            label: String::from("Mass Scan"),
            comment: comment.to_string(),
            snapshot: self.instrument.snapshot(0)?,
        })?;

        self.ctx
            .board
            .set_action(&format!("Sweeping {first} to {}", first + width));
        self.instrument.trigger_cycle()?;
        std::thread::sleep(START_SETTLE);
        while self.instrument.is_running()? {
            if !self.ctx.control.pause(self.settings.scan_poll) {
                spdlog::warn!("Stop requested during sweep; reading what is buffered");
                break;
            }
        }

        let reported = self.instrument.waiting_samples()?;
        if reported == 0 {
            spdlog::warn!("Sweep of session {session} returned no samples");
        }
        let per_unit = reported as f64 / width;
        let mut ordinal = 0;
        let mut written = 0;
        while ordinal < reported {
            let batch = self
                .instrument
                .read_batch(SCAN_BATCH_SIZE.min(reported - ordinal))?;
            if batch.is_empty() {
                spdlog::warn!("Instrument ran out of samples at {ordinal} of {reported}");
                break;
            }
            for raw in batch {
                match parse_reading(&raw) {
                    Ok(value) => {
                        let x = first + ordinal as f64 / per_unit;
                        self.ctx
                            .registry
                            .append(session, x, generation.scale(value, range));
                        written += 1;
                    }
                    Err(e) => spdlog::warn!("Skipping sweep sample {ordinal}: {e}"),
                }
                ordinal += 1;
            }
        }
        spdlog::info!("Sweep of session {session} queued {written} of {reported} samples");
        Ok(ScanSummary {
            session,
            reported,
            samples: written,
        })
    }

    /// Park unused channels and push the run's channel setup
    fn arm_instrument(&mut self) -> Result<(), SchedulerError> {
        self.instrument.prepare_mass_time(self.channels.len() as u8)?;
        for (position, channel) in self.channels.iter().enumerate() {
            self.instrument
                .configure_channel(position as u8 + 1, &channel.setup())?;
        }
        Ok(())
    }

    fn open_sessions(&mut self, timestamp: &str) -> Result<Vec<ActiveChannel>, SchedulerError> {
        let mut active = Vec::with_capacity(self.channels.len());
        for (position, channel) in self.channels.iter().enumerate() {
            let index = position as u8 + 1;
            let session = self.ctx.registry.open_session(SessionMetadata {
                channel: Some(index),
                timestamp: timestamp.to_string(),
                kind: SessionKind::MassTime,
                label: channel.masslabel.clone(),
                comment: self.run.comment.clone(),
                snapshot: self.instrument.snapshot(index)?,
            })?;
            active.push(ActiveChannel {
                index,
                channel: channel.clone(),
                session,
                range: channel.amp_range,
                gauge: self.ctx.board.register_gauge(&channel.masslabel, session),
            });
        }
        Ok(active)
    }

    fn interleaved_scan(
        &mut self,
        timestamp: &str,
        active: &[ActiveChannel],
        summary: &mut MassTimeSummary,
    ) {
        let width = self.settings.interleaved_scan_width;
        let comment = self.run.comment.clone();
        match self.sweep(timestamp, 0.0, width, &comment) {
            Ok(_) => summary.scans += 1,
            Err(e) => {
                spdlog::error!("Interleaved sweep failed: {e}");
                self.ctx.board.record_error(&e.to_string());
            }
        }
        // the sweep took over the instrument; restore the mass-time setup
        let restored = self.arm_instrument().and_then(|_| {
            for channel in active {
                self.instrument.set_range(channel.index, channel.range)?;
            }
            Ok(())
        });
        if let Err(e) = restored {
            spdlog::error!("Could not restore mass-time setup after sweep: {e}");
            self.ctx.board.record_error(&e.to_string());
        }
        self.ctx.board.set_action("Measuring");
    }

    fn apply_override(&mut self, active: &mut [ActiveChannel], range: RangeCode) {
        for channel in active.iter_mut().filter(|c| c.range != range) {
            match self.instrument.set_range(channel.index, range) {
                Ok(()) => channel.range = range,
                Err(e) => spdlog::error!("Could not set range of {}: {e}", channel.channel.masslabel),
            }
        }
    }

    /// Probe every channel at mid range and pick a range per channel from the readings.
    /// Leaves the ranges unchanged if any reading is not a number.
    fn autorange_pass(&mut self, active: &mut [ActiveChannel]) {
        match self.probe_ranges(active) {
            Ok(Some(ranges)) => {
                for (channel, range) in active.iter_mut().zip(ranges) {
                    if let Err(e) = self.instrument.set_range(channel.index, range) {
                        spdlog::error!("Could not set range of {}: {e}", channel.channel.masslabel);
                        continue;
                    }
                    if channel.range != range {
                        spdlog::debug!("{} moved to range {range}", channel.channel.masslabel);
                    }
                    channel.range = range;
                }
                return;
            }
            Ok(None) => spdlog::warn!("Auto-range read a non-numeric value; keeping ranges"),
            Err(e) => spdlog::error!("Auto-range pass failed: {e}"),
        }
        for channel in active.iter() {
            if let Err(e) = self.instrument.set_range(channel.index, channel.range) {
                spdlog::error!("Could not restore range of {}: {e}", channel.channel.masslabel);
            }
        }
    }

    fn probe_ranges(
        &mut self,
        active: &[ActiveChannel],
    ) -> Result<Option<Vec<RangeCode>>, InstrumentError> {
        for channel in active {
            self.instrument.set_range(channel.index, PROBE_RANGE)?;
        }
        self.instrument.trigger_cycle()?;
        let mut ranges = Vec::with_capacity(active.len());
        for _ in active {
            match parse_reading(&self.instrument.read_one()?) {
                Ok(value) => ranges.push(range_for(value)),
                Err(_) => return Ok(None),
            }
        }
        Ok(Some(ranges))
    }

    fn read_cycle(
        &mut self,
        active: &[ActiveChannel],
        clock: &RunClock,
    ) -> Result<Cycle, InstrumentError> {
        let generation = self.instrument.generation();
        self.instrument.trigger_cycle()?;
        let mut errors = 0;
        let mut written = 0;
        for (position, channel) in active.iter().enumerate() {
            if position > 0 {
                std::thread::sleep(self.settings.channel_settle);
            }
            let raw = self.instrument.read_one()?;
            if raw.trim().is_empty() {
                return Ok(Cycle::Aborted(String::from("instrument reported no data")));
            }
            match parse_reading(&raw) {
                Ok(value) => {
                    let y = generation.scale(value, channel.range);
                    self.ctx.registry.append(channel.session, clock.elapsed_ms(), y);
                    channel.gauge.record(y);
                    written += 1;
                }
                Err(e) => {
                    errors += 1;
                    spdlog::warn!("{}: {e}", channel.channel.masslabel);
                    if errors >= MAX_CYCLE_ERRORS {
                        return Ok(Cycle::Aborted(format!(
                            "{errors} unreadable values in one cycle"
                        )));
                    }
                }
            }
        }
        Ok(Cycle::Complete(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunControl;
    use crate::instrument::Generation;
    use crate::saver::{DataSaver, SaverSettings};
    use crate::simulator::SimulatedMassSpec;
    use crate::sqlite_store::SqliteConnector;
    use crate::status::StatusBoard;

    fn channel(label: &str, mass: f64) -> MsChannel {
        MsChannel {
            masslabel: label.to_string(),
            mass,
            speed: 11,
            amp_range: RangeCode(5),
            enabled: true,
        }
    }

    #[test]
    fn test_too_many_channels() {
        let dir = tempfile::tempdir().unwrap();
        let connector =
            SqliteConnector::new(dir.path().join("db.sqlite"), "unit", Duration::from_secs(1))
                .unwrap();
        let mut saver = DataSaver::start(Box::new(connector), SaverSettings::default()).unwrap();
        let ctx = AcquisitionContext::new(
            saver.handle(),
            Duration::from_secs(5),
            Arc::new(RunControl::new()),
            Arc::new(StatusBoard::new()),
        );
        let mut scheduler = ChannelScheduler::new(
            SimulatedMassSpec::new(Generation::Qmg422),
            ctx,
            SchedulerSettings::default(),
        );
        let channels: Vec<MsChannel> = (0..16).map(|i| channel(&format!("M{i}"), i as f64)).collect();
        assert!(matches!(
            scheduler.configure(RunSettings::default(), &channels),
            Err(SchedulerError::TooManyChannels(16))
        ));
        assert!(scheduler
            .configure(RunSettings::default(), &channels[..15])
            .is_ok());
        saver.stop();
    }
}
