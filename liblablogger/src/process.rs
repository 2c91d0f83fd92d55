use std::sync::Arc;
use std::time::Duration;

use super::channel_list::ChannelList;
use super::config::Config;
use super::context::{AcquisitionContext, RunControl};
use super::error::ProcessorError;
use super::instrument::MassSpectrometer;
use super::poller::{build_pollers, spawn_poller};
use super::saver::DataSaver;
use super::scheduler::{ChannelScheduler, MassTimeSummary, ScanSummary};
use super::session::wall_clock_timestamp;
use super::sqlite_store::SqliteConnector;
use super::status::{OperatingMode, StatusBoard};
use super::store::Connector;

const META_ONLY_POLL: Duration = Duration::from_millis(100);

/// What the instrument does during a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    MassTime,
    MassScan {
        first: f64,
        width: f64,
        comment: String,
    },
    /// Only the meta channels are logged
    MetaOnly,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub mass_time: Option<MassTimeSummary>,
    pub scan: Option<ScanSummary>,
    pub pollers: usize,
    /// Items still queued when the persistence worker stopped
    pub unsaved: usize,
}

/// The main loop of lablogger.
///
/// Starts the persistence worker against the configured SQLite database, starts a poller
/// per meta channel group, drives the instrument in the requested mode and shuts
/// everything down in order. Blocks until the run ends, which for mass-time and meta
/// runs means until `control` requests a stop.
pub fn process<I: MassSpectrometer>(
    config: &Config,
    channels: &ChannelList,
    instrument: I,
    mode: RunMode,
    control: Arc<RunControl>,
    board: Arc<StatusBoard>,
) -> Result<RunSummary, ProcessorError> {
    config.validate()?;
    spdlog::info!(
        "Logging chamber {} on {} as user {}",
        config.chamber,
        config.database.host,
        config.username()
    );
    let connector = SqliteConnector::new(
        &config.database.name,
        &config.chamber,
        config.saver_settings().execute_timeout,
    )?;
    process_with_connector(
        config,
        Box::new(connector),
        channels,
        instrument,
        mode,
        control,
        board,
    )
}

/// Same as [`process`] with a caller supplied endpoint
pub fn process_with_connector<I: MassSpectrometer>(
    config: &Config,
    connector: Box<dyn Connector>,
    channels: &ChannelList,
    instrument: I,
    mode: RunMode,
    control: Arc<RunControl>,
    board: Arc<StatusBoard>,
) -> Result<RunSummary, ProcessorError> {
    let mut saver = DataSaver::start(connector, config.saver_settings())?;
    let ctx = AcquisitionContext::new(saver.handle(), config.session_timeout(), control, board);
    let result = acquire(config, channels, instrument, mode, &ctx);
    let unsaved = saver.stop();
    let mut summary = result?;
    summary.unsaved = unsaved;
    Ok(summary)
}

fn acquire<I: MassSpectrometer>(
    config: &Config,
    channels: &ChannelList,
    instrument: I,
    mode: RunMode,
    ctx: &AcquisitionContext,
) -> Result<RunSummary, ProcessorError> {
    let timestamp = wall_clock_timestamp();
    ctx.board.begin_run(&timestamp);
    spdlog::info!("Run started at {timestamp}");

    let pollers = build_pollers(channels, &config.poller_settings(), ctx, &timestamp)?;
    let mut summary = RunSummary {
        pollers: pollers.len(),
        ..Default::default()
    };
    let handles: Vec<_> = pollers
        .into_iter()
        .map(|poller| spawn_poller(poller, ctx.control.clone()))
        .collect();

    let outcome = drive_instrument(config, channels, instrument, mode, ctx, &timestamp);

    // pollers run until the instrument side is done
    ctx.control.request_stop();
    let mut panicked = false;
    for handle in handles {
        if handle.join().is_err() {
            spdlog::error!("A poller thread panicked");
            panicked = true;
        }
    }

    let (mass_time, scan) = outcome?;
    summary.mass_time = mass_time;
    summary.scan = scan;
    if panicked {
        return Err(ProcessorError::WorkerPanic);
    }
    Ok(summary)
}

fn drive_instrument<I: MassSpectrometer>(
    config: &Config,
    channels: &ChannelList,
    instrument: I,
    mode: RunMode,
    ctx: &AcquisitionContext,
    timestamp: &str,
) -> Result<(Option<MassTimeSummary>, Option<ScanSummary>), ProcessorError> {
    let mut scheduler =
        ChannelScheduler::new(instrument, ctx.clone(), config.scheduler_settings());
    match mode {
        RunMode::MassTime => {
            scheduler.configure(channels.run.clone(), &channels.ms)?;
            let summary = scheduler.run_mass_time(timestamp)?;
            Ok((Some(summary), None))
        }
        RunMode::MassScan {
            first,
            width,
            comment,
        } => {
            let summary = scheduler.run_mass_scan(first, width, &comment)?;
            Ok((None, Some(summary)))
        }
        RunMode::MetaOnly => {
            ctx.board.set_mode(OperatingMode::MetaOnly);
            ctx.board.set_action("Logging meta channels");
            while ctx.control.pause(META_ONLY_POLL) {}
            ctx.board.set_action("");
            ctx.board.set_mode(OperatingMode::Idle);
            Ok((None, None))
        }
    }
}
