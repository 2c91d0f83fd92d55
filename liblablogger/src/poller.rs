use std::io::ErrorKind;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::channel_list::{period_or, ChannelList, CompoundChannel, MetaChannel};
use super::constants::{DEFAULT_POLL_PERIOD_MS, DEFAULT_UDP_TIMEOUT_MS, UDP_REPLY_SIZE};
use super::context::{AcquisitionContext, RunControl};
use super::error::PollerError;
use super::reading::{parse_compound, parse_reading, strip_raw_prefix};
use super::session::{RunClock, SessionId, SessionMetadata};
use super::status::ChannelGauge;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub period: Duration,
    pub udp_timeout: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(DEFAULT_POLL_PERIOD_MS),
            udp_timeout: Duration::from_millis(DEFAULT_UDP_TIMEOUT_MS),
        }
    }
}

/// A metadata source sampled on a fixed period
pub trait Poll: Send {
    fn name(&self) -> &str;
    fn period(&self) -> Duration;
    /// Query every channel once and enqueue what parsed. Returns the number of samples.
    fn tick(&mut self, clock: &RunClock) -> usize;
}

/// One UDP socket shared by the channels of a poller
struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    fn bind(timeout: Duration) -> Result<Self, PollerError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_read_timeout(Some(timeout))?;
        Ok(Self { socket })
    }

    /// Drop replies that arrived after an earlier request timed out
    fn discard_stale(&self) -> std::io::Result<()> {
        let mut buffer = [0u8; UDP_REPLY_SIZE];
        self.socket.set_nonblocking(true)?;
        while self.socket.recv_from(&mut buffer).is_ok() {}
        self.socket.set_nonblocking(false)
    }

    fn query(&self, host: &str, port: u16, command: &str) -> std::io::Result<String> {
        self.discard_stale()?;
        let target = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, format!("{host} did not resolve"))
        })?;
        self.socket.send_to(format!("{command}\n").as_bytes(), target)?;
        let mut buffer = [0u8; UDP_REPLY_SIZE];
        let (length, _) = self.socket.recv_from(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer[..length]).trim().to_string())
    }
}

struct PolledChannel {
    channel: MetaChannel,
    session: SessionId,
    gauge: Arc<ChannelGauge>,
}

/// Polls channels that each answer with a single value
pub struct SimplePoller {
    name: String,
    period: Duration,
    link: UdpLink,
    channels: Vec<PolledChannel>,
    ctx: AcquisitionContext,
}

impl SimplePoller {
    /// Allocates one session per channel
    pub fn new(
        channels: &[MetaChannel],
        period: Duration,
        settings: &PollerSettings,
        ctx: &AcquisitionContext,
        timestamp: &str,
        comment: &str,
    ) -> Result<Self, PollerError> {
        let mut polled = Vec::with_capacity(channels.len());
        for channel in channels {
            let session = ctx.registry.open_session(SessionMetadata::meta_channel(
                &channel.label,
                timestamp,
                comment,
                channel.measurement_type,
            ))?;
            polled.push(PolledChannel {
                channel: channel.clone(),
                session,
                gauge: ctx.board.register_gauge(&channel.label, session),
            });
        }
        Ok(Self {
            name: format!("meta poller ({:.1} s)", period.as_secs_f64()),
            period,
            link: UdpLink::bind(settings.udp_timeout)?,
            channels: polled,
            ctx: ctx.clone(),
        })
    }
}

impl Poll for SimplePoller {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&mut self, clock: &RunClock) -> usize {
        let mut written = 0;
        for polled in self.channels.iter() {
            let MetaChannel {
                label,
                host,
                port,
                command,
                ..
            } = &polled.channel;
            let reply = match self.link.query(host, *port, command) {
                Ok(reply) => reply,
                Err(e) => {
                    spdlog::warn!("{label}: no reply from {host}:{port}: {e}");
                    self.ctx.board.record_error(&format!("{label}: {e}"));
                    continue;
                }
            };
            match parse_reading(strip_raw_prefix(command, &reply)) {
                Ok(value) => {
                    self.ctx
                        .registry
                        .append(polled.session, clock.elapsed_ms(), value);
                    polled.gauge.record(value);
                    written += 1;
                }
                Err(e) => {
                    spdlog::warn!("{label}: skipping reply {reply:?}: {e}");
                    self.ctx.board.record_error(&format!("{label}: {e}"));
                }
            }
        }
        written
    }
}

struct PolledField {
    label: String,
    position: usize,
    session: SessionId,
    gauge: Arc<ChannelGauge>,
}

/// Polls a source whose single reply carries several positional values
pub struct CompoundPoller {
    name: String,
    period: Duration,
    link: UdpLink,
    host: String,
    port: u16,
    command: String,
    fields: Vec<PolledField>,
    ctx: AcquisitionContext,
}

impl CompoundPoller {
    /// Allocates one session per field
    pub fn new(
        source: &CompoundChannel,
        period: Duration,
        settings: &PollerSettings,
        ctx: &AcquisitionContext,
        timestamp: &str,
        comment: &str,
    ) -> Result<Self, PollerError> {
        let mut fields = Vec::with_capacity(source.fields.len());
        for field in source.fields.iter() {
            let session = ctx.registry.open_session(SessionMetadata::meta_channel(
                &field.label,
                timestamp,
                comment,
                field.measurement_type,
            ))?;
            fields.push(PolledField {
                label: field.label.clone(),
                position: field.position,
                session,
                gauge: ctx.board.register_gauge(&field.label, session),
            });
        }
        Ok(Self {
            name: format!("compound poller {}:{} {}", source.host, source.port, source.command),
            period,
            link: UdpLink::bind(settings.udp_timeout)?,
            host: source.host.clone(),
            port: source.port,
            command: source.command.clone(),
            fields,
            ctx: ctx.clone(),
        })
    }
}

impl Poll for CompoundPoller {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&mut self, clock: &RunClock) -> usize {
        let reply = match self.link.query(&self.host, self.port, &self.command) {
            Ok(reply) => reply,
            Err(e) => {
                spdlog::warn!("{}: no reply: {e}", self.name);
                self.ctx.board.record_error(&format!("{}: {e}", self.name));
                return 0;
            }
        };
        let parsed = match parse_compound(strip_raw_prefix(&self.command, &reply)) {
            Ok(parsed) => parsed,
            Err(e) => {
                spdlog::warn!("{}: skipping reply {reply:?}: {e}", self.name);
                self.ctx.board.record_error(&format!("{}: {e}", self.name));
                return 0;
            }
        };
        for e in parsed.rejected.iter() {
            spdlog::warn!("{}: skipping field of reply {reply:?}: {e}", self.name);
        }
        if let Some(e) = parsed.rejected.last() {
            self.ctx.board.record_error(&format!("{}: {e}", self.name));
        }
        let x = clock.elapsed_ms();
        let mut written = 0;
        for field in self.fields.iter() {
            match parsed.values.get(&field.position) {
                Some(value) => {
                    self.ctx.registry.append(field.session, x, *value);
                    field.gauge.record(*value);
                    written += 1;
                }
                None => spdlog::warn!(
                    "{}: no value at position {} in reply {reply:?}",
                    field.label,
                    field.position
                ),
            }
        }
        written
    }
}

/// Create the pollers for every meta and compound channel of a list.
/// Meta channels sharing a repeat interval share a poller.
pub fn build_pollers(
    list: &ChannelList,
    settings: &PollerSettings,
    ctx: &AcquisitionContext,
    timestamp: &str,
) -> Result<Vec<Box<dyn Poll>>, PollerError> {
    let comment = list.run.comment.as_str();
    let mut pollers: Vec<Box<dyn Poll>> = Vec::new();
    for (period, channels) in list.meta_groups(settings.period) {
        pollers.push(Box::new(SimplePoller::new(
            &channels, period, settings, ctx, timestamp, comment,
        )?));
    }
    for source in list.compound.iter() {
        let period = period_or(source.repeat_interval, settings.period);
        pollers.push(Box::new(CompoundPoller::new(
            source, period, settings, ctx, timestamp, comment,
        )?));
    }
    Ok(pollers)
}

/// Run a poller on its own thread until a stop is requested.
/// The tick in flight when the stop arrives is completed.
pub fn spawn_poller(mut poller: Box<dyn Poll>, control: Arc<RunControl>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        spdlog::info!("Starting {}", poller.name());
        let clock = RunClock::start();
        let period = poller.period();
        while !control.is_stop_requested() {
            let started = Instant::now();
            let written = poller.tick(&clock);
            spdlog::debug!("{} wrote {written} samples", poller.name());
            let spent = started.elapsed();
            if spent < period {
                control.pause(period - spent);
            }
        }
        spdlog::info!("Stopped {}", poller.name());
    })
}
