//! # lablogger
//!
//! lablogger is a laboratory data logger for quadrupole mass spectrometers, written in
//! Rust. It drives a mass spectrometer through mass-time runs (a set of masses sampled
//! over and over) and mass scans (one sweep over a mass range), polls auxiliary gauges and
//! thermocouples over UDP while doing so, and stores everything in a relational database
//! as session headers with (x, y) samples.
//!
//! ## Architecture
//!
//! Every SQL statement of the process is executed by a single persistence worker thread
//! (`saver`). Producers never talk to the database themselves:
//!
//! - the channel scheduler (`scheduler`) owns the instrument and enqueues one sample per
//!   channel per cycle,
//! - metadata pollers (`poller`) each own a UDP socket and enqueue one sample per channel
//!   per period,
//! - the session registry (`registry`) enqueues header inserts and waits for the key
//!   the database assigned.
//!
//! When the database goes away the worker keeps the failed statement at the head of the
//! queue and reconnects with bounded exponential back-off. Producers keep enqueueing; the
//! queue simply grows until the database is back. Statements the database rejects are
//! logged and dropped.
//!
//! ## Configuration
//!
//! A deployment is described by a YAML file:
//!
//! ```yml
//! chamber: dummy
//! database:
//!   host: localhost
//!   name: lablogger.sqlite
//!   credentials:
//!     username: dummy
//!     password: dummy
//! saver:
//!   execute_timeout_ms: 3000
//!   backoff_start_ms: 1000
//!   backoff_cap_ms: 60000
//!   session_timeout_ms: 30000
//! scheduler:
//!   generation: qmg422
//!   channel_settle_ms: 250
//!   cycle_pause_ms: 100
//!   scan_poll_ms: 1000
//!   scan_range: 5
//!   interleaved_scan_width: 50.0
//! pollers:
//!   period_ms: 5000
//!   udp_timeout_ms: 1000
//! channel_list: channel_list.txt
//! ```
//!
//! The chamber name is the suffix of the `measurements_<chamber>` and
//! `xy_values_<chamber>` tables and the default SQL user.
//!
//! ### Channel List Format
//!
//! Channel lists are either YAML (`.yml`/`.yaml`) or the line based text format:
//!
//! ```text
//! comment: Bake out
//! autorange: yes
//! mass-scan-interval: 600
//! ms_channel: masslabel, M18, speed, 11, mass, 18, amp_range, 5
//! meta_channel: host, rasppi12, port, 9000, label, Pirani, command, read_pressure
//! compound_channel: host, rasppi19, port, 9990, command, read_all, label, T1, position, 0
//! ```
//!
//! ## Output
//!
//! Each logical channel of a run gets one header row in `measurements_<chamber>` holding
//! the run timestamp, the acquisition type (2 XPS scan, 4 mass scan, 5 mass-time),
//! the label, the comment and a snapshot of the instrument state. Samples go to
//! `xy_values_<chamber>` keyed by the header id. For mass-time and meta channels x is the
//! number of milliseconds since the producer started; for mass scans x is the mass.
pub mod autorange;
pub mod backoff;
pub mod channel_list;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod instrument;
pub mod poller;
pub mod process;
pub mod reading;
pub mod registry;
pub mod saver;
pub mod scheduler;
pub mod session;
pub mod simulator;
pub mod sqlite_store;
pub mod status;
pub mod store;
mod watchdog;
