use clap::{value_parser, Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use liblablogger::channel_list::ChannelList;
use liblablogger::config::Config;
use liblablogger::context::RunControl;
use liblablogger::error::ProcessorError;
use liblablogger::process::{process, RunMode, RunSummary};
use liblablogger::simulator::SimulatedMassSpec;
use liblablogger::status::{key_action, KeyAction, StatusBoard};

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn init_file_logger() {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./lablogger.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .unwrap(),
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()
            .unwrap(),
    );
    spdlog::set_default_logger(logger);
}

/// Forward key presses from stdin. The terminal is line buffered, so keys arrive on Enter.
fn spawn_key_reader() -> Receiver<char> {
    let (tx, rx) = channel();
    std::thread::spawn(move || {
        for byte in std::io::stdin().lock().bytes() {
            match byte {
                Ok(b) if b.is_ascii_graphic() => {
                    if tx.send(b as char).is_err() {
                        break;
                    }
                }
                Ok(_) => (),
                Err(_) => break,
            }
        }
    });
    rx
}

/// Apply one console key. Returns true if the console should stop refreshing and exit
/// once the run has shut down.
fn handle_key(key: char, control: &RunControl) -> bool {
    match key_action(key) {
        Some(KeyAction::Quit) => {
            log::info!("Quitting once the queue is empty...");
            control.request_stop();
            return true;
        }
        Some(KeyAction::StopRun) => {
            log::info!("Stopping run, emptying queue...");
            control.request_stop();
        }
        Some(KeyAction::RangeOverride(range)) => {
            log::info!("Fixing preamp range to {range}");
            control.set_range_override(Some(range));
        }
        Some(KeyAction::ClearOverride) => {
            log::info!("Returning to automatic ranges");
            control.set_range_override(None);
        }
        None => (),
    }
    false
}

fn report(handle: JoinHandle<Result<RunSummary, ProcessorError>>) {
    match handle.join() {
        Ok(result) => match result {
            Ok(summary) => {
                if let Some(mass_time) = summary.mass_time {
                    log::info!(
                        "Mass-time: {} cycles, {} skipped, {} samples",
                        mass_time.cycles,
                        mass_time.skipped_cycles,
                        mass_time.samples
                    );
                }
                if let Some(scan) = summary.scan {
                    log::info!(
                        "Mass-scan session {}: {} samples",
                        scan.session,
                        scan.samples
                    );
                }
                if summary.unsaved > 0 {
                    log::error!(
                        "{} items were not saved; check the log file",
                        summary.unsaved
                    );
                }
            }
            Err(e) => log::error!("Logging failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join logging task!"),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("lablogger_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("mass-time").about("Log the channel list's masses until stopped"))
        .subcommand(
            Command::new("mass-scan")
                .about("Sweep a mass range once")
                .arg(
                    Arg::new("first")
                        .long("first")
                        .value_parser(value_parser!(f64))
                        .default_value("0")
                        .help("First mass of the sweep"),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .value_parser(value_parser!(f64))
                        .default_value("50")
                        .help("Width of the sweep in amu"),
                )
                .arg(
                    Arg::new("comment")
                        .long("comment")
                        .default_value("")
                        .help("Comment stored with the sweep"),
                ),
        )
        .subcommand(Command::new("meta").about("Log only the meta channels until stopped"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("channels")
                .short('c')
                .long("channels")
                .help("Path to the channel list, overriding the configuration"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    let mode = match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );

            make_template_config(&config_path);
            log::info!("Done.");
            return;
        }
        Some(("mass-time", _)) => RunMode::MassTime,
        Some(("mass-scan", args)) => RunMode::MassScan {
            first: *args.get_one::<f64>("first").expect("Has default"),
            width: *args.get_one::<f64>("width").expect("Has default"),
            comment: args
                .get_one::<String>("comment")
                .cloned()
                .unwrap_or_default(),
        },
        Some(("meta", _)) => RunMode::MetaOnly,
        _ => {
            log::error!("Choose one of new, mass-time, mass-scan or meta");
            return;
        }
    };

    init_file_logger();
    spdlog::info!("Starting lablogger in mode {mode:?}");

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Chamber: {}", config.chamber);
    log::info!("Database: {} on {}", config.database.name, config.database.host);
    log::info!("Instrument: {}", config.scheduler.generation);

    let channel_path = matches
        .get_one::<String>("channels")
        .map(PathBuf::from)
        .or(config.channel_list.clone());
    let channels = match channel_path {
        Some(path) => {
            log::info!("Loading channel list from {}...", path.to_string_lossy());
            match ChannelList::read_channel_list_file(&path) {
                Ok(list) => list,
                Err(e) => {
                    log::error!("{e}");
                    return;
                }
            }
        }
        None => ChannelList::default(),
    };
    log::info!(
        "Channels: {} mass, {} meta, {} compound sources",
        channels.ms.len(),
        channels.meta.len(),
        channels.compound.len()
    );

    log::warn!("No instrument driver is linked in; using the simulated mass spectrometer");
    let instrument = SimulatedMassSpec::new(config.scheduler.generation);
    let control = Arc::new(RunControl::new());
    let board = Arc::new(StatusBoard::new());
    let keys = spawn_key_reader();

    // Spawn the task!
    let sent_control = control.clone();
    let sent_board = board.clone();
    let handle = std::thread::spawn(move || {
        process(
            &config,
            &channels,
            instrument,
            mode,
            sent_control,
            sent_board,
        )
    });

    let style = ProgressStyle::with_template("{msg}").expect("Static template is valid");
    let mut bars: Vec<ProgressBar> = Vec::new();
    loop {
        // No UI event loop here, so refresh roughly once a second
        std::thread::sleep(std::time::Duration::from_secs(1));

        let mut quitting = false;
        while let Ok(key) = keys.try_recv() {
            quitting |= handle_key(key, &control);
        }

        if quitting {
            for bar in bars.drain(..) {
                bar.finish_and_clear();
            }
            report(handle);
            break;
        }

        let lines = board.render();
        while bars.len() < lines.len() {
            let bar = pb_manager.add(ProgressBar::new(0));
            bar.set_style(style.clone());
            bars.push(bar);
        }
        for (index, bar) in bars.iter().enumerate() {
            bar.set_message(lines.get(index).cloned().unwrap_or_default());
        }

        if handle.is_finished() {
            report(handle);
            break;
        }
    }

    for bar in bars {
        bar.finish();
    }

    log::info!("Done.");
}
