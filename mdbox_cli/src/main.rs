//! # mdbox_cli
//!
//! Part of the mdbox crate family.
//!
//! This is the command line application to build a distributed MD box structure from a
//! synthetic set of peaked events.
//!
//! ## Install
//!
//! Use `cargo install --path ./mdbox_cli`
//!
//! ## Use
//!
//! Make a template configuration with
//!
//! ```bash
//! mdbox_cli new -p config.yml
//! ```
//!
//! edit it, then run the build with
//!
//! ```bash
//! mdbox_cli -p config.yml
//! ```
//!
//! One progress bar is shown per worker. Library output is written to `mdbox.log`.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use libmdbox::config::Config;
use libmdbox::distributed::DistributedBoxes;
use libmdbox::event::MDEvent;
use libmdbox::process::{generate_events, process};
use libmdbox::worker_status::{BarColor, WorkerStatus};

const LOG_FILE: &str = "./mdbox.log";

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

/// Send library output to a log file
fn init_file_logger() -> spdlog::Result<()> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(LOG_FILE))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "{prefix:>9} [{bar:40.cyan/blue}] {percent:>3}% {msg}",
        BarColor::MAGENTA => "{prefix:>9} [{bar:40.magenta/blue}] {percent:>3}% {msg}",
        BarColor::RED => "{prefix:>9} [{bar:40.red/blue}] {percent:>3}% {msg}",
        BarColor::GREEN => "{prefix:>9} [{bar:40.green/blue}] {percent:>3}% {msg}",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn update_bar(bars: &[ProgressBar], status: &WorkerStatus) {
    if let Some(pb) = bars.get(status.worker_id) {
        pb.set_style(bar_style(&status.color));
        pb.set_position((status.progress * 100.0) as u64);
        pb.set_message(status.phase.to_string());
    }
}

fn print_summary<const ND: usize>(results: &[DistributedBoxes<ND>]) {
    let mut total_events = 0;
    let mut total_signal = 0.0;
    let mut total_bytes = 0;
    for boxes in results.iter() {
        let stats = boxes.statistics();
        log::info!(
            "Worker {}: owns {} layout boxes; {} boxes ({} leaves), max depth {}, {} events, signal {:.3}, memory {}",
            boxes.rank(),
            boxes.owned_box_ids().len(),
            stats.total_boxes,
            stats.leaf_boxes,
            stats.max_depth_reached,
            stats.n_events,
            stats.signal,
            human_bytes::human_bytes(stats.event_bytes as f64)
        );
        total_events += stats.n_events;
        total_signal += stats.signal;
        total_bytes += stats.event_bytes;
    }
    log::info!(
        "Total: {} events, signal {:.3}, memory {}",
        total_events,
        total_signal,
        human_bytes::human_bytes(total_bytes as f64)
    );
    if let Some(first) = results.first() {
        log::info!(
            "Dimensions: {}",
            first.tree().dimension_names().join(", ")
        );
    }
}

fn run<const ND: usize>(config: Config, pb_manager: &MultiProgress) {
    let events: Vec<MDEvent<ND>> = match generate_events::<ND>(&config) {
        Ok(list) => list.into_inner(),
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!(
        "Generated {} events ({})",
        events.len(),
        human_bytes::human_bytes((events.len() * MDEvent::<ND>::size_bytes()) as f64)
    );

    // Setup the progress bars
    let bars: Vec<ProgressBar> = (0..config.n_workers)
        .map(|idx| {
            let pb = pb_manager.add(ProgressBar::new(100));
            pb.set_style(bar_style(&BarColor::default()));
            pb.set_prefix(format!("Worker {idx}"));
            pb
        })
        .collect();

    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || process::<ND>(&config, events, tx));

    loop {
        std::thread::sleep(std::time::Duration::from_millis(100));
        for status in rx.try_iter() {
            update_bar(&bars, &status);
        }

        if handle.is_finished() {
            for status in rx.try_iter() {
                update_bar(&bars, &status);
            }
            for pb in bars.iter() {
                pb.finish();
            }
            match handle.join() {
                Ok(result) => match result {
                    Ok(results) => {
                        log::info!("Successfully built box structure!");
                        print_summary(&results);
                    }
                    Err(e) => {
                        log::error!("Build failed with error: {e}");
                        log::error!("Check {LOG_FILE} for details.");
                    }
                },
                Err(_) => log::error!("Failed to join build task!"),
            }
            break;
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("mdbox_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
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

    if let Err(e) = init_file_logger() {
        log::warn!("Could not create log file {LOG_FILE}: {e}");
    }

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );

        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Output dimensions: {}", config.output_dimensions);
    log::info!("Extents: {:?}", config.extents);
    log::info!(
        "Split into: {:?} Split threshold: {}",
        config.split_into,
        config.split_threshold
    );
    log::info!(
        "Recursion depth: {} to {}",
        config.min_recursion_depth,
        config.max_recursion_depth
    );
    log::info!(
        "Sample fraction: {} Number of workers: {}",
        config.fraction,
        config.n_workers
    );

    if !config.is_n_workers_valid() {
        log::error!("Number of workers must be at least 1");
        return;
    }

    match config.n_dims() {
        1 => run::<1>(config, &pb_manager),
        2 => run::<2>(config, &pb_manager),
        3 => run::<3>(config, &pb_manager),
        4 => run::<4>(config, &pb_manager),
        n => log::error!("Extents describe {n} dimensions; only 1 to 4 are supported"),
    }

    log::info!("Done.");
}
