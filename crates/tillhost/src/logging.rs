#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, WriteLogger};
use std::fs::OpenOptions;
use std::path::Path;
use tillhost_platform::AppPaths;

fn trim_log_file_if_oversized(log_path: &Path, max_log_size: u64) {
    if let Ok(metadata) = std::fs::metadata(log_path)
        && metadata.len() > max_log_size
        && let Ok(contents) = std::fs::read(log_path)
    {
        let half = contents.len() / 2;
        let keep_from = contents[half..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(half, |pos| half + pos + 1);
        let _ = std::fs::write(log_path, &contents[keep_from..]);
    }
}

pub fn init_logging(debug_enabled: bool, max_log_size: u64) {
    let Ok(paths) = AppPaths::new() else {
        return;
    };
    let _ = paths.ensure_dirs();
    let log_path = paths.log_file();

    trim_log_file_if_oversized(&log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("tillhost")
        .build();

    let file_logger = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok()
        .map(|file| WriteLogger::new(LevelFilter::Debug, config.clone(), file));

    #[cfg(debug_assertions)]
    {
        let term_logger = TermLogger::new(
            LevelFilter::Debug,
            config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );

        if let Some(file_logger) = file_logger {
            let _ = CombinedLogger::init(vec![term_logger, file_logger]);
        } else {
            let _ = CombinedLogger::init(vec![term_logger]);
        }
    }

    #[cfg(not(debug_assertions))]
    {
        if let Some(file_logger) = file_logger {
            let _ = CombinedLogger::init(vec![file_logger]);
        }
    }

    set_logging_enabled(debug_enabled);

    if debug_enabled {
        log::info!("Debug logging initialized, log file: {}", log_path.display());
    }
}

pub fn set_logging_enabled(enabled: bool) {
    if enabled {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }
}
