//! Logging setup: a daily-rotating file sink (`fern` + `tracing-appender`)
//! plus a colored warn-level stderr sink, parameterized by the resolved
//! log level.

use std::io::{BufWriter, Write};
use std::str::FromStr;

use anyhow::Result;
use log::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

const MAX_LOG_FILES: usize = 10;

/// Installs the global logger. Returns the guards that must be kept alive
/// for the duration of the process so the non-blocking file writer keeps
/// flushing.
pub fn init_logging(dir: &str, level: &str) -> Result<Vec<Box<dyn Drop + Send + Sync + 'static>>> {
    let mut guards: Vec<Box<dyn Drop + Send + Sync + 'static>> = Vec::new();
    let mut logger = fern::Dispatch::new();

    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("caskyd.log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)?;
    let (non_blocking, flush_guard) = tracing_appender::non_blocking(rolling);
    let buffered = BufWriter::with_capacity(64 * 1024, non_blocking);
    guards.push(Box::new(flush_guard));

    let level_filter = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);

    let file_dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] - {} - [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level_filter)
        .chain(Box::new(buffered) as Box<dyn Write + Send>);
    logger = logger.chain(file_dispatch);

    let stderr_dispatch = fern::Dispatch::new()
        .level(LevelFilter::Warn)
        .format(|out, message, record| {
            let color = match record.level() {
                log::Level::Error => fern::colors::Color::Red,
                _ => fern::colors::Color::Yellow,
            };
            out.finish(format_args!("\x1B[{}m{}\x1B[0m", color.to_fg_str(), message))
        })
        .chain(std::io::stderr());
    logger = logger.chain(stderr_dispatch);

    if logger.apply().is_err() {
        eprintln!("logger has already been set");
    }

    Ok(guards)
}

/// Parses `CASKYD_LOG_LEVEL`/`--log-level` into a `fern`-compatible level
/// name, falling back to `INFO` for anything unrecognized.
pub fn normalize_level(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "DEBUG",
        "WARN" => "WARN",
        "ERROR" => "ERROR",
        _ => "INFO",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(normalize_level("chatty"), "INFO");
        assert_eq!(normalize_level("debug"), "DEBUG");
        assert_eq!(normalize_level("ERROR"), "ERROR");
    }
}
