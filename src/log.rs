//! Logger configuration.
//!
//! The engine logs through the [`log`] facade. [`init`] installs a `fern` backend that
//! splits console output between stdout and stderr and, when given a directory, keeps a
//! copy on disk: one file with the full record of the run and one restricted to warnings
//! and errors. The level comes from the caller (normally `dispatch.toml`) or from the
//! `REDISPATCH_LOG_LEVEL` environment variable, which wins when both are set.
use anyhow::{Context, Result};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::Arguments;
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::OnceLock;

/// The environment variable that overrides the configured log level
const LOG_LEVEL_ENV_VAR: &str = "REDISPATCH_LOG_LEVEL";

/// The log level used when neither the configuration nor the environment names one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The file holding the full log of a run
const LOG_INFO_FILE_NAME: &str = "redispatch_info.log";

/// The file holding only warnings and errors
const LOG_ERROR_FILE_NAME: &str = "redispatch_error.log";

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Whether [`init`] has installed the logger
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Install the global logger.
///
/// Messages below warning severity go to stdout, warnings and errors to stderr, coloured
/// by level when the stream is a terminal. With `log_dir` set, the run is also recorded
/// in [`LOG_INFO_FILE_NAME`] and warnings and errors are repeated in
/// [`LOG_ERROR_FILE_NAME`] in that directory; the files are appended to, so repeated runs
/// against one output directory accumulate.
///
/// The accepted level names are those of [`log::LevelFilter`]: `off`, `error`, `warn`,
/// `info`, `debug` and `trace`. The on-disk record always captures at least `info`, so
/// quietening the console does not lose the archival log.
///
/// A process can only install one global logger; a second call returns an error.
pub fn init(requested_level: Option<&str>, log_dir: Option<&Path>) -> Result<()> {
    let level = resolve_level(requested_level)?;
    let mut dispatch = Dispatch::new().chain(console_output(level));
    if let Some(dir) = log_dir {
        dispatch = dispatch.chain(file_output(dir, level)?);
    }
    dispatch
        .apply()
        .context("The global logger is already installed")?;
    LOGGER_INIT.set(()).ok();
    Ok(())
}

/// The level to run at: the environment wins, then the caller, then the default
fn resolve_level(requested: Option<&str>) -> Result<LevelFilter> {
    match env::var(LOG_LEVEL_ENV_VAR) {
        Ok(name) => parse_level(&name),
        Err(_) => parse_level(requested.unwrap_or(DEFAULT_LOG_LEVEL)),
    }
}

/// Parse a level name, case-insensitively
fn parse_level(name: &str) -> Result<LevelFilter> {
    name.parse()
        .ok()
        .with_context(|| format!("Unknown log level '{name}'"))
}

/// Console sinks: routine messages on stdout, warnings and errors on stderr
fn console_output(level: LevelFilter) -> Dispatch {
    let palette = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();
    Dispatch::new()
        .chain(
            Dispatch::new()
                .level(level)
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    write_entry(out, message, record, stdout_is_tty.then_some(&palette));
                })
                .chain(io::stdout()),
        )
        .chain(
            Dispatch::new()
                .level(level.min(LevelFilter::Warn))
                .format(move |out, message, record| {
                    write_entry(out, message, record, stderr_is_tty.then_some(&palette));
                })
                .chain(io::stderr()),
        )
}

/// File sinks under `dir`: the full record and a warnings-and-errors copy
fn file_output(dir: &Path, level: LevelFilter) -> Result<Dispatch> {
    let info_log = fern::log_file(dir.join(LOG_INFO_FILE_NAME))?;
    let error_log = fern::log_file(dir.join(LOG_ERROR_FILE_NAME))?;
    let dispatch = Dispatch::new()
        .format(|out, message, record| write_entry(out, message, record, None))
        .chain(
            Dispatch::new()
                .level(level.max(LevelFilter::Info))
                .chain(info_log),
        )
        .chain(Dispatch::new().level(LevelFilter::Warn).chain(error_log));
    Ok(dispatch)
}

/// Write one log line, colouring the level when a palette is given
fn write_entry(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    palette: Option<&ColoredLevelConfig>,
) {
    let timestamp = Local::now().format("%H:%M:%S");
    match palette {
        Some(palette) => out.finish(format_args!(
            "[{timestamp} {} {}] {message}",
            palette.color(record.level()),
            record.target()
        )),
        None => out.finish(format_args!(
            "[{timestamp} {} {}] {message}",
            record.level(),
            record.target()
        )),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("off", LevelFilter::Off)]
    #[case("warn", LevelFilter::Warn)]
    #[case("INFO", LevelFilter::Info)]
    fn test_parse_level(#[case] name: &str, #[case] expected: LevelFilter) {
        assert_eq!(parse_level(name).unwrap(), expected);
    }

    #[test]
    fn test_parse_level_rejects_unknown_names() {
        assert!(parse_level("noisy").is_err());
    }
}
