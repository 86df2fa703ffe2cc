//! Logging bootstrap for the sidecar.
//!
//! stdout carries the IPC protocol, so log lines go to rolling files when a
//! directory is configured and to stderr otherwise. Initialization happens
//! once per process and never panics.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

pub const LOG_LEVEL_ENV: &str = "BULLETIND_LOG";
pub const LOG_DIR_ENV: &str = "BULLETIND_LOG_DIR";

const LOG_FILE_BASENAME: &str = "bulletind";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGER: OnceLock<Mutex<Option<LoggingState>>> = OnceLock::new();

struct LoggingState {
    level: &'static str,
    log_dir: Option<PathBuf>,
    _handle: LoggerHandle,
}

pub fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "" | "info" => Ok("info"),
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        "off" => Ok("off"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error|off"
        )),
    }
}

/// Starts the logger. A second call with the same settings is a no-op; a
/// call with different settings is refused.
pub fn init_logging(level: &str, log_dir: Option<PathBuf>) -> Result<(), String> {
    let level = normalize_level(level)?;
    let slot = LOGGER.get_or_init(|| Mutex::new(None));
    let mut guard = slot
        .lock()
        .map_err(|_| "logging state poisoned".to_string())?;

    if let Some(state) = guard.as_ref() {
        if state.level == level && state.log_dir == log_dir {
            return Ok(());
        }
        return Err(format!(
            "logging already initialized with level `{}`; refusing to reconfigure",
            state.level
        ));
    }

    let builder = Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?;
    let handle = match &log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                format!("failed to create log directory `{}`: {err}", dir.display())
            })?;
            builder
                .log_to_file(
                    FileSpec::default()
                        .directory(dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
                .start()
        }
        None => builder
            .log_to_stderr()
            .format_for_stderr(flexi_logger::detailed_format)
            .start(),
    }
    .map_err(|err| format!("failed to start logger: {err}"))?;

    log::info!(
        "event=app_start status=ok platform={} version={} level={} sink={}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION"),
        level,
        log_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "stderr".to_string())
    );

    *guard = Some(LoggingState {
        level,
        log_dir,
        _handle: handle,
    });
    Ok(())
}

/// Reads `BULLETIND_LOG` / `BULLETIND_LOG_DIR`.
pub fn init_from_env() -> Result<(), String> {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_default();
    let dir = std::env::var_os(LOG_DIR_ENV)
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty());
    init_logging(&level, dir)
}
