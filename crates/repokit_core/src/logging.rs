//! Logging bootstrap for applications embedding repokit.
//!
//! # Responsibility
//! - Initialize rolling file logs once per process.
//! - Capture panics as sanitized, metadata-only log events.
//!
//! # Invariants
//! - Init is idempotent for an identical `LogConfig`.
//! - Re-initialization with a different level or directory is rejected.
//! - Initialization never panics.
//!
//! Library code only talks to the `log` facade; calling `init_logging` is
//! optional and left to the host process.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const DEFAULT_BASENAME: &str = "repokit";
const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

/// Logging bootstrap settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub basename: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl LogConfig {
    /// Config with the build-mode default level and default rotation.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: log_dir.into(),
            basename: DEFAULT_BASENAME.to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn basename(mut self, basename: &str) -> Self {
        self.basename = basename.to_string();
        self
    }

    pub fn rotation(mut self, max_file_size: u64, max_files: usize) -> Self {
        self.max_file_size = max_file_size;
        self.max_files = max_files;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    UnsupportedLevel(String),
    #[error("log_dir cannot be empty")]
    EmptyDirectory,
    #[error("log_dir must be an absolute path, got `{0}`")]
    RelativeDirectory(String),
    #[error("log rotation needs a positive file size and file count")]
    InvalidRotation,
    #[error("failed to create log directory `{path}`: {message}")]
    CreateDirectory { path: String, message: String },
    #[error("failed to start logger: {0}")]
    Backend(String),
    #[error("logging already initialized with {setting} `{active}`; refusing to switch to `{requested}`")]
    Conflict {
        setting: &'static str,
        active: String,
        requested: String,
    },
}

struct LoggingState {
    level: &'static str,
    log_dir: PathBuf,
    basename: String,
    rotation: (u64, usize),
    _logger: LoggerHandle,
}

impl LoggingState {
    fn ensure_matches(
        &self,
        level: &'static str,
        log_dir: &Path,
        basename: &str,
        rotation: (u64, usize),
    ) -> Result<(), LoggingError> {
        if self.log_dir != log_dir {
            return Err(LoggingError::Conflict {
                setting: "directory",
                active: self.log_dir.display().to_string(),
                requested: log_dir.display().to_string(),
            });
        }
        if self.level != level {
            return Err(LoggingError::Conflict {
                setting: "level",
                active: self.level.to_string(),
                requested: level.to_string(),
            });
        }
        if self.basename != basename {
            return Err(LoggingError::Conflict {
                setting: "basename",
                active: self.basename.clone(),
                requested: basename.to_string(),
            });
        }
        if self.rotation != rotation {
            return Err(LoggingError::Conflict {
                setting: "rotation",
                active: format!("{} bytes x {} files", self.rotation.0, self.rotation.1),
                requested: format!("{} bytes x {} files", rotation.0, rotation.1),
            });
        }
        Ok(())
    }
}

/// Initializes rolling file logging.
///
/// # Errors
/// - Unsupported level, empty or relative directory, zero rotation bounds.
/// - The directory cannot be created or the backend fails to start.
/// - Logging is already active with a different level, directory, basename
///   or rotation.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let level = normalize_level(&config.level)?;
    let log_dir = normalize_log_dir(&config.log_dir)?;
    let basename = match config.basename.trim() {
        "" => DEFAULT_BASENAME,
        name => name,
    };
    if config.max_file_size == 0 || config.max_files == 0 {
        return Err(LoggingError::InvalidRotation);
    }
    let rotation = (config.max_file_size, config.max_files);

    if let Some(state) = LOGGING_STATE.get() {
        return state.ensure_matches(level, &log_dir, basename, rotation);
    }

    let state = LOGGING_STATE.get_or_try_init(|| -> Result<LoggingState, LoggingError> {
        std::fs::create_dir_all(&log_dir).map_err(|err| LoggingError::CreateDirectory {
            path: log_dir.display().to_string(),
            message: err.to_string(),
        })?;

        let logger = Logger::try_with_str(level)
            .map_err(|err| LoggingError::Backend(err.to_string()))?
            .log_to_file(
                FileSpec::default()
                    .directory(log_dir.as_path())
                    .basename(basename),
            )
            .rotate(
                Criterion::Size(config.max_file_size),
                Naming::Numbers,
                Cleanup::KeepLogFiles(config.max_files),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            // [YYYY-MM-DD HH:MM:SS.ffffff TZ] LEVEL [module] file:line: message
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| LoggingError::Backend(err.to_string()))?;

        install_panic_hook_once();

        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} version={}",
            level,
            log_dir.display(),
            env!("CARGO_PKG_VERSION")
        );

        Ok(LoggingState {
            level,
            log_dir: log_dir.clone(),
            basename: basename.to_string(),
            rotation,
            _logger: logger,
        })
    })?;

    // Another thread may have won the init race with a different config.
    state.ensure_matches(level, &log_dir, basename, rotation)
}

/// `(level, log_dir)` of active logging, `None` before `init_logging`.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.log_dir.clone()))
}

/// `debug` in debug builds, `info` in release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn normalize_log_dir(log_dir: &Path) -> Result<PathBuf, LoggingError> {
    let raw = log_dir.to_string_lossy();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LoggingError::EmptyDirectory);
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(LoggingError::RelativeDirectory(trimmed.to_string()));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.get().is_some() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Payloads may carry record data; keep them single-line and capped.
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_summary(panic_info);
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location, payload
        );
        previous_hook(panic_info);
    }));

    let _ = PANIC_HOOK_INSTALLED.set(());
}

fn panic_payload_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };

    sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, logging_status, normalize_level, normalize_log_dir, sanitize_message,
        LogConfig, LoggingError,
    };
    use std::path::Path;

    #[test]
    fn normalize_level_accepts_known_values() {
        assert_eq!(normalize_level("INFO").unwrap(), "info");
        assert_eq!(normalize_level(" warning ").unwrap(), "warn");
        assert!(matches!(
            normalize_level("loud"),
            Err(LoggingError::UnsupportedLevel(_))
        ));
    }

    #[test]
    fn normalize_log_dir_rejects_relative_path() {
        assert_eq!(
            normalize_log_dir(Path::new("logs/dev")),
            Err(LoggingError::RelativeDirectory("logs/dev".to_string()))
        );
        assert_eq!(
            normalize_log_dir(Path::new("  ")),
            Err(LoggingError::EmptyDirectory)
        );
    }

    #[test]
    fn sanitize_message_removes_newlines_and_truncates() {
        let sanitized = sanitize_message("line1\nline2\rline3", 8);
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\r'));
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn zero_rotation_bounds_are_rejected() {
        let config = LogConfig::new(std::env::temp_dir()).rotation(0, 5);
        assert_eq!(init_logging(&config), Err(LoggingError::InvalidRotation));
    }

    #[test]
    fn init_logging_is_idempotent_for_same_config_and_rejects_conflicts() {
        let first = tempfile::tempdir().expect("temp dir");
        let second = tempfile::tempdir().expect("temp dir");
        let config = LogConfig::new(first.path()).level("info");

        init_logging(&config).expect("first init should succeed");
        init_logging(&config).expect("same config should be idempotent");

        let level_error = init_logging(&config.clone().level("debug")).unwrap_err();
        assert!(level_error.to_string().contains("refusing to switch"));

        let dir_error = init_logging(&LogConfig::new(second.path()).level("info")).unwrap_err();
        assert!(matches!(
            dir_error,
            LoggingError::Conflict {
                setting: "directory",
                ..
            }
        ));

        let rotation_error = init_logging(&config.clone().rotation(1024, 2)).unwrap_err();
        assert!(matches!(
            rotation_error,
            LoggingError::Conflict {
                setting: "rotation",
                ..
            }
        ));

        let (active_level, active_dir) = logging_status().expect("logging should be active");
        assert_eq!(active_level, "info");
        assert_eq!(active_dir, first.path());
    }
}
