//! Small shared toys: logging bootstrap and timestamp helpers. Kept
//! deliberately thin; anything entity- or query-shaped lives in its own
//! module.

use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;

use directories::ProjectDirs;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, EnvFilter};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Display label used for entities whose name column is empty. Queries for
/// this label also match empty-named rows; see `query::QueryMaker`.
pub const DEFAULT_UNKNOWN_LABEL: &str = "Unknown";

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

static LOGGING_INITIALIZED: Mutex<Option<HashSet<Option<String>>>> = Mutex::new(None);

// keeps the non-blocking file writer flushing for the process lifetime
static FILE_LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub fn initialize_logging(logger_name: Option<&str>, output: &str) -> crate::errors::Result<()> {
    let mut guard = LOGGING_INITIALIZED.lock().unwrap();
    let initialized = guard.get_or_insert_with(HashSet::new);
    let key = logger_name.map(|s| s.to_string());
    if initialized.contains(&key) {
        return Ok(());
    }
    initialized.insert(key);
    drop(guard);

    let proj_dirs = ProjectDirs::from("", "", "viola")
        .ok_or_else(|| crate::errors::ViolaError::Generic("failed to get project directories".to_string()))?;
    let log_dir = if cfg!(target_os = "macos") {
        proj_dirs.cache_dir()
    } else {
        proj_dirs.state_dir().unwrap_or(proj_dirs.cache_dir())
    };

    let log_despite_testing = std::env::var("LOG_TEST").is_ok();
    let is_testing = std::env::var("CARGO_TEST").is_ok();

    if !is_testing || log_despite_testing {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        if output == "stderr" {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_target(!log_despite_testing)
                .with_thread_ids(log_despite_testing)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        } else if output == "file" {
            fs::create_dir_all(log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .max_log_files(10)
                .filename_prefix("viola")
                .filename_suffix("log")
                .build(log_dir)
                .map_err(|e| crate::errors::ViolaError::Generic(e.to_string()))?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = FILE_LOG_GUARD.set(guard);

            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(true)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }

    Ok(())
}
