use std::panic;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging knobs shared by the API server and the retrainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Directory for daily rotated files (`PM_LOG_DIR`); stdout when unset.
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is not set (`PM_LOG_LEVEL`, default `info`).
    pub default_filter: String,
    /// Chain to the default panic hook as well (`PM_LOG_INCLUDE_BACKTRACE`).
    pub include_backtrace: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            default_filter: "info".into(),
            include_backtrace: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            log_dir: std::env::var_os("PM_LOG_DIR").map(PathBuf::from),
            default_filter: std::env::var("PM_LOG_LEVEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "info".into()),
            include_backtrace: std::env::var("PM_LOG_INCLUDE_BACKTRACE")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Route panics through `tracing` so they land in the same sink as the rest
/// of the process logs. Installed at most once per process.
pub fn install_tracing_panic_hook(app_name: &'static str, include_backtrace: bool) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| {
        let default_hook = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("unknown");

            let location = info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()));
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic payload not string".into());

            tracing::error!(
                application = app_name,
                %thread_name,
                location = location.as_deref().unwrap_or("unknown"),
                panic_message = %message,
                "panic captured"
            );

            if include_backtrace {
                default_hook(info);
            }
        }));
    });
}

fn rotating_file_writer(app_name: &'static str, dir: &PathBuf) -> Option<BoxMakeWriter> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create PM_LOG_DIR {}: {err}; logging to stdout", dir.display());
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Some(BoxMakeWriter::new(non_blocking))
}

/// Initialise the global subscriber and the panic hook.
///
/// `RUST_LOG` wins over `PM_LOG_LEVEL`. Calling this twice is harmless; the
/// second subscriber install is ignored.
pub fn init(app_name: &'static str, config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    let writer = config
        .log_dir
        .as_ref()
        .and_then(|dir| rotating_file_writer(app_name, dir));

    match writer {
        Some(writer) => {
            let _ = builder.with_ansi(false).with_writer(writer).try_init();
        }
        None => {
            let _ = builder.try_init();
        }
    }

    install_tracing_panic_hook(app_name, config.include_backtrace);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_logs_to_stdout_at_info() {
        let config = LoggingConfig::default();
        assert!(config.log_dir.is_none());
        assert_eq!(config.default_filter, "info");
        assert!(!config.include_backtrace);
    }

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig::default();
        init("pm-common-test", &config);
        init("pm-common-test", &config);
        tracing::info!("logging initialised twice without panicking");
    }
}
