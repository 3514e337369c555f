use std::fs;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeLogConfig;

const LOG_FILE_NAME: &str = "classhub.log";

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Failures are reported on stderr and leave tracing disabled; commands still run.
pub fn init_tracing(config: &RuntimeLogConfig) {
    static TRACE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    if let Err(error) = fs::create_dir_all(&config.dir) {
        eprintln!(
            "warning: create log directory {} failed: {error}",
            config.dir.display()
        );
        return;
    }
    let file_appender = tracing_appender::rolling::never(&config.dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = TRACE_GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);
    let init_result = if config.stdout {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init()
    };
    if let Err(error) = init_result {
        eprintln!(
            "warning: failed to initialize tracing subscriber for {}: {error}",
            config.dir.join(LOG_FILE_NAME).display()
        );
    }
}
