use anyhow::Result;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_DIR_ENV: &str = "SWITCHBOARD_LOG_DIR";

/// Console logging filtered by `RUST_LOG`, plus a daily-rotated file when a
/// log directory is configured. Returns the appender guard; dropping it
/// stops the background writer, so the caller holds it for process lifetime.
pub fn setup_logging(
    process_name: &str,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(env_filter);

    match std::env::var(LOG_DIR_ENV) {
        Ok(log_dir) => {
            let appender = tracing_appender::rolling::RollingFileAppender::new(
                Rotation::DAILY,
                log_dir,
                format!("{process_name}.log"),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("info"));

            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        Err(_) => {
            tracing_subscriber::registry().with(console_layer).init();
            Ok(None)
        }
    }
}
