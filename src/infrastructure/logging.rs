use crate::domain::settings::{LogFileSettings, LogRotation, LogSettings};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the non-blocking file writer alive; drop it last to flush.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// `RUST_LOG` takes precedence over the configured level.
pub fn level_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

fn file_appender(file: &LogFileSettings) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(&file.directory)?;
    Ok(RollingFileAppender::new(
        file.rotation.into(),
        &file.directory,
        &file.prefix,
    ))
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let console_layer = settings.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(settings.ansi_colors)
            .with_file(settings.show_source_location)
            .with_line_number(settings.show_source_location)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
    });

    let mut file_guard = None;
    let file_layer = match &settings.file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(file)?);
            file_guard = Some(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_file(settings.show_source_location)
                    .with_line_number(settings.show_source_location)
                    .with_thread_ids(settings.show_thread_ids)
                    .with_target(settings.show_target),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(level_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    match &settings.file {
        Some(file) => tracing::info!(
            "Logging at {} to console and {}/{}",
            settings.level,
            file.directory,
            file.prefix
        ),
        None => tracing::info!("Logging at {} to console only", settings.level),
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_mapping() {
        assert_eq!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(Rotation::from(LogRotation::Minutely), Rotation::MINUTELY);
        assert_eq!(Rotation::from(LogRotation::Never), Rotation::NEVER);
        assert_eq!(Rotation::from(LogRotation::default()), Rotation::DAILY);
    }

    #[test]
    fn test_init_writes_to_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let settings = LogSettings {
            console: false,
            file: Some(LogFileSettings {
                directory: log_dir.to_string_lossy().into_owned(),
                rotation: LogRotation::Never,
                ..LogFileSettings::default()
            }),
            ..LogSettings::default()
        };

        // Another test may already own the global subscriber.
        if let Ok(guard) = init_logger(&settings) {
            tracing::info!("hello");
            drop(guard);
            assert!(log_dir.join("heart_rate_monitor").exists());
        }
        assert!(log_dir.exists());
    }
}
