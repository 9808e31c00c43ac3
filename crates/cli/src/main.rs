use std::process::ExitCode;

use changegate_core::config::{AppConfig, LoadOptions, LogFormat};

/// Logs go to stderr; stdout carries the JSON command payload.
fn init_logging() {
    use tracing::Level;

    let (log_level, format) = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            (config.logging.level.parse::<Level>().unwrap_or(Level::INFO), config.logging.format)
        }
        Err(_) => (Level::WARN, LogFormat::Compact),
    };

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> ExitCode {
    init_logging();
    changegate_cli::run()
}
