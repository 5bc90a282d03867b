// Logging utilities for CLI
use std::io::Write;

/// Initialize logger for CLI
pub fn init_logger(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // RUST_LOG takes over completely when set
    if std::env::var("RUST_LOG").is_ok() {
        return env_logger::init();
    }

    let mut builder = env_logger::Builder::new();

    builder.filter_level(default_level).format(|buf, record| {
        if record.level() == log::Level::Info {
            writeln!(buf, "{}", record.args())
        } else {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        }
    });

    // Debug output from our own crate only; dependencies stay at Info
    if verbose {
        builder.filter_module("reqwest", log::LevelFilter::Info);
        builder.filter_module("hyper", log::LevelFilter::Info);
        builder.filter_module("hyper_util", log::LevelFilter::Info);
        builder.filter_module("h2", log::LevelFilter::Info);
        builder.filter_module("rustls", log::LevelFilter::Info);
        builder.filter_module("tokio", log::LevelFilter::Info);
    }

    builder.init();
}
