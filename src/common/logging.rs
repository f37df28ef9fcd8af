//! Logging and tracing configuration
//!
//! Wire traffic is logged at debug level, dropped protocol units at warn.
//! `RUST_LOG` overrides the defaults chosen here.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a given `-v` count
fn default_filter(verbosity: u8) -> EnvFilter {
    let directive = match verbosity {
        0 => "debug_bridge=info,warn",
        1 => "debug_bridge=debug,info",
        _ => "debug_bridge=trace,debug",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// Initialize tracing for the CLI (stderr logging)
///
/// stdout is reserved for session output, so logs go to stderr.
pub fn init_cli(verbosity: u8) {
    tracing_subscriber::registry()
        .with(default_filter(verbosity))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing with an additional log file
///
/// The file receives full detail (file, line, thread ids) without ANSI
/// colors. Keep the returned guard alive for the process lifetime or
/// buffered lines are lost.
pub fn init_with_file(verbosity: u8, log_file: &Path) -> std::io::Result<WorkerGuard> {
    let dir = log_file.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "debug-bridge.log".into());

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    tracing_subscriber::registry()
        .with(default_filter(verbosity))
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(guard)
}
