//! Tracing subscriber setup for the workstation VM tool.
//!
//! Behavior is driven entirely by environment variables so that every binary
//! and test harness initializes logging the same way:
//!
//! - `LOG_LEVEL`: default filter directive (default: `info`)
//! - `LOG_OUTPUT`: `console`, `file`, or `both` (default: `console`)
//! - `LOG_FORMAT`: `human` or `json` (default: `human`)
//! - `LOG_FILE_PATH`: file sink location (default: `/tmp/wvm.log`)

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, registry, EnvFilter};

/// Initializes the global tracing subscriber based on environment variables.
///
/// Returns the appender guard when file output is active; the caller must
/// hold it for the lifetime of the process or buffered lines are lost.
pub fn init_subscriber() -> Option<WorkerGuard> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_output = env::var("LOG_OUTPUT").unwrap_or_else(|_| "console".to_string());
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "human".to_string());
    let log_file_path = env::var("LOG_FILE_PATH").unwrap_or_else(|_| "/tmp/wvm.log".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log_level))
        .add_directive("tokio=warn".parse().expect("static directive"))
        .add_directive("hyper=warn".parse().expect("static directive"));

    let use_console = log_output == "console" || log_output == "both";
    let use_file = log_output == "file" || log_output == "both";
    let is_json = log_format == "json";

    let mut guard: Option<WorkerGuard> = None;

    let file_layer = if use_file {
        let log_path = Path::new(&log_file_path);
        let log_dir = log_path.parent().unwrap_or_else(|| Path::new("/tmp"));
        let log_filename = log_path.file_name().unwrap_or("wvm.log".as_ref());

        let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
        if is_json {
            Some(layer.json().boxed())
        } else {
            Some(layer.boxed())
        }
    } else {
        None
    };

    let console_layer = if use_console {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
        if is_json {
            Some(layer.json().boxed())
        } else {
            Some(layer.pretty().boxed())
        }
    } else {
        None
    };

    registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}
