#![forbid(unsafe_code)]

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Installs the global subscriber: compact fmt output on stderr, plus an
/// optional plain-text log file. `RUST_LOG` overrides the configured level.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process. Calling this twice is harmless.
pub fn init_logging(config: &LoggingConfig, verbose: bool, project_root: &Path) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .boxed();

    let (file_layer, guard) = match config.file.as_deref() {
        Some(file) => {
            let path = project_root.join(file);
            let dir = path.parent().unwrap_or(project_root).to_path_buf();
            let name = path
                .file_name()
                .map_or_else(|| "symgraph.log".into(), |n| n.to_os_string());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .try_init();

    guard
}
