//! Logging setup

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

/// Initialise the global subscriber. Logs go to stderr unless
/// `UIDECK_LOG_FILE` names a file; `UIDECK_LOG_FORMAT` selects `pretty`
/// (default) or `json`. Returns the appender guard that must stay alive for
/// the process lifetime when file logging is on.
pub fn init() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = std::env::var("UIDECK_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
    let format = std::env::var("UIDECK_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let json = format.eq_ignore_ascii_case("json");

    let registry = tracing_subscriber::registry().with(filter);

    if let Ok(path) = std::env::var("UIDECK_LOG_FILE") {
        let path = std::path::PathBuf::from(path);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "uideck-server.log".to_string());
        std::fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if json {
            registry
                .with(fmt::layer().with_writer(writer).json().flatten_event(true))
                .init();
        } else {
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
        }
        return Ok(Some(guard));
    }

    if json {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .flatten_event(true),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(None)
}
