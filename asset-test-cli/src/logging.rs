use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_NAME: &str = "asset-test.log";

/// Log to stdout and, when the test case folder is known, to a log file inside it. The returned
/// guard flushes the file log when dropped so it must be kept until the process exits.
pub async fn configure_logging(level: LevelFilter, test_case_folder: Option<&Path>) -> Option<WorkerGuard> {
    let stdout_log = tracing_subscriber::fmt::layer();

    let mut folder_error = None;
    let mut guard = None;
    let file_log = match test_case_folder {
        Some(folder) => match tokio::fs::create_dir_all(folder).await {
            Ok(_) => {
                let file_appender = tracing_appender::rolling::never(folder, LOG_FILE_NAME);
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(worker_guard);
                Some(tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .with_filter(level))
            }
            Err(err) => {
                folder_error = Some(format!("could not create {folder:?} for the log file: {err}"));
                None
            }
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout_log.with_filter(level))
        .with(file_log)
        .init();

    if let Some(err) = folder_error {
        tracing::warn!("{}", err);
    }
    guard
}
