mod logging;

use anyhow::anyhow;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use asset_test_lib::checks::ExecutionMode;
use asset_test_lib::{run_test_case, TestCase};
use asset_test_schemas::cli_models::Opts;
use asset_test_schemas::settings::HarnessSettings;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let opts: Opts = Opts::parse();
    // Determine and set log level
    let mut e = None;
    let level = match &opts.verbosity {
        None => LevelFilter::INFO,
        Some(x) => match log_level(x) {
            Ok(l) => l,
            Err(err) => {
                e = Some(err);
                LevelFilter::INFO
            }
        },
    };

    let settings = HarnessSettings::load(opts.settings.as_ref()).await;
    let log_folder = settings.as_ref().ok().map(|s| s.test_case_folder(&opts.test_case_name));
    let guard = logging::configure_logging(level, log_folder.as_deref()).await;
    if let Some(e) = e {
        tracing::warn!("{}", e);
    }

    let result = match settings {
        Ok(settings) => run_app(opts, settings).await,
        Err(err) => Err(err),
    };
    let code = match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("ERROR: {}", err);
            err.chain().skip(1).for_each(|cause| tracing::error!("because: {}", cause));
            1
        }
    };
    // exit skips destructors, flush the file log first
    drop(guard);
    std::process::exit(code);
}

fn log_level(s: &str) -> anyhow::Result<LevelFilter> {
    match s.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::ERROR),
        "warn" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        _ => Err(anyhow!("Unknown Log LevelFilter {}", s)),
    }
}

/// Run the asset test for the test case named on the command line, the exit code is 1 if any
/// check failed
async fn run_app(opts: Opts, settings: HarnessSettings) -> anyhow::Result<i32> {
    tracing::debug!("harness settings:\n{}", settings);
    let mut test_case = TestCase::new(&opts.test_case_name, &settings);
    if let Some(state) = opts.state {
        test_case.project_state = state;
    }
    test_case.fetch_state = opts.fetch_state;
    if opts.concurrent {
        test_case.mode = ExecutionMode::Concurrent;
    }

    let report = run_test_case(&test_case, &settings).await?;
    report.log_summary();
    Ok(report.exit_code())
}
