use std::path::PathBuf;
use anyhow::Context;
use asset_test_schemas::settings::HarnessSettings;
use crate::checks::{ExecutionMode, VerificationPipeline};
use crate::commands::ProbeCommands;
use crate::executor::ssh::{pull_file_from_remote, SshExecutor};
use crate::results::{ResultAggregator, TestReport};
use crate::topology::Topology;

pub mod checks;
pub mod commands;
pub mod dispatch;
pub mod executor;
pub mod probe;
pub mod report;
pub mod results;
pub mod topology;

/// A single run of the asset test against one test case
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub project_state: PathBuf,
    pub folder: PathBuf,
    pub fetch_state: bool,
    pub mode: ExecutionMode,
}

impl TestCase {
    pub fn new(name: &str, settings: &HarnessSettings) -> Self {
        Self {
            name: name.to_string(),
            project_state: settings.project_state_path(name),
            folder: settings.test_case_folder(name),
            fetch_state: false,
            mode: if settings.concurrent { ExecutionMode::Concurrent } else { ExecutionMode::Sequential },
        }
    }
}

/// Check the deployed testbed against the project state of the test case and write the report.
/// A report with failed checks is still an `Ok`, errors are reserved for runs that could not
/// check anything.
pub async fn run_test_case(test_case: &TestCase, settings: &HarnessSettings) -> anyhow::Result<TestReport> {
    let started = chrono::Local::now().naive_local();

    if test_case.fetch_state {
        tracing::info!("pulling project state from {}", settings.main_testbed);
        if let Some(parent) = test_case.project_state.parent() {
            tokio::fs::create_dir_all(parent).await
                .with_context(|| format!("Creating folder for project state {parent:?}"))?;
        }
        pull_file_from_remote(
            &settings.main_testbed,
            &settings.testbed_host_key,
            &settings.remote_state_path,
            &test_case.project_state,
            settings.connect_timeout_secs,
        ).await.context("Pulling project state from the main testbed")?;
    }

    let topology = Topology::load_from_file(&test_case.project_state).await
        .with_context(|| format!("Loading project state {:?}", test_case.project_state))?;
    tracing::info!(
        "testing project '{}' with {} guests on {} testbed hosts, main testbed host is {}",
        topology.project_name,
        topology.guests.len(),
        topology.host_count(),
        topology.main_host().id,
    );

    let commands = ProbeCommands::new(&topology, settings);
    let mut executor = SshExecutor::new(&topology, settings);
    executor.open().await?;

    let mut aggregator = ResultAggregator::new();
    VerificationPipeline::new(&topology, &commands, &executor, test_case.mode)
        .run(&mut aggregator)
        .await;
    executor.close().await;

    let report = aggregator.finalize(&test_case.name, topology.host_count(), started);
    report::write_report(&report, &test_case.project_state, &test_case.folder).await
        .context("Writing test report")?;
    Ok(report)
}
