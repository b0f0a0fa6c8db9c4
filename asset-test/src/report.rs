use std::os::linux::fs::MetadataExt;
use std::path::{Path, PathBuf};
use anyhow::Context;
use nix::unistd::{Gid, Uid};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use crate::results::TestReport;

/// Where the report of a run was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtefacts {
    pub results_file: PathBuf,
    pub state_copy: PathBuf,
}

/// Write the result lines to a timestamped file in the test case folder and keep a copy of the
/// project state the run was checked against next to it
pub async fn write_report(
    report: &TestReport,
    project_state: &Path,
    test_case_folder: &Path,
) -> anyhow::Result<ReportArtefacts> {
    tokio::fs::create_dir_all(test_case_folder).await
        .with_context(|| format!("Creating test case folder {test_case_folder:?}"))?;

    let results_file = test_case_folder.join(report.results_file_name());
    let mut output = File::create(&results_file).await
        .with_context(|| format!("Creating results file {results_file:?}"))?;
    for line in report.lines() {
        output.write_all(format!("{line}\n").as_bytes()).await?;
    }
    output.flush().await?;

    let state_copy = test_case_folder.join(report.state_copy_file_name());
    tokio::fs::copy(project_state, &state_copy).await
        .with_context(|| format!("Copying project state to {state_copy:?}"))?;

    // set owner:group to the same as the test case folder
    let metadata = tokio::fs::metadata(test_case_folder).await?;
    let uid = Uid::from_raw(metadata.st_uid());
    let gid = Gid::from_raw(metadata.st_gid());
    for file in [&results_file, &state_copy] {
        nix::unistd::chown(file, Some(uid), Some(gid))
            .with_context(|| format!("Setting owner of {file:?}"))?;
    }

    tracing::info!("test results written to {:?}", results_file);
    Ok(ReportArtefacts { results_file, state_copy })
}
