use std::fmt;
use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::PROJECT_STATE_FILE_NAME;

/// Settings for the asset test harness. Every value has a default matching the layout of the
/// test harness folder, so the settings file only needs to contain what differs for the testbed
/// being tested.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct HarnessSettings {
    /// parent folder of the per test case folders, holding the state and results
    pub artefacts_folder: PathBuf,
    /// key used to ssh into every testbed host
    #[validate(length(min = 1))]
    pub testbed_host_key: String,
    /// use the key recorded for a host in the state instead of `testbed_host_key`. The state
    /// records paths on the server machine, so only set this when the harness runs there.
    pub use_state_host_keys: bool,
    /// user@host of the main testbed, used to fetch the project state
    #[validate(length(min = 1))]
    pub main_testbed: String,
    /// location of the project state on the main testbed
    #[validate(length(min = 1))]
    pub remote_state_path: String,
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
    /// upper bound for any single probe, a probe that runs longer is treated as unreachable
    #[validate(range(min = 1))]
    pub command_timeout_secs: u64,
    /// login for libvirt guests that do not declare a username
    #[validate(length(min = 1))]
    pub guest_username: String,
    /// key on the main testbed used to hop between guests, it is pushed to guests before the
    /// guest to guest communication checks
    #[validate(length(min = 1))]
    pub inter_guest_key: String,
    #[validate(length(min = 1))]
    pub guest_ssh_folder: String,
    #[validate(length(min = 1))]
    pub guest_context_file: String,
    #[validate(length(min = 1))]
    pub guest_setup_script_folder: String,
    /// port of the http server started by the libvirt guest setup scripts
    #[validate(range(min = 1))]
    pub guest_http_port: u16,
    #[validate(length(min = 1))]
    pub external_endpoint: String,
    pub concurrent: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            artefacts_folder: PathBuf::from("../artefacts/test_cases"),
            testbed_host_key: "../assets/ssh_key/id_ed25519".to_string(),
            use_state_host_keys: false,
            main_testbed: "nocloud@testbed-host-one".to_string(),
            remote_state_path: "/home/nocloud/project/project-state.json".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            guest_username: "nocloud".to_string(),
            inter_guest_key: "/home/nocloud/.ssh/id_ed25519_kvm".to_string(),
            guest_ssh_folder: "/home/nocloud/.ssh/".to_string(),
            guest_context_file: "/etc/nocloud/context/kvm-compose.yaml".to_string(),
            guest_setup_script_folder: "/tmp".to_string(),
            guest_http_port: 8000,
            external_endpoint: "google.com".to_string(),
            concurrent: false,
        }
    }
}

impl fmt::Display for HarnessSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = serde_yaml::to_string(&self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl HarnessSettings {
    /// Read the settings yaml, if no file is given then the defaults are used
    pub async fn load<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<Self> {
        let settings = match path {
            None => {
                tracing::debug!("no settings file given, using defaults");
                Self::default()
            }
            Some(path) => {
                let path = path.as_ref();
                tracing::trace!("reading harness settings from {:?}", path);
                let text = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Reading settings file {path:?}"))?;
                Self::parse(&text)?
            }
        };
        settings.validate().context("Validating harness settings")?;
        Ok(settings)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let settings: Self = serde_yaml::from_str(text).context("Parsing settings YAML")?;
        Ok(settings)
    }

    /// Folder holding the state and the results of a test case
    pub fn test_case_folder(&self, test_case_name: &str) -> PathBuf {
        self.artefacts_folder.join(test_case_name)
    }

    /// Default location of the project state for a test case
    pub fn project_state_path(&self, test_case_name: &str) -> PathBuf {
        self.test_case_folder(test_case_name).join(PROJECT_STATE_FILE_NAME)
    }
}
