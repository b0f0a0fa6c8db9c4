use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use anyhow::{bail, Context};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use asset_test_schemas::settings::HarnessSettings;
use crate::executor::{CommandExecutor, CommandOutput, ConnectionError};
use crate::topology::Topology;

/// ssh reserves this status for its own failures, anything else came from the remote command
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SshTarget {
    host: String,
    username: String,
    address: String,
    key: String,
}

impl SshTarget {
    fn ssh_address(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

/// Runs probes on the testbed hosts with the system ssh client. While open, one control master
/// per host is kept alive so a check stage does not pay for a new login on every probe.
pub struct SshExecutor {
    targets: Vec<SshTarget>,
    connect_timeout_secs: u64,
    command_timeout: Duration,
    control_folder: Option<TempDir>,
    masters: Vec<String>,
}

impl SshExecutor {
    pub fn new(topology: &Topology, settings: &HarnessSettings) -> Self {
        let targets = topology.hosts.iter()
            .map(|host| SshTarget {
                host: host.id.clone(),
                username: host.username.clone(),
                address: host.address.clone(),
                key: host.ssh_private_key_location.clone()
                    .filter(|_| settings.use_state_host_keys)
                    .unwrap_or_else(|| settings.testbed_host_key.clone()),
            })
            .collect();
        Self {
            targets,
            connect_timeout_secs: settings.connect_timeout_secs,
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
            control_folder: None,
            masters: Vec::new(),
        }
    }

    /// Start a control master for each testbed host. A host whose master does not come up is
    /// still probed, every probe then makes its own connection and reports its own failure.
    pub async fn open(&mut self) -> anyhow::Result<()> {
        let control_folder = tempfile::Builder::new()
            .prefix("asset-test-ssh")
            .tempdir()
            .context("Creating folder for ssh control sockets")?;
        self.control_folder = Some(control_folder);

        for target in &self.targets {
            let Some(control_path) = self.control_path(&target.host) else { continue };
            let mut args = self.ssh_opts(target);
            args.extend([
                "-o".to_string(), "ControlMaster=yes".to_string(),
                "-o".to_string(), format!("ControlPath={}", control_path.display()),
                "-o".to_string(), "ControlPersist=yes".to_string(),
                "-f".to_string(), "-N".to_string(),
                target.ssh_address(),
            ]);
            tracing::debug!("opening ssh session to {}: ssh {}", target.host, args.join(" "));
            // the backgrounded master keeps any pipes open, so its output is discarded
            let started = Command::new("ssh")
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status();
            match tokio::time::timeout(self.command_timeout, started).await {
                Ok(Ok(status)) if status.success() => {
                    self.masters.push(target.host.clone());
                }
                Ok(Ok(status)) => {
                    tracing::warn!("could not open ssh session to {}, ssh exited with {}", target.host, status);
                }
                Ok(Err(err)) => {
                    tracing::warn!("could not open ssh session to {}: {:#}", target.host, err);
                }
                Err(_) => {
                    tracing::warn!("timed out opening ssh session to {}", target.host);
                }
            }
        }
        Ok(())
    }

    /// Stop the control masters and remove their sockets
    pub async fn close(&mut self) {
        for host in std::mem::take(&mut self.masters) {
            let Some(target) = self.targets.iter().find(|t| t.host == host) else { continue };
            let Some(control_path) = self.control_path(&host) else { continue };
            let result = Command::new("ssh")
                .arg("-o")
                .arg(format!("ControlPath={}", control_path.display()))
                .args(["-O", "exit"])
                .arg(target.ssh_address())
                .stdin(Stdio::null())
                .output()
                .await;
            match result {
                Ok(output) if output.status.success() => tracing::debug!("closed ssh session to {host}"),
                Ok(output) => tracing::warn!(
                    "closing ssh session to {host} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(err) => tracing::warn!("closing ssh session to {host} failed: {err:#}"),
            }
        }
        if let Some(control_folder) = self.control_folder.take() {
            if let Err(err) = control_folder.close() {
                tracing::warn!("could not remove ssh control folder: {err:#}");
            }
        }
    }

    fn control_path(&self, host: &str) -> Option<PathBuf> {
        self.control_folder.as_ref().map(|folder| folder.path().join(format!("{host}.sock")))
    }

    fn ssh_opts(&self, target: &SshTarget) -> Vec<String> {
        vec![
            "-i".to_string(), target.key.clone(),
            "-o".to_string(), "BatchMode=yes".to_string(),
            "-o".to_string(), "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(), "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(), format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput, ConnectionError> {
        let target = self.targets.iter()
            .find(|t| t.host == host)
            .ok_or_else(|| ConnectionError::UnknownHost { host: host.to_string() })?;

        let mut args = self.ssh_opts(target);
        // without a live master ssh falls back to a direct connection
        if let Some(control_path) = self.control_path(host) {
            args.extend(["-o".to_string(), format!("ControlPath={}", control_path.display())]);
        }
        args.push(target.ssh_address());
        args.push(command.to_string());
        tracing::debug!("running remote command on {host}: {command}");

        let sub_process = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.command_timeout, sub_process).await {
            Err(_) => return Err(ConnectionError::TimedOut {
                host: host.to_string(),
                seconds: self.command_timeout.as_secs(),
            }),
            Ok(Err(err)) => return Err(ConnectionError::Unreachable {
                host: host.to_string(),
                cause: err.to_string(),
            }),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        match output.status.code() {
            // 255 also covers a relayed ssh from the host to a guest failing to connect
            Some(SSH_CONNECTION_FAILURE) | None => Err(ConnectionError::Unreachable {
                host: host.to_string(),
                cause: stderr.trim().to_string(),
            }),
            Some(status) => {
                tracing::trace!("{host} returned {status} for {command}");
                Ok(CommandOutput { status, stdout, stderr })
            }
        }
    }
}

/// Copy a file from a remote machine with rsync
pub async fn pull_file_from_remote(
    ssh_address: &str,
    ssh_key_location: &str,
    remote_src: &str,
    local_dst: &Path,
    connect_timeout_secs: u64,
) -> anyhow::Result<()> {
    let ssh_conn = format!(
        "ssh -i {ssh_key_location} -o BatchMode=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o ConnectTimeout={connect_timeout_secs}"
    );
    let remote_string = format!("{ssh_address}:{remote_src}");
    tracing::debug!("pulling file from remote: rsync -av -e {ssh_conn:?} {remote_string} {local_dst:?}");

    let sub_process = Command::new("rsync")
        .args(["-av", "-e"])
        .arg(ssh_conn)
        .arg(remote_string)
        .arg(local_dst)
        .output()
        .await
        .context("Running rsync")?;

    if !sub_process.status.success() {
        let std_err = String::from_utf8_lossy(&sub_process.stderr);
        bail!("{}", std_err.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::TWO_HOST_STATE;

    fn state_with_host_keys() -> String {
        TWO_HOST_STATE
            .replace(
                r#""hostname": "10.0.1.10", "username": "nocloud","#,
                r#""hostname": "10.0.1.10", "username": "nocloud", "ssh_private_key_location": "/var/lib/testbedos/keys/id_ed25519","#,
            )
            .replace(
                r#""hostname": "10.0.1.12", "username": "nocloud","#,
                r#""hostname": "10.0.1.12", "username": "nocloud", "ssh_private_key_location": "/var/lib/testbedos/keys/id_ed25519","#,
            )
    }

    #[test]
    fn test_settings_host_key_used_for_every_host() {
        let topology = Topology::from_json_str(&state_with_host_keys()).unwrap();
        let settings = HarnessSettings::default();
        let executor = SshExecutor::new(&topology, &settings);

        assert_eq!(executor.targets.len(), 2);
        assert!(executor.targets.iter().all(|t| t.key == "../assets/ssh_key/id_ed25519"));
        assert_eq!(executor.targets[1].ssh_address(), "nocloud@10.0.1.12");

        let opts = executor.ssh_opts(&executor.targets[0]);
        assert!(opts.contains(&"ConnectTimeout=10".to_string()));
        assert!(opts.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn test_state_host_keys_when_enabled() {
        let state = TWO_HOST_STATE.replace(
            r#""hostname": "10.0.1.12", "username": "nocloud","#,
            r#""hostname": "10.0.1.12", "username": "nocloud", "ssh_private_key_location": "/keys/two","#,
        );
        let topology = Topology::from_json_str(&state).unwrap();
        let settings = HarnessSettings { use_state_host_keys: true, ..HarnessSettings::default() };
        let executor = SshExecutor::new(&topology, &settings);

        assert_eq!(executor.targets[0].key, settings.testbed_host_key);
        assert_eq!(executor.targets[1].key, "/keys/two");
    }

    #[tokio::test]
    async fn test_unknown_host_is_connection_error() {
        let topology = Topology::from_json_str(TWO_HOST_STATE).unwrap();
        let executor = SshExecutor::new(&topology, &HarnessSettings::default());
        let err = executor.run("testbed-host-nine", "true").await.unwrap_err();
        assert_eq!(err, ConnectionError::UnknownHost { host: "testbed-host-nine".to_string() });
        assert!(executor.control_path("testbed-host-one").is_none());
    }
}
