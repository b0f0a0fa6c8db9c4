use async_trait::async_trait;
use thiserror::Error;

pub mod ssh;
#[cfg(test)]
pub(crate) mod fake;

/// What a remote command left behind. A non zero status is not an error at this level, the
/// probe deciding what the command means looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// The command never got to run on the testbed host, or never came back
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("testbed host {host} is not part of the project state")]
    UnknownHost {
        host: String,
    },
    #[error("command on testbed host {host} failed to connect: {cause}")]
    Unreachable {
        host: String,
        cause: String,
    },
    #[error("no response from testbed host {host} after {seconds}s")]
    TimedOut {
        host: String,
        seconds: u64,
    },
}

/// Runs a shell command on a testbed host. Probes only ever talk to the testbed through this, so
/// the checks can be run against a scripted executor in tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput, ConnectionError>;
}
