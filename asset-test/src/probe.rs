use std::fmt;
use thiserror::Error;
use crate::executor::{CommandExecutor, CommandOutput, ConnectionError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("`{command}` exited with status {status} on {host}: {}", .stderr.trim())]
    CommandFailed {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("expected `{signature}` in the output of `{command}` on {host}")]
    MissingSignature {
        host: String,
        command: String,
        signature: String,
    },
    #[error("`{command}` matched nothing on {host}")]
    NoMatch {
        host: String,
        command: String,
    },
}

/// Runs a probe command and decides whether its output is what the check expects
#[derive(Clone, Copy)]
pub struct Prober<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> Prober<'a> {
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    /// The command must exit with status 0
    pub async fn expect_success(&self, host: &str, command: &str) -> Result<CommandOutput, ProbeError> {
        let output = self.executor.run(host, command).await?;
        if !output.success() {
            return Err(ProbeError::CommandFailed {
                host: host.to_string(),
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// The command must succeed and print the signature somewhere in stdout
    pub async fn expect_contains(&self, host: &str, command: &str, signature: &str) -> Result<CommandOutput, ProbeError> {
        let output = self.expect_success(host, command).await?;
        if !output.stdout.contains(signature) {
            return Err(ProbeError::MissingSignature {
                host: host.to_string(),
                command: command.to_string(),
                signature: signature.to_string(),
            });
        }
        Ok(output)
    }

    /// The command prints a count, which must be above zero
    pub async fn expect_nonzero_count(&self, host: &str, command: &str) -> Result<(), ProbeError> {
        let output = self.expect_success(host, command).await?;
        match output.stdout.trim().parse::<u64>() {
            Ok(count) if count > 0 => Ok(()),
            _ => Err(ProbeError::NoMatch { host: host.to_string(), command: command.to_string() }),
        }
    }
}

/// The first sub check of a check that did not hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub message: String,
    pub cause: Option<ProbeError>,
}

impl CheckFailure {
    pub fn new(message: impl Into<String>, cause: Option<ProbeError>) -> Self {
        Self { message: message.into(), cause }
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})", self.message, cause),
            None => f.write_str(&self.message),
        }
    }
}

/// Attach the report message to a probe failure so a check can stop at its first failing probe
/// with `?`
pub trait ProbeResultExt<T> {
    fn or_fail(self, message: impl Into<String>) -> Result<T, CheckFailure>;
}

impl<T> ProbeResultExt<T> for Result<T, ProbeError> {
    fn or_fail(self, message: impl Into<String>) -> Result<T, CheckFailure> {
        self.map_err(|err| CheckFailure::new(message, Some(err)))
    }
}
