use std::sync::Mutex;
use async_trait::async_trait;
use crate::executor::{CommandExecutor, CommandOutput, ConnectionError};

struct Rule {
    host: Option<String>,
    needle: String,
    response: Result<CommandOutput, ConnectionError>,
}

/// Scripted executor for the check tests. Every command succeeds with empty output unless a rule
/// matches it, the most recently added matching rule wins.
pub(crate) struct FakeExecutor {
    rules: Vec<Rule>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeExecutor {
    pub(crate) fn new() -> Self {
        Self { rules: Vec::new(), calls: Mutex::new(Vec::new()) }
    }

    fn respond(mut self, host: Option<&str>, needle: &str, response: Result<CommandOutput, ConnectionError>) -> Self {
        self.rules.push(Rule { host: host.map(str::to_string), needle: needle.to_string(), response });
        self
    }

    pub(crate) fn stdout(self, host: Option<&str>, needle: &str, stdout: &str) -> Self {
        self.respond(host, needle, Ok(CommandOutput { status: 0, stdout: stdout.to_string(), stderr: String::new() }))
    }

    pub(crate) fn fail(self, host: Option<&str>, needle: &str, status: i32) -> Self {
        self.respond(host, needle, Ok(CommandOutput { status, stdout: String::new(), stderr: "failed".to_string() }))
    }

    pub(crate) fn unreachable(self, host: &str) -> Self {
        let response = Err(ConnectionError::Unreachable { host: host.to_string(), cause: "Connection refused".to_string() });
        self.respond(Some(host), "", response)
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|(_, command)| command.contains(needle)).count()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput, ConnectionError> {
        self.calls.lock().unwrap().push((host.to_string(), command.to_string()));
        let rule = self.rules.iter().rev().find(|rule| {
            rule.host.as_deref().map_or(true, |h| h == host) && command.contains(&rule.needle)
        });
        match rule {
            Some(rule) => rule.response.clone(),
            None => Ok(CommandOutput::default()),
        }
    }
}
