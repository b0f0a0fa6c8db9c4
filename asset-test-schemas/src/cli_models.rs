use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(version = "1.0", author = "Bristol Cyber Security Group (BCSG)")]
#[command(about = "Check that a deployed test case matches its project state")]
pub struct Opts {
    #[arg(help = "Name of the test case, also the name of its folder in the artefacts folder")]
    pub test_case_name: String,
    #[arg(long, help = "Harness settings YAML, defaults are used if not given")]
    pub settings: Option<PathBuf>,
    #[arg(long, help = "Project state to test against, defaults to the one in the test case folder")]
    pub state: Option<PathBuf>,
    #[arg(long, action, help = "Pull the project state from the main testbed before testing")]
    pub fetch_state: bool,
    #[arg(long, action, help = "Run probes for different testbed hosts at the same time")]
    pub concurrent: bool,
    #[arg(short, long)]
    pub verbosity: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opts() {
        let opts = Opts::try_parse_from(["asset-test", "two-hosts", "--fetch-state", "-v", "debug"]).unwrap();
        assert_eq!(opts.test_case_name, "two-hosts");
        assert!(opts.fetch_state);
        assert!(!opts.concurrent);
        assert_eq!(opts.verbosity.as_deref(), Some("debug"));
        assert!(opts.state.is_none());

        assert!(Opts::try_parse_from(["asset-test"]).is_err());
    }
}
