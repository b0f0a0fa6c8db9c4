use futures_util::future::{join_all, BoxFuture};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use crate::commands::ProbeCommands;
use crate::executor::CommandExecutor;
use crate::probe::Prober;
use crate::results::{CheckResult, ResultAggregator};
use crate::topology::Topology;

pub mod communication;
pub mod guests;
pub mod network;

/// The check stages in the order they run, the display name is the label in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Stage {
    #[strum(serialize = "TEST 1")]
    GuestExistence,
    #[strum(serialize = "TEST 2")]
    LibvirtNetwork,
    #[strum(serialize = "TEST 3")]
    OvsBridges,
    #[strum(serialize = "TEST 4a")]
    LibvirtVeth,
    #[strum(serialize = "TEST 4b")]
    BridgeVeths,
    #[strum(serialize = "TEST 5")]
    Tunnels,
    #[strum(serialize = "TEST 6")]
    GuestReachability,
    #[strum(serialize = "TEST 7")]
    GuestArtefacts,
    #[strum(serialize = "TEST 8")]
    GuestCommunication,
    #[strum(serialize = "TEST 9")]
    ExternalCommunication,
}

impl Stage {
    pub fn description(&self) -> &'static str {
        match self {
            Stage::GuestExistence => "check that guests exist",
            Stage::LibvirtNetwork => "check that the libvirt network exists",
            Stage::OvsBridges => "check that the ovs bridges exist",
            Stage::LibvirtVeth => "check the veth between the libvirt network and the ovs network",
            Stage::BridgeVeths => "check the veths between ovs bridges",
            Stage::Tunnels => "check the tunnels between testbed hosts",
            Stage::GuestReachability => "check that guests are reachable from the main testbed",
            Stage::GuestArtefacts => "check that guests have their artefacts",
            Stage::GuestCommunication => "check that guests can reach each other",
            Stage::ExternalCommunication => "check that guests can reach the internet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sequential,
    /// probes on different testbed hosts run at the same time, probes on one host stay in order
    Concurrent,
}

/// Everything a stage needs to build and run its probes
pub struct CheckContext<'a> {
    pub topology: &'a Topology,
    pub commands: &'a ProbeCommands,
    pub prober: Prober<'a>,
    pub mode: ExecutionMode,
}

impl<'a> CheckContext<'a> {
    pub fn main_host(&self) -> &'a str {
        &self.topology.main_host().id
    }
}

/// One probe sequence producing one result. `order` is the position of the checked item in the
/// topology and `host` is the testbed host the probes run on.
pub(crate) struct CheckJob<'a> {
    pub(crate) order: usize,
    pub(crate) host: String,
    pub(crate) check: BoxFuture<'a, CheckResult>,
}

/// Run the jobs of a stage. In concurrent mode the jobs are grouped by host, groups run at the
/// same time and the results are put back into topology order afterwards.
pub(crate) async fn run_jobs(mode: ExecutionMode, jobs: Vec<CheckJob<'_>>) -> Vec<CheckResult> {
    match mode {
        ExecutionMode::Sequential => {
            let mut results = Vec::with_capacity(jobs.len());
            for job in jobs {
                results.push(job.check.await);
            }
            results
        }
        ExecutionMode::Concurrent => {
            let mut groups: Vec<(String, Vec<CheckJob>)> = Vec::new();
            for job in jobs {
                let existing = groups.iter().position(|(host, _)| host == &job.host);
                match existing {
                    Some(index) => groups[index].1.push(job),
                    None => groups.push((job.host.clone(), vec![job])),
                }
            }
            tracing::debug!("running checks on {} testbed hosts concurrently", groups.len());
            let per_host = groups.into_iter().map(|(_, group)| async move {
                let mut results = Vec::with_capacity(group.len());
                for job in group {
                    results.push((job.order, job.check.await));
                }
                results
            });
            let mut results: Vec<(usize, CheckResult)> = join_all(per_host).await
                .into_iter()
                .flatten()
                .collect();
            results.sort_by_key(|(order, _)| *order);
            results.into_iter().map(|(_, result)| result).collect()
        }
    }
}

/// Runs every stage in order and feeds the results to the aggregator. Checks never stop the
/// pipeline, a failing probe is recorded and the next check runs.
pub struct VerificationPipeline<'a> {
    ctx: CheckContext<'a>,
}

impl<'a> VerificationPipeline<'a> {
    pub fn new(
        topology: &'a Topology,
        commands: &'a ProbeCommands,
        executor: &'a dyn CommandExecutor,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            ctx: CheckContext { topology, commands, prober: Prober::new(executor), mode },
        }
    }

    pub async fn run(&self, aggregator: &mut ResultAggregator) {
        for stage in Stage::iter() {
            self.run_stage(stage, aggregator).await;
        }
    }

    pub async fn run_stage(&self, stage: Stage, aggregator: &mut ResultAggregator) {
        tracing::info!("{} - {}", stage, stage.description());
        let results = match stage {
            Stage::GuestExistence => guests::existence(&self.ctx).await,
            Stage::LibvirtNetwork => network::libvirt_network(&self.ctx).await,
            Stage::OvsBridges => network::ovs_bridges(&self.ctx).await,
            Stage::LibvirtVeth => network::libvirt_veth(&self.ctx).await,
            Stage::BridgeVeths => network::bridge_veths(&self.ctx).await,
            Stage::Tunnels => network::tunnels(&self.ctx).await,
            Stage::GuestReachability => guests::reachability(&self.ctx).await,
            Stage::GuestArtefacts => guests::artefacts(&self.ctx).await,
            Stage::GuestCommunication => communication::guest_communication(&self.ctx).await,
            Stage::ExternalCommunication => guests::external_communication(&self.ctx).await,
        };
        for result in results {
            aggregator.push(result);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use asset_test_schemas::settings::HarnessSettings;
    use futures_util::FutureExt;
    use crate::executor::fake::FakeExecutor;
    use crate::topology::tests::TWO_HOST_STATE;

    pub(crate) fn fixture(state: &str) -> (Topology, ProbeCommands) {
        let topology = Topology::from_json_str(state).unwrap();
        let commands = ProbeCommands::new(&topology, &HarnessSettings::default());
        (topology, commands)
    }

    pub(crate) async fn run_pipeline(state: &str, executor: &FakeExecutor, mode: ExecutionMode) -> Vec<String> {
        let (topology, commands) = fixture(state);
        let pipeline = VerificationPipeline::new(&topology, &commands, executor, mode);
        let mut aggregator = ResultAggregator::new();
        pipeline.run(&mut aggregator).await;
        aggregator.results().iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_stage_labels_in_order() {
        let labels: Vec<String> = Stage::iter().map(|s| s.to_string()).collect();
        assert_eq!(labels, vec![
            "TEST 1", "TEST 2", "TEST 3", "TEST 4a", "TEST 4b", "TEST 5", "TEST 6", "TEST 7", "TEST 8", "TEST 9",
        ]);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_keep_topology_order() {
        let job = |order: usize, host: &str, delay: u64| CheckJob {
            order,
            host: host.to_string(),
            check: async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                CheckResult::pass(Stage::GuestExistence, format!("{order}"))
            }.boxed(),
        };
        let jobs = vec![job(0, "one", 30), job(1, "two", 0), job(2, "one", 0), job(3, "two", 10)];
        let results = run_jobs(ExecutionMode::Concurrent, jobs).await;
        let order: Vec<&str> = results.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(order, vec!["0", "1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_all_good_two_hosts_passes() {
        let executor = FakeExecutor::new()
            .stdout(None, "wc -l", "1\n")
            .stdout(None, "ip link show master", "9: project-veth1@project-veth0: <BROADCAST>\n")
            .stdout(None, "list-ports project-br0", "project-veth0\n")
            .stdout(None, "list-ports project-br1", "project-br1-br2\n")
            .stdout(None, "list-ports project-br2", "project-br2-br1\n")
            .stdout(Some("testbed-host-one"), "ovs-vsctl show", r#"options: {key=br0br1, remote_ip="10.0.1.10"}"#)
            .stdout(Some("testbed-host-two"), "ovs-vsctl show", r#"options: {key=br0br1, remote_ip="10.0.1.12"}"#);
        let lines = run_pipeline(TWO_HOST_STATE, &executor, ExecutionMode::Sequential).await;
        assert!(lines.iter().all(|l| l.starts_with("SUCCESS: ")), "{lines:#?}");

        let labels: Vec<&str> = lines.iter()
            .map(|l| l.trim_start_matches("SUCCESS: ").split(" - ").next().unwrap())
            .collect();
        assert_eq!(labels, vec![
            // existence of server and web
            "TEST 1", "TEST 1",
            "TEST 2",
            "TEST 3", "TEST 3", "TEST 3",
            "TEST 4a",
            "TEST 4b",
            "TEST 5",
            "TEST 6", "TEST 6",
            "TEST 7", "TEST 7",
            "TEST 8", "TEST 8",
            "TEST 9", "TEST 9",
        ]);
        // the golden image and scaling template are never probed by any stage
        assert_eq!(executor.count("project-base"), 0);
        assert_eq!(executor.count("project-worker"), 0);
    }

    #[tokio::test]
    async fn test_single_vm_single_host() {
        let state = r#"{
            "testbed_hosts": {"host": {"hostname": "10.0.0.2", "username": "nocloud", "is_main_host": true}},
            "testbed_guests": {
                "alpha": {"name": "alpha", "testbed_host": "host", "libvirt": {"hostname": "project-alpha"}}
            },
            "testbed_guest_shared_config": {"ssh_private_key_location": "/keys/guest"},
            "network": {}
        }"#;
        let executor = FakeExecutor::new()
            .stdout(None, "ip link show master", "project-veth1@project-veth0\n")
            .stdout(None, "list-ports project-br0", "project-veth0\n");
        let lines = run_pipeline(state, &executor, ExecutionMode::Sequential).await;

        assert_eq!(lines[0], "SUCCESS: TEST 1 - Testbed guest project-alpha exists");
        for label in ["TEST 3 - ", "TEST 4b - ", "TEST 5 - "] {
            assert!(!lines.iter().any(|l| l.contains(label)), "{label} should have no results");
        }
        assert_eq!(executor.count("ovs-vsctl show"), 0);
        assert!(lines.iter().all(|l| l.starts_with("SUCCESS: ")), "{lines:#?}");
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_its_checks_only() {
        let executor = FakeExecutor::new()
            .stdout(None, "wc -l", "1\n")
            .stdout(None, "ip link show master", "project-veth1@project-veth0\n")
            .stdout(None, "list-ports project-br0", "project-veth0\n")
            .unreachable("testbed-host-two");
        let lines = run_pipeline(TWO_HOST_STATE, &executor, ExecutionMode::Sequential).await;

        assert!(lines.contains(&"SUCCESS: TEST 1 - Testbed guest project-server exists".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("FAILURE: TEST 1 - Testbed guest project-web did not exist")));
        assert!(lines.iter().any(|l| l.starts_with("FAILURE: TEST 3 - Testbed ovs bridge project-br1 did not exist in host testbed-host-two")));
        assert!(lines.contains(&"SUCCESS: TEST 3 - Testbed ovs bridge project-br0 exists in host testbed-host-one".to_string()));
        // every stage still ran
        assert!(lines.iter().any(|l| l.contains("TEST 9 - ")));
    }

    #[tokio::test]
    async fn test_concurrent_mode_matches_sequential_mode() {
        let executor = || FakeExecutor::new()
            .stdout(None, "wc -l", "1\n")
            .fail(Some("testbed-host-two"), "br-exists project-br2", 2)
            .fail(None, "curl 10.0.0.20", 7)
            .stdout(None, "ip link show master", "project-veth1@project-veth0\n");
        let sequential = run_pipeline(TWO_HOST_STATE, &executor(), ExecutionMode::Sequential).await;
        let concurrent = run_pipeline(TWO_HOST_STATE, &executor(), ExecutionMode::Concurrent).await;
        assert_eq!(sequential, concurrent);
        assert!(sequential.iter().any(|l| l.starts_with("FAILURE: TEST 3 - Testbed ovs bridge project-br2")));
    }
}
