use futures_util::FutureExt;
use crate::checks::{run_jobs, CheckContext, CheckJob, Stage};
use crate::commands::ProbeCommands;
use crate::probe::{CheckFailure, ProbeResultExt};
use crate::results::CheckResult;
use crate::topology::{ContainerGuest, Guest, GuestKind};

/// Guests that are expected to be running, with their position in the topology
fn active_guests<'a>(ctx: &CheckContext<'a>) -> impl Iterator<Item = (usize, &'a Guest)> {
    ctx.topology.guests.iter()
        .enumerate()
        .filter(|(_, guest)| {
            if guest.is_dormant() {
                tracing::warn!(
                    "skipping {} guest {} as it is a golden image or scaling template",
                    guest.class(),
                    guest.display_name(),
                );
                false
            } else {
                true
            }
        })
}

pub(crate) async fn existence(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let mut jobs = Vec::new();
    for (order, guest) in active_guests(ctx) {
        let check = async move {
            let name = guest.display_name();
            tracing::debug!("checking {} guest {name} exists on {}", guest.class(), guest.testbed_host);
            let outcome = match &guest.kind {
                GuestKind::VirtualMachine(vm) => ctx.prober
                    .expect_success(&guest.testbed_host, &ProbeCommands::domain_state(&vm.hostname)).await
                    .map(|_| ()),
                GuestKind::Container(container) => ctx.prober
                    .expect_nonzero_count(&guest.testbed_host, &ProbeCommands::container_running(&container.hostname)).await,
            };
            CheckResult::from_outcome(
                Stage::GuestExistence,
                outcome.or_fail(format!("Testbed guest {name} did not exist")),
                format!("Testbed guest {name} exists"),
            )
        }.boxed();
        jobs.push(CheckJob { order, host: guest.testbed_host.clone(), check });
    }
    run_jobs(ctx.mode, jobs).await
}

pub(crate) async fn reachability(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let main_host = ctx.main_host();
    let mut jobs = Vec::new();
    for (order, guest) in active_guests(ctx) {
        let check = async move {
            let name = guest.display_name();
            match &guest.kind {
                GuestKind::VirtualMachine(vm) => {
                    let outcome = ctx.prober.expect_success(main_host, &ctx.commands.guest_login(vm)).await;
                    CheckResult::from_outcome(
                        Stage::GuestReachability,
                        outcome.map(|_| ()).or_fail(format!("Testbed guest {name} not accessible via SSH")),
                        format!("Testbed guest {name} accessible via SSH"),
                    )
                }
                GuestKind::Container(container) => {
                    let outcome = ctx.prober.expect_success(main_host, &ProbeCommands::http_probe(container.address())).await;
                    CheckResult::from_outcome(
                        Stage::GuestReachability,
                        outcome.map(|_| ()).or_fail(format!("Testbed guest {name} not accessible via curl")),
                        format!("Testbed guest {name} accessible via curl"),
                    )
                }
            }
        }.boxed();
        jobs.push(CheckJob { order, host: main_host.to_string(), check });
    }
    run_jobs(ctx.mode, jobs).await
}

pub(crate) async fn artefacts(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let main_host = ctx.main_host();
    let mut jobs = Vec::new();
    for (order, guest) in active_guests(ctx) {
        let name = guest.display_name();
        match &guest.kind {
            GuestKind::VirtualMachine(vm) => {
                let check = async move {
                    let outcome = async {
                        ctx.prober.expect_success(main_host, &ctx.commands.context_file_probe(vm)).await
                            .or_fail(format!("Testbed guest {name} did not have context pushed"))?;
                        ctx.prober.expect_success(main_host, &ctx.commands.setup_script_probe(vm, &guest.name)).await
                            .or_fail(format!("Testbed guest {name} did not have setup script pushed"))?;
                        Ok::<(), CheckFailure>(())
                    }.await;
                    CheckResult::from_outcome(
                        Stage::GuestArtefacts,
                        outcome,
                        format!("Testbed guest {name} has context and setup script pushed"),
                    )
                }.boxed();
                jobs.push(CheckJob { order, host: main_host.to_string(), check });
            }
            GuestKind::Container(container) => {
                let host = guest.testbed_host.as_str();
                let check = async move {
                    let outcome = async {
                        for mount in &container.mounts {
                            let probe = ProbeCommands::container_path_probe(&container.hostname, &mount.target);
                            ctx.prober.expect_success(host, &probe).await
                                .or_fail(format!("Testbed guest {name} did not have volume {} mounted at {}", mount.source, mount.target))?;
                        }
                        unchecked_container_settings(container);
                        Ok::<(), CheckFailure>(())
                    }.await;
                    CheckResult::from_outcome(
                        Stage::GuestArtefacts,
                        outcome,
                        format!("Testbed guest {name} has its volumes mounted"),
                    )
                }.boxed();
                jobs.push(CheckJob { order, host: host.to_string(), check });
            }
        }
    }
    run_jobs(ctx.mode, jobs).await
}

/// Container settings that are not verified on the testbed yet
fn unchecked_container_settings(container: &ContainerGuest) {
    if !container.environment.is_empty() || container.env_file.is_some() {
        tracing::warn!("environment of {} is not checked", container.hostname);
    }
    if !container.devices.is_empty() {
        tracing::warn!("devices of {} are not checked", container.hostname);
    }
}

pub(crate) async fn external_communication(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let main_host = ctx.main_host();
    let mut jobs = Vec::new();
    for (order, guest) in active_guests(ctx) {
        let (host, probe) = match &guest.kind {
            GuestKind::VirtualMachine(vm) => (main_host, ctx.commands.guest_external_fetch(vm)),
            GuestKind::Container(container) => (
                guest.testbed_host.as_str(),
                ctx.commands.container_external_fetch(&container.hostname),
            ),
        };
        let check = async move {
            let name = guest.display_name();
            let outcome = ctx.prober.expect_success(host, &probe).await;
            CheckResult::from_outcome(
                Stage::ExternalCommunication,
                outcome.map(|_| ()).or_fail(format!("Testbed guest {name} could not connect to the external web")),
                format!("Testbed guest {name} connected to the external web"),
            )
        }.boxed();
        jobs.push(CheckJob { order, host: host.to_string(), check });
    }
    run_jobs(ctx.mode, jobs).await
}
