use futures_util::FutureExt;
use crate::checks::{run_jobs, CheckContext, CheckJob, Stage};
use crate::commands::ProbeCommands;
use crate::probe::{CheckFailure, ProbeResultExt};
use crate::results::CheckResult;
use crate::topology::{ContainerGuest, Guest, GuestKind, VirtualMachineGuest};

/// Every running guest tries to reach every other running guest. Each origin produces one
/// result, which fails on the first target it cannot reach.
pub(crate) async fn guest_communication(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let main_host = ctx.main_host();
    let mut jobs = Vec::new();
    for (order, origin) in ctx.topology.guests.iter().enumerate() {
        if origin.is_dormant() {
            continue;
        }
        let name = origin.display_name();
        let (host, check) = match &origin.kind {
            GuestKind::VirtualMachine(vm) => (main_host, async move {
                let outcome = from_virtual_machine(ctx, main_host, origin, vm).await;
                CheckResult::from_outcome(
                    Stage::GuestCommunication,
                    outcome,
                    format!("All communication attempts from {name} to other guests worked"),
                )
            }.boxed()),
            GuestKind::Container(container) => (origin.testbed_host.as_str(), async move {
                let outcome = from_container(ctx, origin, container).await;
                CheckResult::from_outcome(
                    Stage::GuestCommunication,
                    outcome,
                    format!("All communication attempts from {name} to other guests worked"),
                )
            }.boxed()),
        };
        jobs.push(CheckJob { order, host: host.to_string(), check });
    }
    run_jobs(ctx.mode, jobs).await
}

/// Running guests other than the origin
fn targets<'a>(ctx: &CheckContext<'a>, origin: &'a Guest) -> impl Iterator<Item = &'a Guest> {
    ctx.topology.guests.iter()
        .filter(move |target| target.id != origin.id && !target.is_dormant())
}

/// Libvirt guests are driven from the main testbed, hopping through the guest with the inter
/// guest key, so the key is pushed to the guest first
async fn from_virtual_machine(
    ctx: &CheckContext<'_>,
    main_host: &str,
    origin: &Guest,
    vm: &VirtualMachineGuest,
) -> Result<(), CheckFailure> {
    let name = origin.display_name();
    ctx.prober.expect_success(main_host, &ctx.commands.stage_inter_guest_key(vm)).await
        .or_fail(format!("Could not push the inter guest ssh key to {name}"))?;

    for target in targets(ctx, origin) {
        match &target.kind {
            GuestKind::VirtualMachine(target_vm) => {
                ctx.prober.expect_success(main_host, &ctx.commands.guest_to_guest_login(vm, target_vm)).await
                    .or_fail(format!("Could not ssh from {name} to {}", target_vm.hostname))?;
            }
            GuestKind::Container(target_container) => {
                ctx.prober.expect_success(main_host, &ctx.commands.guest_to_address_http(vm, &target_container.hostname)).await
                    .or_fail(format!("Could not curl from {name} to {}", target_container.hostname))?;
            }
        }
    }
    Ok(())
}

/// Containers are driven with docker exec on their own testbed host
async fn from_container(
    ctx: &CheckContext<'_>,
    origin: &Guest,
    container: &ContainerGuest,
) -> Result<(), CheckFailure> {
    let host = origin.testbed_host.as_str();
    for target in targets(ctx, origin) {
        let address = match &target.kind {
            GuestKind::VirtualMachine(target_vm) => ctx.commands.guest_http_address(target_vm),
            GuestKind::Container(target_container) => target_container.hostname.clone(),
        };
        ctx.prober.expect_success(host, &ProbeCommands::container_http(&container.hostname, &address)).await
            .or_fail(format!("Could not curl from {} to {address}", container.hostname))?;
    }
    Ok(())
}
