use futures_util::FutureExt;
use crate::checks::{run_jobs, CheckContext, CheckJob, ExecutionMode, Stage};
use crate::commands::ProbeCommands;
use crate::probe::{CheckFailure, ProbeResultExt};
use crate::results::CheckResult;
use crate::topology::ConnectionLink;

pub(crate) async fn libvirt_network(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let main_host = ctx.main_host();
    let outcome = async {
        ctx.prober.expect_success(main_host, &ctx.commands.network_info()).await
            .or_fail(format!("Testbed libvirt network {} did not exist", ctx.commands.libvirt_network_name()))?;
        ctx.prober.expect_success(main_host, &ctx.commands.network_bridge_device()).await
            .or_fail(format!("Testbed libvirt network bridge {} did not exist", ctx.commands.libvirt_bridge_name()))?;
        Ok::<(), CheckFailure>(())
    }.await;
    vec![CheckResult::from_outcome(
        Stage::LibvirtNetwork,
        outcome,
        format!("Testbed libvirt network {} exists", ctx.commands.libvirt_network_name()),
    )]
}

pub(crate) async fn ovs_bridges(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let mut jobs = Vec::new();
    for (order, bridge) in ctx.topology.bridges.iter().enumerate() {
        let check = async move {
            let name = ctx.commands.prefixed(&bridge.name);
            let host = &bridge.testbed_host;
            let outcome = ctx.prober.expect_success(host, &ProbeCommands::bridge_exists(&name)).await;
            CheckResult::from_outcome(
                Stage::OvsBridges,
                outcome.map(|_| ()).or_fail(format!("Testbed ovs bridge {name} did not exist in host {host}")),
                format!("Testbed ovs bridge {name} exists in host {host}"),
            )
        }.boxed();
        jobs.push(CheckJob { order, host: bridge.testbed_host.clone(), check });
    }
    run_jobs(ctx.mode, jobs).await
}

/// The libvirt network is joined to the ovs network by a veth pair on the main testbed
pub(crate) async fn libvirt_veth(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let main_host = ctx.main_host();
    let libvirt_bridge = ctx.commands.libvirt_bridge_name();
    let external_bridge = ctx.commands.external_bridge_name();
    let outcome = async {
        ctx.prober.expect_contains(
            main_host,
            &ProbeCommands::bridge_members(&libvirt_bridge),
            &ctx.commands.libvirt_veth_signature(),
        ).await
            .or_fail(format!("Testbed veth was not connected to libvirt network bridge {libvirt_bridge}"))?;
        ctx.prober.expect_contains(
            main_host,
            &ProbeCommands::bridge_ports(&external_bridge),
            &ctx.commands.external_veth_name(),
        ).await
            .or_fail(format!("Testbed veth was not connected to ovs bridge {external_bridge}"))?;
        Ok::<(), CheckFailure>(())
    }.await;
    vec![CheckResult::from_outcome(
        Stage::LibvirtVeth,
        outcome,
        format!("Testbed veth connects libvirt network bridge {libvirt_bridge} and ovs bridge {external_bridge}"),
    )]
}

pub(crate) async fn bridge_veths(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    let mut jobs = Vec::new();
    for (order, connection) in ctx.topology.bridge_connections.iter().enumerate() {
        let ConnectionLink::Ovs(ovs) = &connection.link else { continue };
        let check = async move {
            let host = ovs.testbed_host.as_str();
            let outcome = async {
                ctx.prober.expect_contains(host, &ProbeCommands::bridge_ports(&ovs.source_br), &ovs.source_veth).await
                    .or_fail(format!("Testbed veth '{}' was not connected to ovs bridge '{}'", ovs.source_veth, ovs.source_br))?;
                ctx.prober.expect_contains(host, &ProbeCommands::bridge_ports(&ovs.target_br), &ovs.target_veth).await
                    .or_fail(format!("Testbed veth '{}' was not connected to ovs bridge '{}'", ovs.target_veth, ovs.target_br))?;
                Ok::<(), CheckFailure>(())
            }.await;
            CheckResult::from_outcome(
                Stage::BridgeVeths,
                outcome,
                format!("Testbed veths connect ovs bridges {} and {}", ovs.source_br, ovs.target_br),
            )
        }.boxed();
        jobs.push(CheckJob { order, host: ovs.testbed_host.clone(), check });
    }
    run_jobs(ctx.mode, jobs).await
}

/// Each end of a tunnel is checked on its own host against the key and the remote ip recorded
/// for that end
pub(crate) async fn tunnels(ctx: &CheckContext<'_>) -> Vec<CheckResult> {
    if !ctx.topology.is_multi_host() {
        tracing::info!("only one testbed host, there are no tunnels to check");
        return Vec::new();
    }
    let mut jobs = Vec::new();
    for (order, connection) in ctx.topology.bridge_connections.iter().enumerate() {
        let ConnectionLink::Tunnel(tunnel) = &connection.link else { continue };
        let check = async move {
            let outcome = async {
                let source_signature = ProbeCommands::tunnel_signature(&tunnel.key, &tunnel.source_remote_ip);
                ctx.prober.expect_contains(&tunnel.testbed_host_source, &ProbeCommands::switch_dump(), &source_signature).await
                    .or_fail(format!(
                        "the tunnel was not created for bridge '{}' on host '{}'",
                        tunnel.source_br, tunnel.testbed_host_source,
                    ))?;
                let target_signature = ProbeCommands::tunnel_signature(&tunnel.key, &tunnel.target_remote_ip);
                ctx.prober.expect_contains(&tunnel.testbed_host_target, &ProbeCommands::switch_dump(), &target_signature).await
                    .or_fail(format!(
                        "the tunnel was not created for bridge '{}' on host '{}'",
                        tunnel.target_br, tunnel.testbed_host_target,
                    ))?;
                Ok::<(), CheckFailure>(())
            }.await;
            CheckResult::from_outcome(
                Stage::Tunnels,
                outcome,
                format!("Testbed tunnel pair exists for {} and {}", tunnel.source_br, tunnel.target_br),
            )
        }.boxed();
        jobs.push(CheckJob { order, host: tunnel.testbed_host_source.clone(), check });
    }
    // a tunnel check spans two hosts, so tunnels are always checked one at a time
    run_jobs(ExecutionMode::Sequential, jobs).await
}
