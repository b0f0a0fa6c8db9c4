use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use asset_test_schemas::state::{ProjectState, StateBridgeConnection, StateTestbedGuest, StateTunnelConnection};
use crate::dispatch::{classify, GuestClass};

// The typed model of what should exist on the testbed. It is built once from the project state
// and is read only for the rest of the run, every "is this key present" question about the state
// is answered here so the checks can match on closed enums.

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("could not read project state {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed project state: {0}")]
    MalformedTopology(String),
    #[error("guest {guest} has neither a libvirt nor a docker definition")]
    UnknownGuestType {
        guest: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestbedHost {
    /// name of the host in the state, used by everything else to refer to the host
    pub id: String,
    pub address: String,
    pub username: String,
    pub ssh_private_key_location: Option<String>,
    pub is_main_host: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guest {
    pub id: String,
    pub name: String,
    pub testbed_host: String,
    pub kind: GuestKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestKind {
    VirtualMachine(VirtualMachineGuest),
    Container(ContainerGuest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineGuest {
    /// libvirt domain name and the name resolved by the main testbed's DNS
    pub hostname: String,
    pub username: Option<String>,
    /// backing image for linked clones, it is kept switched off
    pub is_golden_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerGuest {
    /// container name, also the name other guests resolve it by
    pub hostname: String,
    pub static_ip: Option<String>,
    /// the definition that scaled replicas are created from, not a running container
    pub scaling: bool,
    pub mounts: Vec<Mount>,
    pub environment: BTreeMap<String, String>,
    pub env_file: Option<String>,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
}

impl Guest {
    /// Dormant guests are never probed: golden images are switched off and scaling templates
    /// are never started
    pub fn is_dormant(&self) -> bool {
        match &self.kind {
            GuestKind::VirtualMachine(vm) => vm.is_golden_image,
            GuestKind::Container(container) => container.scaling,
        }
    }

    pub fn class(&self) -> GuestClass {
        match &self.kind {
            GuestKind::VirtualMachine(_) => GuestClass::VirtualMachine,
            GuestKind::Container(_) => GuestClass::Container,
        }
    }

    /// The name used for this guest in report messages
    pub fn display_name(&self) -> &str {
        match &self.kind {
            GuestKind::VirtualMachine(vm) => &vm.hostname,
            GuestKind::Container(container) => &container.hostname,
        }
    }

    fn from_state(id: &str, record: StateTestbedGuest) -> Result<Self, TopologyError> {
        let testbed_host = record.testbed_host.clone()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| malformed(format!("guest {id} has not been assigned a testbed host")))?;
        let kind = match (classify(id, &record)?, record.libvirt, record.docker) {
            (GuestClass::VirtualMachine, Some(libvirt), _) => {
                if libvirt.hostname.is_empty() {
                    return Err(malformed(format!("libvirt guest {id} has no hostname")));
                }
                GuestKind::VirtualMachine(VirtualMachineGuest {
                    hostname: libvirt.hostname,
                    username: libvirt.username,
                    is_golden_image: record.is_golden_image,
                })
            }
            (GuestClass::Container, _, Some(docker)) => {
                if docker.hostname.is_empty() {
                    return Err(malformed(format!("docker guest {id} has no hostname")));
                }
                GuestKind::Container(ContainerGuest {
                    hostname: docker.hostname,
                    static_ip: docker.static_ip,
                    scaling: docker.scaling,
                    mounts: docker.volumes.unwrap_or_default()
                        .into_iter()
                        .map(|volume| Mount { source: volume.source, target: volume.target })
                        .collect(),
                    environment: docker.environment.unwrap_or_default(),
                    env_file: docker.env_file,
                    devices: docker.device.unwrap_or_default(),
                })
            }
            _ => return Err(TopologyError::UnknownGuestType { guest: id.to_string() }),
        };
        Ok(Self {
            id: id.to_string(),
            name: record.name,
            testbed_host,
            kind,
        })
    }
}

impl ContainerGuest {
    /// The main testbed has no name resolution for containers, so it reaches them by ip when
    /// one was given
    pub fn address(&self) -> &str {
        self.static_ip.as_deref().unwrap_or(&self.hostname)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSpec {
    pub name: String,
    pub testbed_host: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConnection {
    pub id: String,
    pub link: ConnectionLink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionLink {
    /// veth pair between two bridges on the same host
    Ovs(OvsConnection),
    /// tunnel between bridges on two different hosts
    Tunnel(TunnelConnection),
    /// the pair is declared but needs no physical connection
    Unconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OvsConnection {
    pub source_br: String,
    pub target_br: String,
    pub source_veth: String,
    pub target_veth: String,
    pub testbed_host: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConnection {
    pub source_br: String,
    pub target_br: String,
    pub key: String,
    pub source_remote_ip: String,
    pub target_remote_ip: String,
    pub testbed_host_source: String,
    pub testbed_host_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub project_name: String,
    pub hosts: Vec<TestbedHost>,
    pub guests: Vec<Guest>,
    /// key the main testbed uses to log into guests
    pub guest_ssh_private_key: String,
    pub bridges: Vec<BridgeSpec>,
    pub bridge_connections: Vec<BridgeConnection>,
    main_host: usize,
}

impl Topology {
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        tracing::trace!("reading project state at {:?}", path);
        let text = tokio::fs::read_to_string(path).await
            .map_err(|source| TopologyError::Io { path: path.display().to_string(), source })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, TopologyError> {
        let state = ProjectState::parse(text)
            .map_err(|err| malformed(err.to_string()))?;
        Self::from_state(state)
    }

    pub fn from_state(state: ProjectState) -> Result<Self, TopologyError> {
        let hosts: Vec<TestbedHost> = state.testbed_hosts.0
            .into_iter()
            .map(|(id, host)| TestbedHost {
                id,
                address: host.hostname,
                username: host.username,
                ssh_private_key_location: host.ssh_private_key_location,
                is_main_host: host.is_main_host,
            })
            .collect();

        let main_hosts: Vec<usize> = hosts.iter()
            .enumerate()
            .filter(|(_, host)| host.is_main_host)
            .map(|(index, _)| index)
            .collect();
        let main_host = match main_hosts.as_slice() {
            [index] => *index,
            [] => return Err(malformed("there is no testbed host with is_main_host set".to_string())),
            _ => return Err(malformed(format!("{} testbed hosts have is_main_host set, there must be exactly one", main_hosts.len()))),
        };
        let known_host = |host: &str, what: &str| -> Result<(), TopologyError> {
            if hosts.iter().any(|h| h.id == host) {
                Ok(())
            } else {
                Err(malformed(format!("{what} refers to unknown testbed host {host}")))
            }
        };

        let mut guests = Vec::with_capacity(state.testbed_guests.len());
        for (id, record) in state.testbed_guests.0 {
            let guest = Guest::from_state(&id, record)?;
            known_host(&guest.testbed_host, &format!("guest {id}"))?;
            guests.push(guest);
        }

        if state.testbed_guest_shared_config.ssh_private_key_location.is_empty() {
            return Err(malformed("testbed_guest_shared_config has no ssh_private_key_location".to_string()));
        }

        let mut bridges = Vec::with_capacity(state.network.bridges.len());
        for bridge in state.network.bridges {
            known_host(&bridge.testbed_host, &format!("bridge {}", bridge.name))?;
            bridges.push(BridgeSpec { name: bridge.name, testbed_host: bridge.testbed_host });
        }

        let mut bridge_connections = Vec::with_capacity(state.network.physical_bridge_connections.len());
        for (id, connection) in state.network.physical_bridge_connections.0 {
            let link = connection_link(&id, connection)?;
            match &link {
                ConnectionLink::Ovs(ovs) => known_host(&ovs.testbed_host, &format!("bridge connection {id}"))?,
                ConnectionLink::Tunnel(tunnel) => {
                    known_host(&tunnel.testbed_host_source, &format!("bridge connection {id}"))?;
                    known_host(&tunnel.testbed_host_target, &format!("bridge connection {id}"))?;
                }
                ConnectionLink::Unconnected => {}
            }
            bridge_connections.push(BridgeConnection { id, link });
        }

        Ok(Self {
            project_name: state.project_name,
            hosts,
            guests,
            guest_ssh_private_key: state.testbed_guest_shared_config.ssh_private_key_location,
            bridges,
            bridge_connections,
            main_host,
        })
    }

    pub fn main_host(&self) -> &TestbedHost {
        &self.hosts[self.main_host]
    }

    pub fn host(&self, id: &str) -> Option<&TestbedHost> {
        self.hosts.iter().find(|host| host.id == id)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_multi_host(&self) -> bool {
        self.hosts.len() > 1
    }
}

fn connection_link(id: &str, connection: StateBridgeConnection) -> Result<ConnectionLink, TopologyError> {
    match (connection.ovs, connection.tunnel) {
        (Some(ovs), None) => Ok(ConnectionLink::Ovs(OvsConnection {
            source_br: ovs.source_br,
            target_br: ovs.target_br,
            source_veth: ovs.source_veth,
            target_veth: ovs.target_veth,
            testbed_host: ovs.testbed_host,
        })),
        (None, Some(tunnel)) => Ok(ConnectionLink::Tunnel(tunnel_connection(id, tunnel)?)),
        (None, None) => Ok(ConnectionLink::Unconnected),
        (Some(_), Some(_)) => Err(malformed(format!("bridge connection {id} is both an ovs and a tunnel connection"))),
    }
}

fn tunnel_connection(id: &str, tunnel: StateTunnelConnection) -> Result<TunnelConnection, TopologyError> {
    let required = |value: Option<String>, field: &str| {
        value.filter(|v| !v.is_empty())
            .ok_or_else(|| malformed(format!("tunnel connection {id} is missing {field}")))
    };
    Ok(TunnelConnection {
        key: required(tunnel.key, "key")?,
        source_remote_ip: required(tunnel.source_remote_ip, "source_remote_ip")?,
        target_remote_ip: required(tunnel.target_remote_ip, "target_remote_ip")?,
        source_br: tunnel.source_br,
        target_br: tunnel.target_br,
        testbed_host_source: tunnel.testbed_host_source,
        testbed_host_target: tunnel.testbed_host_target,
    })
}

fn malformed(msg: String) -> TopologyError {
    TopologyError::MalformedTopology(msg)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two hosts, a libvirt guest and its golden image, a container and a scaling template, two
    /// bridges joined by a tunnel, an ovs veth pair and an unconnected pair
    pub(crate) const TWO_HOST_STATE: &str = r#"{
        "project_name": "project",
        "testbed_hosts": {
            "testbed-host-one": {"hostname": "10.0.1.10", "username": "nocloud", "is_main_host": true},
            "testbed-host-two": {"hostname": "10.0.1.12", "username": "nocloud", "is_main_host": false}
        },
        "testbed_guests": {
            "server": {
                "name": "server", "testbed_host": "testbed-host-one", "is_golden_image": false,
                "libvirt": {"hostname": "project-server"}
            },
            "base": {
                "name": "base", "testbed_host": "testbed-host-one", "is_golden_image": true,
                "libvirt": {"hostname": "project-base"}
            },
            "web": {
                "name": "web", "testbed_host": "testbed-host-two", "is_golden_image": false,
                "docker": {
                    "hostname": "project-web", "static_ip": "10.0.0.20", "scaling": null,
                    "volumes": [{"source": "./site", "target": "/var/www"}, {"source": "./conf", "target": "/etc/nginx"}]
                }
            },
            "worker": {
                "name": "worker", "testbed_host": "testbed-host-two", "is_golden_image": false,
                "docker": {"hostname": "project-worker", "scaling": {"count": 3, "interfaces": {}}}
            }
        },
        "testbed_guest_shared_config": {
            "ssh_public_key_location": "/var/lib/testbedos/keys/id_ed25519_testbed_insecure_key.pub",
            "ssh_private_key_location": "/var/lib/testbedos/keys/id_ed25519_testbed_insecure_key"
        },
        "network": {
            "bridges": [
                {"name": "br0", "testbed_host": "testbed-host-one"},
                {"name": "br1", "testbed_host": "testbed-host-two"},
                {"name": "br2", "testbed_host": "testbed-host-two"}
            ],
            "physical_bridge_connections": {
                "br0br1": {"tunnel": {
                    "source_br": "project-br0", "target_br": "project-br1", "key": "br0br1",
                    "source_remote_ip": "10.0.1.10", "target_remote_ip": "10.0.1.12",
                    "testbed_host_source": "testbed-host-one", "testbed_host_target": "testbed-host-two"
                }},
                "br1br2": {"ovs": {
                    "name": "br1br2", "source_br": "project-br1", "target_br": "project-br2",
                    "source_veth": "project-br1-br2", "target_veth": "project-br2-br1",
                    "testbed_host": "testbed-host-two"
                }},
                "br0br2": {}
            }
        }
    }"#;

    #[test]
    fn test_load_two_host_state() {
        let topology = Topology::from_json_str(TWO_HOST_STATE).unwrap();
        assert_eq!(topology.host_count(), 2);
        assert!(topology.is_multi_host());
        assert_eq!(topology.main_host().id, "testbed-host-one");
        assert_eq!(topology.host("testbed-host-two").unwrap().address, "10.0.1.12");

        let names: Vec<&str> = topology.guests.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(names, vec!["server", "base", "web", "worker"]);
        let dormant: Vec<bool> = topology.guests.iter().map(|g| g.is_dormant()).collect();
        assert_eq!(dormant, vec![false, true, false, true]);
        assert_eq!(topology.guests[0].class(), GuestClass::VirtualMachine);
        assert_eq!(topology.guests[2].class(), GuestClass::Container);

        match &topology.guests[2].kind {
            GuestKind::Container(web) => {
                assert_eq!(web.address(), "10.0.0.20");
                assert_eq!(web.mounts.len(), 2);
                assert_eq!(web.mounts[1].target, "/etc/nginx");
            }
            other => panic!("expected a container, got {other:?}"),
        }

        assert_eq!(topology.bridges.len(), 3);
        let links: Vec<&ConnectionLink> = topology.bridge_connections.iter().map(|c| &c.link).collect();
        assert!(matches!(links[0], ConnectionLink::Tunnel(t) if t.key == "br0br1" && t.source_remote_ip == "10.0.1.10"));
        assert!(matches!(links[1], ConnectionLink::Ovs(o) if o.source_veth == "project-br1-br2"));
        assert_eq!(links[2], &ConnectionLink::Unconnected);
    }

    #[test]
    fn test_guest_without_variant_is_unknown_type() {
        let state = TWO_HOST_STATE.replace(
            r#""libvirt": {"hostname": "project-server"}"#,
            r#""android": {"avd_type": "phone"}"#,
        );
        let err = Topology::from_json_str(&state).unwrap_err();
        assert!(matches!(err, TopologyError::UnknownGuestType { ref guest } if guest == "server"));
    }

    #[test]
    fn test_missing_main_host_is_malformed() {
        let state = TWO_HOST_STATE.replace(r#""is_main_host": true"#, r#""is_main_host": false"#);
        assert!(matches!(Topology::from_json_str(&state), Err(TopologyError::MalformedTopology(_))));

        let state = TWO_HOST_STATE.replace(r#""is_main_host": false"#, r#""is_main_host": true"#);
        assert!(matches!(Topology::from_json_str(&state), Err(TopologyError::MalformedTopology(_))));
    }

    #[test]
    fn test_unknown_connection_kind_is_malformed() {
        let state = TWO_HOST_STATE.replace(r#""br0br2": {}"#, r#""br0br2": {"vxlan": {}}"#);
        assert!(matches!(Topology::from_json_str(&state), Err(TopologyError::MalformedTopology(_))));
    }

    #[test]
    fn test_tunnel_without_key_is_malformed() {
        let state = TWO_HOST_STATE.replace(r#""key": "br0br1","#, "");
        let err = Topology::from_json_str(&state).unwrap_err();
        assert!(err.to_string().contains("missing key"));
    }

    #[test]
    fn test_guest_on_unknown_host_is_malformed() {
        let state = TWO_HOST_STATE.replace(
            r#""name": "server", "testbed_host": "testbed-host-one""#,
            r#""name": "server", "testbed_host": "testbed-host-nine""#,
        );
        let err = Topology::from_json_str(&state).unwrap_err();
        assert!(err.to_string().contains("testbed-host-nine"));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let folder = tempfile::tempdir().unwrap();
        let err = Topology::load_from_file(folder.path().join("project-state.json")).await.unwrap_err();
        assert!(matches!(err, TopologyError::Io { .. }));
    }
}
