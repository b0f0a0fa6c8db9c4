use asset_test_schemas::settings::HarnessSettings;
use crate::topology::{Topology, VirtualMachineGuest};

/// Builds the shell commands the checks run on the testbed hosts. Names of everything the
/// testbed creates are prefixed with the project name.
#[derive(Debug, Clone)]
pub struct ProbeCommands {
    project_name: String,
    connect_timeout_secs: u64,
    guest_key: String,
    guest_username: String,
    inter_guest_key: String,
    guest_ssh_folder: String,
    guest_context_file: String,
    guest_setup_script_folder: String,
    guest_http_port: u16,
    external_endpoint: String,
}

impl ProbeCommands {
    pub fn new(topology: &Topology, settings: &HarnessSettings) -> Self {
        Self {
            project_name: topology.project_name.clone(),
            connect_timeout_secs: settings.connect_timeout_secs,
            guest_key: topology.guest_ssh_private_key.clone(),
            guest_username: settings.guest_username.clone(),
            inter_guest_key: settings.inter_guest_key.clone(),
            guest_ssh_folder: settings.guest_ssh_folder.clone(),
            guest_context_file: settings.guest_context_file.clone(),
            guest_setup_script_folder: settings.guest_setup_script_folder.trim_end_matches('/').to_string(),
            guest_http_port: settings.guest_http_port,
            external_endpoint: settings.external_endpoint.clone(),
        }
    }

    pub fn prefixed(&self, name: &str) -> String {
        format!("{}-{}", self.project_name, name)
    }

    pub fn libvirt_network_name(&self) -> String {
        self.prefixed("network")
    }

    pub fn libvirt_bridge_name(&self) -> String {
        self.prefixed("prjbr0")
    }

    /// ovs bridge on the main testbed that the libvirt network is patched into
    pub fn external_bridge_name(&self) -> String {
        self.prefixed("br0")
    }

    /// `ip link` prints the libvirt end of the veth pair as `name@peer`
    pub fn libvirt_veth_signature(&self) -> String {
        format!("{}@", self.prefixed("veth1"))
    }

    pub fn external_veth_name(&self) -> String {
        self.prefixed("veth0")
    }

    pub fn login_user<'a>(&'a self, vm: &'a VirtualMachineGuest) -> &'a str {
        vm.username.as_deref().unwrap_or(&self.guest_username)
    }

    pub fn domain_state(hostname: &str) -> String {
        format!("sudo virsh domstate {hostname}")
    }

    /// Prints the number of running containers matching the name
    pub fn container_running(container: &str) -> String {
        format!("sudo docker ps | grep {container} | wc -l")
    }

    pub fn network_info(&self) -> String {
        format!("sudo virsh net-info --network {}", self.libvirt_network_name())
    }

    pub fn network_bridge_device(&self) -> String {
        format!("ip addr show {}", self.libvirt_bridge_name())
    }

    pub fn bridge_exists(bridge: &str) -> String {
        format!("sudo ovs-vsctl br-exists {bridge}")
    }

    pub fn bridge_members(bridge: &str) -> String {
        format!("ip link show master {bridge}")
    }

    pub fn bridge_ports(bridge: &str) -> String {
        format!("sudo ovs-vsctl list-ports {bridge}")
    }

    pub fn switch_dump() -> String {
        "sudo ovs-vsctl show".to_string()
    }

    /// How `ovs-vsctl show` prints the options of a tunnel interface
    pub fn tunnel_signature(key: &str, remote_ip: &str) -> String {
        format!("options: {{key={key}, remote_ip=\"{remote_ip}\"}}")
    }

    fn ssh_options(&self, key: &str) -> String {
        format!(
            "ssh -i {key} -o 'StrictHostKeyChecking no' -o 'UserKnownHostsFile /dev/null' -o ConnectTimeout={}",
            self.connect_timeout_secs
        )
    }

    fn guest_ssh(&self, key: &str, vm: &VirtualMachineGuest) -> String {
        format!("{} {}@{}", self.ssh_options(key), self.login_user(vm), vm.hostname)
    }

    pub fn guest_login(&self, vm: &VirtualMachineGuest) -> String {
        format!("{} true", self.guest_ssh(&self.guest_key, vm))
    }

    pub fn http_probe(address: &str) -> String {
        format!("curl {address}")
    }

    pub fn context_file_probe(&self, vm: &VirtualMachineGuest) -> String {
        format!("{} ls {}", self.guest_ssh(&self.guest_key, vm), self.guest_context_file)
    }

    pub fn setup_script_probe(&self, vm: &VirtualMachineGuest, guest_name: &str) -> String {
        format!(
            "{} ls {}/{guest_name}-setup.sh",
            self.guest_ssh(&self.guest_key, vm),
            self.guest_setup_script_folder,
        )
    }

    pub fn container_path_probe(container: &str, target: &str) -> String {
        format!("sudo docker exec -i {container} ls {target}")
    }

    /// Copy the inter guest key into the guest so it can log into the other guests
    pub fn stage_inter_guest_key(&self, vm: &VirtualMachineGuest) -> String {
        format!(
            "rsync -av -e \"{}\" {} {}@{}:{}",
            self.ssh_options(&self.inter_guest_key),
            self.inter_guest_key,
            self.login_user(vm),
            vm.hostname,
            self.guest_ssh_folder,
        )
    }

    pub fn guest_to_guest_login(&self, from: &VirtualMachineGuest, to: &VirtualMachineGuest) -> String {
        format!(
            "{} \"{} hostname\"",
            self.guest_ssh(&self.inter_guest_key, from),
            self.guest_ssh(&self.inter_guest_key, to),
        )
    }

    pub fn guest_to_address_http(&self, from: &VirtualMachineGuest, address: &str) -> String {
        format!("{} \"curl {address}\"", self.guest_ssh(&self.inter_guest_key, from))
    }

    pub fn container_http(container: &str, address: &str) -> String {
        format!("sudo docker exec -i {container} curl {address}")
    }

    /// libvirt guests serve http on a fixed port once their setup script has run
    pub fn guest_http_address(&self, vm: &VirtualMachineGuest) -> String {
        format!("{}:{}", vm.hostname, self.guest_http_port)
    }

    pub fn guest_external_fetch(&self, vm: &VirtualMachineGuest) -> String {
        format!("{} wget {}", self.guest_ssh(&self.inter_guest_key, vm), self.external_endpoint)
    }

    pub fn container_external_fetch(&self, container: &str) -> String {
        format!("sudo docker exec -t {container} curl {}", self.external_endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::TWO_HOST_STATE;

    fn commands() -> ProbeCommands {
        let topology = Topology::from_json_str(TWO_HOST_STATE).unwrap();
        ProbeCommands::new(&topology, &HarnessSettings::default())
    }

    fn vm(hostname: &str) -> VirtualMachineGuest {
        VirtualMachineGuest { hostname: hostname.to_string(), username: None, is_golden_image: false }
    }

    #[test]
    fn test_project_prefixed_names() {
        let commands = commands();
        assert_eq!(commands.network_info(), "sudo virsh net-info --network project-network");
        assert_eq!(commands.network_bridge_device(), "ip addr show project-prjbr0");
        assert_eq!(commands.libvirt_veth_signature(), "project-veth1@");
        assert_eq!(commands.external_veth_name(), "project-veth0");
        assert_eq!(ProbeCommands::bridge_exists(&commands.prefixed("br1")), "sudo ovs-vsctl br-exists project-br1");
    }

    #[test]
    fn test_tunnel_signature() {
        assert_eq!(
            ProbeCommands::tunnel_signature("br0br1", "10.0.1.12"),
            r#"options: {key=br0br1, remote_ip="10.0.1.12"}"#,
        );
    }

    #[test]
    fn test_guest_commands() {
        let commands = commands();
        let server = vm("project-server");
        let mut client = vm("project-client");
        client.username = Some("ubuntu".to_string());

        assert_eq!(
            commands.guest_login(&server),
            "ssh -i /var/lib/testbedos/keys/id_ed25519_testbed_insecure_key -o 'StrictHostKeyChecking no' \
             -o 'UserKnownHostsFile /dev/null' -o ConnectTimeout=10 nocloud@project-server true",
        );
        assert_eq!(
            commands.guest_to_guest_login(&server, &client),
            "ssh -i /home/nocloud/.ssh/id_ed25519_kvm -o 'StrictHostKeyChecking no' \
             -o 'UserKnownHostsFile /dev/null' -o ConnectTimeout=10 nocloud@project-server \
             \"ssh -i /home/nocloud/.ssh/id_ed25519_kvm -o 'StrictHostKeyChecking no' \
             -o 'UserKnownHostsFile /dev/null' -o ConnectTimeout=10 ubuntu@project-client hostname\"",
        );
        assert!(commands.stage_inter_guest_key(&server).starts_with("rsync -av -e \"ssh -i /home/nocloud/.ssh/id_ed25519_kvm"));
        assert!(commands.stage_inter_guest_key(&server).ends_with(" /home/nocloud/.ssh/id_ed25519_kvm nocloud@project-server:/home/nocloud/.ssh/"));
        assert!(commands.setup_script_probe(&server, "server").ends_with("ls /tmp/server-setup.sh"));
        assert_eq!(commands.guest_http_address(&server), "project-server:8000");
        assert!(commands.guest_external_fetch(&server).ends_with("nocloud@project-server wget google.com"));
        assert_eq!(commands.container_external_fetch("project-web"), "sudo docker exec -t project-web curl google.com");
    }
}
