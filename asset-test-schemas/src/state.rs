use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use crate::DEFAULT_PROJECT_NAME;

// the data structures in this file mirror the project state json written by the testbed when a
// deployment is created, only the parts that the asset test reads are declared here and anything
// else in the document is ignored. The state is loosely typed, i.e. a guest is a map that may
// contain a "libvirt" or a "docker" section, the asset test library converts this into a closed
// typed model before any checks run

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ProjectState {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    pub testbed_hosts: OrderedMap<StateTestbedHost>,
    pub testbed_guests: OrderedMap<StateTestbedGuest>,
    pub testbed_guest_shared_config: StateTestbedGuestSharedConfig,
    pub network: StateNetwork,
}

impl ProjectState {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

fn default_project_name() -> String {
    DEFAULT_PROJECT_NAME.to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct StateTestbedHost {
    /// address used to reach the host, older states called this `ip`
    #[serde(alias = "ip")]
    pub hostname: String,
    pub username: String,
    #[serde(default)]
    pub ssh_private_key_location: Option<String>,
    #[serde(alias = "is_master_host")]
    pub is_main_host: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct StateTestbedGuest {
    pub name: String,
    /// filled in during load balancing, a guest without a host cannot be checked
    pub testbed_host: Option<String>,
    #[serde(default)]
    pub is_golden_image: bool,
    #[serde(default)]
    pub libvirt: Option<StateLibvirtGuest>,
    #[serde(default)]
    pub docker: Option<StateDockerGuest>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct StateLibvirtGuest {
    pub hostname: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct StateDockerGuest {
    pub hostname: String,
    #[serde(default)]
    pub static_ip: Option<String>,
    /// the state stores the scaling definition itself, we only need to know if there is one
    #[serde(default, deserialize_with = "scaling_flag")]
    pub scaling: bool,
    #[serde(default)]
    pub volumes: Option<Vec<Volume>>,
    #[serde(default)]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub device: Option<Vec<String>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Volume {
    pub source: String,
    pub target: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct StateTestbedGuestSharedConfig {
    #[serde(default)]
    pub ssh_public_key_location: Option<String>,
    pub ssh_private_key_location: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct StateNetwork {
    #[serde(default)]
    pub bridges: Vec<StateBridge>,
    #[serde(default)]
    pub physical_bridge_connections: OrderedMap<StateBridgeConnection>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct StateBridge {
    pub name: String,
    pub testbed_host: String,
}

/// A bridge pair entry, at most one of the kinds is populated. An entry with neither is a pair
/// that needs no physical connection.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct StateBridgeConnection {
    #[serde(default)]
    pub ovs: Option<StateOvsConnection>,
    #[serde(default)]
    pub tunnel: Option<StateTunnelConnection>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct StateOvsConnection {
    #[serde(default)]
    pub name: Option<String>,
    pub source_br: String,
    pub target_br: String,
    pub source_veth: String,
    pub target_veth: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub testbed_host: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct StateTunnelConnection {
    pub source_br: String,
    pub target_br: String,
    #[serde(default)]
    pub source_remote_ip: Option<String>,
    #[serde(default)]
    pub target_remote_ip: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub source_br_ip: Option<String>,
    #[serde(default)]
    pub target_br_ip: Option<String>,
    pub testbed_host_source: String,
    pub testbed_host_target: String,
}

/// A json object kept in the order it was written. The checks iterate hosts, guests and bridge
/// connections in declaration order so the report lines come out in the same order every run.
#[derive(Debug, Clone)]
pub struct OrderedMap<T>(pub Vec<(String, T)>);

impl<T> OrderedMap<T> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, T)> {
        self.0.iter()
    }
}

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of names to entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, T)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    if entries.iter().any(|(existing, _)| existing == &key) {
                        return Err(serde::de::Error::custom(format!("duplicate entry `{key}`")));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

impl<T: Serialize> Serialize for OrderedMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

fn scaling_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => false,
        Some(_) => true,
    })
}
