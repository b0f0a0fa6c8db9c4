use strum_macros::Display;
use asset_test_schemas::state::StateTestbedGuest;
use crate::topology::TopologyError;

/// The kinds of guest the testbed can deploy, every check picks its probe by matching on this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum GuestClass {
    #[strum(serialize = "libvirt")]
    VirtualMachine,
    #[strum(serialize = "docker")]
    Container,
}

/// Work out which kind of guest a state entry describes. Entries with no known definition are
/// rejected here so a guest of an unknown kind can never reach a probe.
pub fn classify(guest_id: &str, record: &StateTestbedGuest) -> Result<GuestClass, TopologyError> {
    match (&record.libvirt, &record.docker) {
        (Some(_), None) => Ok(GuestClass::VirtualMachine),
        (None, Some(_)) => Ok(GuestClass::Container),
        (None, None) => Err(TopologyError::UnknownGuestType { guest: guest_id.to_string() }),
        (Some(_), Some(_)) => Err(TopologyError::MalformedTopology(
            format!("guest {guest_id} has both a libvirt and a docker definition")
        )),
    }
}
