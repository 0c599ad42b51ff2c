//! Overlay network data plane: bridge and datapath provisioning,
//! host firewall wiring, and link identity.

pub mod bridge;
pub mod datapath;
pub mod error;
pub mod firewall;
pub mod host;
pub mod mac;
pub mod netlink;
pub mod peer_name;
pub mod veth;

pub use bridge::{BridgeConfig, BridgeProvisioner, BridgeType};
pub use error::{NetworkError, NetworkResult};
pub use mac::{persistent_mac, random_mac, HwAddr};
pub use peer_name::get_system_peer_name;
