//! Provisioning for an overlay container network's host data plane.
//!
//! The crate drives three pieces of kernel state into place and keeps
//! them there across restarts: the overlay bridge (a plain Linux
//! bridge, an Open vSwitch datapath, or the hybrid of the two joined
//! by a veth pair), the iptables rules that isolate and expose the
//! overlay's control ports, and a stable per-host peer identity
//! derived from machine identifiers. A small multicast DNS client
//! handles name discovery between hosts.

pub mod mdns;
pub mod net;
pub mod store;
pub mod utils;
