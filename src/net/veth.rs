use crate::net::error::{NetworkError, NetworkResult};
use crate::net::host::HostFiles;
use crate::net::netlink::LinkManager;

/// Endpoint names for the cross-connect between the overlay bridge and
/// the accelerated datapath in hybrid mode.
pub const VETH_BRIDGE_SIDE: &str = "vethov-bridge";
pub const VETH_DATAPATH_SIDE: &str = "vethov-datapath";

/// Create a veth pair and enslave the `name` end to `bridge_name`.
///
/// With `mtu == 0` the pair inherits the bridge's MTU. The bridge-side
/// end is brought up; the peer is left for the caller to wire.
pub async fn create_and_attach_veth<L: LinkManager>(
    links: &L,
    name: &str,
    peer: &str,
    bridge_name: &str,
    mtu: u32,
) -> NetworkResult<()> {
    let mtu = if mtu == 0 {
        links
            .get_link(bridge_name)
            .await?
            .ok_or_else(|| NetworkError::NotFound(format!("bridge {}", bridge_name)))?
            .mtu
    } else {
        mtu
    };

    links.create_veth(name, peer).await?;
    links.set_mtu(name, mtu).await?;
    links.set_mtu(peer, mtu).await?;
    links.set_master(name, bridge_name).await?;
    links.set_up(name).await?;
    Ok(())
}

/// Tune the neighbor cache on the overlay bridge. Peers come and go much
/// faster than the kernel's default ARP aging assumes.
pub fn configure_arp_cache<H: HostFiles>(host: &H, name: &str) -> NetworkResult<()> {
    sysctl(host, &format!("net/ipv4/neigh/{}/base_reachable_time", name), "5")?;
    sysctl(host, &format!("net/ipv4/neigh/{}/delay_first_probe_time", name), "2")?;
    sysctl(host, &format!("net/ipv4/neigh/{}/ucast_solicit", name), "1")
}

fn sysctl<H: HostFiles>(host: &H, name: &str, value: &str) -> NetworkResult<()> {
    host.write(&format!("/proc/sys/{}", name), value)
        .map_err(NetworkError::Io)
}
