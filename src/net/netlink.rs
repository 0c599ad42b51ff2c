use crate::net::error::{NetworkError, NetworkResult};
use crate::net::mac::HwAddr;
use crate::utils::command::CommandExecutor;
use futures::TryStreamExt;
use netlink_packet_route::address::AddressAttribute;
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use std::net::{IpAddr, Ipv4Addr};

const ENODEV: i32 = 19;

/// Kernel-reported type of a link, reduced to what the detector cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Bridge,
    Veth,
    Openvswitch,
    /// Generic device with no kind reported. Older kernels do not expose
    /// the openvswitch kind, so the detector treats this as a datapath.
    Device,
    Other(String),
}

/// Snapshot of one kernel link.
#[derive(Debug, Clone)]
pub struct LinkView {
    pub index: u32,
    pub kind: LinkKind,
    pub mtu: u32,
}

/// Capability interface over kernel link state. The provisioning core is
/// written against this trait; production uses [`NetlinkHandle`], tests
/// use in-memory fakes.
#[allow(async_fn_in_trait)]
pub trait LinkManager {
    /// Look up a link by name. Absence is `Ok(None)`, not an error.
    async fn get_link(&self, name: &str) -> NetworkResult<Option<LinkView>>;
    async fn create_bridge(&self, name: &str, mac: &HwAddr, mtu: u32) -> NetworkResult<()>;
    async fn create_veth(&self, name: &str, peer: &str) -> NetworkResult<()>;
    async fn set_mtu(&self, name: &str, mtu: u32) -> NetworkResult<()>;
    async fn set_up(&self, name: &str) -> NetworkResult<()>;
    async fn set_mac(&self, name: &str, mac: &HwAddr) -> NetworkResult<()>;
    /// Enslave `name` to the bridge device `master`.
    async fn set_master(&self, name: &str, master: &str) -> NetworkResult<()>;
    /// First IPv4 address assigned to the named device.
    async fn device_ip(&self, name: &str) -> NetworkResult<Ipv4Addr>;
    /// Turn off hardware TX checksum offload on the device.
    fn disable_tx_checksum(&self, name: &str) -> NetworkResult<()>;
}

/// Persistent netlink handle wrapping rtnetlink for all link operations.
/// One handle per process.
pub struct NetlinkHandle {
    handle: rtnetlink::Handle,
    // Keep the connection task alive
    _conn_task: tokio::task::JoinHandle<()>,
}

impl NetlinkHandle {
    pub fn new() -> NetworkResult<Self> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        let conn_task = tokio::spawn(conn);
        Ok(Self {
            handle,
            _conn_task: conn_task,
        })
    }

    async fn index_of(&self, name: &str) -> NetworkResult<u32> {
        match self.get_link(name).await? {
            Some(link) => Ok(link.index),
            None => Err(NetworkError::NotFound(format!("link {}", name))),
        }
    }
}

/// Reduce a netlink link message to the view the detector needs.
pub(crate) fn link_view(msg: &LinkMessage) -> LinkView {
    let mut kind = LinkKind::Device;
    let mut mtu = 0;
    for attr in &msg.attributes {
        match attr {
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    if let LinkInfo::Kind(k) = info {
                        kind = match k {
                            InfoKind::Bridge => LinkKind::Bridge,
                            InfoKind::Veth => LinkKind::Veth,
                            InfoKind::Other(name) if name == "openvswitch" => {
                                LinkKind::Openvswitch
                            }
                            other => LinkKind::Other(format!("{:?}", other)),
                        };
                    }
                }
            }
            LinkAttribute::Mtu(m) => mtu = *m,
            _ => {}
        }
    }
    LinkView {
        index: msg.header.index,
        kind,
        mtu,
    }
}

impl LinkManager for NetlinkHandle {
    async fn get_link(&self, name: &str) -> NetworkResult<Option<LinkView>> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(Some(link_view(&msg))),
            Ok(None) => Ok(None),
            Err(rtnetlink::Error::NetlinkError(err)) if err.raw_code() == -ENODEV => Ok(None),
            Err(e) => Err(NetworkError::Netlink(e)),
        }
    }

    async fn create_bridge(&self, name: &str, mac: &HwAddr, mtu: u32) -> NetworkResult<()> {
        let mut req = self.handle.link().add().bridge(name.to_string());
        let msg = req.message_mut();
        msg.attributes
            .push(LinkAttribute::Address(mac.as_bytes().to_vec()));
        msg.attributes.push(LinkAttribute::Mtu(mtu));
        req.execute().await.map_err(NetworkError::Netlink)
    }

    async fn create_veth(&self, name: &str, peer: &str) -> NetworkResult<()> {
        self.handle
            .link()
            .add()
            .veth(name.to_string(), peer.to_string())
            .execute()
            .await
            .map_err(NetworkError::Netlink)
    }

    async fn set_mtu(&self, name: &str, mtu: u32) -> NetworkResult<()> {
        let index = self.index_of(name).await?;
        self.handle
            .link()
            .set(index)
            .mtu(mtu)
            .execute()
            .await
            .map_err(NetworkError::Netlink)
    }

    async fn set_up(&self, name: &str) -> NetworkResult<()> {
        let index = self.index_of(name).await?;
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(NetworkError::Netlink)
    }

    async fn set_mac(&self, name: &str, mac: &HwAddr) -> NetworkResult<()> {
        let index = self.index_of(name).await?;
        self.handle
            .link()
            .set(index)
            .address(mac.as_bytes().to_vec())
            .execute()
            .await
            .map_err(NetworkError::Netlink)
    }

    async fn set_master(&self, name: &str, master: &str) -> NetworkResult<()> {
        let index = self.index_of(name).await?;
        let master_index = self.index_of(master).await?;
        self.handle
            .link()
            .set(index)
            .controller(master_index)
            .execute()
            .await
            .map_err(NetworkError::Netlink)
    }

    async fn device_ip(&self, name: &str) -> NetworkResult<Ipv4Addr> {
        let index = self.index_of(name).await?;
        let mut addrs = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();
        while let Some(msg) = addrs.try_next().await.map_err(NetworkError::Netlink)? {
            for attr in &msg.attributes {
                if let AddressAttribute::Address(IpAddr::V4(ip)) = attr {
                    return Ok(*ip);
                }
            }
        }
        Err(NetworkError::NotFound(format!("no IPv4 address on {}", name)))
    }

    fn disable_tx_checksum(&self, name: &str) -> NetworkResult<()> {
        let result = CommandExecutor::run("ethtool", &["-K", name, "tx", "off"])?;
        if !result.success {
            return Err(NetworkError::Command {
                cmd: format!("ethtool -K {} tx off", name),
                stderr: result.stderr,
            });
        }
        Ok(())
    }
}
