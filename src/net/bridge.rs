use crate::net::datapath::DatapathDriver;
use crate::net::error::{NetworkError, NetworkResult};
use crate::net::firewall::{configure_iptables, FirewallDriver};
use crate::net::host::{HostFiles, SYS_HYPERVISOR_UUID, SYS_PRODUCT_UUID};
use crate::net::mac::{persistent_mac, random_mac, HwAddr};
use crate::net::netlink::{LinkKind, LinkManager, LinkView};
use crate::net::veth::{
    configure_arp_cache, create_and_attach_veth, VETH_BRIDGE_SIDE, VETH_DATAPATH_SIDE,
};
use std::fmt;

pub const DEFAULT_BRIDGE_NAME: &str = "overlay";
pub const DEFAULT_DATAPATH_NAME: &str = "datapath";
pub const DEFAULT_DOCKER_BRIDGE_NAME: &str = "docker0";
pub const DEFAULT_PORT: u16 = 6783;

/// MTU for a plain bridge when no override is configured: effectively
/// unlimited, the overlay fragments as needed.
const BRIDGE_DEFAULT_MTU: u32 = 65535;

/// Default overlay MTU for the accelerated datapath. GCE has the lowest
/// underlay MTU we are likely to meet on a local network, 1460 bytes;
/// subtract 20 for the outer IPv4 header, 8 for the outer UDP header,
/// 8 for the vxlan header and 14 for the inner ethernet header.
const FASTDP_DEFAULT_MTU: u32 = 1410;

/// The bridging mode currently present on (or just provisioned for) the
/// host. The string forms are consumed verbatim by external tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeType {
    None,
    Bridge,
    Fastdp,
    BridgedFastdp,
    Inconsistent,
}

impl fmt::Display for BridgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeType::None => "none",
            BridgeType::Bridge => "bridge",
            BridgeType::Fastdp => "fastdp",
            BridgeType::BridgedFastdp => "bridged_fastdp",
            BridgeType::Inconsistent => "inconsistent",
        };
        f.write_str(s)
    }
}

/// Configuration for one provisioning call.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Container-engine bridge; isolated from the overlay by firewall rules.
    pub docker_bridge_name: String,
    /// The overlay bridge device to detect or create.
    pub bridge_name: String,
    /// The accelerated datapath device to detect or create.
    pub datapath_name: String,
    /// Force plain bridge mode.
    pub no_fastdp: bool,
    /// Force pure fastdp mode when acceleration is enabled.
    pub no_bridged_fastdp: bool,
    /// MTU override; 0 selects the mode-specific default.
    pub mtu: u32,
    /// Overlay control port. This port and the next one up are protected.
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            docker_bridge_name: DEFAULT_DOCKER_BRIDGE_NAME.to_string(),
            bridge_name: DEFAULT_BRIDGE_NAME.to_string(),
            datapath_name: DEFAULT_DATAPATH_NAME.to_string(),
            no_fastdp: false,
            no_bridged_fastdp: false,
            mtu: 0,
            port: DEFAULT_PORT,
        }
    }
}

fn is_bridge(link: &LinkView) -> bool {
    link.kind == LinkKind::Bridge
}

/// A link counts as a datapath when the kernel reports the openvswitch
/// kind, or when it is a generic device with no kind at all: older
/// kernels never expose the kind, and any generic device present under
/// this name is assumed to be our datapath. Compatibility heuristic,
/// not a guarantee.
fn is_datapath(link: &LinkView) -> bool {
    matches!(link.kind, LinkKind::Openvswitch | LinkKind::Device)
}

/// Provisions the host's bridging mode for the overlay. Idempotent:
/// re-invocation detects existing state and creates nothing twice.
pub struct BridgeProvisioner<L, D, F, H> {
    links: L,
    datapath: D,
    firewall: F,
    host: H,
}

impl<L, D, F, H> BridgeProvisioner<L, D, F, H>
where
    L: LinkManager,
    D: DatapathDriver,
    F: FirewallDriver,
    H: HostFiles,
{
    pub fn new(links: L, datapath: D, firewall: F, host: H) -> Self {
        Self {
            links,
            datapath,
            firewall,
            host,
        }
    }

    /// Classify the host's current bridging mode from the two named
    /// links. Read-only; safe to call repeatedly.
    pub async fn detect_bridge_type(
        &self,
        bridge_name: &str,
        datapath_name: &str,
    ) -> NetworkResult<BridgeType> {
        let bridge = self.links.get_link(bridge_name).await?;
        let datapath = self.links.get_link(datapath_name).await?;

        Ok(match (&bridge, &datapath) {
            (None, None) => BridgeType::None,
            (Some(b), None) if is_bridge(b) => BridgeType::Bridge,
            (Some(b), None) if is_datapath(b) => BridgeType::Fastdp,
            (Some(b), Some(d)) if is_datapath(d) && is_bridge(b) => BridgeType::BridgedFastdp,
            _ => BridgeType::Inconsistent,
        })
    }

    /// Detect or create the overlay's bridging mode, then reconcile
    /// host-wide runtime state (device up, neighbor cache tuning).
    ///
    /// Side-effecting steps run in a fixed order and the first failure
    /// aborts the rest; nothing already created is rolled back. A later
    /// re-invocation picks up from the detected state.
    pub async fn create_bridge(&self, config: &mut BridgeConfig) -> NetworkResult<BridgeType> {
        let mut bridge_type = self
            .detect_bridge_type(&config.bridge_name, &config.datapath_name)
            .await?;

        if bridge_type == BridgeType::None {
            bridge_type = BridgeType::Bridge;
            if !config.no_fastdp {
                bridge_type = BridgeType::BridgedFastdp;
                if config.no_bridged_fastdp {
                    bridge_type = BridgeType::Fastdp;
                    // Pure fastdp reuses the overlay bridge's name for the
                    // datapath device.
                    config.datapath_name = config.bridge_name.clone();
                }
                let supported = self.datapath.create_datapath(&config.datapath_name)?;
                if !supported {
                    tracing::info!("accelerated datapath unsupported, using plain bridge");
                    bridge_type = BridgeType::Bridge;
                }
            }

            match bridge_type {
                BridgeType::Bridge => self.init_bridge(config).await?,
                BridgeType::Fastdp => self.init_fastdp(config).await?,
                BridgeType::BridgedFastdp => self.init_bridged_fastdp(config).await?,
                other => {
                    return Err(NetworkError::Config(format!(
                        "cannot initialise bridge type {}",
                        other
                    )))
                }
            }

            configure_iptables(config, &self.links, &self.firewall).await?;
            tracing::info!("created {} ({})", config.bridge_name, bridge_type);
        }

        if bridge_type == BridgeType::Bridge {
            // Checksum offload breaks packets looped through a software
            // bridge; the kernel would hand us frames with bad checksums.
            self.links.disable_tx_checksum(&config.bridge_name)?;
        }

        self.links.set_up(&config.bridge_name).await?;
        configure_arp_cache(&self.host, &config.bridge_name)?;

        Ok(bridge_type)
    }

    /// Keep a related bridge device's MAC stable: if the kernel does not
    /// report it as administratively set, pin a fresh derived address so
    /// other tooling cannot re-randomize it.
    ///
    /// addr_assign_type values, from include/uapi/linux/netdevice.h:
    /// 0 permanent, 1 random, 2 stolen, 3 set via dev_set_mac_address().
    pub async fn enforce_addr_assign_type(&self, device: &str) -> NetworkResult<()> {
        let path = format!("/sys/class/net/{}/addr_assign_type", device);
        let data = self.host.read(&path).map_err(NetworkError::Io)?;
        // The file carries a trailing newline; only the first byte matters.
        let first = *data
            .first()
            .ok_or_else(|| NetworkError::Config(format!("{} is empty", path)))?;
        if first != b'3' {
            let mac = random_mac()?;
            tracing::info!("pinning MAC of {} to {}", device, mac);
            self.links.set_mac(device, &mac).await?;
        }
        Ok(())
    }

    async fn init_bridge(&self, config: &BridgeConfig) -> NetworkResult<()> {
        let mac = self.derive_bridge_mac()?;
        let mtu = if config.mtu == 0 {
            BRIDGE_DEFAULT_MTU
        } else {
            config.mtu
        };
        self.links
            .create_bridge(&config.bridge_name, &mac, mtu)
            .await
    }

    async fn init_fastdp(&self, config: &BridgeConfig) -> NetworkResult<()> {
        let mtu = if config.mtu == 0 {
            FASTDP_DEFAULT_MTU
        } else {
            config.mtu
        };
        self.links.set_mtu(&config.datapath_name, mtu).await
    }

    async fn init_bridged_fastdp(&self, config: &BridgeConfig) -> NetworkResult<()> {
        self.init_fastdp(config).await?;
        self.init_bridge(config).await?;

        create_and_attach_veth(
            &self.links,
            VETH_BRIDGE_SIDE,
            VETH_DATAPATH_SIDE,
            &config.bridge_name,
            config.mtu,
        )
        .await?;
        self.links.set_up(VETH_DATAPATH_SIDE).await?;
        self.datapath
            .add_datapath_interface(&config.datapath_name, VETH_DATAPATH_SIDE)?;

        self.links.set_up(&config.datapath_name).await
    }

    /// Derive the bridge MAC from the system (aka bios) UUID, or failing
    /// that the hypervisor UUID. The peer name is derived from the same
    /// source elsewhere: stable across reboots but otherwise unique,
    /// which machine-id is not on VMs cloned from the same image. With
    /// neither available, a random MAC.
    fn derive_bridge_mac(&self) -> NetworkResult<HwAddr> {
        match self.host.read(SYS_PRODUCT_UUID) {
            Ok(uuid) => Ok(persistent_mac(&uuid)),
            Err(_) => match self.host.read(SYS_HYPERVISOR_UUID) {
                Ok(uuid) => Ok(persistent_mac(&uuid)),
                Err(_) => random_mac(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::firewall::NAT_CHAIN;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    #[derive(Debug, Clone)]
    struct FakeLink {
        index: u32,
        kind: LinkKind,
        mtu: u32,
        up: bool,
        mac: Option<HwAddr>,
        master: Option<String>,
        ip: Option<Ipv4Addr>,
    }

    #[derive(Default)]
    struct FakeState {
        links: HashMap<String, FakeLink>,
        next_index: u32,
        bridges_created: Vec<String>,
        veths_created: Vec<(String, String)>,
        datapaths_created: Vec<String>,
        attached: Vec<(String, String)>,
        macs_set: Vec<(String, HwAddr)>,
        tx_checksum_off: Vec<String>,
        firewall_ops: Vec<String>,
        files: HashMap<String, Vec<u8>>,
        writes: Vec<(String, String)>,
    }

    impl FakeState {
        fn add_link(&mut self, name: &str, kind: LinkKind, mtu: u32) {
            self.next_index += 1;
            self.links.insert(
                name.to_string(),
                FakeLink {
                    index: self.next_index,
                    kind,
                    mtu,
                    up: false,
                    mac: None,
                    master: None,
                    ip: None,
                },
            );
        }
    }

    type Shared = Rc<RefCell<FakeState>>;

    #[derive(Clone)]
    struct FakeLinks(Shared);

    impl LinkManager for FakeLinks {
        async fn get_link(&self, name: &str) -> NetworkResult<Option<LinkView>> {
            Ok(self.0.borrow().links.get(name).map(|l| LinkView {
                index: l.index,
                kind: l.kind.clone(),
                mtu: l.mtu,
            }))
        }

        async fn create_bridge(&self, name: &str, mac: &HwAddr, mtu: u32) -> NetworkResult<()> {
            let mut state = self.0.borrow_mut();
            state.add_link(name, LinkKind::Bridge, mtu);
            state.links.get_mut(name).unwrap().mac = Some(*mac);
            state.bridges_created.push(name.to_string());
            Ok(())
        }

        async fn create_veth(&self, name: &str, peer: &str) -> NetworkResult<()> {
            let mut state = self.0.borrow_mut();
            state.add_link(name, LinkKind::Veth, 1500);
            state.add_link(peer, LinkKind::Veth, 1500);
            state.veths_created.push((name.to_string(), peer.to_string()));
            Ok(())
        }

        async fn set_mtu(&self, name: &str, mtu: u32) -> NetworkResult<()> {
            self.with_link(name, |l| l.mtu = mtu)
        }

        async fn set_up(&self, name: &str) -> NetworkResult<()> {
            self.with_link(name, |l| l.up = true)
        }

        async fn set_mac(&self, name: &str, mac: &HwAddr) -> NetworkResult<()> {
            self.0
                .borrow_mut()
                .macs_set
                .push((name.to_string(), *mac));
            self.with_link(name, |l| l.mac = Some(*mac))
        }

        async fn set_master(&self, name: &str, master: &str) -> NetworkResult<()> {
            let master = master.to_string();
            self.with_link(name, move |l| l.master = Some(master))
        }

        async fn device_ip(&self, name: &str) -> NetworkResult<Ipv4Addr> {
            self.0
                .borrow()
                .links
                .get(name)
                .and_then(|l| l.ip)
                .ok_or_else(|| NetworkError::NotFound(format!("no IPv4 address on {}", name)))
        }

        fn disable_tx_checksum(&self, name: &str) -> NetworkResult<()> {
            self.0.borrow_mut().tx_checksum_off.push(name.to_string());
            Ok(())
        }
    }

    impl FakeLinks {
        fn with_link(
            &self,
            name: &str,
            f: impl FnOnce(&mut FakeLink),
        ) -> NetworkResult<()> {
            let mut state = self.0.borrow_mut();
            match state.links.get_mut(name) {
                Some(link) => {
                    f(link);
                    Ok(())
                }
                None => Err(NetworkError::NotFound(format!("link {}", name))),
            }
        }
    }

    #[derive(Clone)]
    struct FakeDatapath {
        state: Shared,
        supported: bool,
    }

    impl DatapathDriver for FakeDatapath {
        fn create_datapath(&self, name: &str) -> NetworkResult<bool> {
            if !self.supported {
                return Ok(false);
            }
            let mut state = self.state.borrow_mut();
            state.add_link(name, LinkKind::Openvswitch, 1500);
            state.datapaths_created.push(name.to_string());
            Ok(true)
        }

        fn add_datapath_interface(&self, datapath: &str, interface: &str) -> NetworkResult<()> {
            let mut state = self.state.borrow_mut();
            assert!(state.links.contains_key(datapath));
            assert!(state.links.contains_key(interface));
            state
                .attached
                .push((datapath.to_string(), interface.to_string()));
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FakeFirewall(Shared);

    impl FirewallDriver for FakeFirewall {
        fn insert(&self, table: &str, chain: &str, pos: u32, rule: &[&str]) -> NetworkResult<()> {
            self.0
                .borrow_mut()
                .firewall_ops
                .push(format!("insert {} {} {} {}", table, chain, pos, rule.join(" ")));
            Ok(())
        }

        fn append_unique(&self, table: &str, chain: &str, rule: &[&str]) -> NetworkResult<()> {
            self.0
                .borrow_mut()
                .firewall_ops
                .push(format!("append {} {} {}", table, chain, rule.join(" ")));
            Ok(())
        }

        fn ensure_chain(&self, table: &str, chain: &str) -> NetworkResult<()> {
            self.0
                .borrow_mut()
                .firewall_ops
                .push(format!("chain {} {}", table, chain));
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FakeHost(Shared);

    impl HostFiles for FakeHost {
        fn read(&self, path: &str) -> io::Result<Vec<u8>> {
            self.0
                .borrow()
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn write(&self, path: &str, value: &str) -> io::Result<()> {
            self.0
                .borrow_mut()
                .writes
                .push((path.to_string(), value.to_string()));
            Ok(())
        }
    }

    fn world() -> Shared {
        let state = Rc::new(RefCell::new(FakeState::default()));
        // A container-engine bridge with an address is always around.
        {
            let mut s = state.borrow_mut();
            s.add_link("docker0", LinkKind::Bridge, 1500);
            s.links.get_mut("docker0").unwrap().ip = Some(Ipv4Addr::new(172, 17, 0, 1));
        }
        state
    }

    fn provisioner(
        state: &Shared,
        datapath_supported: bool,
    ) -> BridgeProvisioner<FakeLinks, FakeDatapath, FakeFirewall, FakeHost> {
        BridgeProvisioner::new(
            FakeLinks(Rc::clone(state)),
            FakeDatapath {
                state: Rc::clone(state),
                supported: datapath_supported,
            },
            FakeFirewall(Rc::clone(state)),
            FakeHost(Rc::clone(state)),
        )
    }

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            docker_bridge_name: "docker0".to_string(),
            bridge_name: "weave".to_string(),
            datapath_name: "datapath".to_string(),
            no_fastdp: false,
            no_bridged_fastdp: false,
            mtu: 0,
            port: 6783,
        }
    }

    #[test]
    fn canonical_strings() {
        assert_eq!(BridgeType::None.to_string(), "none");
        assert_eq!(BridgeType::Bridge.to_string(), "bridge");
        assert_eq!(BridgeType::Fastdp.to_string(), "fastdp");
        assert_eq!(BridgeType::BridgedFastdp.to_string(), "bridged_fastdp");
        assert_eq!(BridgeType::Inconsistent.to_string(), "inconsistent");
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum TestLink {
        Absent,
        Bridge,
        Datapath,
        Other,
    }

    #[tokio::test]
    async fn detection_covers_the_full_table() {
        use TestLink::*;
        let all = [Absent, Bridge, Datapath, Other];
        for b in all {
            for d in all {
                let state = world();
                {
                    let mut s = state.borrow_mut();
                    for (name, link) in [("weave", b), ("datapath", d)] {
                        match link {
                            Absent => {}
                            Bridge => s.add_link(name, LinkKind::Bridge, 1500),
                            Datapath => s.add_link(name, LinkKind::Openvswitch, 1500),
                            Other => s.add_link(name, LinkKind::Veth, 1500),
                        }
                    }
                }
                let expected = match (b, d) {
                    (Absent, Absent) => BridgeType::None,
                    (Bridge, Absent) => BridgeType::Bridge,
                    (Datapath, Absent) => BridgeType::Fastdp,
                    (Bridge, Datapath) => BridgeType::BridgedFastdp,
                    _ => BridgeType::Inconsistent,
                };
                let got = provisioner(&state, true)
                    .detect_bridge_type("weave", "datapath")
                    .await
                    .unwrap();
                assert_eq!(got, expected, "bridge={:?} datapath={:?}", b, d);
            }
        }
    }

    #[tokio::test]
    async fn generic_device_counts_as_datapath() {
        let state = world();
        state.borrow_mut().add_link("weave", LinkKind::Device, 1500);
        let got = provisioner(&state, true)
            .detect_bridge_type("weave", "datapath")
            .await
            .unwrap();
        assert_eq!(got, BridgeType::Fastdp);
    }

    #[tokio::test]
    async fn no_fastdp_forces_plain_bridge() {
        let state = world();
        let p = provisioner(&state, true);
        let mut config = test_config();
        config.no_fastdp = true;

        let got = p.create_bridge(&mut config).await.unwrap();
        assert_eq!(got, BridgeType::Bridge);

        let s = state.borrow();
        assert_eq!(s.bridges_created, vec!["weave"]);
        assert!(s.datapaths_created.is_empty());
        let bridge = &s.links["weave"];
        assert_eq!(bridge.mtu, 65535);
        assert!(bridge.up);
        // MAC was derived with the locally-administered bit policy.
        assert_eq!(bridge.mac.unwrap().as_bytes()[0] & 0x03, 0x02);
        assert_eq!(s.tx_checksum_off, vec!["weave"]);
        assert_eq!(s.firewall_ops.len(), 9);
    }

    #[tokio::test]
    async fn unsupported_datapath_falls_back_to_bridge() {
        let state = world();
        let p = provisioner(&state, false);
        let mut config = test_config();

        let got = p.create_bridge(&mut config).await.unwrap();
        assert_eq!(got, BridgeType::Bridge);
        let s = state.borrow();
        assert!(s.datapaths_created.is_empty());
        assert_eq!(s.bridges_created, vec!["weave"]);
    }

    #[tokio::test]
    async fn no_bridged_fastdp_collapses_to_pure_fastdp() {
        let state = world();
        let p = provisioner(&state, true);
        let mut config = test_config();
        config.no_bridged_fastdp = true;

        let got = p.create_bridge(&mut config).await.unwrap();
        assert_eq!(got, BridgeType::Fastdp);
        // The datapath took over the overlay bridge's configured name.
        assert_eq!(config.datapath_name, "weave");

        let s = state.borrow();
        assert_eq!(s.datapaths_created, vec!["weave"]);
        assert!(s.bridges_created.is_empty());
        assert!(s.veths_created.is_empty());
        let dp = &s.links["weave"];
        assert_eq!(dp.mtu, 1410);
        assert!(dp.up);
        assert!(s.tx_checksum_off.is_empty());
    }

    #[tokio::test]
    async fn bridged_fastdp_end_to_end() {
        let state = world();
        let p = provisioner(&state, true);
        let mut config = test_config();

        let got = p.create_bridge(&mut config).await.unwrap();
        assert_eq!(got, BridgeType::BridgedFastdp);

        let s = state.borrow();
        assert_eq!(s.datapaths_created, vec!["datapath"]);
        assert_eq!(s.bridges_created, vec!["weave"]);
        assert_eq!(
            s.veths_created,
            vec![("vethov-bridge".to_string(), "vethov-datapath".to_string())]
        );
        assert_eq!(
            s.attached,
            vec![("datapath".to_string(), "vethov-datapath".to_string())]
        );

        assert_eq!(s.links["datapath"].mtu, 1410);
        assert!(s.links["datapath"].up);
        assert_eq!(s.links["weave"].mtu, 65535);
        assert!(s.links["weave"].up);
        // Cross-connect: bridge side enslaved and up, datapath side up,
        // both at the bridge's MTU.
        let bridge_side = &s.links["vethov-bridge"];
        assert_eq!(bridge_side.master.as_deref(), Some("weave"));
        assert!(bridge_side.up);
        assert_eq!(bridge_side.mtu, 65535);
        assert!(s.links["vethov-datapath"].up);
        assert_eq!(s.links["vethov-datapath"].mtu, 65535);

        // Not a plain bridge, so checksum offload stays on.
        assert!(s.tx_checksum_off.is_empty());

        assert_eq!(s.firewall_ops.len(), 9);
        assert_eq!(
            s.firewall_ops[0],
            "insert filter FORWARD 1 -i docker0 -o weave -j DROP"
        );
        assert_eq!(s.firewall_ops[7], format!("chain nat {}", NAT_CHAIN));

        // Neighbor cache tuned on the overlay bridge.
        assert_eq!(s.writes.len(), 3);
        assert!(s.writes[0].0.contains("neigh/weave/base_reachable_time"));
    }

    #[tokio::test]
    async fn second_invocation_creates_nothing() {
        let state = world();
        let mut config = test_config();

        let first = provisioner(&state, true)
            .create_bridge(&mut config)
            .await
            .unwrap();
        let ops_after_first = state.borrow().firewall_ops.len();

        let mut config2 = test_config();
        let second = provisioner(&state, true)
            .create_bridge(&mut config2)
            .await
            .unwrap();

        assert_eq!(first, second);
        let s = state.borrow();
        assert_eq!(s.bridges_created.len(), 1);
        assert_eq!(s.datapaths_created.len(), 1);
        assert_eq!(s.veths_created.len(), 1);
        // Firewall configuration only runs on first-time creation.
        assert_eq!(s.firewall_ops.len(), ops_after_first);
    }

    #[tokio::test]
    async fn mtu_override_applies_to_both_modes() {
        let state = world();
        let p = provisioner(&state, true);
        let mut config = test_config();
        config.mtu = 9000;

        p.create_bridge(&mut config).await.unwrap();
        let s = state.borrow();
        assert_eq!(s.links["weave"].mtu, 9000);
        assert_eq!(s.links["datapath"].mtu, 9000);
        assert_eq!(s.links["vethov-bridge"].mtu, 9000);
    }

    #[tokio::test]
    async fn inconsistent_state_is_reported_not_repaired() {
        let state = world();
        state.borrow_mut().add_link("weave", LinkKind::Veth, 1500);
        let p = provisioner(&state, true);
        let mut config = test_config();

        let got = p.create_bridge(&mut config).await.unwrap();
        assert_eq!(got, BridgeType::Inconsistent);
        let s = state.borrow();
        assert!(s.bridges_created.is_empty());
        assert!(s.datapaths_created.is_empty());
        assert!(s.firewall_ops.is_empty());
    }

    #[tokio::test]
    async fn bridge_mac_derives_from_system_uuid() {
        let state = world();
        state.borrow_mut().files.insert(
            SYS_PRODUCT_UUID.to_string(),
            b"11111111-2222-3333-4444-555555555555\n".to_vec(),
        );
        let p = provisioner(&state, true);
        let mut config = test_config();
        config.no_fastdp = true;

        p.create_bridge(&mut config).await.unwrap();
        let expected = persistent_mac(b"11111111-2222-3333-4444-555555555555\n");
        assert_eq!(state.borrow().links["weave"].mac, Some(expected));
    }

    #[tokio::test]
    async fn enforce_addr_assign_type_respects_admin_set() {
        let state = world();
        state.borrow_mut().files.insert(
            "/sys/class/net/ext0/addr_assign_type".to_string(),
            b"3\n".to_vec(),
        );
        state.borrow_mut().add_link("ext0", LinkKind::Bridge, 1500);

        provisioner(&state, true)
            .enforce_addr_assign_type("ext0")
            .await
            .unwrap();
        assert!(state.borrow().macs_set.is_empty());
    }

    #[tokio::test]
    async fn enforce_addr_assign_type_pins_random_mac() {
        let state = world();
        state.borrow_mut().files.insert(
            "/sys/class/net/ext0/addr_assign_type".to_string(),
            b"1\n".to_vec(),
        );
        state.borrow_mut().add_link("ext0", LinkKind::Bridge, 1500);

        provisioner(&state, true)
            .enforce_addr_assign_type("ext0")
            .await
            .unwrap();
        let s = state.borrow();
        assert_eq!(s.macs_set.len(), 1);
        assert_eq!(s.macs_set[0].0, "ext0");
        assert_eq!(s.macs_set[0].1.as_bytes()[0] & 0x03, 0x02);
    }

    #[tokio::test]
    async fn enforce_addr_assign_type_requires_the_flag_file() {
        let state = world();
        let err = provisioner(&state, true)
            .enforce_addr_assign_type("ext0")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Io(_)));

        state.borrow_mut().files.insert(
            "/sys/class/net/ext0/addr_assign_type".to_string(),
            Vec::new(),
        );
        let err = provisioner(&state, true)
            .enforce_addr_assign_type("ext0")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Config(_)));
    }
}
