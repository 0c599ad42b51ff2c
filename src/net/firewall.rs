use crate::net::bridge::BridgeConfig;
use crate::net::error::{NetworkError, NetworkResult};
use crate::net::netlink::LinkManager;
use crate::utils::command::CommandExecutor;

/// NAT chain owned by the overlay; masquerade rules are populated into it
/// by the address allocator, not here.
pub const NAT_CHAIN: &str = "OVERLAY";

/// Capability interface over the host packet filter. Production shells out
/// to iptables; tests record the operations.
pub trait FirewallDriver {
    /// Insert a rule at an explicit position.
    fn insert(&self, table: &str, chain: &str, pos: u32, rule: &[&str]) -> NetworkResult<()>;
    /// Append a rule unless an identical one is already present.
    fn append_unique(&self, table: &str, chain: &str, rule: &[&str]) -> NetworkResult<()>;
    /// Create a chain, tolerating one that already exists.
    fn ensure_chain(&self, table: &str, chain: &str) -> NetworkResult<()>;
}

/// iptables-backed driver. `append_unique` probes with `-C` before `-A`,
/// so re-running a configuration pass never duplicates rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct IptablesDriver;

impl IptablesDriver {
    fn run(&self, args: &[&str]) -> NetworkResult<crate::utils::command::CommandResult> {
        CommandExecutor::run("iptables", args)
    }
}

impl FirewallDriver for IptablesDriver {
    fn insert(&self, table: &str, chain: &str, pos: u32, rule: &[&str]) -> NetworkResult<()> {
        let pos = pos.to_string();
        let mut args = vec!["-t", table, "-I", chain, &pos];
        args.extend_from_slice(rule);
        let result = self.run(&args)?;
        if !result.success {
            return Err(NetworkError::Command {
                cmd: format!("iptables {}", args.join(" ")),
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    fn append_unique(&self, table: &str, chain: &str, rule: &[&str]) -> NetworkResult<()> {
        let mut check = vec!["-t", table, "-C", chain];
        check.extend_from_slice(rule);
        if self.run(&check)?.success {
            return Ok(());
        }
        let mut append = vec!["-t", table, "-A", chain];
        append.extend_from_slice(rule);
        let result = self.run(&append)?;
        if !result.success {
            return Err(NetworkError::Command {
                cmd: format!("iptables {}", append.join(" ")),
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    fn ensure_chain(&self, table: &str, chain: &str) -> NetworkResult<()> {
        let result = self.run(&["-t", table, "-N", chain])?;
        if !result.success && !result.stderr.contains("Chain already exists") {
            return Err(NetworkError::Command {
                cmd: format!("iptables -t {} -N {}", table, chain),
                stderr: result.stderr,
            });
        }
        Ok(())
    }
}

/// Install the packet-filter rules that isolate the overlay control ports.
///
/// Runs once after first-time bridge creation. Ordering matters and the
/// sequence aborts on the first failure; already-applied rules are left in
/// place (re-invocation converges because appends are duplicate-safe).
pub async fn configure_iptables<L: LinkManager, F: FirewallDriver>(
    config: &BridgeConfig,
    links: &L,
    firewall: &F,
) -> NetworkResult<()> {
    // Block engine-created networks from reaching the overlay directly.
    if config.bridge_name != config.docker_bridge_name {
        firewall.insert(
            "filter",
            "FORWARD",
            1,
            &[
                "-i",
                &config.docker_bridge_name,
                "-o",
                &config.bridge_name,
                "-j",
                "DROP",
            ],
        )?;
    }

    let docker_bridge_ip = links.device_ip(&config.docker_bridge_name).await?;
    let ip = docker_bridge_ip.to_string();
    let port = config.port.to_string();
    // Widened so the top of the port range cannot wrap.
    let port2 = (u32::from(config.port) + 1).to_string();

    // Forbid traffic to the overlay control ports from local containers.
    firewall.append_unique(
        "filter",
        "INPUT",
        &[
            "-i", &config.docker_bridge_name, "-p", "tcp", "--dst", &ip, "--dport", &port, "-j",
            "DROP",
        ],
    )?;
    firewall.append_unique(
        "filter",
        "INPUT",
        &[
            "-i", &config.docker_bridge_name, "-p", "udp", "--dst", &ip, "--dport", &port, "-j",
            "DROP",
        ],
    )?;
    firewall.append_unique(
        "filter",
        "INPUT",
        &[
            "-i", &config.docker_bridge_name, "-p", "udp", "--dst", &ip, "--dport", &port2, "-j",
            "DROP",
        ],
    )?;

    // Let name-resolution traffic through; host firewall tooling such as
    // ufw would otherwise block it.
    firewall.append_unique(
        "filter",
        "INPUT",
        &["-i", &config.docker_bridge_name, "-p", "udp", "--dport", "53", "-j", "ACCEPT"],
    )?;
    firewall.append_unique(
        "filter",
        "INPUT",
        &["-i", &config.docker_bridge_name, "-p", "tcp", "--dport", "53", "-j", "ACCEPT"],
    )?;

    // Some hosts default-deny forwarding across a bridge to itself.
    firewall.append_unique(
        "filter",
        "FORWARD",
        &["-i", &config.bridge_name, "-o", &config.bridge_name, "-j", "ACCEPT"],
    )?;

    // Chain for masquerading; populated elsewhere.
    firewall.ensure_chain("nat", NAT_CHAIN)?;
    firewall.append_unique("nat", "POSTROUTING", &["-j", NAT_CHAIN])?;

    tracing::info!("firewall rules installed for {}", config.bridge_name);
    Ok(())
}
