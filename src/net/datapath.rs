use crate::net::error::{NetworkError, NetworkResult};
use crate::utils::command::CommandExecutor;

/// External capability over the accelerated forwarding datapath. The
/// kernel module driver itself is out of scope; this is the create/attach
/// surface the provisioner consumes.
pub trait DatapathDriver {
    /// Create the named datapath. Returns `Ok(false)` when the kernel or
    /// tooling does not support accelerated datapaths at all, which the
    /// caller treats as "fall back to a plain bridge".
    fn create_datapath(&self, name: &str) -> NetworkResult<bool>;
    /// Attach a host interface to an existing datapath.
    fn add_datapath_interface(&self, datapath: &str, interface: &str) -> NetworkResult<()>;
}

/// Datapath driver backed by the `ovs-dpctl` tool.
pub struct OvsDatapath {
    dpctl: String,
}

impl OvsDatapath {
    pub fn new() -> Self {
        Self {
            dpctl: "ovs-dpctl".to_string(),
        }
    }

    #[cfg(test)]
    fn with_binary(dpctl: &str) -> Self {
        Self {
            dpctl: dpctl.to_string(),
        }
    }

    fn unsupported(stderr: &str) -> bool {
        // No openvswitch module in the kernel, or a kernel too old to
        // speak the generic-netlink family at all.
        stderr.contains("ovs_datapath")
            || stderr.contains("not supported")
            || stderr.contains("Address family not supported")
    }
}

impl Default for OvsDatapath {
    fn default() -> Self {
        Self::new()
    }
}

impl DatapathDriver for OvsDatapath {
    fn create_datapath(&self, name: &str) -> NetworkResult<bool> {
        if !CommandExecutor::is_available(&self.dpctl) {
            tracing::debug!("{} not found, accelerated datapath unavailable", self.dpctl);
            return Ok(false);
        }
        let result = CommandExecutor::run(&self.dpctl, &["add-dp", name])?;
        if result.success || result.stderr.contains("File exists") {
            return Ok(true);
        }
        if Self::unsupported(&result.stderr) {
            tracing::debug!("kernel reports no datapath support: {}", result.stderr.trim());
            return Ok(false);
        }
        Err(NetworkError::Command {
            cmd: format!("{} add-dp {}", self.dpctl, name),
            stderr: result.stderr,
        })
    }

    fn add_datapath_interface(&self, datapath: &str, interface: &str) -> NetworkResult<()> {
        let result = CommandExecutor::run(&self.dpctl, &["add-if", datapath, interface])?;
        if !result.success {
            return Err(NetworkError::Command {
                cmd: format!("{} add-if {} {}", self.dpctl, datapath, interface),
                stderr: result.stderr,
            });
        }
        Ok(())
    }
}
