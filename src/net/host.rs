use std::fs;
use std::io;

/// System (aka bios) UUID exposed by DMI.
pub const SYS_PRODUCT_UUID: &str = "/sys/class/dmi/id/product_uuid";
/// Fallback identity on hypervisors that hide DMI.
pub const SYS_HYPERVISOR_UUID: &str = "/sys/hypervisor/uuid";

/// Narrow capability over host filesystem state (sysfs, procfs, /etc).
///
/// Everything the provisioning core learns about the host outside of
/// netlink goes through this trait so tests can substitute a fake.
pub trait HostFiles {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
    fn write(&self, path: &str, value: &str) -> io::Result<()>;
}

/// Real host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysFiles;

impl HostFiles for SysFiles {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &str, value: &str) -> io::Result<()> {
        fs::write(path, value)
    }
}
