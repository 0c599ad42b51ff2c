use crate::net::error::{NetworkError, NetworkResult};
use crate::net::host::{HostFiles, SYS_HYPERVISOR_UUID, SYS_PRODUCT_UUID};
use crate::net::mac::{persistent_mac, random_mac};
use crate::store::PeerNameStore;
use std::io;

fn is_not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Legacy system identity: the DMI product UUID, else the hypervisor UUID.
fn old_style_system_uuid<H: HostFiles>(host: &H) -> io::Result<Vec<u8>> {
    match host.read(SYS_PRODUCT_UUID) {
        Err(e) if is_not_found(&e) => host.read(SYS_HYPERVISOR_UUID),
        other => other,
    }
}

/// Combined identity: host machine-id followed by the legacy UUID bytes.
/// Either part may be absent; "not found" is absence, any other read
/// error is fatal (except the dbus fallback, whose failure is ignored).
fn system_uuid<H: HostFiles>(host: &H, host_root: &str) -> NetworkResult<Vec<u8>> {
    let uuid = match old_style_system_uuid(host) {
        Ok(uuid) => uuid,
        Err(e) if is_not_found(&e) => Vec::new(),
        Err(e) => return Err(NetworkError::Io(e)),
    };

    let machine_id = match host.read(&format!("{}/etc/machine-id", host_root)) {
        Ok(id) => id,
        Err(e) if is_not_found(&e) => host
            .read(&format!("{}/var/lib/dbus/machine-id", host_root))
            .unwrap_or_default(),
        Err(e) => return Err(NetworkError::Io(e)),
    };

    let mut combined = machine_id;
    combined.extend_from_slice(&uuid);
    Ok(combined)
}

/// Resolve the host's stable overlay peer name.
///
/// Precedence:
/// 1. A persisted name matching the derivation from the legacy system
///    UUID is returned verbatim, so a previously assigned identity
///    survives upgrades that change which inputs are available.
/// 2. Otherwise derive from machine-id + legacy UUID, when any bytes
///    were found.
/// 3. Otherwise a random address. Fails only if randomness fails.
pub fn get_system_peer_name<H, S>(host: &H, store: &S, host_root: &str) -> NetworkResult<String>
where
    H: HostFiles,
    S: PeerNameStore,
{
    if let Ok(old_uuid) = old_style_system_uuid(host) {
        if let Some(persisted) = store.load_peer_name() {
            if persisted == persistent_mac(&old_uuid).to_string() {
                return Ok(persisted);
            }
        }
    }

    let combined = system_uuid(host, host_root)?;
    if !combined.is_empty() {
        Ok(persistent_mac(&combined).to_string())
    } else {
        Ok(random_mac()?.to_string())
    }
}
