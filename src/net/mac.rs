use crate::net::error::{NetworkError, NetworkResult};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Salt mixed into every deterministic derivation. Changing it changes
/// every host identity on the network, so it never changes.
const MAC_SALT: &[u8] = b"9oBJ0Jmip-";

/// A 6-byte hardware-style address. Always unicast and locally
/// administered, whichever way it was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwAddr([u8; 6]);

impl HwAddr {
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for HwAddr {
    fn from(octets: [u8; 6]) -> Self {
        HwAddr(octets)
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Generate a random locally-administered unicast MAC. Fails only if
/// the OS randomness source fails.
pub fn random_mac() -> NetworkResult<HwAddr> {
    let mut mac = [0u8; 6];
    OsRng
        .try_fill_bytes(&mut mac)
        .map_err(|e| NetworkError::Config(format!("randomness source failed: {}", e)))?;
    set_unicast_and_local(&mut mac);
    Ok(HwAddr(mac))
}

/// Derive a stable MAC from arbitrary seed bytes. Pure function: the
/// same seed always yields the same address, across restarts.
pub fn persistent_mac(seed: &[u8]) -> HwAddr {
    let mut hasher = Sha256::new();
    hasher.update(MAC_SALT);
    hasher.update(seed);
    let digest = hasher.finalize();

    let mut mac = [0u8; 6];
    mac.copy_from_slice(&digest[..6]);
    set_unicast_and_local(&mut mac);
    HwAddr(mac)
}

fn set_unicast_and_local(mac: &mut [u8; 6]) {
    mac[0] = (mac[0] & 0xfe) | 0x02;
}
