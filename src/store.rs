use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Read-only view of the overlay's persisted state, used solely to
/// recover a previously assigned peer name. The store itself is owned
/// elsewhere; this subsystem never writes it.
pub trait PeerNameStore {
    /// The persisted peer name, if one exists. Absence and read failure
    /// are the same thing: no persisted value.
    fn load_peer_name(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct StoreData {
    peer_name: Option<String>,
}

/// File-backed store reader: `<prefix>data.json`.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(prefix: &str) -> Self {
        Self {
            path: PathBuf::from(format!("{}data.json", prefix)),
        }
    }
}

impl PeerNameStore for JsonFileStore {
    fn load_peer_name(&self) -> Option<String> {
        let bytes = fs::read(&self.path).ok()?;
        let data: StoreData = serde_json::from_slice(&bytes).ok()?;
        data.peer_name
    }
}
