use std::fmt;

/// Error type for all data-plane provisioning operations
#[derive(Debug)]
pub enum NetworkError {
    /// Netlink operation failed
    Netlink(rtnetlink::Error),
    /// System I/O error
    Io(std::io::Error),
    /// External command execution failed
    Command { cmd: String, stderr: String },
    /// Invalid or unusable configuration
    Config(String),
    /// Resource not found (interface, address, etc.)
    NotFound(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Netlink(e) => write!(f, "netlink error: {}", e),
            NetworkError::Io(e) => write!(f, "io error: {}", e),
            NetworkError::Command { cmd, stderr } => {
                write!(f, "command '{}' failed: {}", cmd, stderr)
            }
            NetworkError::Config(msg) => write!(f, "config error: {}", msg),
            NetworkError::NotFound(msg) => write!(f, "not found: {}", msg),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<rtnetlink::Error> for NetworkError {
    fn from(e: rtnetlink::Error) -> Self {
        NetworkError::Netlink(e)
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::Io(e)
    }
}

pub type NetworkResult<T> = Result<T, NetworkError>;
