use crate::net::error::{NetworkError, NetworkResult};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Runner for the few external tools the data-plane still needs
/// (ethtool, ovs-dpctl, iptables). Arguments are passed as a list,
/// never through a shell.
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn run(program: &str, args: &[&str]) -> NetworkResult<CommandResult> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(NetworkError::Io)?;

        Ok(CommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }

    /// Check if a command is available in the system PATH
    pub fn is_available(program: &str) -> bool {
        Command::new("which")
            .arg(program)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}
