//! Helpers for the external device bridge tool.
//!
//! The bridge executable (`adb` unless overridden) handles everything
//! device-transport: enumerating connected devices and reaching the shell
//! of a specific one. Only its output is interpreted here.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the device-side automation helper service.
pub const DEFAULT_AGENT: &str = "atx-agent";

/// Invokes the device bridge executable.
#[derive(Debug, Clone)]
pub struct Bridge {
    program: PathBuf,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new("adb")
    }
}

impl Bridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Lists connected device identifiers.
    ///
    /// Parses the bridge's `devices` output: one `<id>\t<state>` line per
    /// device after the header, keeping only those in the `device` state.
    pub async fn list_devices(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.program)
            .arg("devices")
            .output()
            .await
            .map_err(|err| {
                Error::Bridge(format!("failed to run {}: {err}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(Error::Bridge(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_device_list(&stdout))
    }

    /// Kills the automation helper service on one device. A nonzero exit
    /// from `pkill` only means nothing matched, so it is not an error;
    /// failing to run the bridge at all is.
    pub async fn kill_agent(&self, device: &str, agent: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(["-s", device, "shell", "pkill", agent])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| {
                Error::Bridge(format!("failed to run {}: {err}", self.program.display()))
            })?;

        debug!(
            target = "pilot.bridge",
            device = %device,
            agent = %agent,
            code = ?status.code(),
            "helper cleanup issued"
        );
        Ok(())
    }
}

fn parse_device_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split('\t');
            match (cols.next(), cols.next()) {
                (Some(id), Some("device")) if !id.is_empty() => Some(id.to_string()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connected_devices_only() {
        let out = "List of devices attached\n\
                   192.168.1.20:5555\tdevice\n\
                   emulator-5554\toffline\n\
                   0a38c21f\tdevice\n\n";
        assert_eq!(
            parse_device_list(out),
            vec!["192.168.1.20:5555", "0a38c21f"]
        );
    }

    #[test]
    fn empty_listing_yields_no_devices() {
        assert!(parse_device_list("List of devices attached\n\n").is_empty());
    }
}
