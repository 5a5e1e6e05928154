//! Agent Configuration
//!
//! Plain configuration values handed to the monitor and reconciler, plus
//! the helpers used to derive them from command-line input.

use crate::error::{Error, Result};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default rescan interval
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default sysfs mount point
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Default udev database directory
pub const DEFAULT_UDEV_DATA_DIR: &str = "/run/udev/data";

// =============================================================================
// Agent Configuration
// =============================================================================

/// Complete configuration of one agent instance
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name of the host this agent runs on
    pub node_name: String,
    /// Interval between full rescans
    pub scan_interval: Duration,
    /// Enable newly discovered disks
    pub enable_disks: bool,
    /// Root of the sysfs tree
    pub sysfs_root: PathBuf,
    /// Directory of the udev database
    pub udev_data_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: "unknown".to_string(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            enable_disks: false,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            udev_data_dir: PathBuf::from(DEFAULT_UDEV_DATA_DIR),
        }
    }
}

// =============================================================================
// Host Identity
// =============================================================================

/// Resolve the host name used to stamp disk records.
///
/// An explicit name wins; otherwise `/etc/hostname` and then the
/// `hostname` command are consulted.
pub fn resolve_node_name(explicit: Option<&str>) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    if let Ok(hostname) = fs::read_to_string("/etc/hostname") {
        let hostname = hostname.trim();
        if !hostname.is_empty() {
            return hostname.to_string();
        }
    }

    #[cfg(unix)]
    {
        use std::process::Command;
        if let Ok(output) = Command::new("hostname").output() {
            if output.status.success() {
                return String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
        }
    }

    "unknown".to_string()
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration such as `90s`, `1m`, `1h30m` or `2d`.
///
/// A trailing bare number is read as seconds. Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'd' | 'D' => 86400,
            'h' | 'H' => 3600,
            'm' | 'M' => 60,
            's' | 'S' => 1,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_secs = total_secs.saturating_add(num.saturating_mul(multiplier));
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_secs = total_secs.saturating_add(num);
    }

    if total_secs == 0 {
        return Err(Error::DurationParse(
            "duration must be greater than 0".to_string(),
        ));
    }

    Ok(Duration::from_secs(total_secs))
}
