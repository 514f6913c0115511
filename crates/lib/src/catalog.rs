//! Command catalog: command key -> host-native shell invocation.
//!
//! One table per platform family; the table is picked once from [`HostEnvironment`]
//! and the resulting [`Catalog`] is never written again.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::platform::{HostEnvironment, HostPlatform};

/// Selector for a catalog entry. `custom` is not a key: it lives in [`crate::router::Selector`].
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum CommandKey {
    SystemInfo,
    DiskSpace,
    Uptime,
    Processes,
    Temperature,
    Memory,
    /// Diagnostic log tail. Read from files directly when sandboxed.
    Logs,
}

impl CommandKey {
    pub const ALL: [CommandKey; 7] = [
        CommandKey::SystemInfo,
        CommandKey::DiskSpace,
        CommandKey::Uptime,
        CommandKey::Processes,
        CommandKey::Temperature,
        CommandKey::Memory,
        CommandKey::Logs,
    ];

    /// Wire name used by the control panel payload (`{"command": "<name>"}`).
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKey::SystemInfo => "system_info",
            CommandKey::DiskSpace => "disk_space",
            CommandKey::Uptime => "uptime",
            CommandKey::Processes => "processes",
            CommandKey::Temperature => "temp",
            CommandKey::Memory => "memory",
            CommandKey::Logs => "logs",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const POSIX_TABLE: &[(CommandKey, &str)] = &[
    (
        CommandKey::SystemInfo,
        "neofetch --stdout 2>/dev/null || uname -a",
    ),
    (CommandKey::DiskSpace, "df -h"),
    (CommandKey::Uptime, "uptime"),
    (CommandKey::Processes, "ps aux --sort=-%cpu | head -15"),
    (CommandKey::Temperature, "sensors"),
    (CommandKey::Memory, "free -h"),
    (CommandKey::Logs, "journalctl -n 30 --no-pager"),
];

const WINDOWS_TABLE: &[(CommandKey, &str)] = &[
    (CommandKey::SystemInfo, "systeminfo"),
    (
        CommandKey::DiskSpace,
        "wmic logicaldisk get size,freespace,caption",
    ),
    (CommandKey::Uptime, "net stats srv"),
    (CommandKey::Processes, "tasklist /FO TABLE /SORT:CPU"),
    (
        CommandKey::Temperature,
        r"wmic /namespace:\\root\wmi PATH MSAcpi_ThermalZoneTemperature get CurrentTemperature",
    ),
    (
        CommandKey::Memory,
        "wmic OS get TotalVisibleMemorySize,FreePhysicalMemory /format:list",
    ),
    (
        CommandKey::Logs,
        r#"powershell -NoProfile -Command "Get-EventLog -LogName System -Newest 30 | Format-Table -AutoSize""#,
    ),
];

const POSIX_IP_PROBE: &str = "hostname -I 2>/dev/null | awk '{print $1}'";
const WINDOWS_IP_PROBE: &str = r#"powershell -NoProfile -Command "(Get-NetIPAddress -AddressFamily IPv4 | Where-Object { $_.InterfaceAlias -notlike '*Loopback*' } | Select-Object -First 1).IPAddress""#;

/// Key -> invocation table for this host, plus the log fallback files and the local IP probe.
#[derive(Debug, Clone)]
pub struct Catalog {
    platform: HostPlatform,
    entries: HashMap<CommandKey, String>,
    /// Set only when running sandboxed: `logs` reads these files instead of invoking a shell.
    log_fallbacks: Option<Vec<PathBuf>>,
    ip_probe: String,
}

impl Catalog {
    /// Build the catalog for the detected host. `log_fallbacks` are relative to the base directory.
    pub fn for_host(env: &HostEnvironment, log_fallbacks: Vec<PathBuf>) -> Self {
        let (table, ip_probe) = match env.platform {
            HostPlatform::Posix => (POSIX_TABLE, POSIX_IP_PROBE),
            HostPlatform::Windows => (WINDOWS_TABLE, WINDOWS_IP_PROBE),
        };
        let entries = table
            .iter()
            .map(|(k, inv)| (*k, (*inv).to_string()))
            .collect();
        Self {
            platform: env.platform,
            entries,
            log_fallbacks: env.sandboxed.then_some(log_fallbacks),
            ip_probe: ip_probe.to_string(),
        }
    }

    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    pub fn resolve(&self, key: CommandKey) -> Option<&str> {
        self.entries.get(&key).map(String::as_str)
    }

    /// Candidate log files, in order, when `logs` must bypass the shell.
    pub fn log_fallbacks(&self) -> Option<&[PathBuf]> {
        self.log_fallbacks.as_deref()
    }

    /// Invocation that prints the host's primary IPv4 address.
    pub fn ip_probe(&self) -> &str {
        &self.ip_probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(platform: HostPlatform, sandboxed: bool) -> HostEnvironment {
        HostEnvironment {
            platform,
            sandboxed,
        }
    }

    #[test]
    fn every_key_resolves_on_both_platforms() {
        for platform in [HostPlatform::Posix, HostPlatform::Windows] {
            let catalog = Catalog::for_host(&env(platform, false), vec![]);
            for key in CommandKey::ALL {
                let inv = catalog.resolve(key).unwrap_or_default();
                assert!(!inv.trim().is_empty(), "{:?} {} has no invocation", platform, key);
            }
            assert!(!catalog.ip_probe().is_empty());
        }
    }

    #[test]
    fn resolve_is_stable() {
        let catalog = Catalog::for_host(&env(HostPlatform::Posix, false), vec![]);
        assert_eq!(
            catalog.resolve(CommandKey::DiskSpace),
            catalog.resolve(CommandKey::DiskSpace)
        );
        assert_eq!(catalog.resolve(CommandKey::DiskSpace), Some("df -h"));
    }

    #[test]
    fn log_fallbacks_only_when_sandboxed() {
        let paths = vec![PathBuf::from("bot.log")];
        let host = Catalog::for_host(&env(HostPlatform::Posix, false), paths.clone());
        assert!(host.log_fallbacks().is_none());
        let boxed = Catalog::for_host(&env(HostPlatform::Posix, true), paths.clone());
        assert_eq!(boxed.log_fallbacks(), Some(paths.as_slice()));
    }

    #[test]
    fn key_names_round_trip() {
        for key in CommandKey::ALL {
            assert_eq!(CommandKey::from_name(key.as_str()), Some(key));
        }
        assert_eq!(CommandKey::from_name("custom"), None);
        assert_eq!(CommandKey::from_name("DISK_SPACE"), None);
    }
}
