//! One-time host classification: platform family and container/sandbox context.

use std::path::Path;

use serde::Serialize;

/// Env flag that forces sandbox mode (e.g. set by a container entrypoint).
pub const SANDBOX_ENV: &str = "HOSTRELAY_SANDBOX";

/// Marker files left by common container runtimes.
const CONTAINER_MARKERS: &[&str] = &["/.dockerenv", "/run/.containerenv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Posix,
    Windows,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Posix
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostPlatform::Posix => "posix",
            HostPlatform::Windows => "windows",
        }
    }
}

/// Result of host detection. Computed once at startup and never re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostEnvironment {
    pub platform: HostPlatform,
    pub sandboxed: bool,
}

impl HostEnvironment {
    pub fn detect() -> Self {
        let env_flag = std::env::var(SANDBOX_ENV).ok();
        let container_var = std::env::var("container").ok();
        let marker = CONTAINER_MARKERS.iter().any(|m| Path::new(m).exists());
        let sandboxed = sandbox_detected(env_flag.as_deref(), container_var.as_deref(), marker);
        let env = Self {
            platform: HostPlatform::current(),
            sandboxed,
        };
        log::info!(
            "host detected: platform={} sandboxed={}",
            env.platform.as_str(),
            env.sandboxed
        );
        env
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// The explicit flag wins in both directions; otherwise any container hint counts.
fn sandbox_detected(env_flag: Option<&str>, container_var: Option<&str>, marker: bool) -> bool {
    if let Some(flag) = env_flag.map(str::trim).filter(|s| !s.is_empty()) {
        return is_truthy(flag);
    }
    let container_hint = container_var.map(|s| !s.trim().is_empty()).unwrap_or(false);
    container_hint || marker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flag_overrides_markers() {
        assert!(sandbox_detected(Some("1"), None, false));
        assert!(!sandbox_detected(Some("false"), Some("docker"), true));
    }

    #[test]
    fn container_hints_count_without_flag() {
        assert!(sandbox_detected(None, Some("podman"), false));
        assert!(sandbox_detected(None, None, true));
        assert!(!sandbox_detected(None, Some(" "), false));
        assert!(!sandbox_detected(Some(""), None, false));
    }
}
