//! Policy configuration schema.
//!
//! A `PolicyConfig` is deserialized from TOML. Every section is optional: an
//! empty document yields the built-in behaviour. Configuration can only make
//! the policy stricter about what runs; the built-in forbidden list in
//! `mender_core::guard` is not represented here and cannot be switched off.

use serde::{Deserialize, Serialize};

/// An additional forbidden pattern.
///
/// Example in TOML:
/// ```toml
/// [[forbidden]]
/// id = "no-selinux-off"
/// pattern = 'setenforce\s+0'
/// reason = "disabling SELinux is not a fix"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForbiddenRule {
    /// Stable identifier used in logs and error messages.
    pub id: String,

    /// Regular expression searched anywhere in the command.
    pub pattern: String,

    /// Shown to the operator and fed back to the model.
    pub reason: String,
}

/// A tool that is privileged except when invoked with a user-scope marker,
/// such as `systemctl --user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScope {
    pub tool: String,
    pub marker: String,
}

/// Which commands need `sudo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElevationConfig {
    /// Command prefixes that need elevation, on top of the built-in ones.
    #[serde(default)]
    pub extra_prefixes: Vec<String>,

    /// User-scope exemptions, on top of the built-in ones.
    #[serde(default)]
    pub user_scoped: Vec<UserScope>,
}

fn default_true() -> bool {
    true
}

/// The top-level structure deserialized from a TOML policy file.
///
/// Example:
/// ```toml
/// inject_non_interactive = true
///
/// [elevation]
/// extra_prefixes = ["lvextend", "tuned-adm"]
/// user_scoped = [{ tool = "podman", marker = "--user" }]
///
/// [[forbidden]]
/// id = "no-kernel-removal"
/// pattern = 'dnf\s+remove\s+kernel'
/// reason = "removing kernels can leave the machine unbootable"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub forbidden: Vec<ForbiddenRule>,

    #[serde(default)]
    pub elevation: ElevationConfig,

    /// Inject `-y` / `--noconfirm` into package-manager invocations.
    #[serde(default = "default_true")]
    pub inject_non_interactive: bool,

    /// Offer read-only probes so already-applied changes are skipped.
    #[serde(default = "default_true")]
    pub idempotence_probes: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            forbidden: Vec::new(),
            elevation: ElevationConfig::default(),
            inject_non_interactive: true,
            idempotence_probes: true,
        }
    }
}
