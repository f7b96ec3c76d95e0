//! # mender-policy
//!
//! The command policy for the mender executor.
//!
//! ## Overview
//!
//! [`SafetyPolicy`] implements [`CommandPolicy`](mender_core::traits::CommandPolicy).
//! It decides which commands need `sudo`, injects non-interactive flags into
//! package-manager invocations, offers read-only idempotence probes and
//! enforces any extra forbidden patterns from a TOML file.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use mender_policy::SafetyPolicy;
//!
//! let policy = SafetyPolicy::builtin();
//! // Pass `policy` to `mender_core::CommandExecutor::new(...)`.
//! ```
//!
//! ## Elevation
//!
//! System-scope tools (package managers, `systemctl`, `mount`, ...) get a
//! `sudo` prefix. Read-only queries (`systemctl status`, `rpm -q`) and
//! user-scoped invocations (`systemctl --user`) do not.

pub mod engine;
pub mod normalize;
pub mod rule;

pub use engine::SafetyPolicy;
pub use rule::{ElevationConfig, ForbiddenRule, PolicyConfig, UserScope};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use mender_contracts::{error::MenderError, execution::PreparedCommand};
    use mender_core::traits::{CommandPolicy, CommandVerdict};

    use crate::SafetyPolicy;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn permitted(policy: &SafetyPolicy, command: &str) -> PreparedCommand {
        match policy.evaluate(command) {
            CommandVerdict::Permitted(prepared) => prepared,
            other => panic!("expected Permitted for '{command}', got {:?}", other),
        }
    }

    // ── 1. elevation and non-interactive injection ────────────────────────────

    /// A system package install gets both `sudo` and `-y`.
    #[test]
    fn test_apt_get_install_is_elevated_and_non_interactive() {
        let prepared = permitted(&SafetyPolicy::builtin(), "apt-get install foo");

        assert_eq!(prepared.command, "sudo apt-get install -y foo");
        assert_eq!(prepared.original, "apt-get install foo");
        assert!(prepared.elevated);
        assert!(prepared.non_interactive_injected);
    }

    #[test]
    fn test_dnf_upgrade_and_pacman_sync() {
        let policy = SafetyPolicy::builtin();
        assert_eq!(permitted(&policy, "dnf upgrade --refresh").command, "sudo dnf upgrade -y --refresh");
        assert_eq!(permitted(&policy, "pacman -Syu").command, "sudo pacman -Syu --noconfirm");
        assert_eq!(permitted(&policy, "zypper in vlc").command, "sudo zypper in -y vlc");
    }

    /// Existing sudo and confirmation flags are left alone.
    #[test]
    fn test_no_double_sudo_or_flag() {
        let policy = SafetyPolicy::builtin();

        let prepared = permitted(&policy, "sudo dnf install -y pipewire-pulseaudio");
        assert_eq!(prepared.command, "sudo dnf install -y pipewire-pulseaudio");
        assert!(prepared.elevated);
        assert!(!prepared.non_interactive_injected);

        assert_eq!(
            permitted(&policy, "apt-get -qy install curl").command,
            "sudo apt-get -qy install curl"
        );
        assert_eq!(
            permitted(&policy, "dnf --assumeyes install htop").command,
            "sudo dnf --assumeyes install htop"
        );
    }

    /// `-n` only counts as a confirmation for zypper.
    #[test]
    fn test_short_n_is_zypper_only() {
        let policy = SafetyPolicy::builtin();

        let zypper = permitted(&policy, "zypper -n in vlc");
        assert_eq!(zypper.command, "sudo zypper -n in vlc");
        assert!(!zypper.non_interactive_injected);

        let apt = permitted(&policy, "apt-get -n install curl");
        assert_eq!(apt.command, "sudo apt-get -n install -y curl");
        assert!(apt.non_interactive_injected);
        assert_eq!(
            permitted(&policy, "dnf -n install htop").command,
            "sudo dnf -n install -y htop"
        );
    }

    // ── 2. user scope and read-only exemptions ────────────────────────────────

    /// The user-session service manager never gets sudo.
    #[test]
    fn test_user_scoped_systemctl_is_not_elevated() {
        let policy = SafetyPolicy::builtin();

        let prepared = permitted(&policy, "systemctl --user restart pipewire wireplumber");
        assert_eq!(prepared.command, "systemctl --user restart pipewire wireplumber");
        assert!(!prepared.elevated);

        let system = permitted(&policy, "systemctl restart NetworkManager");
        assert_eq!(system.command, "sudo systemctl restart NetworkManager");
        assert!(system.elevated);
    }

    #[test]
    fn test_read_only_queries_are_not_elevated() {
        let policy = SafetyPolicy::builtin();
        for command in [
            "systemctl status bluetooth",
            "systemctl --no-pager is-active pipewire",
            "systemctl --failed",
            "rpm -qa",
            "dnf check-update",
            "journalctl -b -p err",
        ] {
            let prepared = permitted(&policy, command);
            assert_eq!(prepared.command, command, "'{command}' must be unchanged");
            assert!(!prepared.elevated);
        }
    }

    #[test]
    fn test_prefix_boundaries() {
        let policy = SafetyPolicy::builtin();
        assert!(permitted(&policy, "grub2-mkconfig -o /boot/grub2/grub.cfg").elevated);
        assert!(permitted(&policy, "journalctl --vacuum-size=200M").elevated);
        // `dnf` must not match a different tool that merely starts with it.
        assert!(!permitted(&policy, "dnfdragora").elevated);
        assert!(!permitted(&policy, "mountpoint /boot").elevated);
    }

    // ── 3. compound commands ──────────────────────────────────────────────────

    #[test]
    fn test_compound_command_normalized_per_segment() {
        let prepared = permitted(
            &SafetyPolicy::builtin(),
            "dnf install ffmpegthumbnailer && systemctl --user restart tumblerd; rm -rf ~/.cache/thumbnails",
        );
        assert_eq!(
            prepared.command,
            "sudo dnf install -y ffmpegthumbnailer && systemctl --user restart tumblerd; rm -rf ~/.cache/thumbnails"
        );
        assert!(prepared.elevated);
    }

    /// Quoted commands are not split on separators inside the quotes.
    #[test]
    fn test_quoted_command_is_opaque() {
        let command = r#"sh -c "echo a; echo b""#;
        assert_eq!(permitted(&SafetyPolicy::builtin(), command).command, command);
    }

    // ── 4. configured bans ────────────────────────────────────────────────────

    #[test]
    fn test_configured_forbidden_rule() {
        let toml = r#"
            [[forbidden]]
            id = "no-selinux-off"
            pattern = 'setenforce\s+0'
            reason = "disabling SELinux is not a fix"
        "#;
        let policy = SafetyPolicy::from_toml_str(toml).unwrap();
        assert_eq!(policy.extra_rule_count(), 1);

        match policy.evaluate("setenforce 0") {
            CommandVerdict::Forbidden { rule_id, reason } => {
                assert_eq!(rule_id, "no-selinux-off");
                assert!(reason.contains("SELinux"));
            }
            other => panic!("expected Forbidden, got {:?}", other),
        }

        // Other commands are unaffected.
        assert!(permitted(&policy, "setenforce 1").elevated);
    }

    /// Bans are also checked against the normalized command.
    #[test]
    fn test_configured_rule_sees_normalized_command() {
        let toml = r#"
            [[forbidden]]
            id = "no-sudo-rpm-erase"
            pattern = 'sudo rpm -e'
            reason = "erase packages through dnf"
        "#;
        let policy = SafetyPolicy::from_toml_str(toml).unwrap();
        assert!(matches!(policy.evaluate("rpm -e nano"), CommandVerdict::Forbidden { .. }));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let toml = r#"
            [[forbidden]]
            id = "broken"
            pattern = '(unclosed'
            reason = "x"
        "#;
        match SafetyPolicy::from_toml_str(toml) {
            Err(MenderError::ConfigError { reason }) => assert!(reason.contains("broken")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        match SafetyPolicy::from_toml_str("forbidden = 12") {
            Err(MenderError::ConfigError { reason }) => {
                assert!(reason.contains("failed to parse policy TOML"));
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    // ── 5. configured elevation ───────────────────────────────────────────────

    #[test]
    fn test_extra_prefixes_and_user_scopes() {
        let toml = r#"
            inject_non_interactive = false

            [elevation]
            extra_prefixes = ["tuned-adm"]
            user_scoped = [{ tool = "podman", marker = "--user" }]
        "#;
        let policy = SafetyPolicy::from_toml_str(toml).unwrap();

        assert_eq!(permitted(&policy, "tuned-adm profile powersave").command, "sudo tuned-adm profile powersave");
        assert_eq!(permitted(&policy, "apt-get install foo").command, "sudo apt-get install foo");
        assert!(!permitted(&policy, "systemctl --user start foo").elevated);
    }

    // ── 6. idempotence probes ─────────────────────────────────────────────────

    #[test]
    fn test_probes_for_common_commands() {
        let policy = SafetyPolicy::builtin();
        assert_eq!(policy.precheck("sudo dnf install -y vlc ffmpeg").as_deref(), Some("rpm -q vlc ffmpeg"));
        assert_eq!(policy.precheck("sudo apt-get install -y curl").as_deref(), Some("dpkg -s curl"));
        assert_eq!(policy.precheck("sudo pacman -S --noconfirm htop").as_deref(), Some("pacman -Q htop"));
        assert_eq!(
            policy.precheck("sudo systemctl enable --now bluetooth").as_deref(),
            Some("systemctl is-enabled bluetooth && systemctl is-active bluetooth")
        );
        assert_eq!(
            policy.precheck("systemctl --user start pipewire").as_deref(),
            Some("systemctl --user is-active pipewire")
        );
        assert_eq!(policy.precheck("mkdir -p ~/.local/bin").as_deref(), Some("test -d ~/.local/bin"));
    }

    #[test]
    fn test_no_probe_for_unsafe_shapes() {
        let policy = SafetyPolicy::builtin();
        assert!(policy.precheck("sudo dnf install -y @development-tools").is_none());
        assert!(policy.precheck("sudo dnf install -y ./local.rpm").is_none());
        assert!(policy.precheck("dnf install foo && reboot").is_none());
        assert!(policy.precheck("systemctl restart sshd").is_none());
        assert!(policy.precheck("sudo pacman -Syu --noconfirm").is_none());
    }

    #[test]
    fn test_probes_can_be_disabled() {
        let policy = SafetyPolicy::from_toml_str("idempotence_probes = false").unwrap();
        assert!(policy.precheck("sudo dnf install -y vlc").is_none());
    }
}
