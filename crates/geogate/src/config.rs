//! Typed configuration with documented defaults, loadable from TOML.

use anyhow::{Context, Result};
use geogate_capture::CaptureConfig;
use geogate_filter::ClassifierConfig;
use geogate_probe::ProbeConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Rule file locations and downstream collaborators.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Directory holding the rule file, tracked by a git repo with a remote
    pub repo_path: PathBuf,
    /// Proxy rule file, relative to `repo_path` unless absolute
    pub rule_file: PathBuf,
    /// Flat list of rejected domains, relative to `repo_path` unless absolute
    pub ignored_file: PathBuf,
    /// scutil name of the VPN/proxy service to bounce after rule changes;
    /// unset disables the restart
    pub vpn_service: Option<String>,
    /// How long to wait for a decision before treating it as a rejection.
    /// Slightly above the dialog's own 30s give-up.
    pub decision_timeout_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        let repo_path = std::env::var_os("GEOGATE_REPO_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            repo_path,
            rule_file: PathBuf::from("rules.conf"),
            ignored_file: PathBuf::from("ignored_domains.txt"),
            vpn_service: None,
            decision_timeout_secs: 35,
        }
    }
}

impl RulesConfig {
    pub fn rule_path(&self) -> PathBuf {
        self.repo_path.join(&self.rule_file)
    }

    pub fn ignored_path(&self) -> PathBuf {
        self.repo_path.join(&self.ignored_file)
    }
}

/// Control-plane endpoint for the companion browser extension.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    /// Loopback port to listen on
    pub listen_port: u16,
    /// How far back co-observed domains count as related to a site
    pub history_ttl_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_port: 7890,
            history_ttl_secs: 60,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeogateConfig {
    pub capture: CaptureConfig,
    pub classifier: ClassifierConfig,
    pub probe: ProbeConfig,
    pub rules: RulesConfig,
    pub api: ApiConfig,
}

impl GeogateConfig {
    /// Load from a TOML file, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeogateConfig::default();
        assert_eq!(config.probe.check_timeout_secs, 3);
        assert_eq!(config.probe.check_port, 443);
        assert_eq!(config.probe.max_concurrent_checks, 5);
        assert_eq!(config.classifier.min_domain_length, 4);
        assert_eq!(config.classifier.recurrence_window_secs, 3600);
        assert_eq!(config.api.listen_port, 7890);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: GeogateConfig = toml::from_str(
            r#"
[probe]
check_timeout_secs = 5
max_concurrent_checks = 2

[rules]
vpn_service = "Shadowrocket"
"#,
        )
        .unwrap();

        assert_eq!(config.probe.check_timeout_secs, 5);
        assert_eq!(config.probe.max_concurrent_checks, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.probe.check_port, 443);
        assert_eq!(config.classifier.min_domain_length, 4);
        assert_eq!(config.rules.vpn_service.as_deref(), Some("Shadowrocket"));
    }

    #[test]
    fn test_rule_paths_join_repo() {
        let config = RulesConfig {
            repo_path: PathBuf::from("/tmp/repo"),
            ..RulesConfig::default()
        };
        assert_eq!(config.rule_path(), PathBuf::from("/tmp/repo/rules.conf"));
        assert_eq!(
            config.ignored_path(),
            PathBuf::from("/tmp/repo/ignored_domains.txt")
        );
    }
}
