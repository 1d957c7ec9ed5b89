//! External collaborators.
//!
//! Everything here is a thin I/O wrapper around something outside the
//! pipeline: the human decision dialog, the rule file and its git remote,
//! and the VPN service. The dispatcher only sees the traits, so tests can
//! swap all of it out.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RulesConfig;

/// Asks whether a blocked domain should be added to the proxy rules.
pub trait DecisionProvider {
    /// Returns `Ok(true)` on acceptance. May suspend for a long time
    /// waiting on a human; the dispatcher wraps it in a timeout and treats
    /// timeouts and errors as rejection.
    fn decide(&self, domain: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Durable storage for accepted and rejected domains.
pub trait RuleStore {
    /// Add a proxy rule for `domain` to the rule file.
    fn append_rule(&self, domain: &str) -> impl Future<Output = Result<()>> + Send;

    /// Record `domain` as rejected.
    fn append_ignored(&self, domain: &str) -> impl Future<Output = Result<()>> + Send;

    /// Propagate rule-file changes to the remote store.
    fn sync_remote(&self, summary: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Bounces the VPN/proxy service so it picks up new rules.
pub trait ServiceControl {
    fn restart(&self) -> impl Future<Output = Result<()>> + Send;
}

/// macOS dialog via osascript. The dialog gives up after 30 seconds,
/// which reads as a rejection.
pub struct DialogDecision;

impl DecisionProvider for DialogDecision {
    async fn decide(&self, domain: &str) -> Result<bool> {
        let script = format!(
            "display dialog \"Domain {domain} is not directly reachable.\\n\
             Add it to the proxy rules?\" \
             with title \"geogate\" \
             buttons {{\"Ignore\", \"Add\"}} \
             default button \"Add\" \
             giving up after 30"
        );

        let output = Command::new("/usr/bin/osascript")
            .arg("-e")
            .arg(&script)
            .stderr(Stdio::null())
            .output()
            .await
            .context("failed to run osascript")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains("Add") && !stdout.contains("gave up:true"))
    }
}

/// Rule store backed by the flat files in the config repo, synchronized
/// with a git remote.
pub struct FileRuleStore {
    repo_path: PathBuf,
    rule_path: PathBuf,
    ignored_path: PathBuf,
}

impl FileRuleStore {
    pub fn new(config: &RulesConfig) -> Self {
        Self {
            repo_path: config.repo_path.clone(),
            rule_path: config.rule_path(),
            ignored_path: config.ignored_path(),
        }
    }

    async fn run_git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .stdout(Stdio::null())
            .output()
            .await
            .context("failed to run git")?;

        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl RuleStore for FileRuleStore {
    async fn append_rule(&self, domain: &str) -> Result<()> {
        let content = match tokio::fs::read_to_string(&self.rule_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).context("failed to read rule file"),
        };

        let rule = format!("DOMAIN-SUFFIX,{},PROXY\n", domain);

        // Insert into the rule section: before the "// Proxy" marker if the
        // file has one, else before the FINAL rule, else at the end.
        let updated = if content.contains("// Proxy\n") {
            content.replacen("// Proxy\n", &format!("{}// Proxy\n", rule), 1)
        } else if let Some(pos) = content.find("FINAL,") {
            let mut updated = content.clone();
            updated.insert_str(pos, &rule);
            updated
        } else {
            format!("{}{}", content, rule)
        };

        tokio::fs::write(&self.rule_path, updated)
            .await
            .context("failed to write rule file")?;

        debug!("rule file updated with {}", domain);
        Ok(())
    }

    async fn append_ignored(&self, domain: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.ignored_path)
            .await
            .context("failed to open ignore file")?;

        file.write_all(format!("{}\n", domain).as_bytes())
            .await
            .context("failed to append to ignore file")?;
        Ok(())
    }

    async fn sync_remote(&self, summary: &str) -> Result<()> {
        let rule_file = self
            .rule_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let message = format!("Add {} to proxy", summary);
        self.run_git(&["add", rule_file.as_str()]).await?;
        self.run_git(&["commit", "-m", message.as_str()]).await?;
        self.run_git(&["push"]).await?;

        info!("pushed rule change for {}", summary);
        Ok(())
    }
}

/// Restarts a network service via `scutil --nc`. Disabled when no service
/// name is configured.
pub struct ScutilControl {
    service: Option<String>,
}

impl ScutilControl {
    pub fn new(service: Option<String>) -> Self {
        Self { service }
    }

    async fn scutil(&self, action: &str, service: &str) -> Result<()> {
        let status = Command::new("/usr/sbin/scutil")
            .args(["--nc", action, service])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("failed to run scutil")?;

        if !status.success() {
            bail!("scutil --nc {} {} failed", action, service);
        }
        Ok(())
    }
}

impl ServiceControl for ScutilControl {
    async fn restart(&self) -> Result<()> {
        let Some(service) = &self.service else {
            debug!("no VPN service configured, skipping restart");
            return Ok(());
        };

        info!("restarting {}", service);
        self.scutil("stop", service).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.scutil("start", service).await?;
        Ok(())
    }
}
