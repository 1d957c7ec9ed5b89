//! The stateful domain classifier.
//!
//! `should_check` is an ordered short-circuit pipeline; order matters
//! because later checks are redundant once an earlier one matches. All
//! steps are pure reads except the final recurrence stamp.

use crate::rules::{has_direct_tld, has_ignored_suffix, is_system_domain};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

/// Classifier configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum name length worth probing; anything shorter is a capture
    /// artifact or a bare label
    pub min_domain_length: usize,
    /// Seconds before a previously-checked domain may be probed again
    pub recurrence_window_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_domain_length: 4,
            recurrence_window_secs: 3600,
        }
    }
}

/// A domain seen recently, with how long ago it was stamped.
#[derive(Debug, Clone)]
pub struct RecentDomain {
    pub name: String,
    pub age: Duration,
}

/// Decides which observed domains merit an active probe.
///
/// Owns the long-lived allow/deny sets and the time-windowed recurrence
/// table. The persistent sets are mutated only by the dispatcher, via
/// [`mark_configured`](Self::mark_configured) and
/// [`mark_ignored`](Self::mark_ignored).
pub struct DomainClassifier {
    config: ClassifierConfig,
    window: Duration,
    /// Domains already governed by an existing proxy rule
    configured: HashSet<String>,
    /// Domains a human previously rejected
    ignored: HashSet<String>,
    /// Last time each domain was dispatched to the prober
    recently_checked: HashMap<String, Instant>,
}

impl DomainClassifier {
    /// Create a classifier from startup state.
    pub fn new(
        config: ClassifierConfig,
        configured: HashSet<String>,
        ignored: HashSet<String>,
    ) -> Self {
        let window = Duration::from_secs(config.recurrence_window_secs);
        Self {
            config,
            window,
            configured,
            ignored,
            recently_checked: HashMap::new(),
        }
    }

    /// Decide whether `domain` should be dispatched to the prober.
    ///
    /// On `true`, the domain is stamped into the recurrence table, so a
    /// repeat within the window is rejected. On `false`, no state changes.
    pub fn should_check(&mut self, domain: &str) -> bool {
        self.should_check_at(domain, Instant::now())
    }

    /// As [`should_check`](Self::should_check), with the caller supplying
    /// the observation instant. The recurrence window is measured between
    /// observations, not between calls.
    pub fn should_check_at(&mut self, domain: &str, now: Instant) -> bool {
        // 1. Too short to be a real, probeable name.
        if domain.len() < self.config.min_domain_length {
            return false;
        }

        // 2. Local/internal suffix.
        if has_ignored_suffix(domain) {
            return false;
        }

        // 3. Direct-routed TLD.
        if has_direct_tld(domain) {
            return false;
        }

        // 4. First-party system domain.
        if is_system_domain(domain) {
            return false;
        }

        // 5. Already governed by a rule, exactly or via a parent.
        if self.is_configured(domain) {
            return false;
        }

        // 6. Previously rejected by the user.
        if self.ignored.contains(domain) {
            return false;
        }

        // 7. Checked within the recurrence window.
        if let Some(stamp) = self.recently_checked.get(domain) {
            if now.duration_since(*stamp) < self.window {
                return false;
            }
        }

        // Accepted: prune expired entries and stamp this one.
        self.prune(now);
        self.recently_checked.insert(domain.to_string(), now);
        debug!("accepted {} for probing", domain);
        true
    }

    /// Check whether a domain is governed by an existing rule, either
    /// exactly or as a subdomain of a configured entry.
    pub fn is_configured(&self, domain: &str) -> bool {
        if self.configured.contains(domain) {
            return true;
        }

        // Walk parent names: a.b.example.com matches a rule for example.com.
        let parts: Vec<&str> = domain.split('.').collect();
        for i in 1..parts.len() {
            let parent = parts[i..].join(".");
            if self.configured.contains(&parent) {
                return true;
            }
        }

        false
    }

    /// Record a domain as governed by a rule. Dispatcher-only.
    pub fn mark_configured(&mut self, domain: &str) {
        self.configured.insert(domain.to_ascii_lowercase());
    }

    /// Record a domain as rejected by the user. Dispatcher-only.
    pub fn mark_ignored(&mut self, domain: &str) {
        self.ignored.insert(domain.to_ascii_lowercase());
    }

    /// Domains stamped within the last `within`, newest first.
    ///
    /// Read-only view over the recurrence table, used by the control-plane
    /// to gather domains co-observed with a site.
    pub fn recent_domains(&self, within: Duration) -> Vec<RecentDomain> {
        self.recent_domains_at(within, Instant::now())
    }

    fn recent_domains_at(&self, within: Duration, now: Instant) -> Vec<RecentDomain> {
        let mut recent: Vec<RecentDomain> = self
            .recently_checked
            .iter()
            .filter_map(|(name, stamp)| {
                let age = now.duration_since(*stamp);
                (age < within).then(|| RecentDomain {
                    name: name.clone(),
                    age,
                })
            })
            .collect();

        recent.sort_by_key(|d| d.age);
        recent
    }

    /// Number of domains currently governed by rules.
    pub fn configured_count(&self) -> usize {
        self.configured.len()
    }

    /// Number of entries in the recurrence table (including expired ones
    /// not yet pruned).
    pub fn tracked_count(&self) -> usize {
        self.recently_checked.len()
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.recently_checked
            .retain(|_, stamp| now.duration_since(*stamp) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> DomainClassifier {
        DomainClassifier::new(
            ClassifierConfig::default(),
            HashSet::from(["configured.com".to_string()]),
            HashSet::from(["rejected-site.com".to_string()]),
        )
    }

    #[test]
    fn test_short_domains_rejected() {
        let mut c = classifier();
        assert!(!c.should_check("a.b"));
        assert!(!c.should_check("x.y"));
        assert!(!c.should_check(""));
        assert!(c.should_check("ab.co"));
    }

    #[test]
    fn test_ignored_suffixes_rejected() {
        let mut c = classifier();
        assert!(!c.should_check("printer.local"));
        assert!(!c.should_check("db.internal"));
        assert!(!c.should_check("1.0.0.127.in-addr.arpa"));
        assert!(!c.should_check("router.lan"));
    }

    #[test]
    fn test_direct_tlds_rejected() {
        let mut c = classifier();
        assert!(!c.should_check("yandex.ru"));
        assert!(!c.should_check("site.com.ru"));
        assert!(!c.should_check("example.xn--p1ai"));
    }

    #[test]
    fn test_system_domains_rejected() {
        let mut c = classifier();
        assert!(!c.should_check("apple.com"));
        assert!(!c.should_check("gateway.icloud.com"));
        // Not a subdomain, just a similar name: must pass this step.
        assert!(c.should_check("notapple.com"));
    }

    #[test]
    fn test_configured_domains_rejected() {
        let mut c = classifier();
        assert!(!c.should_check("configured.com"));
        assert!(!c.should_check("cdn.configured.com"));
        assert!(!c.should_check("a.b.configured.com"));
        assert!(c.should_check("unconfigured.com"));
    }

    #[test]
    fn test_ignored_domains_rejected() {
        let mut c = classifier();
        assert!(!c.should_check("rejected-site.com"));
    }

    #[test]
    fn test_recurrence_window() {
        let mut c = classifier();
        let t0 = Instant::now();

        assert!(c.should_check_at("fresh.example.com", t0));
        // Immediately after: deduped.
        assert!(!c.should_check_at("fresh.example.com", t0));
        // Just inside the window: still deduped.
        assert!(!c.should_check_at("fresh.example.com", t0 + Duration::from_secs(3599)));
        // Window elapsed: probeable again.
        assert!(c.should_check_at("fresh.example.com", t0 + Duration::from_secs(3601)));
    }

    #[test]
    fn test_rejection_does_not_stamp() {
        let mut c = classifier();
        assert!(!c.should_check("yandex.ru"));
        assert_eq!(c.tracked_count(), 0);
    }

    #[test]
    fn test_expired_entries_pruned_on_accept() {
        let mut c = classifier();
        let t0 = Instant::now();

        assert!(c.should_check_at("old.example.com", t0));
        let later = t0 + Duration::from_secs(3700);
        assert!(c.should_check_at("new.example.com", later));

        // The expired stamp for old.example.com is gone.
        assert_eq!(c.tracked_count(), 1);
    }

    #[test]
    fn test_mark_configured_takes_effect() {
        let mut c = classifier();
        assert!(c.should_check("blocked.example.com"));

        c.mark_configured("blocked.example.com");
        let t = Instant::now() + Duration::from_secs(7200);
        // Even past the recurrence window, a configured domain stays out.
        assert!(!c.should_check_at("blocked.example.com", t));
        assert!(!c.should_check_at("sub.blocked.example.com", t));
    }

    #[test]
    fn test_mark_ignored_takes_effect() {
        let mut c = classifier();
        assert!(c.should_check("meh.example.com"));

        c.mark_ignored("meh.example.com");
        let t = Instant::now() + Duration::from_secs(7200);
        assert!(!c.should_check_at("meh.example.com", t));
    }

    #[test]
    fn test_recent_domains_window_and_order() {
        let mut c = classifier();
        let t0 = Instant::now();

        assert!(c.should_check_at("older.example.com", t0));
        assert!(c.should_check_at("newer.example.com", t0 + Duration::from_secs(50)));

        let now = t0 + Duration::from_secs(55);
        let recent = c.recent_domains_at(Duration::from_secs(60), now);
        let names: Vec<&str> = recent.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["newer.example.com", "older.example.com"]);

        // Only entries younger than the cutoff are reported.
        let recent = c.recent_domains_at(Duration::from_secs(10), now);
        let names: Vec<&str> = recent.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["newer.example.com"]);
    }
}
