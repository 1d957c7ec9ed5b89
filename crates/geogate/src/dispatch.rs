//! The decision dispatcher.
//!
//! Single consumer of probe verdicts and control-plane commands, and the
//! only writer of the classifier's persistent sets after startup. Probe
//! tasks and the API feed it over one mpsc channel, which keeps the
//! mutation ordering trivial.

use crate::collab::{DecisionProvider, RuleStore, ServiceControl};
use geogate_filter::{base_domain, has_direct_tld, has_ignored_suffix, is_system_domain, DomainClassifier};
use geogate_probe::ProbeVerdict;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

/// Messages accepted by the dispatcher.
pub enum DispatchMsg {
    /// A finished probe.
    Verdict {
        domain: String,
        verdict: ProbeVerdict,
    },
    /// Control-plane request: add a site plus everything observed alongside
    /// it recently, bypassing probing.
    AddSite {
        url: String,
        reply: oneshot::Sender<AddOutcome>,
    },
}

/// Result of an `AddSite` command.
#[derive(Debug)]
pub struct AddOutcome {
    /// Base domains that were added to the rules, site first.
    pub added: Vec<String>,
}

pub struct Dispatcher<D, R, S> {
    classifier: Arc<Mutex<DomainClassifier>>,
    decision: D,
    store: R,
    service: S,
    decision_timeout: Duration,
    history_ttl: Duration,
}

impl<D, R, S> Dispatcher<D, R, S>
where
    D: DecisionProvider,
    R: RuleStore,
    S: ServiceControl,
{
    pub fn new(
        classifier: Arc<Mutex<DomainClassifier>>,
        decision: D,
        store: R,
        service: S,
        decision_timeout: Duration,
        history_ttl: Duration,
    ) -> Self {
        Self {
            classifier,
            decision,
            store,
            service,
            decision_timeout,
            history_ttl,
        }
    }

    /// Consume messages until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<DispatchMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                DispatchMsg::Verdict { domain, verdict } => {
                    self.handle_verdict(&domain, verdict).await;
                }
                DispatchMsg::AddSite { url, reply } => {
                    let outcome = self.handle_add_site(&url).await;
                    let _ = reply.send(outcome);
                }
            }
        }
        debug!("dispatch channel closed");
    }

    async fn handle_verdict(&self, domain: &str, verdict: ProbeVerdict) {
        // Reachable needs no action.
        if verdict == ProbeVerdict::Reachable {
            return;
        }

        info!("{} looks blocked, asking for a decision", domain);

        let accepted =
            match tokio::time::timeout(self.decision_timeout, self.decision.decide(domain)).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!("decision provider failed for {}: {}", domain, e);
                    false
                }
                Err(_) => {
                    warn!("decision for {} timed out, treating as rejection", domain);
                    false
                }
            };

        if accepted {
            self.accept(domain).await;
        } else {
            self.reject(domain).await;
        }
    }

    async fn accept(&self, domain: &str) {
        // In-memory state first: even if persistence fails, the domain is
        // provisionally configured so it is not immediately re-probed. The
        // discrepancy reconciles on the next startup reload.
        self.classifier.lock().unwrap().mark_configured(domain);

        if let Err(e) = self.store.append_rule(domain).await {
            warn!("failed to persist rule for {}: {}", domain, e);
            return;
        }
        if let Err(e) = self.store.sync_remote(domain).await {
            warn!("failed to sync rule for {}: {}", domain, e);
        }
        if let Err(e) = self.service.restart().await {
            warn!("failed to restart service after adding {}: {}", domain, e);
        }

        info!("added {} to proxy rules", domain);
    }

    async fn reject(&self, domain: &str) {
        self.classifier.lock().unwrap().mark_ignored(domain);

        if let Err(e) = self.store.append_ignored(domain).await {
            warn!("failed to record rejection of {}: {}", domain, e);
        }

        info!("{} will be ignored from now on", domain);
    }

    /// Add a site and its recently co-observed domains, without probing.
    /// Co-occurrence within the history window is taken as sufficient
    /// evidence of relatedness.
    async fn handle_add_site(&self, url: &str) -> AddOutcome {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        else {
            warn!("control-plane add request with unusable url: {}", url);
            return AddOutcome { added: Vec::new() };
        };

        let site_base = base_domain(&host);
        let mut targets: Vec<String> = Vec::new();

        {
            let classifier = self.classifier.lock().unwrap();

            let mut related = BTreeSet::new();
            for recent in classifier.recent_domains(self.history_ttl) {
                if has_ignored_suffix(&recent.name) || is_system_domain(&recent.name) {
                    continue;
                }
                let base = base_domain(&recent.name);
                if base == site_base || has_direct_tld(&base) || classifier.is_configured(&base) {
                    continue;
                }
                related.insert(base);
            }

            if !classifier.is_configured(&site_base) {
                targets.push(site_base.clone());
            }
            targets.extend(related);
        }

        if targets.is_empty() {
            info!("nothing new to add for {}", host);
            return AddOutcome { added: targets };
        }

        for domain in &targets {
            self.classifier.lock().unwrap().mark_configured(domain);
            if let Err(e) = self.store.append_rule(domain).await {
                warn!("failed to persist rule for {}: {}", domain, e);
            }
        }

        let summary = targets.join(", ");
        if let Err(e) = self.store.sync_remote(&summary).await {
            warn!("failed to sync rules for {}: {}", summary, e);
        }
        if let Err(e) = self.service.restart().await {
            warn!("failed to restart service after adding {}: {}", summary, e);
        }

        info!("added {} domains for {}", targets.len(), host);
        AddOutcome { added: targets }
    }
}
