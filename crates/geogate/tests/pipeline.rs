//! End-to-end pipeline tests with scripted collaborators.
//!
//! The capture feed, prober, decision dialog, rule store, and service
//! control are all replaced with in-memory versions; the classifier,
//! pipeline, and dispatcher under test are the real ones.

use anyhow::Result;
use geogate::collab::{DecisionProvider, RuleStore, ServiceControl};
use geogate::dispatch::{DispatchMsg, Dispatcher};
use geogate::pipeline::Pipeline;
use geogate_capture::{CaptureError, DomainEvent, DomainStream};
use geogate_filter::{ClassifierConfig, DomainClassifier};
use geogate_probe::{AvailabilityProbe, ProbeVerdict};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

struct ScriptedStream {
    events: VecDeque<String>,
}

impl ScriptedStream {
    fn new(names: &[&str]) -> Self {
        Self {
            events: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl DomainStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<DomainEvent, CaptureError> {
        match self.events.pop_front() {
            Some(name) => Ok(DomainEvent {
                name,
                observed_at: Instant::now(),
            }),
            None => Err(CaptureError::SourceExited),
        }
    }
}

/// Like `ScriptedStream`, but each event carries a scripted observation
/// instant instead of the wall clock.
struct TimedStream {
    events: VecDeque<(String, Instant)>,
}

impl TimedStream {
    fn new(events: Vec<(&str, Instant)>) -> Self {
        Self {
            events: events
                .into_iter()
                .map(|(name, at)| (name.to_string(), at))
                .collect(),
        }
    }
}

impl DomainStream for TimedStream {
    async fn next_event(&mut self) -> Result<DomainEvent, CaptureError> {
        match self.events.pop_front() {
            Some((name, observed_at)) => Ok(DomainEvent { name, observed_at }),
            None => Err(CaptureError::SourceExited),
        }
    }
}

#[derive(Clone)]
struct FakeProbe {
    blocked: Arc<HashSet<String>>,
    probed: Arc<Mutex<Vec<String>>>,
}

impl FakeProbe {
    fn new(blocked: &[&str]) -> Self {
        Self {
            blocked: Arc::new(blocked.iter().map(|d| d.to_string()).collect()),
            probed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

impl AvailabilityProbe for FakeProbe {
    async fn probe(&self, domain: &str) -> ProbeVerdict {
        self.probed.lock().unwrap().push(domain.to_string());
        if self.blocked.contains(domain) {
            ProbeVerdict::Blocked
        } else {
            ProbeVerdict::Reachable
        }
    }
}

#[derive(Clone)]
struct ScriptedDecision {
    accept: bool,
    delay: Duration,
    asked: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDecision {
    fn new(accept: bool) -> Self {
        Self {
            accept,
            delay: Duration::ZERO,
            asked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl DecisionProvider for ScriptedDecision {
    async fn decide(&self, domain: &str) -> Result<bool> {
        self.asked.lock().unwrap().push(domain.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.accept)
    }
}

#[derive(Clone, Default)]
struct MemoryRuleStore {
    rules: Arc<Mutex<Vec<String>>>,
    ignored: Arc<Mutex<Vec<String>>>,
    synced: Arc<Mutex<Vec<String>>>,
}

impl RuleStore for MemoryRuleStore {
    async fn append_rule(&self, domain: &str) -> Result<()> {
        self.rules.lock().unwrap().push(domain.to_string());
        Ok(())
    }

    async fn append_ignored(&self, domain: &str) -> Result<()> {
        self.ignored.lock().unwrap().push(domain.to_string());
        Ok(())
    }

    async fn sync_remote(&self, summary: &str) -> Result<()> {
        self.synced.lock().unwrap().push(summary.to_string());
        Ok(())
    }
}

struct NoopService;

impl ServiceControl for NoopService {
    async fn restart(&self) -> Result<()> {
        Ok(())
    }
}

fn fresh_classifier() -> Arc<Mutex<DomainClassifier>> {
    Arc::new(Mutex::new(DomainClassifier::new(
        ClassifierConfig::default(),
        HashSet::new(),
        HashSet::new(),
    )))
}

async fn run_scenario<S: DomainStream>(
    stream: S,
    probe: FakeProbe,
    decision: ScriptedDecision,
    store: MemoryRuleStore,
    decision_timeout: Duration,
) -> Arc<Mutex<DomainClassifier>> {
    let classifier = fresh_classifier();
    let (tx, rx) = mpsc::channel(16);

    let dispatcher = Dispatcher::new(
        classifier.clone(),
        decision,
        store,
        NoopService,
        decision_timeout,
        Duration::from_secs(60),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(rx));

    let pipeline = Pipeline::new(stream, probe, classifier.clone(), tx);
    let err = pipeline.run().await;
    assert!(matches!(err, CaptureError::SourceExited));

    // The channel closes once the last in-flight probe reports.
    dispatcher_task.await.unwrap();
    classifier
}

#[tokio::test]
async fn test_blocked_domain_dispatched_exactly_once() {
    // a.example.com repeats (deduped by the recurrence window) and
    // ru-site.ru is filtered before ever reaching the prober.
    let stream = ScriptedStream::new(&[
        "a.example.com",
        "b.example.com",
        "a.example.com",
        "ru-site.ru",
    ]);
    let probe = FakeProbe::new(&["a.example.com"]);
    let decision = ScriptedDecision::new(true);
    let store = MemoryRuleStore::default();

    let classifier = run_scenario(
        stream,
        probe.clone(),
        decision.clone(),
        store.clone(),
        Duration::from_secs(5),
    )
    .await;

    // Both fresh domains were probed, the repeat and the .ru were not.
    let probed: HashSet<String> = probe.probed().into_iter().collect();
    assert_eq!(probed.len(), probe.probed().len(), "no domain probed twice");
    assert_eq!(
        probed,
        HashSet::from(["a.example.com".to_string(), "b.example.com".to_string()])
    );

    // Exactly one decision, for the blocked domain.
    assert_eq!(decision.asked(), vec!["a.example.com".to_string()]);

    // Accepted: persisted, synced, and configured in memory.
    assert_eq!(*store.rules.lock().unwrap(), vec!["a.example.com".to_string()]);
    assert_eq!(*store.synced.lock().unwrap(), vec!["a.example.com".to_string()]);
    assert!(classifier.lock().unwrap().is_configured("a.example.com"));
    assert!(classifier.lock().unwrap().is_configured("cdn.a.example.com"));
}

#[tokio::test]
async fn test_rejected_domain_is_ignored() {
    let stream = ScriptedStream::new(&["blocked.example.net"]);
    let probe = FakeProbe::new(&["blocked.example.net"]);
    let decision = ScriptedDecision::new(false);
    let store = MemoryRuleStore::default();

    let classifier = run_scenario(
        stream,
        probe,
        decision.clone(),
        store.clone(),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(decision.asked(), vec!["blocked.example.net".to_string()]);
    assert!(store.rules.lock().unwrap().is_empty());
    assert_eq!(
        *store.ignored.lock().unwrap(),
        vec!["blocked.example.net".to_string()]
    );
    assert!(!classifier.lock().unwrap().is_configured("blocked.example.net"));
}

#[tokio::test]
async fn test_decision_timeout_counts_as_rejection() {
    let stream = ScriptedStream::new(&["slow.example.org"]);
    let probe = FakeProbe::new(&["slow.example.org"]);
    let mut decision = ScriptedDecision::new(true);
    decision.delay = Duration::from_secs(10);
    let store = MemoryRuleStore::default();

    run_scenario(
        stream,
        probe,
        decision,
        store.clone(),
        Duration::from_millis(50),
    )
    .await;

    // The accept never lands; the timeout downgrades it to a rejection.
    assert!(store.rules.lock().unwrap().is_empty());
    assert_eq!(
        *store.ignored.lock().unwrap(),
        vec!["slow.example.org".to_string()]
    );
}

#[tokio::test]
async fn test_recurrence_window_follows_observation_time() {
    // Three sightings of one domain: the second falls inside the window of
    // the first, the third is past it. The window is measured between the
    // events' own timestamps, so no real waiting is involved.
    let base = Instant::now();
    let window = Duration::from_secs(3600);
    let stream = TimedStream::new(vec![
        ("cdn.example.com", base),
        ("cdn.example.com", base + Duration::from_secs(10)),
        ("cdn.example.com", base + window + Duration::from_secs(1)),
    ]);
    let probe = FakeProbe::new(&[]);
    let decision = ScriptedDecision::new(true);
    let store = MemoryRuleStore::default();

    run_scenario(
        stream,
        probe.clone(),
        decision,
        store,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(
        probe.probed(),
        vec!["cdn.example.com".to_string(), "cdn.example.com".to_string()]
    );
}

#[tokio::test]
async fn test_reachable_verdicts_need_no_action() {
    let stream = ScriptedStream::new(&["fine.example.com", "also-fine.example.net"]);
    let probe = FakeProbe::new(&[]);
    let decision = ScriptedDecision::new(true);
    let store = MemoryRuleStore::default();

    run_scenario(
        stream,
        probe,
        decision.clone(),
        store.clone(),
        Duration::from_secs(5),
    )
    .await;

    assert!(decision.asked().is_empty());
    assert!(store.rules.lock().unwrap().is_empty());
    assert!(store.ignored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_add_site_gathers_co_observed_domains() {
    let classifier = fresh_classifier();

    // Simulate recent DNS observations: the classifier stamps accepted
    // domains into its recurrence table.
    {
        let mut c = classifier.lock().unwrap();
        assert!(c.should_check("shop.example.com"));
        assert!(c.should_check("cdn.shopstatic.net"));
        assert!(c.should_check("img.shopstatic.net"));
        assert!(!c.should_check("metrics.yandex.ru"));
    }

    let store = MemoryRuleStore::default();
    let (tx, rx) = mpsc::channel(16);
    let dispatcher = Dispatcher::new(
        classifier.clone(),
        ScriptedDecision::new(false),
        store.clone(),
        NoopService,
        Duration::from_secs(5),
        Duration::from_secs(60),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(rx));

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(DispatchMsg::AddSite {
        url: "https://shop.example.com/cart".to_string(),
        reply: reply_tx,
    })
    .await
    .unwrap();

    let outcome = reply_rx.await.unwrap();

    // Site base first, then related bases; the direct-TLD domain is left out.
    assert_eq!(outcome.added[0], "example.com");
    assert!(outcome.added.contains(&"shopstatic.net".to_string()));
    assert!(!outcome.added.iter().any(|d| d.ends_with(".ru")));

    assert!(classifier.lock().unwrap().is_configured("example.com"));
    assert!(classifier.lock().unwrap().is_configured("shopstatic.net"));
    assert_eq!(store.rules.lock().unwrap().len(), outcome.added.len());
    assert_eq!(store.synced.lock().unwrap().len(), 1);

    drop(tx);
    dispatcher_task.await.unwrap();
}
