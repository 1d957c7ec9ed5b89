//! geogate daemon entry point.
//!
//! Wires the capture source, classifier, prober, dispatcher, and the
//! control-plane together, then runs until the capture feed dies or the
//! process is interrupted.

use anyhow::{anyhow, Result};
use geogate::api::{self, ApiState};
use geogate::collab::{DialogDecision, FileRuleStore, ScutilControl};
use geogate::config::GeogateConfig;
use geogate::dispatch::Dispatcher;
use geogate::pipeline::Pipeline;
use geogate_capture::CaptureSource;
use geogate_filter::{load_ignored_domains, load_rule_domains, DomainClassifier};
use geogate_probe::Prober;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .compact()
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GeogateConfig::load(config_path.as_deref())?;

    info!("geogate starting");

    // Startup state: the rule file and the ignore list.
    let configured = load_rule_domains(&config.rules.rule_path())?;
    let ignored = load_ignored_domains(&config.rules.ignored_path())?;
    let classifier = Arc::new(Mutex::new(DomainClassifier::new(
        config.classifier.clone(),
        configured,
        ignored,
    )));

    let prober = Prober::new(config.probe.clone());
    let (dispatch_tx, dispatch_rx) = mpsc::channel(64);

    // Dispatcher: sole writer of the persistent sets after startup.
    let dispatcher = Dispatcher::new(
        classifier.clone(),
        DialogDecision,
        FileRuleStore::new(&config.rules),
        ScutilControl::new(config.rules.vpn_service.clone()),
        Duration::from_secs(config.rules.decision_timeout_secs),
        Duration::from_secs(config.api.history_ttl_secs),
    );
    tokio::spawn(dispatcher.run(dispatch_rx));

    if config.api.enabled {
        let state = Arc::new(ApiState::new(
            classifier.clone(),
            dispatch_tx.clone(),
            Duration::from_secs(config.api.history_ttl_secs),
        ));
        let api_config = config.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(&api_config, state).await {
                error!("control-plane failed: {}", e);
            }
        });
    }

    let source = CaptureSource::spawn(&config.capture)?;
    let pipeline = Pipeline::new(source, prober.clone(), classifier, dispatch_tx);

    tokio::select! {
        e = pipeline.run() => {
            // The capture feed is unbounded; this only happens when the
            // subprocess dies. Exit nonzero so a supervisor restarts us.
            error!("event source failed: {}", e);
            prober.close();
            Err(anyhow!(e))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            prober.close();
            Ok(())
        }
    }
}
