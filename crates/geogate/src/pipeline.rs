//! The observation pipeline.
//!
//! One task pulls events from the capture source and runs the classifier
//! inline; nothing here blocks except the source itself. Each accepted
//! domain gets its own probe task, bounded by the prober's permit pool,
//! and verdicts flow to the dispatcher over the channel. Probe completions
//! are unordered relative to each other and to the event stream.

use crate::dispatch::DispatchMsg;
use geogate_capture::{CaptureError, DomainStream};
use geogate_filter::DomainClassifier;
use geogate_probe::AvailabilityProbe;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

pub struct Pipeline<S, P> {
    source: S,
    prober: P,
    classifier: Arc<Mutex<DomainClassifier>>,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
}

impl<S, P> Pipeline<S, P>
where
    S: DomainStream,
    P: AvailabilityProbe + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: S,
        prober: P,
        classifier: Arc<Mutex<DomainClassifier>>,
        dispatch_tx: mpsc::Sender<DispatchMsg>,
    ) -> Self {
        Self {
            source,
            prober,
            classifier,
            dispatch_tx,
        }
    }

    /// Pull events until the source dies.
    ///
    /// Always returns an error: the capture feed is unbounded, so running
    /// out of events means the subprocess is gone and the owning process
    /// must restart the pipeline.
    pub async fn run(mut self) -> CaptureError {
        loop {
            let event = match self.source.next_event().await {
                Ok(event) => event,
                Err(e) => return e,
            };

            // The recurrence stamp is the wire observation time, not the
            // time this task got around to the event.
            let accepted = self
                .classifier
                .lock()
                .unwrap()
                .should_check_at(&event.name, event.observed_at);
            if !accepted {
                continue;
            }

            let prober = self.prober.clone();
            let tx = self.dispatch_tx.clone();
            tokio::spawn(async move {
                let verdict = prober.probe(&event.name).await;
                let msg = DispatchMsg::Verdict {
                    domain: event.name,
                    verdict,
                };
                if tx.send(msg).await.is_err() {
                    debug!("dispatcher gone, dropping verdict");
                }
            });
        }
    }
}
