//! One full reconciliation pass.
//!
//! # Responsibility
//! - Load the active subscription list and check each subscription once.
//! - Feed detections into a single-owner aggregator, then dispatch batches.
//! - Summarize every per-subscription and per-batch outcome in a `RunReport`.
//!
//! # Invariants
//! - Only a failure to load the subscription list aborts a run.
//! - At most `max_concurrent_checks` subscription checks are in flight.
//! - No subscription id is checked twice within one run.

use super::aggregator::{BatchDispatcher, DeliveryReport, UpdateAggregator};
use super::detector::{SubscriptionOutcome, SubscriptionReport, UpdateDetector};
use super::error::RunError;
use super::ports::{Clock, ContentSource, Notifier, SubscriptionStore, SystemClock};
use crate::config::ReconcileSettings;
use crate::model::subscription::Subscription;
use crate::model::EpochMs;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

/// Correlation id attached to every log line of one run.
pub type RunId = Uuid;

/// Everything that happened during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at_ms: EpochMs,
    pub finished_at_ms: EpochMs,
    /// Sorted by subscription id.
    pub subscriptions: Vec<SubscriptionReport>,
    pub deliveries: Vec<DeliveryReport>,
}

impl RunReport {
    pub fn checked_count(&self) -> usize {
        self.count_subscriptions(|outcome| matches!(outcome, SubscriptionOutcome::Checked { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count_subscriptions(|outcome| {
            matches!(
                outcome,
                SubscriptionOutcome::SkippedInactive | SubscriptionOutcome::SkippedDuplicate
            )
        })
    }

    pub fn fetch_error_count(&self) -> usize {
        self.count_subscriptions(|outcome| matches!(outcome, SubscriptionOutcome::Errored(_)))
    }

    pub fn persist_error_count(&self) -> usize {
        self.count_subscriptions(|outcome| {
            matches!(
                outcome,
                SubscriptionOutcome::Checked {
                    persist_error: Some(_),
                    ..
                }
            )
        })
    }

    pub fn sent_count(&self) -> usize {
        self.deliveries.iter().filter(|report| report.is_sent()).count()
    }

    pub fn delivery_error_count(&self) -> usize {
        self.deliveries.len() - self.sent_count()
    }

    /// Outcome of one subscription, if it took part in the run.
    pub fn subscription(&self, subscription_id: i64) -> Option<&SubscriptionOutcome> {
        self.subscriptions
            .iter()
            .find(|report| report.subscription_id == subscription_id)
            .map(|report| &report.outcome)
    }

    fn count_subscriptions(&self, predicate: impl Fn(&SubscriptionOutcome) -> bool) -> usize {
        self.subscriptions
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

/// Drives one run across detector, aggregator and dispatcher.
pub struct Reconciler {
    store: Arc<dyn SubscriptionStore>,
    detector: UpdateDetector,
    dispatcher: BatchDispatcher,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    max_concurrent_checks: usize,
}

impl Reconciler {
    /// Creates a reconciler on the system clock.
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn ContentSource>,
        notifier: Arc<dyn Notifier>,
        settings: ReconcileSettings,
    ) -> Self {
        Self::with_clock(store, source, notifier, settings, Arc::new(SystemClock))
    }

    /// Creates a reconciler with an explicit time source.
    pub fn with_clock(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn ContentSource>,
        notifier: Arc<dyn Notifier>,
        settings: ReconcileSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let detector =
            UpdateDetector::new(Arc::clone(&store), source, Arc::clone(&clock), &settings);
        let dispatcher = BatchDispatcher::new(Arc::clone(&store), notifier, &settings);
        Self {
            store,
            detector,
            dispatcher,
            clock,
            store_timeout: settings.store_timeout,
            max_concurrent_checks: settings.max_concurrent_checks.max(1),
        }
    }

    /// Executes one reconciliation pass.
    ///
    /// # Errors
    /// - `RunError` when the active subscription list cannot be loaded.
    ///   Every other failure is recorded in the returned report.
    pub async fn run_pass(&self) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let started_at_ms = self.clock.now_ms();
        info!("event=run_start module=reconcile status=start run_id={run_id}");

        let subscriptions = match self.load_active().await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                error!(
                    "event=run_finish module=reconcile status=error run_id={run_id} duration_ms={} error={}",
                    started.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };

        let (mut reports, pending) = dedupe_subscriptions(subscriptions);
        let mut aggregator = UpdateAggregator::new();
        let mut checks = stream::iter(pending)
            .map(|subscription| self.detector.check(subscription))
            .buffer_unordered(self.max_concurrent_checks);
        while let Some(result) = checks.next().await {
            if let Some(detection) = result.detection {
                aggregator.add(detection);
            }
            reports.push(result.report);
        }
        drop(checks);
        reports.sort_by_key(|report| report.subscription_id);

        let deliveries = if aggregator.is_empty() {
            Vec::new()
        } else {
            self.dispatcher.dispatch(aggregator).await
        };

        let report = RunReport {
            run_id,
            started_at_ms,
            finished_at_ms: self.clock.now_ms(),
            subscriptions: reports,
            deliveries,
        };
        info!(
            "event=run_finish module=reconcile status=ok run_id={run_id} duration_ms={} subscriptions={} checked={} skipped={} fetch_errors={} persist_errors={} sent={} delivery_errors={}",
            started.elapsed().as_millis(),
            report.subscriptions.len(),
            report.checked_count(),
            report.skipped_count(),
            report.fetch_error_count(),
            report.persist_error_count(),
            report.sent_count(),
            report.delivery_error_count()
        );
        Ok(report)
    }

    async fn load_active(&self) -> Result<Vec<Subscription>, RunError> {
        match timeout(self.store_timeout, self.store.list_active()).await {
            Ok(result) => result.map_err(RunError::ListActive),
            Err(_) => Err(RunError::ListActiveTimeout(self.store_timeout)),
        }
    }
}

/// Splits the list into first occurrences to check and reports for repeats.
fn dedupe_subscriptions(
    subscriptions: Vec<Subscription>,
) -> (Vec<SubscriptionReport>, Vec<Subscription>) {
    let mut seen = HashSet::with_capacity(subscriptions.len());
    let mut skipped = Vec::new();
    let mut pending = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        if seen.insert(subscription.id) {
            pending.push(subscription);
        } else {
            warn!(
                "event=subscription_check module=reconcile status=skipped reason=duplicate subscription_id={}",
                subscription.id
            );
            skipped.push(SubscriptionReport::new(
                &subscription,
                SubscriptionOutcome::SkippedDuplicate,
            ));
        }
    }
    (skipped, pending)
}

#[cfg(test)]
mod tests {
    use super::dedupe_subscriptions;
    use crate::model::subscription::{LanguageSet, Subscription};
    use crate::reconcile::detector::SubscriptionOutcome;

    #[test]
    fn dedupe_keeps_first_occurrence_of_each_id() {
        let mut first = Subscription::new(1, "s1", "One", LanguageSet::default(), 0);
        first.id = 10;
        let mut second = first.clone();
        second.series_title = "Repeat".to_string();
        let mut other = Subscription::new(1, "s2", "Two", LanguageSet::default(), 0);
        other.id = 11;

        let (skipped, pending) = dedupe_subscriptions(vec![first, second, other]);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].series_title, "One");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].subscription_id, 10);
        assert_eq!(skipped[0].outcome, SubscriptionOutcome::SkippedDuplicate);
    }
}
