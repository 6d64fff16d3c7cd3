//! Per-subscription update detection.
//!
//! # Responsibility
//! - Fetch installments published since a subscription's watermark.
//! - Apply the subscription's language filter.
//! - Advance and persist the watermark after every successful fetch.
//!
//! # Invariants
//! - Inactive subscriptions are never fetched and never written.
//! - A failed or timed-out fetch leaves the watermark untouched.
//! - A successful fetch advances the watermark even when nothing matched.
//! - A failed save does not roll back the in-memory advance.

use super::aggregator::BatchKey;
use super::error::{FetchError, PersistError};
use super::ports::{Clock, ContentSource, SubscriptionStore};
use crate::config::ReconcileSettings;
use crate::model::installment::Installment;
use crate::model::subscription::{SeriesId, Subscription, SubscriptionId};
use crate::model::user::UserId;
use crate::model::EpochMs;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Terminal state of one subscription within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    Checked {
        fetched: usize,
        matched: usize,
        watermark_ms: EpochMs,
        /// Set when the advanced watermark could not be saved.
        persist_error: Option<PersistError>,
    },
    SkippedInactive,
    /// The same subscription id appeared twice in the active list.
    SkippedDuplicate,
    Errored(FetchError),
}

/// Outcome record for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionReport {
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub series_id: SeriesId,
    pub outcome: SubscriptionOutcome,
}

impl SubscriptionReport {
    pub(crate) fn new(subscription: &Subscription, outcome: SubscriptionOutcome) -> Self {
        Self {
            subscription_id: subscription.id,
            user_id: subscription.user_id,
            series_id: subscription.series_id.clone(),
            outcome,
        }
    }
}

/// Matched installments tagged for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub key: BatchKey,
    pub subscription_id: SubscriptionId,
    pub series_title: String,
    /// Non-empty, in content-source order.
    pub installments: Vec<Installment>,
}

/// Result of checking one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub report: SubscriptionReport,
    pub detection: Option<Detection>,
}

/// Checks individual subscriptions against a content source.
pub struct UpdateDetector {
    store: Arc<dyn SubscriptionStore>,
    source: Arc<dyn ContentSource>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    store_timeout: Duration,
}

impl UpdateDetector {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn ContentSource>,
        clock: Arc<dyn Clock>,
        settings: &ReconcileSettings,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            fetch_timeout: settings.fetch_timeout,
            store_timeout: settings.store_timeout,
        }
    }

    /// Runs the detection contract for one subscription.
    ///
    /// Never fails: every error becomes part of the returned report.
    pub async fn check(&self, mut subscription: Subscription) -> CheckResult {
        if !subscription.active {
            debug!(
                "event=subscription_check module=reconcile status=skipped reason=inactive subscription_id={}",
                subscription.id
            );
            return CheckResult {
                report: SubscriptionReport::new(&subscription, SubscriptionOutcome::SkippedInactive),
                detection: None,
            };
        }

        let fetched = match self.fetch(&subscription).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(
                    "event=subscription_check module=reconcile status=error subscription_id={} series_id={} watermark_ms={} error={}",
                    subscription.id, subscription.series_id, subscription.watermark_ms, err
                );
                return CheckResult {
                    report: SubscriptionReport::new(&subscription, SubscriptionOutcome::Errored(err)),
                    detection: None,
                };
            }
        };
        let fetched_at_ms = self.clock.now_ms();
        let fetched_count = fetched.len();

        let matched = filter_installments(&subscription, fetched);
        subscription.advance_watermark(fetched_at_ms);
        subscription.record_installments(&matched);
        let persist_error = self.persist(&subscription).await.err();

        info!(
            "event=subscription_check module=reconcile status=ok subscription_id={} series_id={} fetched={} matched={} watermark_ms={} persisted={}",
            subscription.id,
            subscription.series_id,
            fetched_count,
            matched.len(),
            subscription.watermark_ms,
            persist_error.is_none()
        );

        let report = SubscriptionReport::new(
            &subscription,
            SubscriptionOutcome::Checked {
                fetched: fetched_count,
                matched: matched.len(),
                watermark_ms: subscription.watermark_ms,
                persist_error,
            },
        );
        let detection = (!matched.is_empty()).then(|| Detection {
            key: BatchKey::new(subscription.user_id, subscription.series_id.clone()),
            subscription_id: subscription.id,
            series_title: subscription.series_title.clone(),
            installments: matched,
        });

        CheckResult { report, detection }
    }

    async fn fetch(&self, subscription: &Subscription) -> Result<Vec<Installment>, FetchError> {
        let call = self
            .source
            .fetch_since(&subscription.series_id, subscription.watermark_ms);
        match timeout(self.fetch_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        }
    }

    async fn persist(&self, subscription: &Subscription) -> Result<(), PersistError> {
        let result = match timeout(self.store_timeout, self.store.save_watermark(subscription)).await {
            Ok(result) => result.map_err(PersistError::from),
            Err(_) => Err(PersistError::Timeout(self.store_timeout)),
        };
        if let Err(err) = &result {
            warn!(
                "event=watermark_save module=reconcile status=error subscription_id={} watermark_ms={} error={}",
                subscription.id, subscription.watermark_ms, err
            );
        }
        result
    }
}

/// Keeps installments of the subscription's series whose language it accepts.
///
/// Source order is preserved.
pub fn filter_installments(
    subscription: &Subscription,
    installments: Vec<Installment>,
) -> Vec<Installment> {
    installments
        .into_iter()
        .filter(|installment| {
            if installment.series_id != subscription.series_id {
                debug!(
                    "event=installment_filter module=reconcile status=dropped reason=foreign_series subscription_id={} installment_id={}",
                    subscription.id, installment.id
                );
                return false;
            }
            subscription.accepts(installment)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::filter_installments;
    use crate::model::installment::Installment;
    use crate::model::subscription::{LanguageSet, Subscription};

    #[test]
    fn filter_keeps_accepted_languages_in_source_order() {
        let sub = Subscription::new(1, "s1", "Series", LanguageSet::parse("en,es"), 0);
        let kept = filter_installments(
            &sub,
            vec![
                Installment::new("c3", "s1", "es", 3),
                Installment::new("c1", "s1", "fr", 1),
                Installment::new("c2", "s1", "en", 2),
            ],
        );
        let ids: Vec<&str> = kept.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, ["c3", "c2"]);
    }

    #[test]
    fn filter_drops_installments_of_other_series() {
        let sub = Subscription::new(1, "s1", "Series", LanguageSet::default(), 0);
        let kept = filter_installments(&sub, vec![Installment::new("x", "s2", "en", 1)]);
        assert!(kept.is_empty());
    }
}
