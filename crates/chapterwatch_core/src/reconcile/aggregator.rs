//! Grouping of detected installments into notification batches.
//!
//! # Responsibility
//! - Merge detections that share a (recipient, series) key into one batch.
//! - Resolve each recipient's address once and send one notification per batch.
//!
//! # Invariants
//! - Exactly one batch exists per `BatchKey` per run.
//! - A batch never holds the same installment id twice.
//! - A failed lookup or send affects only the batches it belongs to.

use super::detector::Detection;
use super::error::DeliveryError;
use super::ports::{Notifier, SubscriptionStore};
use crate::config::ReconcileSettings;
use crate::model::installment::{Installment, InstallmentId};
use crate::model::subscription::SeriesId;
use crate::model::user::{User, UserId};
use log::{info, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Composite aggregation key: one notification per recipient per series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey {
    pub recipient: UserId,
    pub series_id: SeriesId,
}

impl BatchKey {
    pub fn new(recipient: UserId, series_id: impl Into<SeriesId>) -> Self {
        Self {
            recipient,
            series_id: series_id.into(),
        }
    }
}

/// Installments gathered for one (recipient, series) pair during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBatch {
    pub key: BatchKey,
    /// Title from the first subscription that contributed to the batch.
    pub series_title: String,
    installments: Vec<Installment>,
    seen: HashSet<InstallmentId>,
}

impl UpdateBatch {
    fn open(key: BatchKey, series_title: String) -> Self {
        Self {
            key,
            series_title,
            installments: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Appends in arrival order; returns how many were new to this batch.
    fn extend(&mut self, installments: Vec<Installment>) -> usize {
        let before = self.installments.len();
        for installment in installments {
            if self.seen.insert(installment.id.clone()) {
                self.installments.push(installment);
            }
        }
        self.installments.len() - before
    }

    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }

    pub fn len(&self) -> usize {
        self.installments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installments.is_empty()
    }
}

/// Per-run batch map, written by a single owner.
#[derive(Debug, Default)]
pub struct UpdateAggregator {
    batches: BTreeMap<BatchKey, UpdateBatch>,
}

impl UpdateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one detection into its batch, opening the batch on first sight.
    ///
    /// Returns the number of installments actually added.
    pub fn add(&mut self, detection: Detection) -> usize {
        let Detection {
            key,
            series_title,
            installments,
            ..
        } = detection;
        self.batches
            .entry(key.clone())
            .or_insert_with(|| UpdateBatch::open(key, series_title))
            .extend(installments)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn get(&self, key: &BatchKey) -> Option<&UpdateBatch> {
        self.batches.get(key)
    }

    /// Completed non-empty batches, ordered by key.
    pub fn into_batches(self) -> Vec<UpdateBatch> {
        self.batches
            .into_values()
            .filter(|batch| !batch.is_empty())
            .collect()
    }
}

/// Terminal state of one notification batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { address: String },
    Errored(DeliveryError),
}

/// Outcome record for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub recipient: UserId,
    pub series_id: SeriesId,
    pub installment_count: usize,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    fn new(batch: &UpdateBatch, outcome: DeliveryOutcome) -> Self {
        Self {
            recipient: batch.key.recipient,
            series_id: batch.key.series_id.clone(),
            installment_count: batch.len(),
            outcome,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Sent { .. })
    }
}

/// Sends completed batches through a notifier.
pub struct BatchDispatcher {
    store: Arc<dyn SubscriptionStore>,
    notifier: Arc<dyn Notifier>,
    store_timeout: Duration,
    delivery_timeout: Duration,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        notifier: Arc<dyn Notifier>,
        settings: &ReconcileSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            store_timeout: settings.store_timeout,
            delivery_timeout: settings.delivery_timeout,
        }
    }

    /// Delivers every batch once; never stops early.
    pub async fn dispatch(&self, aggregator: UpdateAggregator) -> Vec<DeliveryReport> {
        let batches = aggregator.into_batches();
        let mut reports = Vec::with_capacity(batches.len());
        let mut resolved: Option<(UserId, Result<User, DeliveryError>)> = None;

        for batch in &batches {
            let recipient = batch.key.recipient;
            // Batches are ordered by recipient, so one cached lookup suffices.
            let lookup = match resolved.take() {
                Some((id, lookup)) if id == recipient => lookup,
                _ => self.resolve_recipient(recipient).await,
            };
            let outcome = match &lookup {
                Ok(user) => self.deliver(user, batch).await,
                Err(err) => DeliveryOutcome::Errored(err.clone()),
            };
            resolved = Some((recipient, lookup));
            reports.push(DeliveryReport::new(batch, outcome));
        }

        reports
    }

    async fn resolve_recipient(&self, recipient: UserId) -> Result<User, DeliveryError> {
        let lookup = match timeout(self.store_timeout, self.store.get_user(recipient)).await {
            Ok(Ok(user)) if user.active => Ok(user),
            Ok(Ok(_)) => Err(DeliveryError::RecipientInactive(recipient)),
            Ok(Err(err)) => Err(DeliveryError::RecipientLookup(err)),
            Err(_) => Err(DeliveryError::RecipientLookupTimeout(self.store_timeout)),
        };
        if let Err(err) = &lookup {
            warn!(
                "event=recipient_lookup module=reconcile status=error user_id={} error={}",
                recipient, err
            );
        }
        lookup
    }

    async fn deliver(&self, user: &User, batch: &UpdateBatch) -> DeliveryOutcome {
        let send = self
            .notifier
            .send(&user.email, &batch.series_title, batch.installments());
        let result = match timeout(self.delivery_timeout, send).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        };

        match result {
            Ok(()) => {
                info!(
                    "event=notification_send module=reconcile status=ok user_id={} series_id={} installments={}",
                    user.id,
                    batch.key.series_id,
                    batch.len()
                );
                DeliveryOutcome::Sent {
                    address: user.email.clone(),
                }
            }
            Err(err) => {
                warn!(
                    "event=notification_send module=reconcile status=error user_id={} series_id={} installments={} error={}",
                    user.id,
                    batch.key.series_id,
                    batch.len(),
                    err
                );
                DeliveryOutcome::Errored(err)
            }
        }
    }
}
