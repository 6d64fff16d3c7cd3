//! Collaborator contracts consumed by the reconciliation engine.
//!
//! Stores, content sources and notifiers are plugged in as trait objects so
//! the engine can share them across concurrent subscription checks.

use super::error::{NotifyError, SourceError, StoreError};
use crate::model::installment::Installment;
use crate::model::subscription::{SeriesId, Subscription};
use crate::model::user::{User, UserId};
use crate::model::EpochMs;
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

/// Durable source of truth for users, subscriptions and watermarks.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every subscription currently flagged active.
    async fn list_active(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Fails with [`StoreError::NotFound`] for unknown users.
    async fn get_user(&self, id: UserId) -> Result<User, StoreError>;

    /// Persists `watermark_ms` and `last_installment_at_ms` only.
    ///
    /// Stored values never move backwards, and every other column is left
    /// as the store currently has it.
    async fn save_watermark(&self, subscription: &Subscription) -> Result<(), StoreError>;
}

/// Upstream catalogue that publishes installments.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Installments of `series_id` published after `since_ms`, in upstream order.
    async fn fetch_since(
        &self,
        series_id: &SeriesId,
        since_ms: EpochMs,
    ) -> Result<Vec<Installment>, SourceError>;
}

/// Delivery transport for update notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification covering `installments` of one series.
    async fn send(
        &self,
        address: &str,
        series_title: &str,
        installments: &[Installment],
    ) -> Result<(), NotifyError>;
}

/// Source of "now" for watermark advances and run timestamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> EpochMs;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| EpochMs::try_from(elapsed.as_millis()).unwrap_or(EpochMs::MAX))
            .unwrap_or(0)
    }
}
