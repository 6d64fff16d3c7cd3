//! Core logic for chapterwatch.
//!
//! Tracks series subscriptions, polls a content source for newly published
//! installments, and dispatches one batched notification per recipient and
//! series per run.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod service;

pub use config::{AppConfig, ConfigError, LoggingConfig, ReconcileSettings};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::installment::{Installment, InstallmentId};
pub use model::subscription::{LanguageSet, SeriesId, Subscription, SubscriptionId};
pub use model::user::{User, UserId};
pub use model::{EpochMs, ModelValidationError};
pub use reconcile::aggregator::{
    BatchDispatcher, BatchKey, DeliveryOutcome, DeliveryReport, UpdateAggregator, UpdateBatch,
};
pub use reconcile::detector::{
    CheckResult, Detection, SubscriptionOutcome, SubscriptionReport, UpdateDetector,
};
pub use reconcile::error::{
    DeliveryError, FetchError, NotifyError, PersistError, RunError, SchedulerError,
    SchedulerStateError, SourceError, StoreError,
};
pub use reconcile::ports::{Clock, ContentSource, Notifier, SubscriptionStore, SystemClock};
pub use reconcile::run::{Reconciler, RunId, RunReport};
pub use reconcile::scheduler::{RunState, Scheduler};
pub use repo::sqlite_store::SqliteSubscriptionStore;
pub use repo::subscription_repo::{
    RecordKind, RepoError, RepoResult, SqliteSubscriptionRepository, SubscriptionListQuery,
    SubscriptionRepository,
};
pub use service::subscription_service::{
    SubscribeRequest, SubscriptionService, SubscriptionServiceError,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
