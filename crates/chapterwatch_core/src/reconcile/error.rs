//! Error taxonomy of the reconciliation engine.
//!
//! Port errors (`StoreError`, `SourceError`, `NotifyError`) are what
//! collaborators return. The engine wraps them into `FetchError`,
//! `PersistError` and `DeliveryError`, which are recorded as per-item
//! outcomes and never abort a run. Only `RunError` ends a run early.

use crate::model::user::UserId;
use crate::repo::subscription_repo::{RecordKind, RepoError};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a subscription store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: i64 },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<RepoError> for StoreError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Failure reported by a content source.
///
/// The engine treats every variant the same way: the check is skipped and
/// the watermark stays put.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authorization rejected: {0}")]
    Unauthorized(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failure reported by a notifier transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification transport error: {0}")]
pub struct NotifyError(pub String);

/// A subscription's fetch did not produce a usable result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("content source did not answer within {0:?}")]
    Timeout(Duration),
}

/// Saving an advanced watermark failed; the run carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("subscription store did not answer within {0:?}")]
    Timeout(Duration),
}

/// One notification batch could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("recipient lookup failed: {0}")]
    RecipientLookup(StoreError),
    #[error("recipient lookup did not answer within {0:?}")]
    RecipientLookupTimeout(Duration),
    #[error("recipient {0} is inactive")]
    RecipientInactive(UserId),
    #[error(transparent)]
    Notifier(#[from] NotifyError),
    #[error("notifier did not answer within {0:?}")]
    Timeout(Duration),
}

/// Invalid scheduler state transition; fatal to the call only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerStateError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("a reconciliation run is already in progress")]
    RunInProgress,
    #[error("check interval must be greater than zero")]
    InvalidInterval,
    #[error("scheduler requires a running tokio runtime")]
    NoRuntime,
}

/// The run could not start because the active subscription list was unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("failed to list active subscriptions: {0}")]
    ListActive(StoreError),
    #[error("listing active subscriptions did not finish within {0:?}")]
    ListActiveTimeout(Duration),
}

/// Error returned by on-demand scheduler triggers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    State(#[from] SchedulerStateError),
    #[error(transparent)]
    Run(#[from] RunError),
}
