//! Async `SubscriptionStore` adapter over the SQLite repository.
//!
//! # Invariants
//! - One connection is shared behind a mutex; each call holds it only for
//!   the duration of one repository operation.
//! - Blocking SQLite work runs on tokio's blocking pool, never on a worker.

use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::model::subscription::Subscription;
use crate::model::user::{User, UserId};
use crate::reconcile::error::StoreError;
use crate::reconcile::ports::SubscriptionStore;
use crate::repo::subscription_repo::{
    RecordKind, RepoResult, SqliteSubscriptionRepository, SubscriptionRepository,
};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared-connection subscription store.
#[derive(Clone)]
pub struct SqliteSubscriptionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSubscriptionStore {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Opens (and migrates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Runs synchronous repository work on the calling thread.
    ///
    /// Used by management code paths that are not on an async runtime.
    pub fn with_repo<T>(
        &self,
        work: impl FnOnce(&SqliteSubscriptionRepository<'_>) -> T,
    ) -> T {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let repo = SqliteSubscriptionRepository::new(&conn);
        work(&repo)
    }

    async fn call<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteSubscriptionRepository<'_>) -> RepoResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let repo = SqliteSubscriptionRepository::new(&conn);
            work(&repo).map_err(StoreError::from)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("store task failed: {err}")))?
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn list_active(&self) -> Result<Vec<Subscription>, StoreError> {
        self.call(|repo| repo.list_active_subscriptions()).await
    }

    async fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        self.call(move |repo| repo.get_user(id))
            .await?
            .ok_or(StoreError::NotFound {
                kind: RecordKind::User,
                id,
            })
    }

    async fn save_watermark(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let id = subscription.id;
        let watermark_ms = subscription.watermark_ms;
        let last_installment_at_ms = subscription.last_installment_at_ms;
        self.call(move |repo| repo.advance_watermark(id, watermark_ms, last_installment_at_ms))
            .await
    }
}
