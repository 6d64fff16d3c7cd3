//! User/subscription repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide stable CRUD APIs over `users` and `subscriptions` storage.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate the model before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::subscription::{LanguageSet, Subscription, SubscriptionId};
use crate::model::user::{User, UserId};
use crate::model::{EpochMs, ModelValidationError};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;

const SUBSCRIPTION_SELECT_SQL: &str = "SELECT
    id,
    user_id,
    series_id,
    series_title,
    languages,
    watermark_ms,
    last_installment_at_ms,
    active
FROM subscriptions";

const USER_SELECT_SQL: &str = "SELECT id, email, name, active FROM users";

pub type RepoResult<T> = Result<T, RepoError>;

/// Record kind named in `NotFound` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    User,
    Subscription,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Subscription => f.write_str("subscription"),
        }
    }
}

/// Repository error for user and subscription persistence.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ModelValidationError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: i64 },
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &value {
            if failure.code == ErrorCode::ConstraintViolation
                && message
                    .as_deref()
                    .is_some_and(|text| text.starts_with("UNIQUE"))
            {
                return Self::Conflict(message.clone().unwrap_or_default());
            }
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionListQuery {
    pub user_id: Option<UserId>,
    pub active_only: bool,
}

/// Repository interface for users and their subscriptions.
pub trait SubscriptionRepository {
    fn create_user(&self, user: &User) -> RepoResult<UserId>;
    fn get_user(&self, id: UserId) -> RepoResult<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    fn create_subscription(&self, subscription: &Subscription) -> RepoResult<SubscriptionId>;
    fn get_subscription(&self, id: SubscriptionId) -> RepoResult<Option<Subscription>>;
    fn update_subscription(&self, subscription: &Subscription) -> RepoResult<()>;
    /// Raises the stored watermark columns without touching any other field.
    fn advance_watermark(
        &self,
        id: SubscriptionId,
        watermark_ms: EpochMs,
        last_installment_at_ms: Option<EpochMs>,
    ) -> RepoResult<()>;
    fn delete_subscription(&self, id: SubscriptionId) -> RepoResult<()>;
    fn list_subscriptions(&self, query: &SubscriptionListQuery) -> RepoResult<Vec<Subscription>>;

    /// Active subscriptions in stable id order.
    fn list_active_subscriptions(&self) -> RepoResult<Vec<Subscription>> {
        self.list_subscriptions(&SubscriptionListQuery {
            user_id: None,
            active_only: true,
        })
    }
}

impl<R: SubscriptionRepository + ?Sized> SubscriptionRepository for &R {
    fn create_user(&self, user: &User) -> RepoResult<UserId> {
        (**self).create_user(user)
    }

    fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        (**self).get_user(id)
    }

    fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        (**self).find_user_by_email(email)
    }

    fn create_subscription(&self, subscription: &Subscription) -> RepoResult<SubscriptionId> {
        (**self).create_subscription(subscription)
    }

    fn get_subscription(&self, id: SubscriptionId) -> RepoResult<Option<Subscription>> {
        (**self).get_subscription(id)
    }

    fn update_subscription(&self, subscription: &Subscription) -> RepoResult<()> {
        (**self).update_subscription(subscription)
    }

    fn advance_watermark(
        &self,
        id: SubscriptionId,
        watermark_ms: EpochMs,
        last_installment_at_ms: Option<EpochMs>,
    ) -> RepoResult<()> {
        (**self).advance_watermark(id, watermark_ms, last_installment_at_ms)
    }

    fn delete_subscription(&self, id: SubscriptionId) -> RepoResult<()> {
        (**self).delete_subscription(id)
    }

    fn list_subscriptions(&self, query: &SubscriptionListQuery) -> RepoResult<Vec<Subscription>> {
        (**self).list_subscriptions(query)
    }
}

/// SQLite-backed subscription repository.
pub struct SqliteSubscriptionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSubscriptionRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl SubscriptionRepository for SqliteSubscriptionRepository<'_> {
    fn create_user(&self, user: &User) -> RepoResult<UserId> {
        user.validate()?;

        self.conn.execute(
            "INSERT INTO users (email, name, active) VALUES (?1, ?2, ?3);",
            params![
                user.email.trim(),
                user.name.as_deref(),
                bool_to_int(user.active)
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{USER_SELECT_SQL} WHERE id = ?1;"))?;
        let user = stmt.query_row([id], parse_user_row).optional()?;
        user.transpose()
    }

    fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{USER_SELECT_SQL} WHERE email = ?1 COLLATE NOCASE;"))?;
        let user = stmt.query_row([email.trim()], parse_user_row).optional()?;
        user.transpose()
    }

    fn create_subscription(&self, subscription: &Subscription) -> RepoResult<SubscriptionId> {
        subscription.validate()?;

        if self.get_user(subscription.user_id)?.is_none() {
            return Err(RepoError::NotFound {
                kind: RecordKind::User,
                id: subscription.user_id,
            });
        }

        self.conn.execute(
            "INSERT INTO subscriptions (
                user_id,
                series_id,
                series_title,
                languages,
                watermark_ms,
                last_installment_at_ms,
                active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                subscription.user_id,
                subscription.series_id.as_str(),
                subscription.series_title.as_str(),
                subscription.languages.to_storage_string(),
                subscription.watermark_ms,
                subscription.last_installment_at_ms,
                bool_to_int(subscription.active),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn get_subscription(&self, id: SubscriptionId) -> RepoResult<Option<Subscription>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SUBSCRIPTION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_subscription_row(row)?));
        }
        Ok(None)
    }

    fn update_subscription(&self, subscription: &Subscription) -> RepoResult<()> {
        subscription.validate()?;

        let changed = self.conn.execute(
            "UPDATE subscriptions
             SET
                series_title = ?1,
                languages = ?2,
                watermark_ms = ?3,
                last_installment_at_ms = ?4,
                active = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?6;",
            params![
                subscription.series_title.as_str(),
                subscription.languages.to_storage_string(),
                subscription.watermark_ms,
                subscription.last_installment_at_ms,
                bool_to_int(subscription.active),
                subscription.id,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: RecordKind::Subscription,
                id: subscription.id,
            });
        }

        Ok(())
    }

    fn advance_watermark(
        &self,
        id: SubscriptionId,
        watermark_ms: EpochMs,
        last_installment_at_ms: Option<EpochMs>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE subscriptions
             SET
                watermark_ms = MAX(watermark_ms, ?1),
                last_installment_at_ms = CASE
                    WHEN ?2 IS NULL THEN last_installment_at_ms
                    WHEN last_installment_at_ms IS NULL THEN ?2
                    ELSE MAX(last_installment_at_ms, ?2)
                END,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?3;",
            params![watermark_ms, last_installment_at_ms, id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: RecordKind::Subscription,
                id,
            });
        }

        Ok(())
    }

    fn delete_subscription(&self, id: SubscriptionId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM subscriptions WHERE id = ?1;", [id])?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: RecordKind::Subscription,
                id,
            });
        }

        Ok(())
    }

    fn list_subscriptions(&self, query: &SubscriptionListQuery) -> RepoResult<Vec<Subscription>> {
        let mut sql = format!("{SUBSCRIPTION_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if query.active_only {
            sql.push_str(" AND active = 1");
        }

        if let Some(user_id) = query.user_id {
            sql.push_str(" AND user_id = ?");
            bind_values.push(Value::Integer(user_id));
        }

        sql.push_str(" ORDER BY id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut subscriptions = Vec::new();

        while let Some(row) = rows.next()? {
            subscriptions.push(parse_subscription_row(row)?);
        }

        Ok(subscriptions)
    }
}

fn parse_user_row(row: &Row<'_>) -> rusqlite::Result<RepoResult<User>> {
    let active = row.get::<_, i64>("active")?;
    let user = User {
        id: row.get("id")?,
        email: row.get("email")?,
        name: row.get("name")?,
        active: match int_to_bool(active, "users.active") {
            Ok(active) => active,
            Err(err) => return Ok(Err(err)),
        },
    };
    Ok(Ok(user))
}

fn parse_subscription_row(row: &Row<'_>) -> RepoResult<Subscription> {
    let languages_text: String = row.get("languages")?;
    if languages_text.trim().is_empty() {
        return Err(RepoError::InvalidData(
            "empty language list in subscriptions.languages".to_string(),
        ));
    }

    let subscription = Subscription {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        series_id: row.get("series_id")?,
        series_title: row.get("series_title")?,
        languages: LanguageSet::parse(&languages_text),
        watermark_ms: row.get("watermark_ms")?,
        last_installment_at_ms: row.get("last_installment_at_ms")?,
        active: int_to_bool(row.get("active")?, "subscriptions.active")?,
    };
    subscription.validate()?;
    Ok(subscription)
}

fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
