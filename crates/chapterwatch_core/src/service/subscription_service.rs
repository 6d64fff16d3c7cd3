//! Subscription management use-cases.
//!
//! # Responsibility
//! - Register recipients and attach series subscriptions to them.
//! - Normalize and validate language filters before they reach storage.
//! - Toggle or remove subscriptions outside of a reconciliation run.
//!
//! # Invariants
//! - Language codes are lowercase and match `LANGUAGE_CODE_RE`.
//! - A new subscription's watermark starts at subscribe time, so only
//!   installments published afterwards are ever reported.

use crate::model::subscription::{LanguageSet, SeriesId, Subscription, SubscriptionId};
use crate::model::user::User;
use crate::model::EpochMs;
use crate::repo::subscription_repo::{
    RecordKind, RepoError, SubscriptionListQuery, SubscriptionRepository,
};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static LANGUAGE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[a-z0-9]{2,8})*$").expect("valid language regex"));

/// Service error for subscription management.
#[derive(Debug, Error)]
pub enum SubscriptionServiceError {
    #[error("invalid language code: `{0}`")]
    InvalidLanguage(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for SubscriptionServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                kind: RecordKind::Subscription,
                id,
            } => Self::SubscriptionNotFound(id),
            RepoError::NotFound {
                kind: RecordKind::User,
                id,
            } => Self::UserNotFound(id.to_string()),
            other => Self::Repo(other),
        }
    }
}

pub type SubscriptionServiceResult<T> = Result<T, SubscriptionServiceError>;

/// Request model for subscribing a recipient to a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Recipient address; the user is created when unknown.
    pub email: String,
    pub series_id: SeriesId,
    pub series_title: String,
    /// Comma-separated codes; blank means the default language.
    pub languages: String,
    /// Initial watermark, normally the current time.
    pub now_ms: EpochMs,
}

/// Subscription management facade over repository implementations.
pub struct SubscriptionService<R: SubscriptionRepository> {
    repo: R,
}

impl<R: SubscriptionRepository> SubscriptionService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Returns the user for `email`, creating it when missing.
    pub fn register_user(
        &self,
        email: &str,
        name: Option<&str>,
    ) -> SubscriptionServiceResult<User> {
        if let Some(existing) = self.repo.find_user_by_email(email)? {
            return Ok(existing);
        }

        let mut user = User::new(email.trim());
        user.name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        user.id = self.repo.create_user(&user)?;
        info!("event=user_register module=service status=ok user_id={}", user.id);
        Ok(user)
    }

    /// Creates an active subscription for the request's recipient.
    pub fn subscribe(&self, request: &SubscribeRequest) -> SubscriptionServiceResult<Subscription> {
        if request.series_id.trim().is_empty() {
            return Err(SubscriptionServiceError::InvalidInput("series id is required"));
        }
        let languages = normalize_languages(&request.languages)?;
        let user = self.register_user(&request.email, None)?;
        let title = if request.series_title.trim().is_empty() {
            request.series_id.trim()
        } else {
            request.series_title.trim()
        };

        let mut subscription = Subscription::new(
            user.id,
            request.series_id.trim(),
            title,
            languages,
            request.now_ms,
        );
        subscription.id = self.repo.create_subscription(&subscription)?;
        info!(
            "event=subscribe module=service status=ok subscription_id={} user_id={} series_id={} languages={}",
            subscription.id,
            user.id,
            subscription.series_id,
            subscription.languages.to_storage_string()
        );
        Ok(subscription)
    }

    /// Deactivates a subscription; its watermark is kept for a later resume.
    pub fn unsubscribe(&self, id: SubscriptionId) -> SubscriptionServiceResult<Subscription> {
        self.set_active(id, false)
    }

    /// Reactivates a previously deactivated subscription.
    pub fn resubscribe(&self, id: SubscriptionId) -> SubscriptionServiceResult<Subscription> {
        self.set_active(id, true)
    }

    /// Deletes a subscription permanently.
    pub fn remove_subscription(&self, id: SubscriptionId) -> SubscriptionServiceResult<()> {
        self.repo.delete_subscription(id)?;
        info!("event=subscription_remove module=service status=ok subscription_id={id}");
        Ok(())
    }

    /// Lists every subscription owned by the user with `email`.
    pub fn list_for_user(&self, email: &str) -> SubscriptionServiceResult<Vec<Subscription>> {
        let user = self
            .repo
            .find_user_by_email(email)?
            .ok_or_else(|| SubscriptionServiceError::UserNotFound(email.trim().to_string()))?;
        Ok(self.repo.list_subscriptions(&SubscriptionListQuery {
            user_id: Some(user.id),
            active_only: false,
        })?)
    }

    /// Lists every subscription regardless of owner or state.
    pub fn list_all(&self) -> SubscriptionServiceResult<Vec<Subscription>> {
        Ok(self
            .repo
            .list_subscriptions(&SubscriptionListQuery::default())?)
    }

    fn set_active(
        &self,
        id: SubscriptionId,
        active: bool,
    ) -> SubscriptionServiceResult<Subscription> {
        let mut subscription = self
            .repo
            .get_subscription(id)?
            .ok_or(SubscriptionServiceError::SubscriptionNotFound(id))?;
        if subscription.active != active {
            subscription.active = active;
            self.repo.update_subscription(&subscription)?;
        }
        Ok(subscription)
    }
}

/// Parses a comma-separated language list and validates each code's shape.
pub fn normalize_languages(raw: &str) -> SubscriptionServiceResult<LanguageSet> {
    let languages = LanguageSet::parse(raw);
    if let Some(bad) = languages
        .codes()
        .iter()
        .find(|code| !LANGUAGE_CODE_RE.is_match(code))
    {
        return Err(SubscriptionServiceError::InvalidLanguage(bad.clone()));
    }
    Ok(languages)
}
