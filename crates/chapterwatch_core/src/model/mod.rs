//! Domain model for users, series subscriptions and fetched installments.
//!
//! # Responsibility
//! - Define canonical data structures used by storage and reconciliation.
//! - Keep the language filter and watermark rules next to the data they guard.
//!
//! # Invariants
//! - A subscription watermark never moves backwards.
//! - A subscription always carries at least one accepted language.
//! - Installments are immutable facts; the core never persists them.

pub mod installment;
pub mod subscription;
pub mod user;

use thiserror::Error;

/// Unix epoch milliseconds.
pub type EpochMs = i64;

/// Validation failures shared by model types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelValidationError {
    #[error("email is empty")]
    EmptyEmail,
    #[error("email `{0}` is not a valid address")]
    InvalidEmail(String),
    #[error("series id is empty")]
    EmptySeriesId,
    #[error("series title is empty")]
    EmptySeriesTitle,
    #[error("language set is empty")]
    EmptyLanguages,
}
