//! Subscription domain model.
//!
//! # Responsibility
//! - Describe one (user, series) subscription and its check watermark.
//! - Own the language filter applied to fetched installments.
//!
//! # Invariants
//! - `watermark_ms` is monotonically non-decreasing.
//! - `languages` is never empty; unset input resolves to `DEFAULT_LANGUAGE`.

use super::installment::Installment;
use super::user::UserId;
use super::{EpochMs, ModelValidationError};
use serde::{Deserialize, Serialize};

/// Row identifier of a subscription record.
pub type SubscriptionId = i64;

/// Upstream identifier of a content series.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type SeriesId = String;

/// Language used when a subscription does not name any.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Ordered, de-duplicated, non-empty set of accepted language codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LanguageSet(Vec<String>);

impl LanguageSet {
    /// Parses a comma-separated list such as `"en, pt-br"`.
    ///
    /// Codes are trimmed and lowercased; blanks and repeats are dropped.
    /// Input with no usable code yields the default set.
    pub fn parse(raw: &str) -> Self {
        Self::from_codes(raw.split(','))
    }

    /// Builds a set from individual codes with the same normalization as
    /// [`LanguageSet::parse`].
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for code in codes {
            let code = code.as_ref().trim().to_ascii_lowercase();
            if code.is_empty() || normalized.contains(&code) {
                continue;
            }
            normalized.push(code);
        }
        if normalized.is_empty() {
            return Self::default();
        }
        Self(normalized)
    }

    /// Returns whether `code` is accepted (ASCII case-insensitive).
    pub fn contains(&self, code: &str) -> bool {
        let code = code.trim();
        self.0.iter().any(|lang| lang.eq_ignore_ascii_case(code))
    }

    pub fn codes(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined form used by storage.
    pub fn to_storage_string(&self) -> String {
        self.0.join(",")
    }
}

impl Default for LanguageSet {
    fn default() -> Self {
        Self(vec![DEFAULT_LANGUAGE.to_string()])
    }
}

impl TryFrom<Vec<String>> for LanguageSet {
    type Error = ModelValidationError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        if value.iter().all(|code| code.trim().is_empty()) {
            return Err(ModelValidationError::EmptyLanguages);
        }
        Ok(Self::from_codes(value))
    }
}

impl From<LanguageSet> for Vec<String> {
    fn from(value: LanguageSet) -> Self {
        value.0
    }
}

/// One user's subscription to one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub series_id: SeriesId,
    /// Display title carried into notification batches.
    pub series_title: String,
    pub languages: LanguageSet,
    /// Everything published before this instant has already been checked.
    pub watermark_ms: EpochMs,
    /// Publish time of the newest installment ever forwarded.
    pub last_installment_at_ms: Option<EpochMs>,
    pub active: bool,
}

impl Subscription {
    /// Creates an active, not-yet-persisted subscription (`id == 0`).
    pub fn new(
        user_id: UserId,
        series_id: impl Into<SeriesId>,
        series_title: impl Into<String>,
        languages: LanguageSet,
        watermark_ms: EpochMs,
    ) -> Self {
        Self {
            id: 0,
            user_id,
            series_id: series_id.into(),
            series_title: series_title.into(),
            languages,
            watermark_ms,
            last_installment_at_ms: None,
            active: true,
        }
    }

    /// Moves the watermark forward to `now_ms`; never moves it backwards.
    ///
    /// Returns the resulting watermark.
    pub fn advance_watermark(&mut self, now_ms: EpochMs) -> EpochMs {
        self.watermark_ms = self.watermark_ms.max(now_ms);
        self.watermark_ms
    }

    /// Returns whether the installment passes this subscription's language filter.
    pub fn accepts(&self, installment: &Installment) -> bool {
        self.languages.contains(&installment.language)
    }

    /// Keeps the newest forwarded publish time.
    pub fn record_installments(&mut self, installments: &[Installment]) {
        let newest = installments.iter().map(|item| item.published_at_ms).max();
        self.last_installment_at_ms = match (self.last_installment_at_ms, newest) {
            (Some(current), Some(newest)) => Some(current.max(newest)),
            (current, newest) => current.or(newest),
        };
    }

    /// Checks the fields storage relies on.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.series_id.trim().is_empty() {
            return Err(ModelValidationError::EmptySeriesId);
        }
        if self.series_title.trim().is_empty() {
            return Err(ModelValidationError::EmptySeriesTitle);
        }
        if self.languages.is_empty() {
            return Err(ModelValidationError::EmptyLanguages);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{LanguageSet, Subscription, DEFAULT_LANGUAGE};
    use crate::model::installment::Installment;

    #[test]
    fn parse_normalizes_and_dedupes() {
        let set = LanguageSet::parse(" EN, fr ,en,, pt-BR ");
        assert_eq!(set.codes(), ["en", "fr", "pt-br"]);
        assert_eq!(set.to_storage_string(), "en,fr,pt-br");
    }

    #[test]
    fn blank_input_falls_back_to_default_language() {
        assert_eq!(LanguageSet::parse("").codes(), [DEFAULT_LANGUAGE]);
        assert_eq!(LanguageSet::parse(" , ").codes(), [DEFAULT_LANGUAGE]);
    }

    #[test]
    fn deserialize_rejects_empty_list() {
        let parsed: Result<LanguageSet, _> = serde_json::from_str("[]");
        assert!(parsed.is_err());
        let parsed: LanguageSet = serde_json::from_str(r#"["fr","FR"]"#).unwrap();
        assert_eq!(parsed.codes(), ["fr"]);
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut sub = Subscription::new(1, "series", "Series", LanguageSet::default(), 500);
        assert_eq!(sub.advance_watermark(400), 500);
        assert_eq!(sub.advance_watermark(900), 900);
        assert_eq!(sub.watermark_ms, 900);
    }

    #[test]
    fn accepts_matches_language_case_insensitively() {
        let sub = Subscription::new(1, "series", "Series", LanguageSet::parse("en"), 0);
        assert!(sub.accepts(&Installment::new("c1", "series", "EN", 1)));
        assert!(!sub.accepts(&Installment::new("c2", "series", "fr", 1)));
    }

    #[test]
    fn record_installments_keeps_newest_publish_time() {
        let mut sub = Subscription::new(1, "series", "Series", LanguageSet::default(), 0);
        sub.record_installments(&[]);
        assert_eq!(sub.last_installment_at_ms, None);

        sub.record_installments(&[
            Installment::new("a", "series", "en", 30),
            Installment::new("b", "series", "en", 10),
        ]);
        assert_eq!(sub.last_installment_at_ms, Some(30));

        sub.record_installments(&[Installment::new("c", "series", "en", 20)]);
        assert_eq!(sub.last_installment_at_ms, Some(30));
    }
}
