//! Installment facts returned by a content source.

use super::subscription::SeriesId;
use super::EpochMs;
use serde::{Deserialize, Serialize};

/// Upstream identifier of one installment.
pub type InstallmentId = String;

/// One newly published unit of a series (for example a chapter).
///
/// Lives only for the run that fetched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub series_id: SeriesId,
    /// Language code the installment was published in, e.g. `en` or `pt-br`.
    pub language: String,
    pub published_at_ms: EpochMs,
    pub title: Option<String>,
    pub volume: Option<String>,
    /// Display number inside the series ("12", "12.5").
    pub number: Option<String>,
    /// Contributor / scanlation group tags.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Installment {
    pub fn new(
        id: impl Into<InstallmentId>,
        series_id: impl Into<SeriesId>,
        language: impl Into<String>,
        published_at_ms: EpochMs,
    ) -> Self {
        Self {
            id: id.into(),
            series_id: series_id.into(),
            language: language.into(),
            published_at_ms,
            title: None,
            volume: None,
            number: None,
            groups: Vec::new(),
        }
    }
}
