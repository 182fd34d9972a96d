//! User feedback on answers
//!
//! [`FeedbackRecord`] is what the user submits for a thread;
//! [`gate::FeedbackGate`] decides when to ask for it.

pub mod gate;

pub use gate::FeedbackGate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Helpful / not-helpful rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Helpful,
    NotHelpful,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::NotHelpful => "not_helpful",
        }
    }

    /// Parses a stored kind name
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "helpful" => Some(Self::Helpful),
            "not_helpful" => Some(Self::NotHelpful),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feedback submitted for one thread
///
/// There is at most one record per thread and kind; writing again overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub thread_id: String,
    pub kind: FeedbackKind,
    /// Preset reasons the user ticked
    pub options: Vec<String>,
    pub free_text: String,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Creates a record timestamped now
    pub fn new(
        thread_id: impl Into<String>,
        kind: FeedbackKind,
        options: Vec<String>,
        free_text: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind,
            options,
            free_text: free_text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(FeedbackKind::Helpful.as_str(), "helpful");
        assert_eq!(FeedbackKind::parse("not_helpful"), Some(FeedbackKind::NotHelpful));
        assert_eq!(FeedbackKind::parse("meh"), None);
        assert_eq!(
            serde_json::to_string(&FeedbackKind::NotHelpful).unwrap(),
            "\"not_helpful\""
        );
    }
}
