use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Where a feed currently is in its per-pass pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "reason", rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Decoding,
    Deduplicating,
    Enriching,
    Persisting,
    Done,
    Failed(FailureReason),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetching => write!(f, "fetching"),
            Stage::Decoding => write!(f, "decoding"),
            Stage::Deduplicating => write!(f, "deduplicating"),
            Stage::Enriching => write!(f, "enriching"),
            Stage::Persisting => write!(f, "persisting"),
            Stage::Done => write!(f, "done"),
            Stage::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Why a feed did not complete its pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    FetchFailed(String),
    ParseFailed(String),
    NoEntries,
    StoreFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::FetchFailed(msg) => write!(f, "fetch failed: {}", msg),
            FailureReason::ParseFailed(msg) => write!(f, "parse failed: {}", msg),
            FailureReason::NoEntries => write!(f, "feed has no entries"),
            FailureReason::StoreFailed(msg) => write!(f, "store failed: {}", msg),
        }
    }
}

/// Result of one feed's trip through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedOutcome {
    pub feed_url: String,
    pub stage: Stage,
    /// Articles actually persisted by this pass
    pub new_articles: usize,
    /// Decoded entries whose link was already stored or claimed elsewhere
    pub skipped: usize,
    pub bozo: bool,
}

impl FeedOutcome {
    pub(crate) fn failed(feed_url: &str, reason: FailureReason) -> Self {
        Self {
            feed_url: feed_url.to_string(),
            stage: Stage::Failed(reason),
            new_articles: 0,
            skipped: 0,
            bozo: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.stage {
            Stage::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Aggregate of one ingestion pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub outcomes: Vec<FeedOutcome>,
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub new_articles: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl PassSummary {
    pub fn from_outcomes(outcomes: Vec<FeedOutcome>, elapsed: Duration) -> Self {
        let feeds_ok = outcomes.iter().filter(|o| o.is_success()).count();
        let new_articles = outcomes.iter().map(|o| o.new_articles).sum();
        Self {
            feeds_failed: outcomes.len() - feeds_ok,
            feeds_ok,
            new_articles,
            outcomes,
            elapsed,
        }
    }

    pub fn outcome_for(&self, feed_url: &str) -> Option<&FeedOutcome> {
        self.outcomes.iter().find(|o| o.feed_url == feed_url)
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(url: &str, new_articles: usize) -> FeedOutcome {
        FeedOutcome {
            feed_url: url.to_string(),
            stage: Stage::Done,
            new_articles,
            skipped: 0,
            bozo: false,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = PassSummary::from_outcomes(
            vec![
                done("https://a.example.com/rss", 3),
                FeedOutcome::failed("https://b.example.com/rss", FailureReason::NoEntries),
                done("https://c.example.com/rss", 0),
            ],
            Duration::from_millis(1500),
        );
        assert_eq!(summary.feeds_ok, 2);
        assert_eq!(summary.feeds_failed, 1);
        assert_eq!(summary.new_articles, 3);
        assert_eq!(
            summary
                .outcome_for("https://b.example.com/rss")
                .and_then(FeedOutcome::failure),
            Some(&FailureReason::NoEntries)
        );
    }

    #[test]
    fn test_outcome_serializes_reason() {
        let outcome = FeedOutcome::failed(
            "https://a.example.com/rss",
            FailureReason::FetchFailed("HTTP error: status 404".to_string()),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stage"]["stage"], "failed");
        assert_eq!(json["stage"]["reason"]["kind"], "fetch_failed");
        assert_eq!(json["stage"]["reason"]["message"], "HTTP error: status 404");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Deduplicating.to_string(), "deduplicating");
        assert_eq!(
            Stage::Failed(FailureReason::ParseFailed("bad".into())).to_string(),
            "failed: parse failed: bad"
        );
    }
}
