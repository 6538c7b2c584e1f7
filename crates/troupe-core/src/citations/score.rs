//! Relevance, recency, and quality scoring.

use chrono::{DateTime, NaiveDate, Utc};

use troupe_models::ToolSource;

/// Relevance for a citation without a search score: fetched pages are
/// strong signals, plain-text URL extraction weak.
pub fn default_relevance(tool_source: ToolSource) -> f64 {
    match tool_source {
        ToolSource::Fetch => 0.8,
        ToolSource::Search => 0.5,
        ToolSource::None => 0.4,
    }
}

/// Recency score from a published date: 1.0 under a week, 0.7 under a month,
/// 0.4 under ninety days, 0.2 beyond (and for missing/unparseable dates).
pub fn recency_score(published_date: Option<&str>, now: DateTime<Utc>) -> f64 {
    let Some(days) = published_date.and_then(|d| days_since(d, now)) else {
        return 0.2;
    };
    if days < 7 {
        1.0
    } else if days < 30 {
        0.7
    } else if days < 90 {
        0.4
    } else {
        0.2
    }
}

fn days_since(date: &str, now: DateTime<Utc>) -> Option<i64> {
    let date = date.trim();
    let parsed = DateTime::parse_from_rfc3339(date)
        .map(|dt| dt.date_naive())
        .or_else(|_| NaiveDate::parse_from_str(date, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(date, "%Y/%m/%d"))
        .or_else(|_| NaiveDate::parse_from_str(date, "%B %d, %Y"))
        .ok()?;
    let days = (now.date_naive() - parsed).num_days();
    (days >= 0).then_some(days)
}

/// Quality: relevance-weighted with recency, plus a small completeness bonus
/// for having a date, title, and snippet. Capped at 1.0.
pub fn quality_score(
    relevance: f64,
    recency: f64,
    has_date: bool,
    has_title: bool,
    has_snippet: bool,
) -> f64 {
    let completeness = [has_date, has_title, has_snippet]
        .iter()
        .filter(|present| **present)
        .count() as f64
        * 0.033;
    (relevance * 0.7 + recency * 0.3 + completeness).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn recency_buckets() {
        let now = Utc::now();
        let days_ago = |days: i64| (now - Duration::days(days)).format("%Y-%m-%d").to_string();
        assert_eq!(recency_score(Some(&days_ago(2)), now), 1.0);
        assert_eq!(recency_score(Some(&days_ago(20)), now), 0.7);
        assert_eq!(recency_score(Some(&days_ago(60)), now), 0.4);
        assert_eq!(recency_score(Some(&days_ago(365)), now), 0.2);
        assert_eq!(recency_score(None, now), 0.2);
        assert_eq!(recency_score(Some("not a date"), now), 0.2);
    }

    #[test]
    fn quality_combines_relevance_recency_completeness() {
        let full = quality_score(1.0, 1.0, true, true, true);
        assert_eq!(full, 1.0);

        let bare = quality_score(0.4, 0.2, false, false, false);
        assert!((bare - (0.4 * 0.7 + 0.2 * 0.3)).abs() < 1e-9);

        let with_bonus = quality_score(0.4, 0.2, true, true, false);
        assert!((with_bonus - bare - 0.066).abs() < 1e-9);
    }

    #[test]
    fn relevance_defaults_by_source() {
        assert_eq!(default_relevance(ToolSource::Fetch), 0.8);
        assert_eq!(default_relevance(ToolSource::None), 0.4);
    }
}
