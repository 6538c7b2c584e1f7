//! Sliding-window history shaping and activity-backed compression.

use tracing::{debug, info};

use troupe_models::{CompressionHints, HistoryMessage};
use troupe_traits::{Activities, CompressionRequest};

use crate::config::CompressionConfig;
use crate::error::Result;

/// Crude token estimate: characters over four, one minimum per message.
pub fn estimate_history_tokens(history: &[HistoryMessage]) -> u64 {
    history
        .iter()
        .map(|m| (m.content.len() as u64 + m.role.len() as u64) / 4 + 1)
        .sum()
}

/// Keep the first `primers` and last `recents` messages. The middle is
/// represented by the compression summary stashed in context.
pub fn shape_history(
    history: &[HistoryMessage],
    primers: usize,
    recents: usize,
) -> Vec<HistoryMessage> {
    if history.len() <= primers + recents {
        return history.to_vec();
    }
    let mut shaped = Vec::with_capacity(primers + recents);
    shaped.extend_from_slice(&history[..primers]);
    shaped.extend_from_slice(&history[history.len() - recents..]);
    shaped
}

/// Result of a compression pass.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub summary: String,
    pub shaped_history: Vec<HistoryMessage>,
    pub tokens_used: u64,
}

/// Compress history when its estimate exceeds the trigger ratio of the
/// per-agent budget. Returns `None` when no compression was needed.
///
/// Ratio and window overrides come from the request's compression hints;
/// engine config supplies the defaults.
pub async fn maybe_compress(
    activities: &Activities,
    config: &CompressionConfig,
    hints: &CompressionHints,
    budget_agent_max: u64,
    session_id: Option<&str>,
    history: &[HistoryMessage],
) -> Result<Option<CompressionOutcome>> {
    if budget_agent_max == 0 || history.is_empty() {
        return Ok(None);
    }

    let trigger_ratio = hints.compression_trigger_ratio.unwrap_or(config.trigger_ratio);
    let target_ratio = hints.compression_target_ratio.unwrap_or(config.target_ratio);
    let estimate = estimate_history_tokens(history);
    let trigger = (budget_agent_max as f64 * trigger_ratio) as u64;

    // The session store may flag accumulated context even when the current
    // window still fits.
    let session_flagged = match session_id {
        Some(session_id) => activities
            .memory
            .check_compression_needed(session_id)
            .await
            .unwrap_or(false),
        None => false,
    };

    if estimate <= trigger && !session_flagged {
        debug!(estimate, trigger, "History within budget, no compression");
        return Ok(None);
    }

    let target_tokens = (budget_agent_max as f64 * target_ratio) as u64;
    info!(estimate, target_tokens, "Compressing history");

    let compressed = activities
        .memory
        .compress_and_store_context(CompressionRequest {
            session_id: session_id.map(str::to_string),
            history: history.to_vec(),
            target_tokens,
        })
        .await?;

    if let Some(session_id) = session_id {
        activities
            .memory
            .update_compression_state(session_id, compressed.tokens_used)
            .await
            .ok();
    }

    let primers = hints.primers_count.unwrap_or(config.primers_count);
    let recents = hints.recents_count.unwrap_or(config.recents_count);

    Ok(Some(CompressionOutcome {
        summary: compressed.summary,
        shaped_history: shape_history(history, primers, recents),
        tokens_used: compressed.tokens_used,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> HistoryMessage {
        HistoryMessage::new("user", content)
    }

    #[test]
    fn estimate_scales_with_content() {
        let short = vec![msg("hi")];
        let long = vec![msg(&"x".repeat(400))];
        assert!(estimate_history_tokens(&long) > estimate_history_tokens(&short));
        assert!(estimate_history_tokens(&short) >= 1);
    }

    #[test]
    fn shaping_keeps_primers_and_recents() {
        let history: Vec<HistoryMessage> =
            (0..10).map(|i| msg(&format!("m{i}"))).collect();
        let shaped = shape_history(&history, 2, 3);
        let contents: Vec<&str> = shaped.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m7", "m8", "m9"]);
    }

    #[test]
    fn shaping_short_history_is_identity() {
        let history: Vec<HistoryMessage> = (0..4).map(|i| msg(&format!("m{i}"))).collect();
        assert_eq!(shape_history(&history, 2, 6).len(), 4);
    }
}
