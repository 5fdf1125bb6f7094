use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signal::EmotionLabel;

use super::entry::FusedEntry;

/// Derived view over the trailing window of a timeline.
///
/// A cache, never a source of truth: safe to discard and rebuild from the
/// entry sequence at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingAggregate {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    /// Number of non-gap entries per dominant label inside the window
    pub label_counts: BTreeMap<EmotionLabel, u32>,
    pub dominant: EmotionLabel,
    pub transcript_excerpt: Option<String>,
}

/// Compute the aggregate over entries overlapping the trailing window
pub fn compute(entries: &[FusedEntry], window_ms: u64) -> RollingAggregate {
    let window_end_ms = entries.last().map(|e| e.end_ms).unwrap_or(0);
    let window_start_ms = window_end_ms.saturating_sub(window_ms);

    let mut label_counts: BTreeMap<EmotionLabel, u32> = BTreeMap::new();
    let mut excerpts: Vec<&str> = Vec::new();
    for entry in entries {
        if entry.end_ms <= window_start_ms || entry.start_ms >= window_end_ms {
            continue;
        }
        if !entry.gap {
            *label_counts.entry(entry.dominant).or_insert(0) += 1;
        }
        if let Some(text) = entry.transcript.as_deref() {
            excerpts.push(text);
        }
    }

    let dominant = label_counts
        .iter()
        .fold((EmotionLabel::Unknown, 0u32), |best, (label, count)| {
            if *count > best.1 {
                (*label, *count)
            } else {
                best
            }
        })
        .0;

    let transcript_excerpt = if excerpts.is_empty() {
        None
    } else {
        Some(excerpts.join(" "))
    };

    RollingAggregate {
        window_start_ms,
        window_end_ms,
        label_counts,
        dominant,
        transcript_excerpt,
    }
}

/// Session-wide duration-weighted label breakdown (gap entries excluded)
pub fn distribution_ms(entries: &[FusedEntry]) -> BTreeMap<EmotionLabel, u64> {
    let mut out = BTreeMap::new();
    for entry in entries {
        if !entry.gap {
            *out.entry(entry.dominant).or_insert(0) += entry.duration_ms();
        }
    }
    out
}

/// Total time the timeline spent in gap entries
pub fn gap_ms(entries: &[FusedEntry]) -> u64 {
    entries
        .iter()
        .filter(|e| e.gap)
        .map(|e| e.duration_ms())
        .sum()
}

/// Emotion holding the most session time; `Unknown` for an all-gap timeline
pub fn dominant_overall(entries: &[FusedEntry]) -> EmotionLabel {
    distribution_ms(entries)
        .iter()
        .fold((EmotionLabel::Unknown, 0u64), |best, (label, ms)| {
            if *ms > best.1 {
                (*label, *ms)
            } else {
                best
            }
        })
        .0
}
