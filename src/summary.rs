//! Finished-session payload for the narrative-summary generator.
//!
//! The engine defines only the payload shape; prompt construction and
//! response handling belong to the external text-generation service.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::diagnostics::DiagnosticLog;
use crate::signal::EmotionLabel;
use crate::timeline::{aggregate, FusedEntry};

/// Opaque structured payload handed to downstream consumers once a
/// session reaches `Finished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Covered session time, i.e. the end of the entry partition
    pub duration_ms: u64,
    pub entry_count: usize,
    /// Time spent in gap entries
    pub gap_ms: u64,
    /// Emotion holding the most session time
    pub dominant: EmotionLabel,
    /// Duration-weighted label breakdown, gap entries excluded
    pub distribution_ms: BTreeMap<EmotionLabel, u64>,
    /// Spoken excerpts in timeline order
    pub transcript_excerpts: Vec<String>,
    /// Per-kind counts of non-fatal conditions observed during the session
    pub diagnostics: BTreeMap<String, u32>,
    /// Full fused timeline
    pub timeline: Vec<FusedEntry>,
}

impl SummaryPayload {
    pub fn build(
        session_id: Uuid,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        entries: Vec<FusedEntry>,
        diagnostics: &DiagnosticLog,
    ) -> Self {
        let duration_ms = entries.last().map(|e| e.end_ms).unwrap_or(0);
        let transcript_excerpts = entries
            .iter()
            .filter_map(|e| e.transcript.clone())
            .collect();
        Self {
            session_id,
            started_at,
            ended_at,
            duration_ms,
            entry_count: entries.len(),
            gap_ms: aggregate::gap_ms(&entries),
            dominant: aggregate::dominant_overall(&entries),
            distribution_ms: aggregate::distribution_ms(&entries),
            transcript_excerpts,
            diagnostics: diagnostics.counts_by_kind(),
            timeline: entries,
        }
    }
}
