use serde::{Deserialize, Serialize};

use crate::signal::EmotionLabel;

/// One fused interval of the session timeline.
///
/// Entries partition `[0, current_session_ms)`: they never overlap, each
/// starts where the previous ended, and silence is covered by explicit
/// `gap` entries. Immutable once appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedEntry {
    pub start_ms: u64,
    pub end_ms: u64,
    pub dominant: EmotionLabel,
    /// Face modality's own label, absent when it had no fresh signal
    pub face: Option<EmotionLabel>,
    /// Voice modality's own label, absent when it had no fresh signal
    pub voice: Option<EmotionLabel>,
    pub fused_confidence: f32,
    pub gap: bool,
    /// Spoken content overlapping this entry; excerpt material only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl FusedEntry {
    /// Entry covering an interval where no modality had a fresh signal
    pub fn gap(start_ms: u64, end_ms: u64) -> Self {
        Self {
            start_ms,
            end_ms,
            dominant: EmotionLabel::Unknown,
            face: None,
            voice: None,
            fused_confidence: 0.0,
            gap: true,
            transcript: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}
