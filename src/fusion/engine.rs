use std::collections::VecDeque;

use tracing::trace;

use crate::signal::{AlignedSignal, EmotionLabel, LabelDistribution, Modality};
use crate::timeline::FusedEntry;

/// Fusion tunables. Defaults are calibration starting points, not law.
#[derive(Debug, Clone)]
pub struct FusionParams {
    /// How long a modality's newest signal keeps voting
    pub staleness_ms: u64,
    /// Minimum time a dominant label holds before any candidate may
    /// displace it without beating the margin
    pub min_dwell_ms: u64,
    /// Score lead a different label needs to displace the dominant early
    pub hysteresis_margin: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            staleness_ms: 5000,
            min_dwell_ms: 1000,
            hysteresis_margin: 0.1,
        }
    }
}

/// One modality's contribution to a fusion decision
struct Vote {
    label: EmotionLabel,
    confidence: f32,
    dist: LabelDistribution,
}

/// The entry currently being accumulated, not yet closed
struct OpenEntry {
    start_ms: u64,
    dominant: EmotionLabel,
    face: Option<EmotionLabel>,
    voice: Option<EmotionLabel>,
    fused_confidence: f32,
    gap: bool,
    transcript: Option<String>,
}

impl OpenEntry {
    fn gap(start_ms: u64) -> Self {
        Self {
            start_ms,
            dominant: EmotionLabel::Unknown,
            face: None,
            voice: None,
            fused_confidence: 0.0,
            gap: true,
            transcript: None,
        }
    }

    fn close(self, end_ms: u64) -> FusedEntry {
        FusedEntry {
            start_ms: self.start_ms,
            end_ms,
            dominant: self.dominant,
            face: self.face,
            voice: self.voice,
            fused_confidence: self.fused_confidence,
            gap: self.gap,
            transcript: self.transcript,
        }
    }
}

/// Outcome of evaluating the modality state at one instant
struct Decision {
    dominant: EmotionLabel,
    confidence: f32,
    face: Option<EmotionLabel>,
    voice: Option<EmotionLabel>,
    gap: bool,
}

/// The fusion state machine.
///
/// Consumes the merged, strictly timestamp-ordered signal stream and emits
/// fused entries into an output queue the caller drains. Fully
/// deterministic: an identical input sequence always produces identical
/// entries.
pub struct FusionEngine {
    params: FusionParams,
    last: [Option<AlignedSignal>; 2],
    open: Option<OpenEntry>,
    /// Label currently holding the timeline, with the score it last won at
    /// and when it took over; drives hysteresis
    current_dominant: Option<EmotionLabel>,
    dominant_score: f32,
    dominant_since_ms: u64,
    latest_ms: u64,
    emitted: VecDeque<FusedEntry>,
    finished: bool,
}

impl FusionEngine {
    pub fn new(params: FusionParams) -> Self {
        Self {
            params,
            last: [None, None],
            open: None,
            current_dominant: None,
            dominant_score: 0.0,
            dominant_since_ms: 0,
            latest_ms: 0,
            emitted: VecDeque::new(),
            finished: false,
        }
    }

    /// Consume the next signal of the merged stream.
    ///
    /// Closes the open entry at the signal's timestamp (splitting off an
    /// explicit gap first when the interval outlived every signal) and
    /// opens a new one; a signal at the exact same timestamp as the open
    /// entry folds into it instead.
    pub fn process(&mut self, signal: AlignedSignal) {
        if self.finished {
            return;
        }
        let t = signal.session_ms;
        self.latest_ms = self.latest_ms.max(t);
        self.advance_to(t);
        let modality_index = signal.modality.index();
        self.last[modality_index] = Some(signal);
        self.reopen_at(t);
    }

    /// Close the final open entry; no entry is ever left implicitly open.
    pub fn finish(&mut self, end_ms: u64) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.open.take() {
            None => {
                // Session ended without a single accepted signal
                if end_ms > 0 {
                    self.push_entry(FusedEntry::gap(0, end_ms));
                }
            }
            Some(open) => {
                if end_ms <= open.start_ms {
                    // Nothing elapsed since the entry opened; the
                    // partition simply ends at its start.
                    return;
                }
                if !open.gap {
                    if let Some(deadline) = self.freshness_deadline() {
                        if end_ms > deadline && deadline > open.start_ms {
                            self.push_entry(open.close(deadline));
                            self.push_entry(FusedEntry::gap(deadline, end_ms));
                            return;
                        }
                    }
                }
                self.push_entry(open.close(end_ms));
            }
        }
    }

    /// Next emitted entry, in timeline order
    pub fn pop_entry(&mut self) -> Option<FusedEntry> {
        self.emitted.pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.emitted.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.emitted.is_empty()
    }

    /// Highest session timestamp processed so far
    pub fn latest_ms(&self) -> u64 {
        self.latest_ms
    }

    /// Instant past which every known signal has gone stale
    fn freshness_deadline(&self) -> Option<u64> {
        self.last
            .iter()
            .flatten()
            .map(|s| s.session_ms + self.params.staleness_ms)
            .max()
    }

    /// Close entries covering everything strictly before `t`
    fn advance_to(&mut self, t: u64) {
        let (open_start, open_gap) = match &self.open {
            Some(open) => (open.start_ms, open.gap),
            None => {
                if t > 0 {
                    // Leading silence is covered explicitly
                    self.push_entry(FusedEntry::gap(0, t));
                }
                return;
            }
        };
        if t <= open_start {
            return;
        }
        if !open_gap {
            if let Some(deadline) = self.freshness_deadline() {
                if t > deadline && deadline > open_start {
                    // The open interval outlived every signal: close it at
                    // the staleness deadline and cover the rest as a gap.
                    if let Some(open) = self.open.take() {
                        self.push_entry(open.close(deadline));
                    }
                    self.open = Some(OpenEntry::gap(deadline));
                    self.current_dominant = None;
                    self.dominant_score = 0.0;
                }
            }
        }
        if let Some(open) = self.open.take() {
            self.push_entry(open.close(t));
        }
    }

    /// Recompute the open entry at `t` after a signal landed there
    fn reopen_at(&mut self, t: u64) {
        let decision = self.decide(t);
        let transcript = self.last[Modality::Voice.index()]
            .as_ref()
            .filter(|v| v.session_ms == t)
            .and_then(|v| v.transcript.clone());

        match self.open.as_mut() {
            Some(open) if open.start_ms == t => {
                open.dominant = decision.dominant;
                open.face = decision.face;
                open.voice = decision.voice;
                open.fused_confidence = decision.confidence;
                open.gap = decision.gap;
                if transcript.is_some() {
                    open.transcript = transcript;
                }
            }
            _ => {
                self.open = Some(OpenEntry {
                    start_ms: t,
                    dominant: decision.dominant,
                    face: decision.face,
                    voice: decision.voice,
                    fused_confidence: decision.confidence,
                    gap: decision.gap,
                    transcript,
                });
            }
        }
    }

    fn fresh_vote(&self, modality: Modality, t: u64) -> Option<Vote> {
        self.last[modality.index()]
            .as_ref()
            .filter(|s| t.saturating_sub(s.session_ms) <= self.params.staleness_ms)
            .map(|s| Vote {
                label: s.top_label(),
                confidence: s.confidence,
                dist: s.labels.clone(),
            })
    }

    /// Dominant selection with hysteresis
    fn decide(&mut self, t: u64) -> Decision {
        let face = self.fresh_vote(Modality::Face, t);
        let voice = self.fresh_vote(Modality::Voice, t);

        if face.is_none() && voice.is_none() {
            self.current_dominant = None;
            self.dominant_score = 0.0;
            return Decision {
                dominant: EmotionLabel::Unknown,
                confidence: 0.0,
                face: None,
                voice: None,
                gap: true,
            };
        }

        let (candidate, candidate_score) = select_candidate(face.as_ref(), voice.as_ref());

        let dominant = match self.current_dominant {
            None => {
                self.current_dominant = Some(candidate);
                self.dominant_score = candidate_score;
                self.dominant_since_ms = t;
                candidate
            }
            Some(current) if current == candidate => {
                self.dominant_score = candidate_score;
                candidate
            }
            Some(current) => {
                let dwell_elapsed =
                    t.saturating_sub(self.dominant_since_ms) >= self.params.min_dwell_ms;
                if candidate_score > self.dominant_score + self.params.hysteresis_margin
                    || dwell_elapsed
                {
                    trace!(
                        "dominant {} -> {} at {}ms (score {:.3} vs {:.3})",
                        current,
                        candidate,
                        t,
                        candidate_score,
                        self.dominant_score
                    );
                    self.current_dominant = Some(candidate);
                    self.dominant_score = candidate_score;
                    self.dominant_since_ms = t;
                    candidate
                } else {
                    current
                }
            }
        };

        let confidence = confidence_for(dominant, face.as_ref(), voice.as_ref());
        Decision {
            dominant,
            confidence,
            face: face.map(|v| v.label),
            voice: voice.map(|v| v.label),
            gap: false,
        }
    }

    fn push_entry(&mut self, entry: FusedEntry) {
        trace!(
            "fused entry [{}ms, {}ms) dominant={} gap={}",
            entry.start_ms,
            entry.end_ms,
            entry.dominant,
            entry.gap
        );
        self.emitted.push_back(entry);
    }
}

/// Confidence-weighted vote across the fresh modalities.
///
/// Exact score ties resolve to the top label of the modality with the
/// higher instantaneous confidence, then Face over Voice.
fn select_candidate(face: Option<&Vote>, voice: Option<&Vote>) -> (EmotionLabel, f32) {
    match (face, voice) {
        (Some(f), Some(v)) => {
            let score = |label: EmotionLabel| {
                f.confidence * f.dist.get(label) + v.confidence * v.dist.get(label)
            };
            let mut best = EmotionLabel::Neutral;
            let mut best_score = f32::NEG_INFINITY;
            for label in EmotionLabel::ALL {
                let s = score(label);
                if s > best_score {
                    best = label;
                    best_score = s;
                }
            }
            let tied: Vec<EmotionLabel> = EmotionLabel::ALL
                .into_iter()
                .filter(|l| score(*l) == best_score)
                .collect();
            if tied.len() > 1 {
                // Face wins the preference at equal confidence
                let (preferred, other) = if f.confidence >= v.confidence {
                    (f.label, v.label)
                } else {
                    (v.label, f.label)
                };
                if tied.contains(&preferred) {
                    best = preferred;
                } else if tied.contains(&other) {
                    best = other;
                }
            }
            (best, best_score)
        }
        (Some(f), None) => (f.label, f.confidence * f.dist.get(f.label)),
        (None, Some(v)) => (v.label, v.confidence * v.dist.get(v.label)),
        (None, None) => (EmotionLabel::Unknown, 0.0),
    }
}

/// Fused confidence for the selected dominant label
fn confidence_for(dominant: EmotionLabel, face: Option<&Vote>, voice: Option<&Vote>) -> f32 {
    match (face, voice) {
        (Some(f), Some(v)) => {
            let denom = f.confidence + v.confidence;
            if denom > 0.0 {
                (f.confidence * f.dist.get(dominant) + v.confidence * v.dist.get(dominant)) / denom
            } else {
                0.0
            }
        }
        (Some(only), None) | (None, Some(only)) => {
            if only.label == dominant {
                only.confidence
            } else {
                // Hysteresis retained a label this modality no longer tops
                only.confidence * only.dist.get(dominant)
            }
        }
        (None, None) => 0.0,
    }
}
