use thiserror::Error;
use tracing::trace;

use super::types::{
    EmotionLabel, LabelDistribution, Modality, RawClassification, Signal,
};

/// Why a raw classification could not be turned into a signal.
///
/// All of these are bad external input: the controller drops the signal,
/// records a diagnostic, and fusion continues.
#[derive(Debug, Clone, Error)]
pub enum NormalizeError {
    #[error("label distribution is empty")]
    EmptyDistribution,

    #[error("label distribution cannot be renormalized (sum {sum})")]
    BadDistribution { sum: f32 },

    #[error("confidence is not a finite number")]
    BadConfidence,

    #[error("native timestamp is not a finite number")]
    BadTimestamp,
}

/// Converts raw per-modality classifier outputs into uniform signals.
///
/// Pure aside from the per-modality sequence counters.
pub struct Normalizer {
    next_seq: [u64; 2],
}

impl Normalizer {
    pub fn new() -> Self {
        Self { next_seq: [0, 0] }
    }

    /// Normalize one raw classification.
    ///
    /// Confidence is clamped to [0, 1]. Open-string label names are mapped
    /// into the closed set, unmappable names fold their mass onto
    /// `Unknown`, and the distribution is renormalized (classifiers that
    /// report percentages come out the same as ones reporting
    /// probabilities). A distribution that cannot be renormalized is
    /// rejected.
    pub fn normalize(
        &mut self,
        raw: RawClassification,
        modality: Modality,
    ) -> Result<Signal, NormalizeError> {
        if !raw.timestamp.is_finite() {
            return Err(NormalizeError::BadTimestamp);
        }
        if !raw.confidence.is_finite() {
            return Err(NormalizeError::BadConfidence);
        }
        let confidence = raw.confidence.clamp(0.0, 1.0);

        if raw.labels.is_empty() {
            return Err(NormalizeError::EmptyDistribution);
        }

        let mut labels = LabelDistribution::new();
        for (name, p) in &raw.labels {
            let label = EmotionLabel::parse(name).unwrap_or(EmotionLabel::Unknown);
            labels.add(label, *p);
        }
        if !labels.normalize() {
            return Err(NormalizeError::BadDistribution { sum: labels.sum() });
        }

        let seq = self.next_seq[modality.index()];
        self.next_seq[modality.index()] += 1;

        trace!(
            "normalized {} signal seq={} t={} top={}",
            modality,
            seq,
            raw.timestamp,
            labels.top().0
        );

        Ok(Signal {
            modality,
            native_time: raw.timestamp,
            duration: raw.duration,
            labels,
            confidence,
            transcript: raw.transcript,
            source_seq: seq,
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}
