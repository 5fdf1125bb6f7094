use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Epsilon used when deciding whether a distribution already sums to ~1
pub const DISTRIBUTION_EPSILON: f32 = 1e-3;

/// One independent sensing channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Face,
    Voice,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Face, Modality::Voice];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Voice => "voice",
        }
    }

    /// Stable index for per-modality state arrays
    pub fn index(self) -> usize {
        match self {
            Self::Face => 0,
            Self::Voice => 1,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed emotion label set shared by both modalities.
///
/// The seven named labels are the facial-expression classes the face
/// classifier emits; voice tone vocabulary maps onto them via
/// [`EmotionLabel::parse`]. Anything unmappable lands on `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fear,
    Surprise,
    Disgust,
    Unknown,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 8] = [
        Self::Neutral,
        Self::Happy,
        Self::Sad,
        Self::Angry,
        Self::Fear,
        Self::Surprise,
        Self::Disgust,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Fear => "fear",
            Self::Surprise => "surprise",
            Self::Disgust => "disgust",
            Self::Unknown => "unknown",
        }
    }

    /// Map a raw classifier label name into the closed set.
    ///
    /// Accepts the canonical facial-expression names plus the voice-tone
    /// vocabulary the voice classifier reports. Returns `None` for names
    /// with no defined mapping; callers fold those into `Unknown`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "neutral" => Some(Self::Neutral),
            "happy" | "happiness" => Some(Self::Happy),
            "sad" | "sadness" => Some(Self::Sad),
            "angry" | "anger" => Some(Self::Angry),
            "fear" | "afraid" => Some(Self::Fear),
            "surprise" | "surprised" => Some(Self::Surprise),
            "disgust" | "disgusted" => Some(Self::Disgust),
            "unknown" => Some(Self::Unknown),
            // Voice tone vocabulary
            "energetic" => Some(Self::Happy),
            "calm" => Some(Self::Neutral),
            "tense" => Some(Self::Angry),
            "flat" => Some(Self::Sad),
            "shaky" => Some(Self::Fear),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability distribution over the closed label set.
///
/// Iteration order is the label declaration order, so everything derived
/// from a distribution is deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelDistribution(BTreeMap<EmotionLabel, f32>);

impl LabelDistribution {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// One-hot distribution on a single label
    pub fn single(label: EmotionLabel) -> Self {
        let mut map = BTreeMap::new();
        map.insert(label, 1.0);
        Self(map)
    }

    /// Accumulate probability mass on a label
    pub fn add(&mut self, label: EmotionLabel, p: f32) {
        *self.0.entry(label).or_insert(0.0) += p;
    }

    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.0.get(&label).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f32)> + '_ {
        self.0.iter().map(|(l, p)| (*l, *p))
    }

    /// Scale the distribution so it sums to 1.
    ///
    /// Returns `false` when that is impossible: empty, any non-finite or
    /// negative mass, or a total of ~0.
    pub fn normalize(&mut self) -> bool {
        if self.0.is_empty() {
            return false;
        }
        if self.0.values().any(|p| !p.is_finite() || *p < 0.0) {
            return false;
        }
        let sum = self.sum();
        if sum <= DISTRIBUTION_EPSILON {
            return false;
        }
        if (sum - 1.0).abs() > DISTRIBUTION_EPSILON {
            for p in self.0.values_mut() {
                *p /= sum;
            }
        }
        true
    }

    /// Most probable label. Ties resolve to the earliest label in
    /// declaration order; an empty distribution reads as `Unknown`.
    pub fn top(&self) -> (EmotionLabel, f32) {
        let mut best = (EmotionLabel::Unknown, 0.0f32);
        let mut found = false;
        for (label, p) in self.iter() {
            if !found || p > best.1 {
                best = (label, p);
                found = true;
            }
        }
        best
    }
}

/// Raw per-frame / per-segment output pushed by a classifier.
///
/// Label names are open strings here; the normalizer closes them into
/// [`EmotionLabel`]. `timestamp` is in the modality's native clock and unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClassification {
    pub timestamp: f64,
    /// Covered span of an audio segment, in the same unit as `timestamp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub labels: BTreeMap<String, f32>,
    pub confidence: f32,
    /// Spoken content of a voice segment; never influences fusion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// One line of a recorded session file: which modality pushed what
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub modality: Modality,
    #[serde(flatten)]
    pub classification: RawClassification,
}

/// Normalized classifier output, still on the modality's native clock.
///
/// Immutable once created. The clock aligner turns it into an
/// [`AlignedSignal`] on the session clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub modality: Modality,
    pub native_time: f64,
    pub duration: Option<f64>,
    pub labels: LabelDistribution,
    pub confidence: f32,
    pub transcript: Option<String>,
    /// Per-modality monotonic sequence number
    pub source_seq: u64,
}

/// A signal mapped onto the session clock (milliseconds since start)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedSignal {
    pub modality: Modality,
    pub session_ms: u64,
    pub duration_ms: Option<u64>,
    pub labels: LabelDistribution,
    pub confidence: f32,
    pub transcript: Option<String>,
    pub source_seq: u64,
}

impl AlignedSignal {
    pub fn top_label(&self) -> EmotionLabel {
        self.labels.top().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_canonical() {
        assert_eq!(EmotionLabel::parse("happy"), Some(EmotionLabel::Happy));
        assert_eq!(EmotionLabel::parse("SURPRISE"), Some(EmotionLabel::Surprise));
        assert_eq!(EmotionLabel::parse("sadness"), Some(EmotionLabel::Sad));
        assert_eq!(EmotionLabel::parse("smug"), None);
    }

    #[test]
    fn test_label_parse_voice_tones() {
        assert_eq!(EmotionLabel::parse("energetic"), Some(EmotionLabel::Happy));
        assert_eq!(EmotionLabel::parse("calm"), Some(EmotionLabel::Neutral));
        assert_eq!(EmotionLabel::parse("flat"), Some(EmotionLabel::Sad));
        assert_eq!(EmotionLabel::parse("shaky"), Some(EmotionLabel::Fear));
    }

    #[test]
    fn test_distribution_normalize_percentages() {
        // DeepFace-style output sums to 100, not 1
        let mut dist = LabelDistribution::new();
        dist.add(EmotionLabel::Happy, 90.0);
        dist.add(EmotionLabel::Neutral, 10.0);
        assert!(dist.normalize());
        assert!((dist.get(EmotionLabel::Happy) - 0.9).abs() < 1e-6);
        assert!((dist.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distribution_normalize_rejects_zero_mass() {
        let mut dist = LabelDistribution::new();
        dist.add(EmotionLabel::Happy, 0.0);
        assert!(!dist.normalize());
        assert!(!LabelDistribution::new().normalize());
    }

    #[test]
    fn test_distribution_normalize_rejects_non_finite() {
        let mut dist = LabelDistribution::new();
        dist.add(EmotionLabel::Happy, f32::NAN);
        assert!(!dist.normalize());

        let mut dist = LabelDistribution::new();
        dist.add(EmotionLabel::Sad, -0.5);
        dist.add(EmotionLabel::Happy, 1.5);
        assert!(!dist.normalize());
    }

    #[test]
    fn test_distribution_top_deterministic_tie() {
        let mut dist = LabelDistribution::new();
        dist.add(EmotionLabel::Sad, 0.5);
        dist.add(EmotionLabel::Happy, 0.5);
        // Happy precedes Sad in declaration order
        assert_eq!(dist.top().0, EmotionLabel::Happy);
    }

    #[test]
    fn test_distribution_top_empty_is_unknown() {
        let dist = LabelDistribution::new();
        assert_eq!(dist.top(), (EmotionLabel::Unknown, 0.0));
    }

    #[test]
    fn test_recorded_event_roundtrip() {
        let json = r#"{"modality":"voice","timestamp":1.5,"duration":0.8,"labels":{"calm":0.7,"tense":0.3},"confidence":0.6,"transcript":"hello there"}"#;
        let event: RecordedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.modality, Modality::Voice);
        assert_eq!(event.classification.transcript.as_deref(), Some("hello there"));
        let back = serde_json::to_string(&event).unwrap();
        let again: RecordedEvent = serde_json::from_str(&back).unwrap();
        assert_eq!(event, again);
    }
}
