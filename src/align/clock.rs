use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signal::{AlignedSignal, Signal};

/// Unit a modality reports its native timestamps in.
///
/// Configured per modality, never inferred from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
}

impl TimeUnit {
    /// Multiplier from a native timestamp to milliseconds
    pub fn to_millis_scale(self) -> f64 {
        match self {
            Self::Seconds => 1000.0,
            Self::Millis => 1.0,
            Self::Micros => 0.001,
        }
    }
}

impl Default for TimeUnit {
    fn default() -> Self {
        Self::Seconds
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s" | "sec" | "seconds" => Ok(Self::Seconds),
            "ms" | "millis" | "milliseconds" => Ok(Self::Millis),
            "us" | "micros" | "microseconds" => Ok(Self::Micros),
            _ => Err(format!("Unknown time unit: {}", s)),
        }
    }
}

/// How a modality's native clock is tied to the session clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// Offset is fixed when the first signal arrives, mapping it to the
    /// session clock's reading at that moment. The live default: each
    /// sensing pipeline keeps its own native epoch.
    FirstSignal,
    /// Native timestamps are already session-relative; only the unit is
    /// converted. Used when replaying recordings.
    SessionRelative,
}

impl Default for AnchorMode {
    fn default() -> Self {
        Self::FirstSignal
    }
}

/// Affine map from one modality's native clock onto session milliseconds:
/// `session_ms = native * unit_scale + offset_ms`.
pub struct ClockAligner {
    unit: TimeUnit,
    mode: AnchorMode,
    offset_ms: f64,
    anchored: bool,
}

impl ClockAligner {
    pub fn new(unit: TimeUnit, mode: AnchorMode) -> Self {
        Self {
            unit,
            mode,
            offset_ms: 0.0,
            anchored: matches!(mode, AnchorMode::SessionRelative),
        }
    }

    /// Whether the offset has been fixed yet
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Map a signal onto the session clock.
    ///
    /// In `FirstSignal` mode the first accepted signal fixes the offset so
    /// that it lands on `anchor_ms` (the session clock's current reading);
    /// the offset never moves afterwards except via [`Self::shift_ms`].
    pub fn align(&mut self, signal: Signal, anchor_ms: u64) -> AlignedSignal {
        let scale = self.unit.to_millis_scale();
        let native_ms = signal.native_time * scale;
        if !self.anchored {
            self.offset_ms = anchor_ms as f64 - native_ms;
            self.anchored = true;
            debug!(
                "{} clock anchored: native {:.1}ms -> session {}ms (offset {:.1}ms)",
                signal.modality, native_ms, anchor_ms, self.offset_ms
            );
        }
        let session_ms = (native_ms + self.offset_ms).round().max(0.0) as u64;
        let duration_ms = signal
            .duration
            .map(|d| (d * scale).round().max(0.0) as u64);
        AlignedSignal {
            modality: signal.modality,
            session_ms,
            duration_ms,
            labels: signal.labels,
            confidence: signal.confidence,
            transcript: signal.transcript,
            source_seq: signal.source_seq,
        }
    }

    /// Shift the mapping, e.g. by the negated duration of a pause so a
    /// producer whose native clock ran through it lands back on frozen
    /// session time.
    pub fn shift_ms(&mut self, delta_ms: f64) {
        if self.anchored {
            self.offset_ms += delta_ms;
        }
    }

    #[allow(dead_code)]
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }
}
