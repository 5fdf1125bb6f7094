use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::signal::Modality;

/// Safety cap: discard oldest diagnostics when the ledger exceeds this
/// count, so a misbehaving producer cannot grow it without bound.
pub const DEFAULT_MAX_DIAGNOSTICS: usize = 1000;

/// Non-fatal conditions attached to a session for later inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Bad input from a classifier, dropped
    MalformedSignal,
    /// Arrived outside the reordering window, dropped
    LateSignal,
    /// Arrived after the session finished, dropped
    SessionClosed,
    /// A modality never delivered before the staleness deadline; the
    /// session proceeds in degraded single-modality mode
    CalibrationFailure,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedSignal => "malformed_signal",
            Self::LateSignal => "late_signal",
            Self::SessionClosed => "session_closed",
            Self::CalibrationFailure => "calibration_failure",
        }
    }
}

/// One recorded condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub session_ms: u64,
    pub kind: DiagnosticKind,
    pub modality: Option<Modality>,
    pub detail: String,
}

/// Capacity-capped ledger of non-fatal conditions.
///
/// Conditions are reported upward (dashboard warning badge, summary
/// payload) but never interrupt fusion.
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
    counts: BTreeMap<DiagnosticKind, u32>,
    max_entries: usize,
    discarded: u64,
}

impl DiagnosticLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            counts: BTreeMap::new(),
            max_entries,
            discarded: 0,
        }
    }

    pub fn push(
        &mut self,
        kind: DiagnosticKind,
        modality: Option<Modality>,
        session_ms: u64,
        detail: impl Into<String>,
    ) {
        let detail = detail.into();
        warn!(
            "{} at {}ms{}: {}",
            kind.as_str(),
            session_ms,
            modality.map(|m| format!(" ({})", m)).unwrap_or_default(),
            detail
        );
        *self.counts.entry(kind).or_insert(0) += 1;
        self.entries.push(Diagnostic {
            at: Utc::now(),
            session_ms,
            kind,
            modality,
            detail,
        });
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.discarded += excess as u64;
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn count(&self, kind: DiagnosticKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Per-kind counts keyed by the stable string name (payload form)
    pub fn counts_by_kind(&self) -> BTreeMap<String, u32> {
        self.counts
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostics dropped by the safety cap
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
