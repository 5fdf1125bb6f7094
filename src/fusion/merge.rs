use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::signal::{AlignedSignal, Modality};

/// Heap entry ordered by (session_ms, modality, source_seq).
///
/// Face sorts before Voice at equal timestamps, which is the documented
/// deterministic resolution for simultaneous arrivals.
struct Queued(AlignedSignal);

impl Queued {
    fn key(&self) -> (u64, usize, u64) {
        (self.0.session_ms, self.0.modality.index(), self.0.source_seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// The single synchronization point of the pipeline: merges the two
/// per-modality ordered streams into one strictly timestamp-ordered stream.
///
/// A buffered signal is released once every *live* modality has advanced
/// at or past its timestamp. A modality counts as live while it has been
/// observed at all and its newest timestamp lags the global newest by no
/// more than the staleness window; a silent or never-calibrated modality
/// therefore stops gating the other within that bound and never blocks
/// it. Once released, order is never revisited: arrivals under the
/// released watermark are handed back for late-signal handling.
pub struct MergeQueue {
    staleness_ms: u64,
    heap: BinaryHeap<Reverse<Queued>>,
    newest_ms: [Option<u64>; 2],
    watermark_ms: Option<u64>,
}

impl MergeQueue {
    pub fn new(staleness_ms: u64) -> Self {
        Self {
            staleness_ms,
            heap: BinaryHeap::new(),
            newest_ms: [None, None],
            watermark_ms: None,
        }
    }

    /// Note a modality's newest aligned timestamp, even when the signal is
    /// still sitting in its reordering buffer. Keeps liveness accurate for
    /// modalities whose signals are delayed upstream.
    pub fn observe(&mut self, modality: Modality, session_ms: u64) {
        let idx = modality.index();
        self.newest_ms[idx] = Some(match self.newest_ms[idx] {
            Some(prev) => prev.max(session_ms),
            None => session_ms,
        });
    }

    /// Accept a signal, or hand it back if it is under the released watermark
    pub fn push(&mut self, signal: AlignedSignal) -> Result<(), AlignedSignal> {
        if let Some(watermark) = self.watermark_ms {
            if signal.session_ms < watermark {
                return Err(signal);
            }
        }
        self.observe(signal.modality, signal.session_ms);
        self.heap.push(Reverse(Queued(signal)));
        Ok(())
    }

    /// Newest timestamp delivered by any modality
    fn global_newest(&self) -> Option<u64> {
        self.newest_ms.iter().flatten().copied().max()
    }

    /// Highest timestamp that can be released without risking reordering:
    /// the minimum over the newest timestamps of live modalities.
    fn release_horizon(&self) -> Option<u64> {
        let global = self.global_newest()?;
        let mut horizon: Option<u64> = None;
        for modality in Modality::ALL {
            if let Some(newest) = self.newest_ms[modality.index()] {
                if global.saturating_sub(newest) <= self.staleness_ms {
                    horizon = Some(match horizon {
                        Some(h) => h.min(newest),
                        None => newest,
                    });
                }
            }
        }
        horizon
    }

    /// Release merged signals up to the current horizon, lowest first
    pub fn pop_ready(&mut self) -> Vec<AlignedSignal> {
        let Some(horizon) = self.release_horizon() else {
            return Vec::new();
        };
        self.pop_up_to(horizon)
    }

    /// Release everything still buffered, lowest first (session stop)
    pub fn flush(&mut self) -> Vec<AlignedSignal> {
        self.pop_up_to(u64::MAX)
    }

    fn pop_up_to(&mut self, horizon: u64) -> Vec<AlignedSignal> {
        let mut out = Vec::new();
        while let Some(Reverse(queued)) = self.heap.peek() {
            if queued.0.session_ms > horizon {
                break;
            }
            if let Some(Reverse(Queued(signal))) = self.heap.pop() {
                self.watermark_ms = Some(signal.session_ms);
                out.push(signal);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
