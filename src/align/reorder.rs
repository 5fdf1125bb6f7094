use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::signal::AlignedSignal;

/// Heap entry ordered by (session_ms, source_seq)
struct Pending(AlignedSignal);

impl Pending {
    fn key(&self) -> (u64, u64) {
        (self.0.session_ms, self.0.source_seq)
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Bounded per-modality reordering buffer.
///
/// Holds signals for up to the window so out-of-order arrivals can be
/// re-sorted, then releases them oldest-first once the session clock has
/// moved past them by the window. Arrivals older than the window relative
/// to the modality's newest timestamp, or under the released watermark,
/// are rejected; the caller reports them as late and drops them.
pub struct ReorderBuffer {
    window_ms: u64,
    heap: BinaryHeap<Reverse<Pending>>,
    newest_ms: u64,
    watermark_ms: Option<u64>,
}

impl ReorderBuffer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            heap: BinaryHeap::new(),
            newest_ms: 0,
            watermark_ms: None,
        }
    }

    /// Accept a signal, or hand it back if it arrived too late to reorder
    pub fn push(&mut self, signal: AlignedSignal) -> Result<(), AlignedSignal> {
        if signal.session_ms + self.window_ms < self.newest_ms {
            return Err(signal);
        }
        if let Some(watermark) = self.watermark_ms {
            if signal.session_ms < watermark {
                return Err(signal);
            }
        }
        self.newest_ms = self.newest_ms.max(signal.session_ms);
        self.heap.push(Reverse(Pending(signal)));
        Ok(())
    }

    /// Release every signal the session clock has aged out, oldest first
    pub fn pop_ready(&mut self, now_ms: u64) -> Vec<AlignedSignal> {
        let mut out = Vec::new();
        while let Some(Reverse(pending)) = self.heap.peek() {
            if pending.0.session_ms + self.window_ms > now_ms {
                break;
            }
            if let Some(Reverse(Pending(signal))) = self.heap.pop() {
                self.watermark_ms = Some(signal.session_ms);
                out.push(signal);
            }
        }
        out
    }

    /// Release everything still buffered, oldest first (session stop)
    pub fn flush(&mut self) -> Vec<AlignedSignal> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(Reverse(Pending(signal))) = self.heap.pop() {
            self.watermark_ms = Some(signal.session_ms);
            out.push(signal);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{EmotionLabel, LabelDistribution, Modality};

    fn sig(session_ms: u64, seq: u64) -> AlignedSignal {
        AlignedSignal {
            modality: Modality::Face,
            session_ms,
            duration_ms: None,
            labels: LabelDistribution::single(EmotionLabel::Happy),
            confidence: 0.9,
            transcript: None,
            source_seq: seq,
        }
    }

    #[test]
    fn test_holds_signals_inside_window() {
        let mut buf = ReorderBuffer::new(2000);
        buf.push(sig(1000, 0)).unwrap();
        assert!(buf.pop_ready(2500).is_empty());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_releases_once_clock_ages_them_out() {
        let mut buf = ReorderBuffer::new(2000);
        buf.push(sig(1000, 0)).unwrap();
        buf.push(sig(500, 1)).unwrap(); // out of order arrival
        buf.push(sig(4000, 2)).unwrap();

        let released: Vec<u64> = buf.pop_ready(4000).iter().map(|s| s.session_ms).collect();
        assert_eq!(released, vec![500, 1000]);
        assert_eq!(buf.len(), 1);

        let released: Vec<u64> = buf.pop_ready(6000).iter().map(|s| s.session_ms).collect();
        assert_eq!(released, vec![4000]);
    }

    #[test]
    fn test_rejects_signals_outside_window() {
        let mut buf = ReorderBuffer::new(2000);
        buf.push(sig(1000, 0)).unwrap();
        buf.push(sig(4000, 1)).unwrap();

        // More than the window behind the newest (4000ms) timestamp
        assert!(buf.push(sig(800, 2)).is_err());
        assert!(buf.push(sig(1500, 3)).is_err());
        // Still inside the window
        assert!(buf.push(sig(2100, 4)).is_ok());
    }

    #[test]
    fn test_rejects_under_released_watermark() {
        let mut buf = ReorderBuffer::new(2000);
        buf.push(sig(900, 1)).unwrap();
        buf.push(sig(300, 0)).unwrap();
        let flushed = buf.flush();
        assert_eq!(flushed.len(), 2);

        // Inside the window but before the released 900ms signal
        assert!(buf.push(sig(600, 2)).is_err());
        assert!(buf.push(sig(900, 3)).is_ok());
    }

    #[test]
    fn test_flush_releases_everything() {
        let mut buf = ReorderBuffer::new(2000);
        buf.push(sig(900, 1)).unwrap();
        buf.push(sig(300, 0)).unwrap();
        let flushed: Vec<u64> = buf.flush().iter().map(|s| s.session_ms).collect();
        assert_eq!(flushed, vec![300, 900]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_equal_timestamps_release_in_sequence_order() {
        let mut buf = ReorderBuffer::new(0);
        buf.push(sig(100, 1)).unwrap();
        buf.push(sig(100, 0)).unwrap();
        let released: Vec<u64> = buf.pop_ready(100).iter().map(|s| s.source_seq).collect();
        assert_eq!(released, vec![0, 1]);
    }
}
