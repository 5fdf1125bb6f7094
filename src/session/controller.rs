use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::align::{ClockAligner, ReorderBuffer};
use crate::config::EngineConfig;
use crate::fusion::{FusionEngine, MergeQueue};
use crate::signal::{AlignedSignal, Modality, Normalizer, RawClassification, Signal};
use crate::summary::SummaryPayload;
use crate::timeline::TimelineStore;

use super::diagnostics::{DiagnosticKind, DiagnosticLog};
use super::state::{SessionError, SessionState};

/// Monotonic per-session clock, zeroed at start and frozen while paused.
///
/// `Wall` is the live mode. `Manual` derives time from the ingested
/// signals themselves (plus explicit advances), which is what makes
/// replay and tests fully deterministic.
pub enum SessionClock {
    Wall {
        started: Option<Instant>,
        paused_at: Option<Instant>,
        paused_total_ms: u64,
    },
    Manual {
        wall_ms: u64,
        paused_total_ms: u64,
        pause_started_ms: Option<u64>,
    },
}

impl SessionClock {
    pub fn wall() -> Self {
        Self::Wall {
            started: None,
            paused_at: None,
            paused_total_ms: 0,
        }
    }

    pub fn manual() -> Self {
        Self::Manual {
            wall_ms: 0,
            paused_total_ms: 0,
            pause_started_ms: None,
        }
    }

    fn start(&mut self) {
        if let Self::Wall { started, .. } = self {
            *started = Some(Instant::now());
        }
    }

    /// Session time now, in ms
    pub fn now_ms(&self) -> u64 {
        match self {
            Self::Wall {
                started,
                paused_at,
                paused_total_ms,
            } => {
                let Some(started) = started else { return 0 };
                let elapsed_ms = match paused_at {
                    Some(paused_at) => paused_at.duration_since(*started).as_millis() as u64,
                    None => started.elapsed().as_millis() as u64,
                };
                elapsed_ms.saturating_sub(*paused_total_ms)
            }
            Self::Manual {
                wall_ms,
                paused_total_ms,
                pause_started_ms,
            } => match pause_started_ms {
                Some(pause_started_ms) => pause_started_ms.saturating_sub(*paused_total_ms),
                None => wall_ms.saturating_sub(*paused_total_ms),
            },
        }
    }

    /// Let an aligned signal advance a manual clock; no-op on a wall clock
    fn observe(&mut self, session_ms: u64) {
        if let Self::Manual {
            wall_ms,
            paused_total_ms,
            pause_started_ms: None,
        } = self
        {
            *wall_ms = (*wall_ms).max(session_ms + *paused_total_ms);
        }
    }

    /// Advance simulated wall time on a manual clock; no-op on a wall clock
    pub fn advance(&mut self, ms: u64) {
        if let Self::Manual { wall_ms, .. } = self {
            *wall_ms += ms;
        }
    }

    fn pause(&mut self) {
        match self {
            Self::Wall { paused_at, .. } => *paused_at = Some(Instant::now()),
            Self::Manual {
                wall_ms,
                pause_started_ms,
                ..
            } => *pause_started_ms = Some(*wall_ms),
        }
    }

    /// End the pause; returns how long it lasted in wall ms
    fn resume(&mut self) -> u64 {
        match self {
            Self::Wall {
                paused_at,
                paused_total_ms,
                ..
            } => match paused_at.take() {
                Some(paused_at) => {
                    let d = paused_at.elapsed().as_millis() as u64;
                    *paused_total_ms += d;
                    d
                }
                None => 0,
            },
            Self::Manual {
                wall_ms,
                paused_total_ms,
                pause_started_ms,
            } => match pause_started_ms.take() {
                Some(started) => {
                    let d = wall_ms.saturating_sub(started);
                    *paused_total_ms += d;
                    d
                }
                None => 0,
            },
        }
    }
}

/// Owns one session end to end: lifecycle state machine, the alignment and
/// fusion pipeline, the timeline store, and the diagnostics ledger.
///
/// Single-owner and synchronous; the threaded runtime wraps it for live
/// producers. Fully deterministic under a manual clock.
pub struct SessionController {
    id: Uuid,
    config: EngineConfig,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    clock: SessionClock,
    normalizer: Normalizer,
    aligners: [ClockAligner; 2],
    reorder: [ReorderBuffer; 2],
    merge: MergeQueue,
    fusion: FusionEngine,
    store: Arc<TimelineStore>,
    diagnostics: DiagnosticLog,
    /// Normalizer output held back while paused, drained on resume
    pause_buffer: Vec<Signal>,
    calibration_flagged: [bool; 2],
}

impl SessionController {
    /// Live session: wall clock, no durable backing
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(TimelineStore::in_memory());
        Self::with_parts(config, store, SessionClock::wall())
    }

    pub fn with_parts(
        config: EngineConfig,
        store: Arc<TimelineStore>,
        clock: SessionClock,
    ) -> Self {
        let aligners = [
            ClockAligner::new(config.time_unit(Modality::Face), config.anchor_mode),
            ClockAligner::new(config.time_unit(Modality::Voice), config.anchor_mode),
        ];
        let reorder = [
            ReorderBuffer::new(config.reorder_window_ms),
            ReorderBuffer::new(config.reorder_window_ms),
        ];
        let merge = MergeQueue::new(config.staleness_ms);
        let fusion = FusionEngine::new(config.fusion_params());
        let diagnostics = DiagnosticLog::new(config.max_diagnostics);
        Self {
            id: Uuid::new_v4(),
            config,
            state: SessionState::Created,
            started_at: None,
            clock,
            normalizer: Normalizer::new(),
            aligners,
            reorder,
            merge,
            fusion,
            store,
            diagnostics,
            pause_buffer: Vec::new(),
            calibration_flagged: [false, false],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Shared timeline for concurrent readers
    pub fn timeline(&self) -> Arc<TimelineStore> {
        self.store.clone()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Session time now, in ms
    pub fn session_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Advance a manual clock's simulated wall time (replay/tests)
    pub fn advance_clock(&mut self, ms: u64) {
        self.clock.advance(ms);
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::InvalidTransition(format!(
                "cannot start from state {}",
                self.state
            )));
        }
        self.started_at = Some(Utc::now());
        self.clock.start();
        self.state = SessionState::Running;
        info!(session_id = %self.id, "Session started");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidTransition(format!(
                "cannot pause from state {}",
                self.state
            )));
        }
        self.clock.pause();
        self.state = SessionState::Paused;
        info!(session_id = %self.id, "Session paused at {}ms", self.clock.now_ms());
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Paused {
            return Err(SessionError::InvalidTransition(format!(
                "cannot resume from state {}",
                self.state
            )));
        }
        let paused_ms = self.clock.resume();
        self.shift_aligners(paused_ms);
        self.state = SessionState::Running;
        info!(
            session_id = %self.id,
            "Session resumed at {}ms after {}ms pause",
            self.clock.now_ms(),
            paused_ms
        );
        self.drain_pause_buffer()
    }

    /// Feed one raw classifier output into the session.
    ///
    /// Bad input never fails the call: it is dropped and recorded in the
    /// diagnostics ledger. An error return means an internal invariant
    /// breach; the session is `Errored` afterwards.
    pub fn ingest(
        &mut self,
        modality: Modality,
        raw: RawClassification,
    ) -> Result<(), SessionError> {
        match self.state {
            SessionState::Created => return Err(SessionError::NotStarted),
            SessionState::Finished | SessionState::Errored => {
                self.diagnostics.push(
                    DiagnosticKind::SessionClosed,
                    Some(modality),
                    self.clock.now_ms(),
                    "signal after session close",
                );
                return Ok(());
            }
            SessionState::Running | SessionState::Paused => {}
        }

        let signal = match self.normalizer.normalize(raw, modality) {
            Ok(signal) => signal,
            Err(e) => {
                self.diagnostics.push(
                    DiagnosticKind::MalformedSignal,
                    Some(modality),
                    self.clock.now_ms(),
                    e.to_string(),
                );
                return Ok(());
            }
        };

        if self.state == SessionState::Paused {
            // Intake is suspended, output is buffered rather than discarded
            self.pause_buffer.push(signal);
            return Ok(());
        }

        self.route(signal)
    }

    /// Flush everything, close the final entry, archive, and return the
    /// downstream payload. Terminal: the session accepts nothing after.
    pub fn stop(&mut self) -> Result<SummaryPayload, SessionError> {
        match self.state {
            SessionState::Running => {}
            SessionState::Paused => {
                let paused_ms = self.clock.resume();
                self.shift_aligners(paused_ms);
                self.drain_pause_buffer()?;
            }
            other => {
                return Err(SessionError::InvalidTransition(format!(
                    "cannot stop from state {}",
                    other
                )));
            }
        }

        // Reordering buffers, then the merge, release everything held back
        for modality in Modality::ALL {
            let held = self.reorder[modality.index()].flush();
            for signal in held {
                self.push_merge(signal);
            }
        }
        for signal in self.merge.flush() {
            self.fusion.process(signal);
        }
        self.check_calibration();

        let end_ms = self.clock.now_ms().max(self.fusion.latest_ms());
        self.fusion.finish(end_ms);
        self.flush_entries()?;

        if let Err(e) = self.store.flush_wal() {
            error!(session_id = %self.id, "terminal flush failed: {}", e);
            self.state = SessionState::Errored;
            return Err(e.into());
        }

        self.state = SessionState::Finished;
        let ended_at = Utc::now();
        info!(
            session_id = %self.id,
            entries = self.store.len(),
            duration_ms = self.store.end_ms(),
            "Session finished"
        );

        let summary = SummaryPayload::build(
            self.id,
            self.started_at.unwrap_or(ended_at),
            ended_at,
            self.store.snapshot(),
            &self.diagnostics,
        );

        if let Some(dir) = self.config.archive_dir.clone() {
            if let Err(e) = crate::persist::archive::save_session(&dir, &summary) {
                warn!(session_id = %self.id, "Failed to archive session: {:#}", e);
            }
        }

        Ok(summary)
    }

    fn shift_aligners(&mut self, paused_ms: u64) {
        // Producers' native clocks ran through the pause; pull them back
        // onto frozen session time.
        for aligner in &mut self.aligners {
            aligner.shift_ms(-(paused_ms as f64));
        }
    }

    fn drain_pause_buffer(&mut self) -> Result<(), SessionError> {
        let buffered = std::mem::take(&mut self.pause_buffer);
        for signal in buffered {
            self.route(signal)?;
        }
        Ok(())
    }

    /// Release work the session clock has aged out of the reordering
    /// buffers and the merge. Called on every ingest; the live runtime
    /// also calls it periodically so entries keep flowing between
    /// arrivals.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Running {
            return Ok(());
        }
        let now_ms = self.clock.now_ms();
        for modality in Modality::ALL {
            let released = self.reorder[modality.index()].pop_ready(now_ms);
            for signal in released {
                self.push_merge(signal);
            }
        }
        for signal in self.merge.pop_ready() {
            self.fusion.process(signal);
        }
        self.flush_entries()
    }

    fn route(&mut self, signal: Signal) -> Result<(), SessionError> {
        let modality = signal.modality;
        let anchor_ms = self.clock.now_ms();
        let aligned = self.aligners[modality.index()].align(signal, anchor_ms);
        self.clock.observe(aligned.session_ms);
        self.merge.observe(modality, aligned.session_ms);
        self.check_calibration();

        if let Err(late) = self.reorder[modality.index()].push(aligned) {
            self.diagnostics.push(
                DiagnosticKind::LateSignal,
                Some(modality),
                late.session_ms,
                format!(
                    "outside {}ms reordering window",
                    self.config.reorder_window_ms
                ),
            );
            return Ok(());
        }

        self.tick()
    }

    fn push_merge(&mut self, signal: AlignedSignal) {
        let modality = signal.modality;
        if let Err(late) = self.merge.push(signal) {
            self.diagnostics.push(
                DiagnosticKind::LateSignal,
                Some(modality),
                late.session_ms,
                "behind the merged stream watermark",
            );
        }
    }

    fn flush_entries(&mut self) -> Result<(), SessionError> {
        while let Some(entry) = self.fusion.pop_entry() {
            if let Err(e) = self.store.append(entry) {
                error!(session_id = %self.id, "fatal timeline error: {}", e);
                self.state = SessionState::Errored;
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn check_calibration(&mut self) {
        let now_ms = self.clock.now_ms();
        if now_ms <= self.config.staleness_ms {
            return;
        }
        for modality in Modality::ALL {
            let idx = modality.index();
            if !self.aligners[idx].is_anchored() && !self.calibration_flagged[idx] {
                self.calibration_flagged[idx] = true;
                self.diagnostics.push(
                    DiagnosticKind::CalibrationFailure,
                    Some(modality),
                    now_ms,
                    format!(
                        "no {} signals within {}ms of session start, continuing single-modality",
                        modality, self.config.staleness_ms
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AnchorMode;
    use crate::signal::EmotionLabel;
    use std::collections::BTreeMap;

    fn replay_config() -> EngineConfig {
        EngineConfig {
            anchor_mode: AnchorMode::SessionRelative,
            ..EngineConfig::default()
        }
    }

    fn replay_controller() -> SessionController {
        SessionController::with_parts(
            replay_config(),
            Arc::new(TimelineStore::in_memory()),
            SessionClock::manual(),
        )
    }

    fn raw(t: f64, label: &str, confidence: f32) -> RawClassification {
        RawClassification {
            timestamp: t,
            duration: None,
            labels: BTreeMap::from([(label.to_string(), 1.0)]),
            confidence,
            transcript: None,
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = replay_controller();
        assert_eq!(session.state(), SessionState::Created);

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.start().is_err());

        session.pause().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        assert!(session.pause().is_err());

        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.resume().is_err());

        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert!(session.stop().is_err());
    }

    #[test]
    fn test_ingest_before_start_rejected() {
        let mut session = replay_controller();
        let result = session.ingest(Modality::Face, raw(0.0, "happy", 0.9));
        assert!(matches!(result, Err(SessionError::NotStarted)));
    }

    #[test]
    fn test_basic_timeline_through_controller() {
        let mut session = replay_controller();
        session.start().unwrap();
        session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
        session.ingest(Modality::Voice, raw(1.0, "neutral", 0.4)).unwrap();
        session.ingest(Modality::Face, raw(2.0, "happy", 0.85)).unwrap();
        let summary = session.stop().unwrap();

        let entries = session.timeline().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dominant, EmotionLabel::Happy);
        assert_eq!(entries[1].dominant, EmotionLabel::Happy);
        assert_eq!(summary.dominant, EmotionLabel::Happy);
        assert_eq!(summary.duration_ms, 2000);
    }

    #[test]
    fn test_malformed_signal_is_dropped_not_fatal() {
        let mut session = replay_controller();
        session.start().unwrap();
        let mut bad = raw(0.0, "happy", 0.9);
        bad.labels = BTreeMap::from([("happy".to_string(), 0.0)]);
        session.ingest(Modality::Face, bad).unwrap();

        assert_eq!(session.diagnostics().count(DiagnosticKind::MalformedSignal), 1);
        assert_eq!(session.state(), SessionState::Running);
        session.stop().unwrap();
    }

    #[test]
    fn test_late_signal_is_dropped_with_diagnostic() {
        let mut session = replay_controller();
        session.start().unwrap();
        // Advance face past the reorder window, then send an older signal
        session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
        session.ingest(Modality::Face, raw(5.0, "happy", 0.9)).unwrap();
        session.ingest(Modality::Face, raw(1.0, "sad", 0.9)).unwrap();

        assert_eq!(session.diagnostics().count(DiagnosticKind::LateSignal), 1);
        let summary = session.stop().unwrap();
        // The late sad signal never made it into the timeline
        assert!(summary
            .timeline
            .iter()
            .all(|e| e.dominant != EmotionLabel::Sad));
    }

    #[test]
    fn test_signal_after_finish_is_session_closed() {
        let mut session = replay_controller();
        session.start().unwrap();
        session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
        session.stop().unwrap();

        session.ingest(Modality::Face, raw(3.0, "sad", 0.9)).unwrap();
        assert_eq!(session.diagnostics().count(DiagnosticKind::SessionClosed), 1);
    }

    #[test]
    fn test_calibration_failure_degraded_mode() {
        let mut session = replay_controller();
        session.start().unwrap();
        // Only face ever delivers; once past the staleness window the
        // missing voice feed is flagged exactly once
        session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
        session.ingest(Modality::Face, raw(6.0, "happy", 0.9)).unwrap();
        session.ingest(Modality::Face, raw(7.0, "happy", 0.9)).unwrap();

        assert_eq!(
            session.diagnostics().count(DiagnosticKind::CalibrationFailure),
            1
        );
        let summary = session.stop().unwrap();
        assert_eq!(summary.dominant, EmotionLabel::Happy);
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn test_pause_freezes_session_time() {
        let mut session = replay_controller();
        session.start().unwrap();
        session.ingest(Modality::Face, raw(1.0, "happy", 0.9)).unwrap();
        session.ingest(Modality::Face, raw(3.9, "happy", 0.9)).unwrap();
        session.advance_clock(100); // session time 4000ms

        session.pause().unwrap();
        session.advance_clock(6000); // wall time passes, session frozen
        assert_eq!(session.session_ms(), 4000);

        session.resume().unwrap();
        assert_eq!(session.session_ms(), 4000);

        // Producer's native clock kept running through the pause
        session.ingest(Modality::Face, raw(10.5, "happy", 0.9)).unwrap();
        let summary = session.stop().unwrap();

        // No entry spans the paused wall interval; the timeline continues
        // seamlessly at 4s of session time
        assert_eq!(summary.duration_ms, 4500);
        let entries = summary.timeline;
        assert!(entries.iter().all(|e| e.end_ms <= 4500));
        let last = entries.last().unwrap();
        assert_eq!(last.dominant, EmotionLabel::Happy);
        assert!(!last.gap);
    }

    #[test]
    fn test_signals_during_pause_are_buffered_not_discarded() {
        let mut session = replay_controller();
        session.start().unwrap();
        session.ingest(Modality::Face, raw(1.0, "happy", 0.9)).unwrap();
        session.pause().unwrap();
        // Arrives while paused: buffered, no timeline movement
        session.ingest(Modality::Face, raw(1.5, "sad", 0.9)).unwrap();
        assert_eq!(session.timeline().len(), 0);

        session.resume().unwrap();
        session.ingest(Modality::Face, raw(4.0, "sad", 0.9)).unwrap();
        session.advance_clock(500);
        let summary = session.stop().unwrap();

        // The buffered sad signal reached fusion after resume
        assert!(summary
            .timeline
            .iter()
            .any(|e| e.dominant == EmotionLabel::Sad));
    }

    #[test]
    fn test_stop_covers_trailing_silence_with_gap() {
        let mut session = replay_controller();
        session.start().unwrap();
        session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
        session.advance_clock(11_000);
        let summary = session.stop().unwrap();

        let last = summary.timeline.last().unwrap();
        assert!(last.gap);
        assert_eq!((last.start_ms, last.end_ms), (5000, 11_000));
    }

    #[test]
    fn test_voice_millis_unit_hint() {
        let mut config = replay_config();
        config.voice_time_unit = crate::align::TimeUnit::Millis;
        let mut session = SessionController::with_parts(
            config,
            Arc::new(TimelineStore::in_memory()),
            SessionClock::manual(),
        );
        session.start().unwrap();
        session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
        // Voice reports milliseconds natively
        session.ingest(Modality::Voice, raw(1500.0, "calm", 0.8)).unwrap();
        session.ingest(Modality::Face, raw(3.0, "happy", 0.9)).unwrap();
        let summary = session.stop().unwrap();

        assert!(summary
            .timeline
            .iter()
            .any(|e| e.start_ms == 1500 && e.voice == Some(EmotionLabel::Neutral)));
    }
}
