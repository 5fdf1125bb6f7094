//! End-to-end scenarios exercising the whole pipeline: normalize, align,
//! merge, fuse, store, persist.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::align::AnchorMode;
use crate::config::EngineConfig;
use crate::persist::{self, JsonlEntryLog};
use crate::session::{start_session, EngineMessage, SessionClock, SessionController};
use crate::signal::{
    ClassifierInput, EmotionClassifier, EmotionLabel, Modality, RawClassification,
    ScriptedClassifier,
};
use crate::timeline::TimelineStore;

fn replay_config() -> EngineConfig {
    EngineConfig {
        anchor_mode: AnchorMode::SessionRelative,
        ..EngineConfig::default()
    }
}

fn controller(config: EngineConfig, store: Arc<TimelineStore>) -> SessionController {
    SessionController::with_parts(config, store, SessionClock::manual())
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

fn raw_voice(t: f64, label: &str, confidence: f32, transcript: &str) -> RawClassification {
    RawClassification {
        timestamp: t,
        duration: Some(0.8),
        labels: BTreeMap::from([(label.to_string(), 1.0)]),
        confidence,
        transcript: Some(transcript.to_string()),
    }
}

#[test]
fn test_partition_and_gap_properties() {
    let mut session = controller(replay_config(), Arc::new(TimelineStore::in_memory()));
    session.start().unwrap();

    session.ingest(Modality::Face, raw(0.5, "happy", 0.9)).unwrap();
    session.ingest(Modality::Voice, raw_voice(1.2, "calm", 0.6, "alright")).unwrap();
    session.ingest(Modality::Face, raw(2.0, "happy", 0.8)).unwrap();
    // Long silence, then both modalities return
    session.ingest(Modality::Face, raw(15.0, "sad", 0.7)).unwrap();
    session.ingest(Modality::Voice, raw(15.0, "flat", 0.5)).unwrap();
    let summary = session.stop().unwrap();

    // Non-overlapping, contiguous coverage of [0, duration)
    let mut cursor = 0;
    for entry in &summary.timeline {
        assert_eq!(entry.start_ms, cursor);
        assert!(entry.end_ms > entry.start_ms);
        cursor = entry.end_ms;
    }
    assert_eq!(cursor, summary.duration_ms);

    // The silence past the staleness window is an explicit gap
    assert!(summary
        .timeline
        .iter()
        .any(|e| e.gap && e.start_ms == 7000 && e.end_ms == 15_000));
    // Leading silence is covered too
    assert!(summary.timeline[0].gap);
    assert_eq!(summary.timeline[0].start_ms, 0);
}

#[test]
fn test_replay_is_byte_identical() {
    let events: Vec<(Modality, RawClassification)> = vec![
        (Modality::Face, raw(0.0, "happy", 0.9)),
        (Modality::Voice, raw_voice(0.7, "calm", 0.5, "so far so good")),
        (Modality::Face, raw(1.4, "sad", 0.6)),
        (Modality::Voice, raw(2.1, "flat", 0.8)),
        (Modality::Face, raw(9.0, "surprise", 0.7)),
    ];

    let run = |events: &[(Modality, RawClassification)]| {
        let mut session = controller(replay_config(), Arc::new(TimelineStore::in_memory()));
        session.start().unwrap();
        for (modality, raw) in events {
            session.ingest(*modality, raw.clone()).unwrap();
        }
        let summary = session.stop().unwrap();
        serde_json::to_string(&summary.timeline).unwrap()
    };

    assert_eq!(run(&events), run(&events));
}

#[test]
fn test_out_of_order_arrival_is_reordered_within_window() {
    let mut session = controller(replay_config(), Arc::new(TimelineStore::in_memory()));
    session.start().unwrap();

    // 1.0s arrives after 2.0s but inside the 2s reordering window
    session.ingest(Modality::Voice, raw(2.0, "calm", 0.9)).unwrap();
    session.ingest(Modality::Voice, raw(1.0, "energetic", 0.3)).unwrap();
    session.ingest(Modality::Voice, raw(4.0, "calm", 0.9)).unwrap();
    let summary = session.stop().unwrap();

    let boundaries: Vec<(u64, u64)> = summary
        .timeline
        .iter()
        .map(|e| (e.start_ms, e.end_ms))
        .collect();
    assert_eq!(boundaries, vec![(0, 1000), (1000, 2000), (2000, 4000)]);
    assert_eq!(summary.timeline[1].dominant, EmotionLabel::Happy);
    assert_eq!(summary.timeline[2].dominant, EmotionLabel::Neutral);
    assert!(summary.diagnostics.is_empty());
}

#[test]
fn test_wal_records_every_appended_entry() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("timeline.jsonl");

    let store = Arc::new(TimelineStore::new(Box::new(
        JsonlEntryLog::create(&wal_path).unwrap(),
    )));
    let mut session = controller(replay_config(), store);
    session.start().unwrap();
    session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
    session.ingest(Modality::Face, raw(2.0, "sad", 0.95)).unwrap();
    session.ingest(Modality::Face, raw(3.0, "sad", 0.9)).unwrap();
    let summary = session.stop().unwrap();

    // Everything the timeline holds was durably written first
    let recovered = persist::wal::read_entries(&wal_path).unwrap();
    assert_eq!(recovered, summary.timeline);
    assert!(!recovered.is_empty());
}

#[test]
fn test_finished_session_archives_and_loads() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = replay_config();
    config.archive_dir = Some(dir.path().to_path_buf());

    let mut session = controller(config, Arc::new(TimelineStore::in_memory()));
    session.start().unwrap();
    session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
    session
        .ingest(Modality::Voice, raw_voice(1.0, "calm", 0.6, "pretty good actually"))
        .unwrap();
    session.ingest(Modality::Face, raw(2.0, "happy", 0.9)).unwrap();
    let summary = session.stop().unwrap();

    let date = summary.started_at.format("%Y-%m-%d").to_string();
    let loaded = persist::archive::load_session(
        dir.path(),
        &date,
        &summary.session_id.to_string(),
    )
    .unwrap();

    assert_eq!(loaded.timeline, summary.timeline);
    assert_eq!(loaded.metadata.dominant, summary.dominant);
    assert_eq!(
        loaded.summary.transcript_excerpts,
        vec!["pretty good actually"]
    );
}

#[test]
fn test_concurrent_reads_while_session_runs() {
    let mut session = controller(replay_config(), Arc::new(TimelineStore::in_memory()));
    let timeline = session.timeline();
    session.start().unwrap();

    session.ingest(Modality::Face, raw(0.0, "happy", 0.9)).unwrap();
    session.ingest(Modality::Face, raw(10.0, "happy", 0.9)).unwrap();
    session.ingest(Modality::Face, raw(20.0, "sad", 0.9)).unwrap();
    session.ingest(Modality::Face, raw(30.0, "sad", 0.9)).unwrap();
    session.ingest(Modality::Face, raw(40.0, "sad", 0.9)).unwrap();

    // Mid-session: the store already serves consistent reads
    let snapshot = timeline.snapshot();
    assert!(!snapshot.is_empty());
    let mut cursor = 0;
    for entry in &snapshot {
        assert_eq!(entry.start_ms, cursor);
        cursor = entry.end_ms;
    }

    let aggregate = timeline.rolling_aggregate(30_000);
    assert!(aggregate.window_end_ms > 0);
    assert!(!aggregate.label_counts.is_empty());

    let summary = session.stop().unwrap();
    assert_eq!(summary.duration_ms, timeline.end_ms());
}

#[test]
fn test_scripted_classifier_feeds_a_session() {
    // A producer invoking the black-box classifier per frame and pushing
    // its outputs into the session
    let mut classifier = ScriptedClassifier::new(vec![
        raw(0.0, "happy", 0.9),
        raw(1.0, "happy", 0.85),
        raw(2.0, "happy", 0.9),
    ]);

    let mut session = controller(replay_config(), Arc::new(TimelineStore::in_memory()));
    session.start().unwrap();

    let frame = [0u8; 16];
    while classifier.remaining() > 0 {
        let output = classifier
            .classify(ClassifierInput::VideoFrame {
                data: &frame,
                width: 4,
                height: 4,
            })
            .unwrap();
        session.ingest(Modality::Face, output).unwrap();
    }
    let summary = session.stop().unwrap();

    assert_eq!(summary.dominant, EmotionLabel::Happy);
    assert_eq!(summary.duration_ms, 2000);
}

#[tokio::test]
async fn test_runtime_end_to_end() {
    let (tx, mut rx) = mpsc::channel::<EngineMessage>(64);
    let handle = start_session(EngineConfig::default(), tx).unwrap();
    let timeline = handle.timeline();

    assert!(handle.submit(Modality::Face, raw(0.0, "happy", 0.9)).await);
    assert!(
        handle
            .submit(Modality::Voice, raw_voice(0.5, "calm", 0.4, "hello"))
            .await
    );
    assert!(handle.submit(Modality::Face, raw(1.0, "happy", 0.85)).await);
    handle.stop();

    let mut entries = Vec::new();
    let mut summary = None;
    while let Some(msg) = rx.recv().await {
        match msg {
            EngineMessage::Entry(entry) => entries.push(entry),
            EngineMessage::Status { .. } => {}
            EngineMessage::Stopped(payload) => {
                summary = Some(*payload);
                break;
            }
            EngineMessage::Error(e) => panic!("session failed: {}", e),
        }
    }

    let summary = summary.expect("session must report a summary");
    assert!(!entries.is_empty());
    assert_eq!(summary.entry_count, entries.len());
    assert_eq!(summary.dominant, EmotionLabel::Happy);
    assert_eq!(timeline.len(), summary.entry_count);

    handle.join();
}

#[tokio::test]
async fn test_runtime_pause_resume_controls() {
    let (tx, mut rx) = mpsc::channel::<EngineMessage>(64);
    let handle = start_session(EngineConfig::default(), tx).unwrap();

    assert!(handle.submit(Modality::Face, raw(0.0, "happy", 0.9)).await);
    assert!(handle.pause());
    assert!(handle.resume());
    assert!(handle.submit(Modality::Face, raw(0.2, "happy", 0.9)).await);
    handle.stop();

    let mut stopped = false;
    while let Some(msg) = rx.recv().await {
        match msg {
            EngineMessage::Stopped(_) => {
                stopped = true;
                break;
            }
            EngineMessage::Error(e) => panic!("session failed: {}", e),
            _ => {}
        }
    }
    assert!(stopped);
    handle.join();
}
