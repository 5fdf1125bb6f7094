//! Threaded session runtime.
//!
//! Wraps the synchronous [`SessionController`] for live producers: one
//! bounded feed channel per modality, a control channel, and a dedicated
//! worker thread that serializes everything into the fusion pipeline.
//! Consumers watch the outbound message channel or read the shared
//! timeline store directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::signal::{Modality, RawClassification};
use crate::summary::SummaryPayload;
use crate::timeline::{FusedEntry, TimelineStore};

use super::controller::SessionController;
use super::state::{SessionError, SessionState};

/// Message from the session worker to the outside
#[derive(Debug)]
pub enum EngineMessage {
    /// A fused entry was appended to the timeline
    Entry(FusedEntry),
    /// Periodic status update
    Status {
        session_ms: u64,
        entry_count: usize,
        state: SessionState,
    },
    /// Session finished cleanly; the downstream payload
    Stopped(Box<SummaryPayload>),
    /// Fatal error; the session is in the errored state
    Error(String),
}

enum ControlCommand {
    Pause,
    Resume,
}

/// Handle to control a running session.
///
/// Producers submit raw classifier outputs through it; dropping the handle
/// does not stop the worker. Call [`SessionHandle::stop`] then
/// [`SessionHandle::join`].
pub struct SessionHandle {
    face_tx: mpsc::Sender<RawClassification>,
    voice_tx: mpsc::Sender<RawClassification>,
    control_tx: mpsc::Sender<ControlCommand>,
    stop_flag: Arc<AtomicBool>,
    timeline: Arc<TimelineStore>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SessionHandle {
    /// Submit a classifier output from an async producer. Returns `false`
    /// once the session is shutting down.
    pub async fn submit(&self, modality: Modality, raw: RawClassification) -> bool {
        self.feed(modality).send(raw).await.is_ok()
    }

    /// Submit from a blocking producer thread
    pub fn blocking_submit(&self, modality: Modality, raw: RawClassification) -> bool {
        self.feed(modality).blocking_send(raw).is_ok()
    }

    fn feed(&self, modality: Modality) -> &mpsc::Sender<RawClassification> {
        match modality {
            Modality::Face => &self.face_tx,
            Modality::Voice => &self.voice_tx,
        }
    }

    pub fn pause(&self) -> bool {
        self.control_tx.try_send(ControlCommand::Pause).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.control_tx.try_send(ControlCommand::Resume).is_ok()
    }

    /// Request the session to stop
    pub fn stop(&self) {
        info!("Requesting session stop");
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Wait for the worker to fully stop
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Shared timeline for concurrent reads while the session runs
    pub fn timeline(&self) -> Arc<TimelineStore> {
        self.timeline.clone()
    }
}

/// Start a live session.
///
/// Returns a handle to feed and control it. All fusion happens on a
/// dedicated worker thread; progress is reported through `message_tx`.
pub fn start_session(
    config: EngineConfig,
    message_tx: mpsc::Sender<EngineMessage>,
) -> Result<SessionHandle, SessionError> {
    let mut controller = SessionController::new(config.clone());
    controller.start()?;
    let timeline = controller.timeline();

    let (face_tx, face_rx) = mpsc::channel(config.feed_capacity);
    let (voice_tx, voice_rx) = mpsc::channel(config.feed_capacity);
    let (control_tx, control_rx) = mpsc::channel(8);
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_worker = stop_flag.clone();
    let status_interval = Duration::from_millis(config.status_interval_ms);

    let worker = std::thread::spawn(move || {
        run_worker(
            controller,
            face_rx,
            voice_rx,
            control_rx,
            message_tx,
            stop_flag_worker,
            status_interval,
        );
    });

    Ok(SessionHandle {
        face_tx,
        voice_tx,
        control_tx,
        stop_flag,
        timeline,
        worker: Some(worker),
    })
}

fn run_worker(
    mut controller: SessionController,
    mut face_rx: mpsc::Receiver<RawClassification>,
    mut voice_rx: mpsc::Receiver<RawClassification>,
    mut control_rx: mpsc::Receiver<ControlCommand>,
    tx: mpsc::Sender<EngineMessage>,
    stop_flag: Arc<AtomicBool>,
    status_interval: Duration,
) {
    info!(session_id = %controller.id(), "Session worker started");
    let mut last_status = Instant::now();
    let mut sent_entries = 0usize;

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        let mut did_work = false;

        while let Ok(cmd) = control_rx.try_recv() {
            did_work = true;
            let result = match cmd {
                ControlCommand::Pause => controller.pause(),
                ControlCommand::Resume => controller.resume(),
            };
            if let Err(e) = result {
                warn!("control command rejected: {}", e);
            }
        }

        match drain_feeds(&mut controller, &mut face_rx, &mut voice_rx) {
            Ok(drained) => did_work |= drained,
            Err(e) => {
                let _ = tx.blocking_send(EngineMessage::Error(e.to_string()));
                return;
            }
        }

        // Time-based releases keep entries flowing between arrivals
        if let Err(e) = controller.tick() {
            let _ = tx.blocking_send(EngineMessage::Error(e.to_string()));
            return;
        }

        sent_entries += forward_entries(&controller, &tx, sent_entries);

        if last_status.elapsed() >= status_interval {
            let _ = tx.blocking_send(EngineMessage::Status {
                session_ms: controller.session_ms(),
                entry_count: controller.timeline().len(),
                state: controller.state(),
            });
            last_status = Instant::now();
        }

        if !did_work {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // Drain anything already submitted before the terminal flush
    if let Err(e) = drain_feeds(&mut controller, &mut face_rx, &mut voice_rx) {
        let _ = tx.blocking_send(EngineMessage::Error(e.to_string()));
        return;
    }

    match controller.stop() {
        Ok(summary) => {
            forward_entries(&controller, &tx, sent_entries);
            let _ = tx.blocking_send(EngineMessage::Stopped(Box::new(summary)));
        }
        Err(e) => {
            let _ = tx.blocking_send(EngineMessage::Error(e.to_string()));
        }
    }
    info!("Session worker stopped");
}

/// Pull everything currently queued on both feeds into the controller
fn drain_feeds(
    controller: &mut SessionController,
    face_rx: &mut mpsc::Receiver<RawClassification>,
    voice_rx: &mut mpsc::Receiver<RawClassification>,
) -> Result<bool, SessionError> {
    let mut drained = false;
    while let Ok(raw) = face_rx.try_recv() {
        drained = true;
        controller.ingest(Modality::Face, raw)?;
    }
    while let Ok(raw) = voice_rx.try_recv() {
        drained = true;
        controller.ingest(Modality::Voice, raw)?;
    }
    Ok(drained)
}

/// Forward entries appended since the last call; returns how many
fn forward_entries(
    controller: &SessionController,
    tx: &mpsc::Sender<EngineMessage>,
    already_sent: usize,
) -> usize {
    let new_entries = controller.timeline().entries_since(already_sent);
    let count = new_entries.len();
    for entry in new_entries {
        if tx.blocking_send(EngineMessage::Entry(entry)).is_err() {
            warn!("message receiver dropped");
            break;
        }
    }
    count
}
