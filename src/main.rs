use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use sentio_engine::persist::JsonlEntryLog;
use sentio_engine::session::{start_session, EngineMessage, SessionClock, SessionController};
use sentio_engine::timeline::{aggregate, FusedEntry, TimelineStore};
use sentio_engine::{AnchorMode, EngineConfig, RecordedEvent, SummaryPayload, TimeUnit};

/// Replays a recorded interview session through the multimodal emotion
/// timeline engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a recorded session (JSON lines of classifier events)
    recording: PathBuf,

    /// Path to an engine config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Staleness window (ms) after which a silent modality stops voting
    #[arg(long)]
    staleness_ms: Option<u64>,

    /// Minimum dwell time (ms) before the dominant label may switch freely
    #[arg(long)]
    dwell_ms: Option<u64>,

    /// Score lead a contrary label needs to displace the dominant early
    #[arg(long)]
    margin: Option<f32>,

    /// Per-modality reordering window (ms)
    #[arg(long)]
    reorder_ms: Option<u64>,

    /// Time unit of face timestamps: "seconds", "ms" or "us"
    #[arg(long, default_value = "seconds")]
    face_unit: String,

    /// Time unit of voice timestamps: "seconds", "ms" or "us"
    #[arg(long, default_value = "seconds")]
    voice_unit: String,

    /// Write-ahead log path for the fused timeline
    #[arg(long)]
    wal: Option<PathBuf>,

    /// Archive the finished session under this directory
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Rolling aggregate window to report (seconds); defaults to the
    /// configured aggregate window
    #[arg(long)]
    window_s: Option<u64>,

    /// Print the summary payload as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Pace the replay against the wall clock through the live runtime
    #[arg(long)]
    realtime: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = build_config(&args)?;
    let events = load_recording(&args.recording)?;

    info!("Emotion timeline engine starting...");
    info!("Recording: {:?} ({} events)", args.recording, events.len());
    info!(
        "Staleness: {}ms, dwell: {}ms, margin: {}, reorder window: {}ms",
        config.staleness_ms, config.min_dwell_ms, config.hysteresis_margin, config.reorder_window_ms
    );

    let window_ms = args
        .window_s
        .map(|s| s * 1000)
        .unwrap_or(config.aggregate_window_ms);

    let summary = if args.realtime {
        replay_realtime(config, events).await?
    } else {
        replay(&config, events, args.wal.as_deref())?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_timeline(&summary.timeline);
    print_summary(&summary, window_ms);

    info!("Replay complete");
    Ok(())
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(v) = args.staleness_ms {
        config.staleness_ms = v;
    }
    if let Some(v) = args.dwell_ms {
        config.min_dwell_ms = v;
    }
    if let Some(v) = args.margin {
        config.hysteresis_margin = v;
    }
    if let Some(v) = args.reorder_ms {
        config.reorder_window_ms = v;
    }
    config.face_time_unit = parse_unit(&args.face_unit)?;
    config.voice_time_unit = parse_unit(&args.voice_unit)?;
    // Recorded timestamps are already session-relative
    config.anchor_mode = AnchorMode::SessionRelative;
    if args.archive_dir.is_some() {
        config.archive_dir = args.archive_dir.clone();
    }

    Ok(config)
}

fn parse_unit(s: &str) -> Result<TimeUnit> {
    s.parse::<TimeUnit>().map_err(|e| anyhow::anyhow!(e))
}

fn load_recording(path: &Path) -> Result<Vec<RecordedEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read recording {:?}", path))?;
    let mut events = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: RecordedEvent = serde_json::from_str(line)
            .with_context(|| format!("Malformed event at line {}", idx + 1))?;
        events.push(event);
    }
    if events.is_empty() {
        anyhow::bail!("Recording contains no events");
    }
    Ok(events)
}

/// Deterministic replay through the synchronous controller
fn replay(
    config: &EngineConfig,
    events: Vec<RecordedEvent>,
    wal: Option<&Path>,
) -> Result<SummaryPayload> {
    let store = match wal {
        Some(path) => Arc::new(TimelineStore::new(Box::new(JsonlEntryLog::create(path)?))),
        None => Arc::new(TimelineStore::in_memory()),
    };
    let mut session = SessionController::with_parts(config.clone(), store, SessionClock::manual());

    session.start()?;
    for event in events {
        session.ingest(event.modality, event.classification)?;
    }
    let summary = session.stop()?;
    Ok(summary)
}

/// Paced replay through the live runtime, printing entries as they fuse
async fn replay_realtime(
    config: EngineConfig,
    events: Vec<RecordedEvent>,
) -> Result<SummaryPayload> {
    let (tx, mut rx) = mpsc::channel::<EngineMessage>(64);
    let handle = Arc::new(start_session(config.clone(), tx)?);

    // Set up Ctrl+C handler
    let ctrlc_handle = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping...");
        ctrlc_handle.stop();
    });

    // Feed events at their recorded pace
    let feeder_handle = handle.clone();
    tokio::spawn(async move {
        let start = tokio::time::Instant::now();
        for event in events {
            let scale = config.time_unit(event.modality).to_millis_scale();
            let offset_ms = (event.classification.timestamp * scale).max(0.0) as u64;
            tokio::time::sleep_until(start + std::time::Duration::from_millis(offset_ms)).await;
            if !feeder_handle.submit(event.modality, event.classification).await {
                break;
            }
        }
        feeder_handle.stop();
    });

    println!("\nReplaying in real time... Press Ctrl+C to stop early.\n");

    while let Some(msg) = rx.recv().await {
        match msg {
            EngineMessage::Entry(entry) => println!("{}", format_entry(&entry)),

            EngineMessage::Status {
                session_ms,
                entry_count,
                state,
            } => {
                debug!(
                    "Status: {:.1}s elapsed, {} entries, state {}",
                    session_ms as f64 / 1000.0,
                    entry_count,
                    state
                );
            }

            EngineMessage::Stopped(summary) => return Ok(*summary),

            EngineMessage::Error(e) => {
                error!("Session failed: {}", e);
                anyhow::bail!("session failed: {}", e);
            }
        }
    }

    anyhow::bail!("session worker ended without a summary")
}

fn format_ms(ms: u64) -> String {
    format!("{:02}:{:02}.{:03}", ms / 60000, (ms % 60000) / 1000, ms % 1000)
}

fn format_entry(entry: &FusedEntry) -> String {
    let span = format!(
        "[{} - {}]",
        format_ms(entry.start_ms),
        format_ms(entry.end_ms)
    );
    if entry.gap {
        return format!("{} (gap)", span);
    }
    let mut line = format!(
        "{} {} ({:.0}%)",
        span,
        entry.dominant,
        entry.fused_confidence * 100.0
    );
    if let Some(face) = entry.face {
        line.push_str(&format!(" face={}", face));
    }
    if let Some(voice) = entry.voice {
        line.push_str(&format!(" voice={}", voice));
    }
    if let Some(text) = &entry.transcript {
        line.push_str(&format!("  \"{}\"", text));
    }
    line
}

fn print_timeline(entries: &[FusedEntry]) {
    println!("\n--- Timeline ---\n");
    for entry in entries {
        println!("{}", format_entry(entry));
    }
}

fn print_summary(summary: &SummaryPayload, window_ms: u64) {
    println!("\n--- Session Summary ---");
    println!("Duration: {:.1}s", summary.duration_ms as f64 / 1000.0);
    println!("Entries: {}", summary.entry_count);
    println!("Gap time: {:.1}s", summary.gap_ms as f64 / 1000.0);
    println!("Dominant emotion: {}", summary.dominant);

    let covered_ms: u64 = summary.distribution_ms.values().sum();
    if covered_ms > 0 {
        println!("\nBreakdown:");
        for (label, ms) in &summary.distribution_ms {
            println!(
                "  {:<9} {:>5.1}s ({:.0}%)",
                label.to_string(),
                *ms as f64 / 1000.0,
                *ms as f64 * 100.0 / covered_ms as f64
            );
        }
    }

    let window = aggregate::compute(&summary.timeline, window_ms);
    println!(
        "\nLast {:.0}s: dominant {}",
        window_ms as f64 / 1000.0,
        window.dominant
    );
    if let Some(excerpt) = &window.transcript_excerpt {
        println!("Excerpt: \"{}\"", excerpt);
    }

    if !summary.diagnostics.is_empty() {
        println!("\nDiagnostics:");
        for (kind, count) in &summary.diagnostics {
            println!("  {}: {}", kind, count);
        }
    }
}
