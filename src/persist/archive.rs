//! Local session archive.
//!
//! Persistent storage for finished sessions, laid out for a
//! calendar/history view:
//! `<archive_dir>/YYYY/MM/DD/<session_id>/`
//!
//! Files stored per session:
//! - `metadata.json` - session metadata (timestamps, duration, dominant emotion)
//! - `timeline.jsonl` - the fused entry sequence, one JSON line per entry
//! - `summary.json` - the full payload handed to downstream consumers

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::signal::EmotionLabel;
use crate::summary::SummaryPayload;
use crate::timeline::FusedEntry;

use super::wal;

/// Session metadata for the archive list view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub entry_count: usize,
    pub gap_ms: u64,
    pub dominant: EmotionLabel,
    pub diagnostics: BTreeMap<String, u32>,
}

impl ArchiveMetadata {
    fn from_summary(summary: &SummaryPayload) -> Self {
        Self {
            session_id: summary.session_id.to_string(),
            started_at: summary.started_at.to_rfc3339(),
            ended_at: summary.ended_at.to_rfc3339(),
            duration_ms: summary.duration_ms,
            entry_count: summary.entry_count,
            gap_ms: summary.gap_ms,
            dominant: summary.dominant,
            diagnostics: summary.diagnostics.clone(),
        }
    }
}

/// A fully loaded archived session
#[derive(Debug, Clone)]
pub struct ArchivedSession {
    pub metadata: ArchiveMetadata,
    pub timeline: Vec<FusedEntry>,
    pub summary: SummaryPayload,
}

/// Get the date-based directory for a session
fn date_dir(root: &Path, date: &DateTime<Utc>) -> PathBuf {
    root.join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
}

/// Get the session-specific archive directory
pub fn session_dir(root: &Path, date: &DateTime<Utc>, session_id: &str) -> PathBuf {
    date_dir(root, date).join(session_id)
}

/// Archive a finished session
pub fn save_session(root: &Path, summary: &SummaryPayload) -> Result<PathBuf> {
    let dir = session_dir(root, &summary.started_at, &summary.session_id.to_string());
    fs::create_dir_all(&dir).context("Failed to create archive directory")?;

    let metadata = ArchiveMetadata::from_summary(summary);
    let metadata_json =
        serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    fs::write(dir.join("metadata.json"), metadata_json)
        .context("Failed to write metadata")?;

    let mut timeline_lines = String::new();
    for entry in &summary.timeline {
        let line = serde_json::to_string(entry).context("Failed to serialize entry")?;
        timeline_lines.push_str(&line);
        timeline_lines.push('\n');
    }
    fs::write(dir.join("timeline.jsonl"), timeline_lines)
        .context("Failed to write timeline")?;

    let summary_json =
        serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    fs::write(dir.join("summary.json"), summary_json).context("Failed to write summary")?;

    info!(
        session_id = %summary.session_id,
        entries = summary.entry_count,
        path = %dir.display(),
        "Session archived"
    );

    Ok(dir)
}

/// Load a fully archived session back
pub fn load_session(root: &Path, date_str: &str, session_id: &str) -> Result<ArchivedSession> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Invalid date format, expected YYYY-MM-DD")?;
    let dir = root
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
        .join(session_id);

    if !dir.exists() {
        anyhow::bail!("Session not found: {}", session_id);
    }

    let metadata_content =
        fs::read_to_string(dir.join("metadata.json")).context("Failed to read metadata")?;
    let metadata: ArchiveMetadata =
        serde_json::from_str(&metadata_content).context("Failed to parse metadata")?;

    let timeline = wal::read_entries(&dir.join("timeline.jsonl"))?;

    let summary_content =
        fs::read_to_string(dir.join("summary.json")).context("Failed to read summary")?;
    let summary: SummaryPayload =
        serde_json::from_str(&summary_content).context("Failed to parse summary")?;

    Ok(ArchivedSession {
        metadata,
        timeline,
        summary,
    })
}

/// List all dates (YYYY-MM-DD, most recent first) with archived sessions
pub fn list_session_dates(root: &Path) -> Result<Vec<String>> {
    let mut dates = Vec::new();
    if !root.exists() {
        return Ok(dates);
    }

    for year_entry in fs::read_dir(root).context("Failed to read archive")? {
        let year_path = year_entry.context("Failed to read entry")?.path();
        if !year_path.is_dir() {
            continue;
        }
        for month_entry in fs::read_dir(&year_path).context("Failed to read year dir")? {
            let month_path = month_entry.context("Failed to read entry")?.path();
            if !month_path.is_dir() {
                continue;
            }
            for day_entry in fs::read_dir(&month_path).context("Failed to read month dir")? {
                let day_path = day_entry.context("Failed to read entry")?.path();
                if !day_path.is_dir() {
                    continue;
                }
                let has_sessions = fs::read_dir(&day_path)
                    .map(|entries| entries.count() > 0)
                    .unwrap_or(false);
                if has_sessions {
                    if let (Some(year), Some(month), Some(day)) = (
                        year_path.file_name().and_then(|n| n.to_str()),
                        month_path.file_name().and_then(|n| n.to_str()),
                        day_path.file_name().and_then(|n| n.to_str()),
                    ) {
                        dates.push(format!("{}-{}-{}", year, month, day));
                    }
                }
            }
        }
    }

    dates.sort();
    dates.reverse();
    Ok(dates)
}
