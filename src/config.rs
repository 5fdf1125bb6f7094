use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::align::{AnchorMode, TimeUnit};
use crate::fusion::FusionParams;
use crate::session::diagnostics::DEFAULT_MAX_DIAGNOSTICS;
use crate::signal::Modality;

/// Engine configuration.
///
/// The fusion constants are calibration starting points to be tuned
/// against real session recordings, not hard-coded law.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub schema_version: u32,

    // Fusion tuning
    pub staleness_ms: u64,
    pub min_dwell_ms: u64,
    pub hysteresis_margin: f32,

    // Alignment
    pub reorder_window_ms: u64,
    pub face_time_unit: TimeUnit,
    pub voice_time_unit: TimeUnit,
    pub anchor_mode: AnchorMode,

    // Reads
    pub aggregate_window_ms: u64,

    // Runtime
    pub feed_capacity: usize,
    pub status_interval_ms: u64,
    pub max_diagnostics: usize,

    // Storage adapter
    pub archive_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            staleness_ms: 5000,
            min_dwell_ms: 1000,
            hysteresis_margin: 0.1,
            reorder_window_ms: 2000,
            face_time_unit: TimeUnit::Seconds,
            voice_time_unit: TimeUnit::Seconds,
            anchor_mode: AnchorMode::FirstSignal,
            aggregate_window_ms: 30_000,
            feed_capacity: 64,
            status_interval_ms: 1000,
            max_diagnostics: DEFAULT_MAX_DIAGNOSTICS,
            archive_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".sentioai"))
    }

    /// Default archive directory for finished sessions
    pub fn default_archive_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("archive"))
    }

    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            staleness_ms: self.staleness_ms,
            min_dwell_ms: self.min_dwell_ms,
            hysteresis_margin: self.hysteresis_margin,
        }
    }

    pub fn time_unit(&self, modality: Modality) -> TimeUnit {
        match modality {
            Modality::Face => self.face_time_unit,
            Modality::Voice => self.voice_time_unit,
        }
    }
}
