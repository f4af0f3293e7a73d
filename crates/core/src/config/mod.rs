use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{render::Color, trigger::DEFAULT_BAUD, Result};

/// Top-level configuration for a presentation run. Missing keys in a preset
/// file take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub display: DisplayConfig,
    pub trigger: TriggerConfig,
    /// Event log destination; a timestamp is inserted before the extension.
    pub output: PathBuf,
    /// Directory stimulus paths are resolved against, relative to the timeline.
    pub stimuli_dir: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub font_size: f32,
    pub text_color: Color,
    /// Lower bound for the run length. The run never ends before the last
    /// stimulus plus its margin regardless of this value.
    pub min_total_duration_ms: u64,
    pub abort_key: String,
    pub start_splash: Option<PathBuf>,
    pub end_splash: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            trigger: TriggerConfig::default(),
            output: PathBuf::from("results.csv"),
            stimuli_dir: None,
            font: None,
            font_size: 24.0,
            text_color: Color::WHITE,
            min_total_duration_ms: 0,
            abort_key: "Escape".to_string(),
            start_splash: None,
            end_splash: None,
        }
    }
}

impl AppConfig {
    /// Reads a JSON preset.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), "preset loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Window and frame presentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub display_index: u32,
    pub vsync: bool,
    /// Overrides the refresh rate reported by the display.
    pub refresh_rate_hz: Option<f32>,
    pub scale_factor: f32,
    pub show_fixation: bool,
    pub background: Color,
    pub fixation_color: Color,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fullscreen: false,
            display_index: 0,
            vsync: true,
            refresh_rate_hz: None,
            scale_factor: 1.0,
            show_fixation: true,
            background: Color::BLACK,
            fixation_color: Color::WHITE,
        }
    }
}

/// Serial trigger box settings. No device means markers are disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub device: Option<String>,
    pub baud: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud: DEFAULT_BAUD,
        }
    }
}
