//! Configuration file for the cadence binary
//!
//! Plain `key=value` lines; unknown keys are ignored, missing keys keep their
//! defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cadence_audio::MixerConfig;
use cadence_capture::{FakeCaptureConfig, SchedulerConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Synthetic capture cards to run
    pub num_cards: usize,
    pub master_card: usize,
    pub card_fps: u32,
    /// Clock error of every non-master synthetic card, in parts per million
    pub card_drift_ppm: f64,
    /// Tone level of the synthetic cards
    pub tone_dbfs: f32,
    pub output_sample_rate: u32,
    pub ref_level_lufs: f64,
    pub ref_level_dbfs: f32,
    pub makeup_gain_half_life_seconds: f64,
    pub locut_cutoff_hz: f32,
    pub monitor: bool,
    pub level_log_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mixer = MixerConfig::default();
        Self {
            num_cards: 2,
            master_card: 0,
            card_fps: 60,
            card_drift_ppm: 50.0,
            tone_dbfs: -30.0,
            output_sample_rate: mixer.output_sample_rate,
            ref_level_lufs: mixer.ref_level_lufs,
            ref_level_dbfs: mixer.ref_level_dbfs,
            makeup_gain_half_life_seconds: mixer.makeup_gain_half_life_seconds,
            locut_cutoff_hz: mixer.locut_cutoff_hz,
            monitor: true,
            level_log_interval: Duration::from_secs(1),
        }
    }
}

impl AppConfig {
    /// Load config from the default location
    ///
    /// Returns the defaults if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self) -> io::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadence")
            .join("config.txt")
    }

    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            // Values that fail to parse keep the default
            match key.trim() {
                "num_cards" => set(&mut config.num_cards, value),
                "master_card" => set(&mut config.master_card, value),
                "card_fps" => set(&mut config.card_fps, value),
                "card_drift_ppm" => set(&mut config.card_drift_ppm, value),
                "tone_dbfs" => set(&mut config.tone_dbfs, value),
                "output_sample_rate" => set(&mut config.output_sample_rate, value),
                "ref_level_lufs" => set(&mut config.ref_level_lufs, value),
                "ref_level_dbfs" => set(&mut config.ref_level_dbfs, value),
                "makeup_gain_half_life_seconds" => set(&mut config.makeup_gain_half_life_seconds, value),
                "locut_cutoff_hz" => set(&mut config.locut_cutoff_hz, value),
                "monitor" => set(&mut config.monitor, value),
                "level_log_interval_ms" => {
                    if let Ok(ms) = value.parse() {
                        config.level_log_interval = Duration::from_millis(ms);
                    }
                }
                _ => {}
            }
        }

        config
    }

    fn serialize(&self) -> String {
        [
            "# Cadence Configuration".to_string(),
            format!("num_cards={}", self.num_cards),
            format!("master_card={}", self.master_card),
            format!("card_fps={}", self.card_fps),
            format!("card_drift_ppm={}", self.card_drift_ppm),
            format!("tone_dbfs={}", self.tone_dbfs),
            format!("output_sample_rate={}", self.output_sample_rate),
            format!("ref_level_lufs={}", self.ref_level_lufs),
            format!("ref_level_dbfs={}", self.ref_level_dbfs),
            format!("makeup_gain_half_life_seconds={}", self.makeup_gain_half_life_seconds),
            format!("locut_cutoff_hz={}", self.locut_cutoff_hz),
            format!("monitor={}", self.monitor),
            format!("level_log_interval_ms={}", self.level_log_interval.as_millis()),
        ]
        .join("\n")
    }

    pub fn mixer_config(&self) -> MixerConfig {
        MixerConfig {
            output_sample_rate: self.output_sample_rate,
            ref_level_lufs: self.ref_level_lufs,
            ref_level_dbfs: self.ref_level_dbfs,
            makeup_gain_half_life_seconds: self.makeup_gain_half_life_seconds,
            locut_cutoff_hz: self.locut_cutoff_hz,
            default_device_sample_rate: self.output_sample_rate,
            ..MixerConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            fake_card: FakeCaptureConfig {
                frame_rate_nom: self.card_fps,
                sample_rate: self.output_sample_rate,
                ..FakeCaptureConfig::default()
            },
            ..SchedulerConfig::default()
        }
    }

    /// Synthetic card `index`: its own tone, and a drifting clock unless it is the master
    pub fn card_config(&self, index: usize) -> FakeCaptureConfig {
        let drift = if index == self.master_card {
            0.0
        } else {
            self.card_drift_ppm * 1e-6
        };
        FakeCaptureConfig {
            frame_rate_nom: self.card_fps,
            sample_rate: (f64::from(self.output_sample_rate) * (1.0 + drift)).round() as u32,
            tone: Some((220.0 * (index + 1) as f32, self.tone_dbfs)),
            ..FakeCaptureConfig::default()
        }
    }
}

fn set<T: std::str::FromStr>(field: &mut T, value: &str) {
    if let Ok(parsed) = value.parse() {
        *field = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(AppConfig::parse(""), AppConfig::default());
    }

    #[test]
    fn test_parse_values_and_comments() {
        let content = "# Comment\nnum_cards = 4\nmaster_card=1\nmonitor=false\n\nlevel_log_interval_ms=250\nbogus=1";
        let config = AppConfig::parse(content);
        assert_eq!(config.num_cards, 4);
        assert_eq!(config.master_card, 1);
        assert!(!config.monitor);
        assert_eq!(config.level_log_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_bad_value_keeps_default() {
        let config = AppConfig::parse("card_fps=fast\ntone_dbfs=-12.5");
        assert_eq!(config.card_fps, 60);
        assert_eq!(config.tone_dbfs, -12.5);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = AppConfig {
            num_cards: 3,
            card_drift_ppm: -120.0,
            ref_level_lufs: -16.0,
            monitor: false,
            ..AppConfig::default()
        };
        assert_eq!(AppConfig::parse(&config.serialize()), config);
    }

    #[test]
    fn test_only_non_master_cards_drift() {
        let config = AppConfig {
            card_drift_ppm: 100.0,
            ..AppConfig::default()
        };
        assert_eq!(config.card_config(0).sample_rate, 48_000);
        assert_eq!(config.card_config(1).sample_rate, 48_005);
        assert_eq!(config.card_config(1).tone.map(|t| t.0), Some(440.0));
    }
}
