use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vsearch_core::Block;

use crate::error::{ExperimentError, Result};

/// Session configuration: subject, response mapping, timing shared across
/// blocks, and the block table itself. Deserializable from a JSON file;
/// `Default` mirrors the canonical three-block setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub subject: String,
    /// Key reporting "target present".
    #[serde(default = "default_present_key")]
    pub target_present_key: char,
    /// Key reporting "target absent".
    #[serde(default = "default_absent_key")]
    pub target_absent_key: char,
    /// Stimulus images are scaled to fit a square of this side length.
    #[serde(default = "default_item_size_px")]
    pub item_size_px: u32,
    #[serde(default = "default_iti_ms")]
    pub inter_trial_interval_ms: u64,
    /// Frames rendered during the calibration phase before frame-time
    /// statistics are taken.
    #[serde(default = "default_calibration_frames")]
    pub calibration_frames: usize,
    #[serde(default = "default_blocks")]
    pub blocks: Vec<Block>,
}

fn default_present_key() -> char {
    'x'
}

fn default_absent_key() -> char {
    'm'
}

fn default_item_size_px() -> u32 {
    64
}

fn default_iti_ms() -> u64 {
    1000
}

fn default_calibration_frames() -> usize {
    120
}

fn default_blocks() -> Vec<Block> {
    vec![
        Block::new(8, 220.0, 10),
        Block::new(12, 280.0, 10),
        Block::new(16, 340.0, 10),
    ]
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            subject: String::new(),
            target_present_key: default_present_key(),
            target_absent_key: default_absent_key(),
            item_size_px: default_item_size_px(),
            inter_trial_interval_ms: default_iti_ms(),
            calibration_frames: default_calibration_frames(),
            blocks: default_blocks(),
        }
    }
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ExperimentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ExperimentError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subject.is_empty() {
            return Err(ExperimentError::InvalidConfig("subject id is empty".into()));
        }
        if self.subject.contains(',') {
            // The sink writes unquoted comma-delimited rows.
            return Err(ExperimentError::InvalidConfig(
                "subject id must not contain ','".into(),
            ));
        }
        if self.target_present_key == self.target_absent_key {
            return Err(ExperimentError::InvalidConfig(
                "response keys must differ".into(),
            ));
        }
        if self.item_size_px == 0 {
            return Err(ExperimentError::InvalidConfig("item_size_px is 0".into()));
        }
        if self.blocks.is_empty() {
            return Err(ExperimentError::InvalidConfig("no blocks defined".into()));
        }
        for (i, block) in self.blocks.iter().enumerate() {
            if block.set_size < 1 {
                return Err(ExperimentError::InvalidConfig(format!(
                    "block {}: set_size must be at least 1",
                    i + 1
                )));
            }
            if block.repetitions < 1 {
                return Err(ExperimentError::InvalidConfig(format!(
                    "block {}: repetitions must be at least 1",
                    i + 1
                )));
            }
            if block.radius_px <= 0.0 {
                return Err(ExperimentError::InvalidConfig(format!(
                    "block {}: radius_px must be positive",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_three_blocks() {
        let config = ExperimentConfig::default();
        assert_eq!(config.blocks.len(), 3);
        assert_eq!(config.blocks[0].set_size, 8);
        assert_eq!(config.blocks[2].set_size, 16);
        assert_eq!(config.target_present_key, 'x');
        assert_eq!(config.target_absent_key, 'm');
    }

    #[test]
    fn partial_json_overrides_only_what_it_names() {
        let config: ExperimentConfig = serde_json::from_str(
            r#"{
                "subject": "s01",
                "target_present_key": "j",
                "blocks": [{"set_size": 4, "radius_px": 180.0, "repetitions": 20}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.subject, "s01");
        assert_eq!(config.target_present_key, 'j');
        assert_eq!(config.target_absent_key, 'm');
        assert_eq!(config.blocks.len(), 1);
        assert_eq!(config.inter_trial_interval_ms, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let mut config = ExperimentConfig {
            subject: "s01".into(),
            ..Default::default()
        };
        config.validate().unwrap();

        config.subject.clear();
        assert!(config.validate().is_err());

        config.subject = "a,b".into();
        assert!(config.validate().is_err());

        config.subject = "s01".into();
        config.target_absent_key = 'x';
        assert!(config.validate().is_err());

        config.target_absent_key = 'm';
        config.blocks[0].set_size = 0;
        assert!(config.validate().is_err());
    }
}
