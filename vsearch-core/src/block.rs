use serde::{Deserialize, Serialize};

/// One group of trials sharing display geometry and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Number of items shown per trial. Must be at least 1.
    pub set_size: usize,
    /// Items are placed on a circle of this radius around fixation.
    pub radius_px: f32,
    /// Number of trials in this block.
    pub repetitions: usize,
    #[serde(default = "default_fixation_ms")]
    pub fixation_ms: u64,
    #[serde(default = "default_feedback_ms")]
    pub feedback_ms: u64,
    /// `None` waits indefinitely for a response.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,
    /// Draw each item at an independent uniform rotation in [0°, 360°).
    #[serde(default)]
    pub rotate_items: bool,
}

fn default_fixation_ms() -> u64 {
    2000
}

fn default_feedback_ms() -> u64 {
    3000
}

impl Block {
    pub fn new(set_size: usize, radius_px: f32, repetitions: usize) -> Self {
        Self {
            set_size,
            radius_px,
            repetitions,
            fixation_ms: default_fixation_ms(),
            feedback_ms: default_feedback_ms(),
            response_timeout_ms: None,
            rotate_items: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_in_timeouts() {
        let block: Block =
            serde_json::from_str(r#"{"set_size": 8, "radius_px": 220.0, "repetitions": 10}"#)
                .unwrap();
        assert_eq!(block.fixation_ms, 2000);
        assert_eq!(block.feedback_ms, 3000);
        assert_eq!(block.response_timeout_ms, None);
        assert!(!block.rotate_items);
    }

    #[test]
    fn explicit_timeout_survives_parsing() {
        let block: Block = serde_json::from_str(
            r#"{"set_size": 12, "radius_px": 280.0, "repetitions": 6,
                "response_timeout_ms": 4000, "rotate_items": true}"#,
        )
        .unwrap();
        assert_eq!(block.response_timeout_ms, Some(4000));
        assert!(block.rotate_items);
    }
}
