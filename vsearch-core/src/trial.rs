use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-trial state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Fixation,
    Response,
    Feedback,
    Complete,
}

/// The two response alternatives a participant can give.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKey {
    TargetPresent,
    TargetAbsent,
}

/// Recorded result per trial. Created once when the trial completes,
/// immutable thereafter, appended to the data sink as one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub subject: String,
    pub run: u32,
    /// 1-based block index within the session.
    pub block: usize,
    /// 1-based trial index across the whole session.
    pub trial: usize,
    pub target_present: bool,
    pub set_size: usize,
    pub radius_px: f32,
    pub fixation_ms: u64,
    pub feedback_ms: u64,
    pub response_timeout_ms: Option<u64>,
    /// The key the participant pressed; `None` on timeout.
    pub pressed_key: Option<String>,
    pub correct: bool,
    /// Stimulus onset to key-down, on the monotonic experiment timer.
    pub response_time_ms: Option<f64>,
    pub timed_out: bool,
    pub timestamp: DateTime<Utc>,
}

/// Block/trial counters for the on-screen progress label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub block: usize,
    pub blocks: usize,
    pub trial: usize,
    pub trials: usize,
}

/// Aggregate shown at debrief and logged at exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    pub trials: usize,
    pub correct: usize,
    /// Mean response time over correct, non-timeout trials.
    pub mean_rt_ms: Option<f64>,
}

impl SessionSummary {
    pub fn accuracy(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.correct as f64 / self.trials as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_handles_empty_session() {
        let summary = SessionSummary {
            trials: 0,
            correct: 0,
            mean_rt_ms: None,
        };
        assert_eq!(summary.accuracy(), 0.0);
    }

    #[test]
    fn accuracy_is_fractional() {
        let summary = SessionSummary {
            trials: 8,
            correct: 6,
            mean_rt_ms: Some(512.0),
        };
        assert!((summary.accuracy() - 0.75).abs() < f64::EPSILON);
    }
}
