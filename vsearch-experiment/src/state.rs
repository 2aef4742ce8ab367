use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info};
use vsearch_core::{
    Phase, PlacedStimulus, Progress, ResponseKey, SessionSummary, TrialResult, TrialState,
};
use vsearch_timing::Timer;

use crate::catalog::StimulusCatalog;
use crate::config::ExperimentConfig;
use crate::placement::place_stimuli;
use crate::sequence::balanced_trials;

/// Events exchanged between the windowing layer and the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentEvent {
    SpacePressed,
    CalibrationComplete,
    ResponseReceived(ResponseKey),
    TrialComplete,
}

/// Bookkeeping for the trial currently on screen.
#[derive(Debug, Clone)]
struct ActiveTrial {
    index: usize,
    block: usize,
    target_present: bool,
    items: Vec<PlacedStimulus>,
    state: TrialState,
    fixation_start_ns: u64,
    stimulus_start_ns: Option<u64>,
    feedback_start_ns: Option<u64>,
    response_ns: Option<u64>,
    response: Option<ResponseKey>,
    correct: Option<bool>,
}

/// Drives the whole session: phase chain, block iteration and the per-trial
/// fixation → response → feedback timeline. The windowing layer calls
/// [`update`](Self::update) once per frame and feeds the returned events
/// (plus keyboard input) back through [`handle_event`](Self::handle_event).
pub struct ExperimentStateMachine<P, T, R>
where
    P: Phase,
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub phase: P,
    pub timer: T,
    rng: R,
    config: ExperimentConfig,
    catalog: StimulusCatalog,
    run: u32,
    block_index: usize,
    trial_in_block: usize,
    schedule: Vec<bool>,
    current: Option<ActiveTrial>,
    trial_counter: usize,
    results: Vec<TrialResult>,
    calibrated: bool,
    calibration_start_frame: usize,
    safe_margin_ns: u64,
}

impl<P, T, R> ExperimentStateMachine<P, T, R>
where
    P: Phase,
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub fn new(config: ExperimentConfig, catalog: StimulusCatalog, run: u32, timer: T, rng: R) -> Self {
        Self {
            phase: P::default(),
            timer,
            rng,
            config,
            catalog,
            run,
            block_index: 0,
            trial_in_block: 0,
            schedule: Vec::new(),
            current: None,
            trial_counter: 0,
            results: Vec::new(),
            calibrated: false,
            calibration_start_frame: 0,
            safe_margin_ns: 0,
        }
    }

    /// Advance the phase chain; returns false once the chain is exhausted.
    fn advance_phase(&mut self) -> bool {
        if let Some(next) = self.phase.next() {
            self.phase = next;
            if self.phase.requires_calibration() {
                self.calibration_start_frame = self.timer.frame_count();
            }
            debug!(phase = ?self.phase, "phase advanced");
            true
        } else {
            false
        }
    }

    fn apply_calibration(&mut self) {
        let stats = self.timer.calibration_stats();
        self.safe_margin_ns = (stats.jitter_ns * 3.0) as u64;
        self.calibrated = true;
        info!(
            frame_ms = stats.average_frame_time_ns / 1e6,
            fps = stats.effective_fps,
            jitter_ms = stats.jitter_ns / 1e6,
            margin_ns = self.safe_margin_ns,
            "display calibrated"
        );
    }

    fn start_block(&mut self) {
        let repetitions = self.config.blocks[self.block_index].repetitions;
        self.schedule = balanced_trials(repetitions, &mut self.rng);
        self.trial_in_block = 0;
        debug!(
            block = self.block_index + 1,
            trials = repetitions,
            "block started"
        );
    }

    fn start_trial(&mut self) {
        let block = self.config.blocks[self.block_index].clone();
        let target_present = self.schedule[self.trial_in_block];
        let items = place_stimuli(
            &self.catalog,
            block.set_size,
            target_present,
            block.radius_px,
            block.rotate_items,
            &mut self.rng,
        );
        let now = self.timer.now();
        self.current = Some(ActiveTrial {
            index: self.trial_counter,
            block: self.block_index,
            target_present,
            items,
            state: TrialState::Fixation,
            fixation_start_ns: now,
            stimulus_start_ns: None,
            feedback_start_ns: None,
            response_ns: None,
            response: None,
            correct: None,
        });
        debug!(trial = self.trial_counter + 1, target_present, "trial started");
    }

    /// Per-frame tick. Emits events for deadline crossings; the caller is
    /// expected to feed them straight back into [`handle_event`].
    pub fn update(&mut self) -> Vec<ExperimentEvent> {
        let mut events = Vec::new();
        match self.phase {
            p if p.is_welcome() => {}
            p if p.requires_calibration() => {
                let rendered = self
                    .timer
                    .frame_count()
                    .saturating_sub(self.calibration_start_frame);
                if !self.calibrated && rendered >= self.config.calibration_frames {
                    events.push(ExperimentEvent::CalibrationComplete);
                }
            }
            p if p.is_experiment() => self.update_trial(&mut events),
            _ => {}
        }
        events
    }

    fn update_trial(&mut self, events: &mut Vec<ExperimentEvent>) {
        let Some(block) = self.config.blocks.get(self.block_index).cloned() else {
            return;
        };
        let now = self.timer.now();
        let margin = self.safe_margin_ns;
        if let Some(trial) = &mut self.current {
            match trial.state {
                TrialState::Fixation => {
                    if now.saturating_sub(trial.fixation_start_ns) >= block.fixation_ms * 1_000_000
                    {
                        trial.state = TrialState::Response;
                        trial.stimulus_start_ns = Some(now);
                        debug!(trial = trial.index + 1, "response window opened");
                    }
                }
                TrialState::Response => {
                    // No deadline when the block waits indefinitely.
                    if let (Some(timeout_ms), Some(start)) =
                        (block.response_timeout_ms, trial.stimulus_start_ns)
                    {
                        if now.saturating_sub(start) >= timeout_ms * 1_000_000 + margin {
                            trial.correct = Some(false);
                            trial.state = TrialState::Feedback;
                            trial.feedback_start_ns = Some(now);
                            debug!(trial = trial.index + 1, "response timed out");
                        }
                    }
                }
                TrialState::Feedback => {
                    if let Some(start) = trial.feedback_start_ns {
                        if now.saturating_sub(start) >= block.feedback_ms * 1_000_000 {
                            trial.state = TrialState::Complete;
                            events.push(ExperimentEvent::TrialComplete);
                        }
                    }
                }
                TrialState::Complete => {}
            }
        }
    }

    /// Returns true when the event changed state.
    pub fn handle_event(&mut self, event: ExperimentEvent) -> bool {
        match (self.phase, event) {
            (p, ExperimentEvent::SpacePressed) if p.is_welcome() => self.advance_phase(),

            (p, ExperimentEvent::CalibrationComplete) if p.requires_calibration() => {
                self.apply_calibration();
                if self.advance_phase() {
                    self.start_block();
                    self.start_trial();
                    true
                } else {
                    false
                }
            }

            (p, ExperimentEvent::ResponseReceived(key)) if p.is_experiment() => {
                self.record_response(key)
            }

            (p, ExperimentEvent::TrialComplete) if p.is_experiment() => {
                self.finish_trial();
                true
            }

            _ => false,
        }
    }

    fn record_response(&mut self, key: ResponseKey) -> bool {
        let Some(trial) = &mut self.current else {
            return false;
        };
        if trial.state != TrialState::Response {
            return false;
        }
        let now = self.timer.now();
        trial.response_ns = Some(now);
        trial.response = Some(key);
        trial.correct = Some((key == ResponseKey::TargetPresent) == trial.target_present);
        trial.state = TrialState::Feedback;
        trial.feedback_start_ns = Some(now);

        let rt_ns = now.saturating_sub(trial.stimulus_start_ns.unwrap_or(now));
        debug!(
            trial = trial.index + 1,
            rt_ms = rt_ns as f64 / 1e6,
            "response recorded"
        );
        true
    }

    /// Freeze the finished trial into a result, then line up the next trial,
    /// block, or the debrief.
    fn finish_trial(&mut self) {
        let Some(trial) = self.current.take() else {
            return;
        };
        let block = &self.config.blocks[trial.block];
        let response_time_ms = match (trial.response_ns, trial.stimulus_start_ns) {
            (Some(response), Some(onset)) => Some(response.saturating_sub(onset) as f64 / 1e6),
            _ => None,
        };
        let pressed_key = trial.response.map(|key| match key {
            ResponseKey::TargetPresent => self.config.target_present_key.to_string(),
            ResponseKey::TargetAbsent => self.config.target_absent_key.to_string(),
        });

        self.results.push(TrialResult {
            subject: self.config.subject.clone(),
            run: self.run,
            block: trial.block + 1,
            trial: trial.index + 1,
            target_present: trial.target_present,
            set_size: block.set_size,
            radius_px: block.radius_px,
            fixation_ms: block.fixation_ms,
            feedback_ms: block.feedback_ms,
            response_timeout_ms: block.response_timeout_ms,
            pressed_key,
            correct: trial.correct.unwrap_or(false),
            response_time_ms,
            timed_out: trial.response.is_none(),
            timestamp: Utc::now(),
        });
        self.trial_counter += 1;
        self.trial_in_block += 1;

        self.timer
            .sleep(Duration::from_millis(self.config.inter_trial_interval_ms));

        if self.trial_in_block < self.schedule.len() {
            self.start_trial();
        } else if self.block_index + 1 < self.config.blocks.len() {
            self.block_index += 1;
            self.start_block();
            self.start_trial();
        } else {
            info!(trials = self.trial_counter, "all blocks complete");
            self.advance_phase();
        }
    }

    pub fn current_phase(&self) -> &P {
        &self.phase
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn run_number(&self) -> u32 {
        self.run
    }

    pub fn trial_state(&self) -> Option<TrialState> {
        self.current.as_ref().map(|t| t.state)
    }

    /// Items to draw this frame; empty outside the response window's trial.
    pub fn visible_items(&self) -> &[PlacedStimulus] {
        self.current
            .as_ref()
            .map(|t| t.items.as_slice())
            .unwrap_or(&[])
    }

    /// `Some(correct)` while feedback for the current trial is on screen.
    pub fn feedback_success(&self) -> Option<bool> {
        let trial = self.current.as_ref()?;
        match trial.state {
            TrialState::Feedback | TrialState::Complete => trial.correct,
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<Progress> {
        if !self.phase.is_experiment() || self.block_index >= self.config.blocks.len() {
            return None;
        }
        Some(Progress {
            block: self.block_index + 1,
            blocks: self.config.blocks.len(),
            trial: (self.trial_in_block + 1).min(self.schedule.len()),
            trials: self.schedule.len(),
        })
    }

    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }

    pub fn summary(&self) -> SessionSummary {
        let trials = self.results.len();
        let correct = self.results.iter().filter(|r| r.correct).count();
        let rts: Vec<f64> = self
            .results
            .iter()
            .filter(|r| r.correct)
            .filter_map(|r| r.response_time_ms)
            .collect();
        let mean_rt_ms = if rts.is_empty() {
            None
        } else {
            Some(rts.iter().sum::<f64>() / rts.len() as f64)
        };
        SessionSummary {
            trials,
            correct,
            mean_rt_ms,
        }
    }
}
