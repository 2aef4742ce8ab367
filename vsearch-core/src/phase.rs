/// Session-level phases and their behavior
pub trait Phase: Copy + Clone + PartialEq + Send + Sync + std::fmt::Debug + Default {
    fn allows_input(&self) -> bool;
    fn requires_calibration(&self) -> bool;
    fn next(&self) -> Option<Self>;

    fn is_welcome(&self) -> bool {
        false
    }
    fn is_experiment(&self) -> bool {
        false
    }
    fn is_debrief(&self) -> bool {
        false
    }
}

/// The standard session: instructions, display calibration, the trial
/// blocks, then a summary screen.
#[derive(Copy, Debug, Clone, PartialEq, Default)]
pub enum StandardPhase {
    #[default]
    Welcome,
    Calibration,
    Experiment,
    Debrief,
}

impl Phase for StandardPhase {
    fn allows_input(&self) -> bool {
        !matches!(self, Self::Calibration)
    }

    fn requires_calibration(&self) -> bool {
        matches!(self, Self::Calibration)
    }

    fn next(&self) -> Option<Self> {
        use StandardPhase::*;
        Some(match self {
            Welcome => Calibration,
            Calibration => Experiment,
            Experiment => Debrief,
            Debrief => return None,
        })
    }

    fn is_welcome(&self) -> bool {
        matches!(self, StandardPhase::Welcome)
    }

    fn is_experiment(&self) -> bool {
        matches!(self, StandardPhase::Experiment)
    }

    fn is_debrief(&self) -> bool {
        matches!(self, StandardPhase::Debrief)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_chain_ends_at_debrief() {
        let mut phase = StandardPhase::default();
        assert!(phase.is_welcome());

        let mut visited = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            visited.push(phase);
        }

        assert_eq!(
            visited,
            vec![
                StandardPhase::Welcome,
                StandardPhase::Calibration,
                StandardPhase::Experiment,
                StandardPhase::Debrief,
            ]
        );
        assert!(phase.is_debrief());
    }

    #[test]
    fn calibration_blocks_input() {
        assert!(!StandardPhase::Calibration.allows_input());
        assert!(StandardPhase::Experiment.allows_input());
    }
}
