use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Anything the renderer can draw by cache id
pub trait Stimulus: Clone + Send + Sync + std::fmt::Debug {
    fn cache_id(&self) -> usize;
    fn is_target(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StimulusRole {
    Target,
    Distractor,
}

/// A stimulus backed by an image file. The path is interned once so trials
/// and render caches pass around a dense id instead of a `PathBuf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStimulus {
    cache_id: usize,
    role: StimulusRole,
}

impl ImageStimulus {
    pub fn from_path(path: &Path, role: StimulusRole) -> Self {
        Self {
            cache_id: vsearch_cache::intern(&path.to_string_lossy()),
            role,
        }
    }

    pub fn role(&self) -> StimulusRole {
        self.role
    }

    /// The original file path, resolved back through the interner.
    pub fn path(&self) -> Option<PathBuf> {
        vsearch_cache::resolve(self.cache_id).map(PathBuf::from)
    }
}

impl Stimulus for ImageStimulus {
    fn cache_id(&self) -> usize {
        self.cache_id
    }

    fn is_target(&self) -> bool {
        self.role == StimulusRole::Target
    }
}

/// A stimulus with its on-screen placement for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedStimulus {
    pub stimulus: ImageStimulus,
    /// Offset from screen center in px, math convention (positive y up).
    pub position: (f32, f32),
    /// In-plane rotation in degrees, when the block enables item rotation.
    pub rotation_deg: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_round_trips_through_interner() {
        let path = Path::new("stimuli/target/letter_t.png");
        let stim = ImageStimulus::from_path(path, StimulusRole::Target);
        assert_eq!(stim.path().as_deref(), Some(path));
        assert!(stim.is_target());
    }

    #[test]
    fn same_file_shares_cache_id() {
        let path = Path::new("stimuli/distractor/letter_l.png");
        let a = ImageStimulus::from_path(path, StimulusRole::Distractor);
        let b = ImageStimulus::from_path(path, StimulusRole::Distractor);
        assert_eq!(a.cache_id(), b.cache_id());
        assert!(!a.is_target());
    }
}
