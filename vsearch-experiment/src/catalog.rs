use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::debug;
use vsearch_core::{ImageStimulus, StimulusRole};

use crate::error::{ExperimentError, Result};

pub const TARGET_DIR: &str = "target";
pub const DISTRACTOR_DIR: &str = "distractor";

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// The image files available for each stimulus category.
///
/// Both categories are validated non-empty at load time, so sampling never
/// fails mid-session.
#[derive(Debug, Clone)]
pub struct StimulusCatalog {
    targets: Vec<PathBuf>,
    distractors: Vec<PathBuf>,
}

impl StimulusCatalog {
    /// Scan `<stimuli_dir>/target` and `<stimuli_dir>/distractor`.
    pub fn load(stimuli_dir: &Path) -> Result<Self> {
        if !stimuli_dir.is_dir() {
            return Err(ExperimentError::MissingStimulusDir(
                stimuli_dir.to_path_buf(),
            ));
        }
        let targets = scan_images(&stimuli_dir.join(TARGET_DIR))?;
        let distractors = scan_images(&stimuli_dir.join(DISTRACTOR_DIR))?;
        debug!(
            targets = targets.len(),
            distractors = distractors.len(),
            "stimulus catalog loaded"
        );
        Ok(Self {
            targets,
            distractors,
        })
    }

    /// Build a catalog from explicit path lists. Used by tests and benches;
    /// the paths are not checked against the filesystem.
    pub fn from_parts(targets: Vec<PathBuf>, distractors: Vec<PathBuf>) -> Result<Self> {
        if targets.is_empty() {
            return Err(ExperimentError::InvalidConfig(
                "target stimulus list is empty".into(),
            ));
        }
        if distractors.is_empty() {
            return Err(ExperimentError::InvalidConfig(
                "distractor stimulus list is empty".into(),
            ));
        }
        Ok(Self {
            targets,
            distractors,
        })
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn distractors(&self) -> &[PathBuf] {
        &self.distractors
    }

    /// One target image, drawn uniformly.
    pub fn sample_target<R: Rng>(&self, rng: &mut R) -> ImageStimulus {
        let path = self
            .targets
            .choose(rng)
            .expect("catalog is validated non-empty at load");
        ImageStimulus::from_path(path, StimulusRole::Target)
    }

    /// `n` distractor images, drawn with replacement.
    pub fn sample_distractors<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<ImageStimulus> {
        (0..n)
            .map(|_| {
                let path = self
                    .distractors
                    .choose(rng)
                    .expect("catalog is validated non-empty at load");
                ImageStimulus::from_path(path, StimulusRole::Distractor)
            })
            .collect()
    }
}

fn scan_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ExperimentError::MissingStimulusDir(dir.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let usable = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            });
        if usable {
            images.push(path);
        }
    }
    if images.is_empty() {
        return Err(ExperimentError::EmptyStimulusDir(dir.to_path_buf()));
    }
    // Directory iteration order is platform-dependent.
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use vsearch_core::Stimulus;

    fn temp_stimuli(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "vsearch_catalog_{}_{}",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(dir.join(TARGET_DIR)).unwrap();
        fs::create_dir_all(dir.join(DISTRACTOR_DIR)).unwrap();
        for file in ["t0.png", "t1.JPG"] {
            fs::write(dir.join(TARGET_DIR).join(file), b"").unwrap();
        }
        for file in ["d0.png", "d1.jpeg", "d2.jpg", "readme.txt"] {
            fs::write(dir.join(DISTRACTOR_DIR).join(file), b"").unwrap();
        }
        dir
    }

    #[test]
    fn load_filters_on_image_extensions() {
        let dir = temp_stimuli("filter");
        let catalog = StimulusCatalog::load(&dir).unwrap();
        assert_eq!(catalog.targets().len(), 2);
        // readme.txt is not a stimulus.
        assert_eq!(catalog.distractors().len(), 3);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = StimulusCatalog::load(Path::new("/nonexistent/vsearch-stimuli")).unwrap_err();
        assert!(matches!(err, ExperimentError::MissingStimulusDir(_)));
    }

    #[test]
    fn missing_category_is_an_error() {
        let dir = temp_stimuli("nocat");
        fs::remove_dir_all(dir.join(DISTRACTOR_DIR)).unwrap();
        let err = StimulusCatalog::load(&dir).unwrap_err();
        assert!(matches!(err, ExperimentError::MissingStimulusDir(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_category_is_an_error() {
        let dir = temp_stimuli("empty");
        for file in ["t0.png", "t1.JPG"] {
            fs::remove_file(dir.join(TARGET_DIR).join(file)).unwrap();
        }
        let err = StimulusCatalog::load(&dir).unwrap_err();
        assert!(matches!(err, ExperimentError::EmptyStimulusDir(_)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn samples_carry_their_role() {
        let dir = temp_stimuli("roles");
        let catalog = StimulusCatalog::load(&dir).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(catalog.sample_target(&mut rng).is_target());
        let distractors = catalog.sample_distractors(8, &mut rng);
        assert_eq!(distractors.len(), 8);
        assert!(distractors.iter().all(|d| !d.is_target()));
        fs::remove_dir_all(&dir).unwrap();
    }
}
