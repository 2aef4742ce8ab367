use std::f32::consts::TAU;

use rand::Rng;
use rand::seq::SliceRandom;
use vsearch_core::PlacedStimulus;

use crate::catalog::StimulusCatalog;

/// Place the items for one trial around a circle of radius `radius_px`.
///
/// One target plus `set_size - 1` distractors when the target is present,
/// `set_size` distractors otherwise. Items are shuffled, then assigned to
/// equal angular sectors sharing a single uniform phase offset, so the
/// array as a whole sits at a random orientation every trial.
pub fn place_stimuli<R: Rng>(
    catalog: &StimulusCatalog,
    set_size: usize,
    target_present: bool,
    radius_px: f32,
    rotate_items: bool,
    rng: &mut R,
) -> Vec<PlacedStimulus> {
    let mut items = Vec::with_capacity(set_size);
    if target_present {
        items.push(catalog.sample_target(rng));
        items.extend(catalog.sample_distractors(set_size - 1, rng));
    } else {
        items.extend(catalog.sample_distractors(set_size, rng));
    }
    items.shuffle(rng);

    let sector = TAU / set_size as f32;
    let phase = rng.random_range(0.0..TAU);

    items
        .into_iter()
        .enumerate()
        .map(|(i, stimulus)| {
            let angle = sector * i as f32 + phase;
            PlacedStimulus {
                stimulus,
                position: (radius_px * angle.cos(), radius_px * angle.sin()),
                rotation_deg: if rotate_items {
                    Some(rng.random_range(0.0..360.0))
                } else {
                    None
                },
            }
        })
        .collect()
}
