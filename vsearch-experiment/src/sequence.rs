use rand::Rng;
use rand::seq::SliceRandom;

/// Balanced target-present schedule for one block: exactly `n / 2` (rounded
/// down) present trials, order shuffled. For odd `n` the extra trial is
/// target-absent.
pub fn balanced_trials<R: Rng>(n: usize, rng: &mut R) -> Vec<bool> {
    let mut trials: Vec<bool> = (0..n).map(|i| i < n / 2).collect();
    trials.shuffle(rng);
    trials
}
