use std::hint::black_box;
use std::path::PathBuf;

use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use vsearch_experiment::{StimulusCatalog, balanced_trials, place_stimuli};

fn catalog() -> StimulusCatalog {
    let targets = (0..4).map(|i| PathBuf::from(format!("t/{i}.png"))).collect();
    let distractors = (0..32).map(|i| PathBuf::from(format!("d/{i}.png"))).collect();
    StimulusCatalog::from_parts(targets, distractors).unwrap()
}

fn bench_placement(c: &mut Criterion) {
    let catalog = catalog();
    let mut rng = StdRng::seed_from_u64(99);

    c.bench_function("place_16_rotated", |b| {
        b.iter(|| {
            black_box(place_stimuli(
                &catalog,
                black_box(16),
                true,
                340.0,
                true,
                &mut rng,
            ))
        })
    });

    c.bench_function("balanced_trials_100", |b| {
        b.iter(|| black_box(balanced_trials(black_box(100), &mut rng)))
    });
}

criterion_group!(benches, bench_placement);
criterion_main!(benches);
