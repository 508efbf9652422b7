use baum_welch::ml::hmm::{
    backward, emission_probabilities, forward, fit, posteriors, sample, EmConfig,
    ModelParameters,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::array;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn model() -> ModelParameters {
    ModelParameters::new(
        array![0.4, 0.3, 0.3],
        array![[0.9, 0.05, 0.05], [0.05, 0.9, 0.05], [0.05, 0.05, 0.9]],
        array![[-3.0, 0.0], [0.0, 3.0], [3.0, 0.0]],
        vec![
            array![[1.0, 0.2], [0.2, 1.0]],
            array![[0.8, 0.0], [0.0, 0.8]],
            array![[1.2, -0.3], [-0.3, 0.9]],
        ],
    )
    .unwrap()
}

fn bench_e_step(c: &mut Criterion) {
    let params = model();
    let mut group = c.benchmark_group("e_step");
    for &len in &[100_usize, 1_000, 10_000] {
        let (obs, _) = sample(&params, len, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(len), &obs, |b, obs| {
            b.iter(|| {
                let emissions = emission_probabilities(black_box(obs), &params).unwrap();
                let fwd = forward(&params, &emissions).unwrap();
                let beta = backward(&params, &emissions).unwrap();
                posteriors(&params, &emissions, &fwd.alpha, &beta).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_em_iteration(c: &mut Criterion) {
    let params = model();
    let (obs, _) = sample(&params, 1_000, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
    c.bench_function("em_iteration_1000", |b| {
        b.iter(|| {
            fit(
                black_box(&obs),
                params.clone(),
                EmConfig::new().with_max_iterations(1),
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_e_step, bench_em_iteration);
criterion_main!(benches);
