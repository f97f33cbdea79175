use codec::rtp::Complex;
use criterion::{criterion_group, criterion_main, Criterion};
use tsig_recorder_dsp::correlate::{build_tone_template, cross_correlate_magnitude};

fn bench_correlate(c: &mut Criterion) {
    let sample_rate = 3_000u32;
    let template = build_tone_template(1000.0, 800.0, sample_rate);
    let signal: Vec<Complex> = vec![Complex::new(0.01, -0.01); sample_rate as usize * 5];

    c.bench_function("cross_correlate_5s_at_3khz", |b| {
        b.iter(|| cross_correlate_magnitude(&signal, &template))
    });
}

criterion_group!(benches, bench_correlate);
criterion_main!(benches);
