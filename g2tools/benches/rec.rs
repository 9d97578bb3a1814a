#[allow(unused_imports)]
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use g2tools::period::PeriodAssembler;
use g2tools::rec::{DecodeProfile, Decoder};

mod common;

fn decode(c: &mut Criterion) {
    for (name, profile) in [("decode_a", DecodeProfile::A), ("decode_b", DecodeProfile::B)] {
        let bufs = common::records(profile, 10_000);
        let d = Decoder::new(profile, false);
        c.bench_function(name, |b| { b.iter( || {
            for buf in &bufs {
                black_box(d.decode(black_box(buf)).ok());
            }
        })});
    }
}

fn assemble(c: &mut Criterion) {
    let d = Decoder::default();
    let recs: Vec<_> = common::records(DecodeProfile::A, 10_000)
        .iter()
        .filter_map(|buf| d.decode(buf).ok())
        .collect();

    c.bench_function("assemble", |b| { b.iter( || {
        let mut pa = PeriodAssembler::new();
        for r in &recs {
            black_box(pa.push(r).ok());
        }
    })});
}

criterion_group!(benches, decode, assemble);
criterion_main!(benches);
