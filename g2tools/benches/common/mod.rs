#![allow(dead_code)]

use g2tools::rec::{DecodeProfile, Decoder};
use g2tools::{PeriodRecord, PhotonRecord, SLOTS};

/// Deterministic pseudo-random stream of full records on the profile's grid
pub fn records(profile: DecodeProfile, n: usize) -> Vec<Vec<u8>> {
    let d = Decoder::new(profile, false);
    let mut x: u32 = 0x2545_f491;
    let mut next = move || {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        x
    };
    (0..n)
        .map(|i| {
            let mut a = [0.0; SLOTS];
            let mut b = [0.0; SLOTS];
            for t in a.iter_mut().chain(b.iter_mut()) {
                *t = profile.timestamp(next() & !(0b11 << 5));
            }
            let rec = PhotonRecord {
                sequence_id: i as u16,
                valid: true,
                period_flag: i % 2 == 0,
                channel_a_timestamps: a,
                channel_b_timestamps: b,
                ..Default::default()
            };
            d.encode(&rec)
        })
        .collect()
}

/// Full periods with times spread over a few hundred ns
pub fn periods(n: usize) -> Vec<PeriodRecord> {
    (0..n)
        .map(|i| {
            let t = (i % 97) as f64;
            PeriodRecord {
                channel_a: (0..SLOTS).map(|j| t + 41.0 * j as f64 + 0.5).collect(),
                channel_b: (0..SLOTS).map(|j| t + 37.0 * j as f64 + 3.25).collect(),
            }
        })
        .collect()
}
