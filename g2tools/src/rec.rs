//! Decoding of the fixed-size photon records sent by the detector FPGA
//!
//! A record is laid out little-endian as
//!
//! | bytes  | content                                        |
//! |--------|------------------------------------------------|
//! | 0      | reserved                                       |
//! | 1-2    | sequence id                                    |
//! | 5      | flags: valid (0), neg edge (3), pos edge (4), period (7) |
//! | 6-9    | two 16 bit photon counters                     |
//! | 10-33  | six timestamp words, channel A                 |
//! | 34-57  | six timestamp words, channel B                 |
//! | 58-63  | edge-polarity counters, see [`DecodeProfile`]  |
//!
//! Each timestamp word holds a fine field in its low bits and a coarse field
//! from bit 7 upward. Deployed firmware disagrees on the field widths and
//! units, and nothing in the record tells them apart, so the caller picks a
//! [`DecodeProfile`].

use crate::bit::{self, BitOps};
use crate::{PhotonRecord, SLOTS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest buffer that still holds both timestamp blocks
pub const MIN_LEN: usize = 58;
/// Full record length as sent by current firmware
pub const RECORD_LEN: usize = 64;

const SEQUENCE: usize = 1;
const FLAGS: usize = 5;
const PHOTONS: usize = 6;
const CHANNEL_A: usize = 10;
const CHANNEL_B: usize = 34;
const WORD: usize = 4;

const VALID: usize = 0;
const NEG_EDGE: usize = 3;
const POS_EDGE: usize = 4;
const PERIOD: usize = 7;

const COARSE_LO: usize = 7;
const COARSE_BITS: usize = 25;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("malformed record {sequence_id}: reserved bits {bits:#x} set in timestamp word {word}")]
    Malformed { sequence_id: u16, word: usize, bits: u32 },
}

/// Timestamp word layout and edge counter placement.
///
/// - `A`: 6 bit fine field in 5 ns steps, 25 bit coarse field in 185 ps
///   steps, sum rounded to 1 ps. Positive edge counter in bytes 58-60,
///   negative edge counter in bytes 61-62.
/// - `B`: 5 bit fine field in 0.18 ns steps, coarse field in 5 ns steps,
///   each rounded to 0.1 ns before summing. Edge counters are single bytes
///   at 58 and 60.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeProfile {
    A,
    B,
}

impl Default for DecodeProfile {
    fn default() -> Self {
        DecodeProfile::A
    }
}

enum Rounding {
    /// Round the sum of both fields to 1/scale ns
    Sum(f64),
    /// Round each field to 1/scale ns, then sum
    Fields(f64),
}

struct Layout {
    fine_bits: usize,
    fine_unit_ns: f64,
    coarse_unit_ns: f64,
    rounding: Rounding,
    /// (first byte, byte count)
    pos_count: (usize, usize),
    neg_count: (usize, usize),
}

static LAYOUT_A: Layout = Layout {
    fine_bits: 6,
    fine_unit_ns: 5.0,
    coarse_unit_ns: 0.185,
    rounding: Rounding::Sum(1e3),
    pos_count: (58, 3),
    neg_count: (61, 2),
};

static LAYOUT_B: Layout = Layout {
    fine_bits: 5,
    fine_unit_ns: 0.18,
    coarse_unit_ns: 5.0,
    rounding: Rounding::Fields(1e1),
    pos_count: (58, 1),
    neg_count: (60, 1),
};

#[inline]
fn round_to(x: f64, scale: f64) -> f64 {
    return (x * scale).round() / scale;
}

impl Layout {
    #[inline]
    fn fine_ns(&self, fine: u32) -> f64 {
        let ns = fine as f64 * self.fine_unit_ns;
        match self.rounding {
            Rounding::Sum(_) => ns,
            Rounding::Fields(scale) => round_to(ns, scale),
        }
    }

    #[inline]
    fn coarse_ns(&self, coarse: u32) -> f64 {
        let ns = coarse as f64 * self.coarse_unit_ns;
        match self.rounding {
            Rounding::Sum(_) => ns,
            Rounding::Fields(scale) => round_to(ns, scale),
        }
    }

    #[inline]
    fn time(&self, word: u32) -> f64 {
        let fine = self.fine_ns(word.field(0, self.fine_bits));
        let coarse = self.coarse_ns(word.field(COARSE_LO, COARSE_BITS));
        match self.rounding {
            Rounding::Sum(scale) => round_to(fine + coarse, scale),
            Rounding::Fields(_) => fine + coarse,
        }
    }

    /// Bits between the fine and coarse fields
    #[inline]
    fn gap(&self, word: u32) -> u32 {
        return word.field(self.fine_bits, COARSE_LO - self.fine_bits) << self.fine_bits;
    }

    /// Find a word that decodes to `t`, or the closest one if none does
    fn word(&self, t: f64) -> u32 {
        if !(t > 0.0) {
            return 0;
        }
        let coarse_max = ((1u64 << COARSE_BITS) - 1) as f64;
        let mut best = (f64::INFINITY, 0u32);
        for fine in 0..(1u32 << self.fine_bits) {
            let rest = t - self.fine_ns(fine);
            if rest < -self.coarse_unit_ns {
                break;
            }
            let coarse = (rest / self.coarse_unit_ns).round().clamp(0.0, coarse_max) as u32;
            let mut w = 0u32;
            w.put_field(0, self.fine_bits, fine);
            w.put_field(COARSE_LO, COARSE_BITS, coarse);
            let err = (self.time(w) - t).abs();
            if err == 0.0 {
                return w;
            }
            if err < best.0 {
                best = (err, w);
            }
        }
        return best.1;
    }
}

impl DecodeProfile {
    fn layout(self) -> &'static Layout {
        match self {
            DecodeProfile::A => &LAYOUT_A,
            DecodeProfile::B => &LAYOUT_B,
        }
    }

    /// Arrival time in ns encoded by one timestamp word
    pub fn timestamp(self, word: u32) -> f64 {
        self.layout().time(word)
    }

    /// A timestamp word that decodes to `t`. Times the profile cannot
    /// represent map to the nearest representable word.
    pub fn word(self, t: f64) -> u32 {
        self.layout().word(t)
    }
}

/// Record decoder for one firmware profile
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Decoder {
    pub profile: DecodeProfile,
    /// Reject words with bits set between the fine and coarse fields
    pub strict: bool,
}

impl Decoder {
    pub fn new(profile: DecodeProfile, strict: bool) -> Self {
        Decoder { profile, strict }
    }

    pub fn decode(&self, buf: &[u8]) -> Result<PhotonRecord, DecodeError> {
        if buf.len() < MIN_LEN {
            return Err(DecodeError::TooShort { len: buf.len(), min: MIN_LEN });
        }
        let layout = self.profile.layout();
        let sequence_id = bit::le_uint(buf, SEQUENCE, 2) as u16;
        let flags = buf[FLAGS];

        let mut channel_a_timestamps = [0.0; SLOTS];
        let mut channel_b_timestamps = [0.0; SLOTS];
        for (block, (base, out)) in [
            (CHANNEL_A, &mut channel_a_timestamps),
            (CHANNEL_B, &mut channel_b_timestamps),
        ]
        .into_iter()
        .enumerate()
        {
            for (i, slot) in out.iter_mut().enumerate() {
                let w = bit::le_uint(buf, base + WORD * i, WORD);
                if self.strict {
                    let bits = layout.gap(w);
                    if bits != 0 {
                        return Err(DecodeError::Malformed {
                            sequence_id,
                            word: block * SLOTS + i,
                            bits,
                        });
                    }
                }
                *slot = layout.time(w);
            }
        }

        Ok(PhotonRecord {
            sequence_id,
            valid: flags.check(VALID),
            period_flag: flags.check(PERIOD),
            pos_edge: flags.check(POS_EDGE),
            neg_edge: flags.check(NEG_EDGE),
            photon_counts: [
                bit::le_uint(buf, PHOTONS, 2) as u16,
                bit::le_uint(buf, PHOTONS + 2, 2) as u16,
            ],
            pos_count: bit::le_uint(buf, layout.pos_count.0, layout.pos_count.1),
            neg_count: bit::le_uint(buf, layout.neg_count.0, layout.neg_count.1),
            channel_a_timestamps,
            channel_b_timestamps,
        })
    }

    /// Build the bytes of a full-length record. Edge counters are truncated
    /// to the profile's field widths.
    pub fn encode(&self, rec: &PhotonRecord) -> Vec<u8> {
        let layout = self.profile.layout();
        let mut buf = vec![0u8; RECORD_LEN];
        bit::put_le_uint(&mut buf, SEQUENCE, 2, rec.sequence_id as u32);

        let mut flags = 0u8;
        flags.change(VALID, rec.valid);
        flags.change(PERIOD, rec.period_flag);
        flags.change(POS_EDGE, rec.pos_edge);
        flags.change(NEG_EDGE, rec.neg_edge);
        buf[FLAGS] = flags;

        bit::put_le_uint(&mut buf, PHOTONS, 2, rec.photon_counts[0] as u32);
        bit::put_le_uint(&mut buf, PHOTONS + 2, 2, rec.photon_counts[1] as u32);
        for (base, ts) in [
            (CHANNEL_A, &rec.channel_a_timestamps),
            (CHANNEL_B, &rec.channel_b_timestamps),
        ] {
            for (i, &t) in ts.iter().enumerate() {
                bit::put_le_uint(&mut buf, base + WORD * i, WORD, layout.word(t));
            }
        }
        bit::put_le_uint(&mut buf, layout.pos_count.0, layout.pos_count.1, rec.pos_count);
        bit::put_le_uint(&mut buf, layout.neg_count.0, layout.neg_count.1, rec.neg_count);
        return buf;
    }
}

/// Decode one buffer with the non-strict decoder for `profile`
pub fn decode(buf: &[u8], profile: DecodeProfile) -> Result<PhotonRecord, DecodeError> {
    Decoder::new(profile, false).decode(buf)
}
