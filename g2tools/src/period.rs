//! Grouping of decoded records into acquisition periods
//!
//! The hardware toggles `period_flag` on the first record of each period.
//! A period is complete only once the next flagged record shows up: the
//! channel A times of the flagged record are then paired with the channel B
//! times of the last unflagged record seen since, and the new flagged record
//! opens the next period.

use crate::{PeriodRecord, PhotonRecord};
use thiserror::Error;

/// Recoverable framing problems. None of them disturb later periods.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingAnomaly {
    #[error("record {sequence_id} arrived outside of any period")]
    OrphanHalf { sequence_id: u16 },
    #[error("period opened by record {sequence_id} closed without a second half")]
    UnpairedHalf { sequence_id: u16 },
    #[error("record {sequence_id} is not valid")]
    Invalid { sequence_id: u16 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum State {
    NoPeriod,
    Accumulating {
        first_half: PhotonRecord,
        /// Channel B times of the latest unflagged record
        second_half: Option<Vec<f64>>,
    },
}

/// Keep only real arrival times; zero slots are decode padding
pub fn arrivals(ts: &[f64]) -> Vec<f64> {
    ts.iter().copied().filter(|&t| t > 0.0).collect()
}

#[derive(Clone, Debug)]
pub struct PeriodAssembler {
    state: State,
}

impl Default for PeriodAssembler {
    fn default() -> Self {
        PeriodAssembler::new()
    }
}

impl PeriodAssembler {
    pub fn new() -> Self {
        PeriodAssembler { state: State::NoPeriod }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Drop any partial period and wait for the next flagged record
    pub fn reset(&mut self) {
        self.state = State::NoPeriod;
    }

    /// Feed the next record in arrival order. Returns the period it
    /// completes, if any.
    pub fn push(&mut self, rec: &PhotonRecord) -> Result<Option<PeriodRecord>, FramingAnomaly> {
        if !rec.valid {
            return Err(FramingAnomaly::Invalid { sequence_id: rec.sequence_id });
        }
        match &mut self.state {
            State::NoPeriod => {
                if !rec.period_flag {
                    return Err(FramingAnomaly::OrphanHalf { sequence_id: rec.sequence_id });
                }
            }
            State::Accumulating { first_half, second_half } => {
                if !rec.period_flag {
                    *second_half = Some(arrivals(&rec.channel_b_timestamps));
                    return Ok(None);
                }
                let closed = std::mem::replace(first_half, *rec);
                return match second_half.take() {
                    Some(channel_b) => Ok(Some(PeriodRecord {
                        channel_a: arrivals(&closed.channel_a_timestamps),
                        channel_b,
                    })),
                    None => Err(FramingAnomaly::UnpairedHalf { sequence_id: closed.sequence_id }),
                };
            }
        }
        self.state = State::Accumulating { first_half: *rec, second_half: None };
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(sequence_id: u16, period_flag: bool, a: f64, b: f64) -> PhotonRecord {
        PhotonRecord {
            sequence_id,
            valid: true,
            period_flag,
            channel_a_timestamps: [a, a + 1.0, 0.0, 0.0, 0.0, 0.0],
            channel_b_timestamps: [b, 0.0, b + 2.0, 0.0, 0.0, 0.0],
            ..Default::default()
        }
    }

    #[test]
    fn alternating_flags() {
        let mut pa = PeriodAssembler::new();
        let recs = [
            rec(1, true, 10.0, 100.0),
            rec(2, false, 20.0, 200.0),
            rec(3, true, 30.0, 300.0),
            rec(4, false, 40.0, 400.0),
            rec(5, true, 50.0, 500.0),
        ];
        let periods: Vec<PeriodRecord> = recs
            .iter()
            .filter_map(|r| pa.push(r).unwrap())
            .collect();
        assert_eq!(
            periods,
            vec![
                PeriodRecord { channel_a: vec![10.0, 11.0], channel_b: vec![200.0, 202.0] },
                PeriodRecord { channel_a: vec![30.0, 31.0], channel_b: vec![400.0, 402.0] },
            ]
        );
        match pa.state() {
            State::Accumulating { first_half, second_half } => {
                assert_eq!(first_half.sequence_id, 5);
                assert_eq!(second_half, &None);
            }
            State::NoPeriod => panic!("expected an open period"),
        }
    }

    #[test]
    fn latest_second_half_wins() {
        let mut pa = PeriodAssembler::new();
        assert_eq!(pa.push(&rec(1, true, 10.0, 100.0)), Ok(None));
        assert_eq!(pa.push(&rec(2, false, 20.0, 200.0)), Ok(None));
        assert_eq!(pa.push(&rec(3, false, 30.0, 300.0)), Ok(None));
        assert_eq!(
            pa.push(&rec(4, true, 40.0, 400.0)),
            Ok(Some(PeriodRecord { channel_a: vec![10.0, 11.0], channel_b: vec![300.0, 302.0] }))
        );
    }

    #[test]
    fn anomalies() {
        let mut pa = PeriodAssembler::new();
        assert_eq!(
            pa.push(&rec(1, false, 1.0, 1.0)),
            Err(FramingAnomaly::OrphanHalf { sequence_id: 1 })
        );
        assert_eq!(pa.state(), &State::NoPeriod);

        let mut bad = rec(2, true, 1.0, 1.0);
        bad.valid = false;
        assert_eq!(pa.push(&bad), Err(FramingAnomaly::Invalid { sequence_id: 2 }));
        assert_eq!(pa.state(), &State::NoPeriod);

        assert_eq!(pa.push(&rec(3, true, 1.0, 1.0)), Ok(None));
        assert_eq!(
            pa.push(&rec(4, true, 5.0, 5.0)),
            Err(FramingAnomaly::UnpairedHalf { sequence_id: 3 })
        );
        // The unpaired record does not leak into the next period
        assert_eq!(pa.push(&rec(5, false, 6.0, 60.0)), Ok(None));
        assert_eq!(
            pa.push(&rec(6, true, 7.0, 7.0)),
            Ok(Some(PeriodRecord { channel_a: vec![5.0, 6.0], channel_b: vec![60.0, 62.0] }))
        );
    }

    #[test]
    fn reset_discards_partial_period() {
        let mut pa = PeriodAssembler::new();
        pa.push(&rec(1, true, 10.0, 100.0)).unwrap();
        pa.push(&rec(2, false, 20.0, 200.0)).unwrap();
        pa.reset();
        assert_eq!(pa.state(), &State::NoPeriod);
        assert_eq!(pa.push(&rec(3, true, 30.0, 300.0)), Ok(None));
    }
}
