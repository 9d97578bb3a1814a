//! Edge counting on the same record stream, for photon-counting consumers

use crate::PhotonRecord;

/// Running totals of the edge-polarity counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EdgeCounter {
    /// Sum of `pos_count` over valid records flagged `pos_edge`
    pub pos: u64,
    pub pos_records: u64,
    /// Sum of `neg_count` over valid records flagged `neg_edge`
    pub neg: u64,
    pub neg_records: u64,
}

impl EdgeCounter {
    pub fn new() -> Self {
        EdgeCounter::default()
    }

    pub fn push(&mut self, rec: &PhotonRecord) {
        if !rec.valid {
            return;
        }
        if rec.pos_edge {
            self.pos += rec.pos_count as u64;
            self.pos_records += 1;
        }
        if rec.neg_edge {
            self.neg += rec.neg_count as u64;
            self.neg_records += 1;
        }
    }

    /// Mean positive-edge count per flagged record
    pub fn mean_pos(&self) -> Option<f64> {
        match self.pos_records {
            0 => None,
            n => Some(self.pos as f64 / n as f64),
        }
    }

    pub fn mean_neg(&self) -> Option<f64> {
        match self.neg_records {
            0 => None,
            n => Some(self.neg as f64 / n as f64),
        }
    }

    pub fn reset(&mut self) {
        *self = EdgeCounter::default();
    }
}
