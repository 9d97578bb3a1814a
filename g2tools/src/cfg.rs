//! Configuration of an acquisition run
//!
//! Runs are declared in JSON. Every field has a default, so the smallest
//! useful declaration only names what differs from it, e.g.
//!
//! ```json
//! { "name": "hbt-0417", "tau_max_ns": 50.0, "bin_width_ns": 0.5, "decode_profile": "B" }
//! ```
//!
//! `limit` ends a run after a wall-clock duration (parsed as in
//! [humantime](https://docs.rs/humantime/), e.g. `{ "Duration": "10min" }`)
//! or after a number of completed periods (`{ "Periods": 100000 }`).

use crate::corr::{self, CorrelationWindow};
use crate::rec::{DecodeProfile, Decoder, MIN_LEN, RECORD_LEN};
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Acquisition {
    pub name: String,
    /// Half-width of the delay range
    pub tau_max_ns: f64,
    pub bin_width_ns: f64,
    /// Number of periods kept in the correlation window
    pub window_capacity: usize,
    pub decode_profile: DecodeProfile,
    /// Reject records with reserved timestamp bits set
    pub strict: bool,
    /// Record length when splitting replay files into records
    pub record_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<RunLimit>,
    /// How often the streaming pipeline logs its counters
    #[serde(with = "humantime_serde")]
    pub summary_interval: Duration,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum RunLimit {
    #[serde(with = "humantime_serde")]
    Duration(Duration),
    Periods(u64),
}

impl Default for Acquisition {
    fn default() -> Self {
        Acquisition {
            name: String::new(),
            tau_max_ns: 100.0,
            bin_width_ns: 1.0,
            window_capacity: corr::DEFAULT_CAPACITY,
            decode_profile: DecodeProfile::default(),
            strict: false,
            record_len: RECORD_LEN,
            limit: None,
            summary_interval: Duration::from_secs(5),
        }
    }
}

impl Acquisition {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let acq: Acquisition = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("cannot parse {}", path.display()))?;
        acq.validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(acq)
    }

    pub fn validate(&self) -> Result<()> {
        corr::num_bins(self.tau_max_ns, self.bin_width_ns)?;
        ensure!(self.window_capacity > 0, "window_capacity must be at least 1");
        ensure!(
            self.record_len >= MIN_LEN,
            "record_len {} is below the minimum record length {}",
            self.record_len,
            MIN_LEN
        );
        ensure!(!self.summary_interval.is_zero(), "summary_interval must be nonzero");
        Ok(())
    }

    pub fn decoder(&self) -> Decoder {
        Decoder::new(self.decode_profile, self.strict)
    }

    /// Empty correlation window with this run's capacity and binning
    pub fn window(&self) -> Result<CorrelationWindow> {
        let w = CorrelationWindow::new(self.window_capacity, self.tau_max_ns, self.bin_width_ns)?;
        Ok(w)
    }
}
