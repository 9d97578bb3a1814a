//! Deserialization of histograms and replay files

use crate::corr::{ComputeError, HistogramState};
use crate::ser::SavedHistogram;
use crate::Bin;
use anyhow::Result;
use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use zstd::stream;

#[derive(Error, Debug, PartialEq)]
pub enum PersistError {
    #[error(transparent)]
    Binning(#[from] ComputeError),
    #[error("{found} bins stored, binning has {expected}")]
    BinCount { found: usize, expected: usize },
    #[error("bin {index} starts at {found} ns, binning says {expected} ns")]
    BinStart { index: usize, found: f64, expected: f64 },
}

impl TryFrom<SavedHistogram> for HistogramState {
    type Error = PersistError;

    fn try_from(saved: SavedHistogram) -> Result<Self, Self::Error> {
        let mut state = HistogramState::new(saved.tau_max_ns, saved.bin_width_ns)?;
        if saved.bins.len() != state.num_bins() {
            return Err(PersistError::BinCount {
                found: saved.bins.len(),
                expected: state.num_bins(),
            });
        }
        for (index, ((x, y), (&edge, count))) in saved
            .bins
            .into_iter()
            .zip(state.bin_edges.iter().zip(state.counts.iter_mut()))
            .enumerate()
        {
            if x != edge {
                return Err(PersistError::BinStart { index, found: x, expected: edge });
            }
            *count = y;
        }
        Ok(state)
    }
}

/// Deserialize a histogram saved by [`crate::ser::histogram_json`]
pub fn histogram_json(rdr: impl Read) -> Result<HistogramState> {
    let saved: SavedHistogram = serde_json::from_reader(BufReader::new(rdr))?;
    Ok(HistogramState::try_from(saved)?)
}

/// Deserialize a tab-separated histogram file of (x,y) records. Rows that
/// are short or do not parse are skipped.
pub fn histogram_tsv<R, T, U>(rdr: &mut csv::Reader<R>) -> Result<Vec<Bin<T, U>>>
where
    R: std::io::Read,
    T: std::str::FromStr,
    U: std::str::FromStr,
{
    let mut bins: Vec<Bin<T, U>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if let (Some(x), Some(y)) = (record.get(0), record.get(1)) {
            if let (Ok(x), Ok(y)) = (x.parse::<T>(), y.parse::<U>()) {
                bins.push(Bin { x, y });
            }
        }
    }
    Ok(bins)
}

/// Split a byte stream into consecutive buffers of `record_len` bytes. A
/// trailing partial record is yielded as a short buffer.
pub struct Buffers<R> {
    rdr: R,
    record_len: usize,
}

impl<R: Read> Buffers<R> {
    pub fn new(rdr: R, record_len: usize) -> Self {
        Buffers { rdr, record_len: record_len.max(1) }
    }
}

impl<R: Read> Iterator for Buffers<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = vec![0u8; self.record_len];
        let mut filled = 0;
        while filled < buf.len() {
            match self.rdr.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        if filled == 0 {
            return None;
        }
        buf.truncate(filled);
        Some(Ok(buf))
    }
}

/// Open a replay file, decompressing it if it ends in `.zst`
pub fn replay(path: &Path) -> Result<Box<dyn Read + Send>> {
    let f = BufReader::new(File::open(path)?);
    match path.extension().and_then(|e| e.to_str()) {
        Some("zst") => Ok(Box::new(stream::read::Decoder::new(f)?)),
        _ => Ok(Box::new(f)),
    }
}
