//! Serialization of histograms and records, supporting `.json`, `.tsv` and
//! raw replay files

use crate::corr::{CorrelationWindow, HistogramState};
use crate::rec::Decoder;
use crate::PhotonRecord;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use zstd::stream;

/// Stored form of a histogram: the binning parameters and one
/// `(bin_start_ns, count)` pair per bin. Enough to rebuild the
/// [`HistogramState`] exactly.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SavedHistogram {
    pub tau_max_ns: f64,
    pub bin_width_ns: f64,
    pub bins: Vec<(f64, u64)>,
}

impl From<&HistogramState> for SavedHistogram {
    fn from(state: &HistogramState) -> Self {
        SavedHistogram {
            tau_max_ns: state.tau_max_ns,
            bin_width_ns: state.bin_width_ns,
            bins: state.bins().map(|b| (b.x, b.y)).collect(),
        }
    }
}

/// Serialize a histogram to pretty-printed JSON
pub fn histogram_json(wtr: &mut impl Write, state: &HistogramState) -> Result<()> {
    serde_json::to_writer_pretty(&mut *wtr, &SavedHistogram::from(state))?;
    wtr.write_all(b"\n")?;
    Ok(())
}

/// Serialize a histogram to tab-separated values (bin start in ns, count).
/// Bin starts are written in shortest round-trip form.
pub fn histogram_tsv(wtr: &mut csv::Writer<impl Write>, state: &HistogramState) -> Result<()> {
    let mut buf = ryu::Buffer::new();
    for bin in state.bins() {
        wtr.write_record(&[buf.format(bin.x), bin.y.to_string().as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Serialize the normalised g2 of a window's current histogram as
/// tab-separated values (bin start in ns, g2)
pub fn g2_tsv(wtr: &mut csv::Writer<impl Write>, window: &CorrelationWindow) -> Result<()> {
    let (mut xbuf, mut ybuf) = (ryu::Buffer::new(), ryu::Buffer::new());
    for (&x, g2) in window.state().bin_edges.iter().zip(window.g2()) {
        wtr.write_record(&[xbuf.format(x), ybuf.format(g2)])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Serialize records to a replay file: concatenated full-length records
pub fn records(wtr: &mut impl Write, decoder: &Decoder, recs: &[PhotonRecord]) -> Result<()> {
    for rec in recs {
        wtr.write_all(&decoder.encode(rec))?;
    }
    Ok(())
}

/// Serialize records to a zstd-compressed replay file
pub fn records_zst(wtr: &mut impl Write, decoder: &Decoder, recs: &[PhotonRecord]) -> Result<()> {
    let mut zwtr = stream::write::Encoder::new(wtr, 0)?;
    records(&mut zwtr, decoder, recs)?;
    zwtr.finish()?;
    Ok(())
}

/// Serialize one record as tab-separated values: sequence id, flags
/// (valid, period, pos edge, neg edge), the two photon counters, the two
/// edge counters, then six channel A and six channel B times.
pub fn record_tsv(wtr: &mut csv::Writer<impl Write>, rec: &PhotonRecord) -> Result<()> {
    let mut buf = ryu::Buffer::new();
    let mut row: Vec<String> = vec![
        rec.sequence_id.to_string(),
        (rec.valid as u8).to_string(),
        (rec.period_flag as u8).to_string(),
        (rec.pos_edge as u8).to_string(),
        (rec.neg_edge as u8).to_string(),
        rec.photon_counts[0].to_string(),
        rec.photon_counts[1].to_string(),
        rec.pos_count.to_string(),
        rec.neg_count.to_string(),
    ];
    for &t in rec.channel_a_timestamps.iter().chain(rec.channel_b_timestamps.iter()) {
        row.push(buf.format(t).to_string());
    }
    wtr.write_record(&row)?;
    Ok(())
}
