//! Display side: keep the latest histogram on disk
//!
//! Each delivery overwrites `<stem>.json` (the exact state) and `<stem>.tsv`
//! (bin start and count per line) in the output directory.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use g2tools::corr::HistogramState;
use g2tools::ser;

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

pub struct SaveHandle {
    pub stem: PathBuf,
    pub join_handle: JoinHandle<u64>,
}

impl SaveHandle {
    /// Save every histogram received until all senders are gone. The thread
    /// returns the number of histograms written.
    pub fn new(dir: &Path, name: &str, receiver: flume::Receiver<HistogramState>) -> Self {
        let stem = dir.join(file_stem(name));
        let s = stem.clone();
        let join_handle = std::thread::spawn(move || {
            let span = span!(Level::INFO, "save", stem = %s.display());
            let _enter = span.enter();
            let mut written = 0;
            while let Ok(state) = receiver.recv() {
                // Only the newest of any backlog matters
                let state = receiver.try_iter().last().unwrap_or(state);
                match write(&s, &state) {
                    Ok(()) => written += 1,
                    Err(e) => error!("could not save histogram: {:#}", e),
                }
            }
            debug!("saved {} histograms", written);
            written
        });
        SaveHandle { stem, join_handle }
    }
}

fn file_stem(name: &str) -> String {
    let stamp = Local::now().format("%F-%H-%M-%S").to_string();
    if name.is_empty() {
        stamp
    } else {
        format!("{}-{}", name, stamp)
    }
}

pub fn write(stem: &Path, state: &HistogramState) -> Result<()> {
    let path = stem.with_extension("json");
    let f = File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut wtr = BufWriter::new(f);
    ser::histogram_json(&mut wtr, state)?;
    wtr.flush()?;

    let path = stem.with_extension("tsv");
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_path(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    ser::histogram_tsv(&mut wtr, state)?;
    Ok(())
}
