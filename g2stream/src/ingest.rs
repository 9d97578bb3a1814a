//! The ingestion lane: decode, count, assemble and push into the window

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

use g2tools::corr::CorrelationWindow;
use g2tools::counts::EdgeCounter;
use g2tools::period::{FramingAnomaly, PeriodAssembler};
use g2tools::rec::{DecodeError, Decoder};

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::processor::HistogramWorker;

/// Running totals for one acquisition
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Diagnostics {
    pub records: u64,
    pub too_short: u64,
    pub malformed: u64,
    pub invalid: u64,
    pub orphan_halves: u64,
    pub unpaired_halves: u64,
    pub periods: u64,
    pub compute_failures: u64,
    pub edges: EdgeCounter,
}

impl Diagnostics {
    pub fn log(&self) {
        info!(
            records = self.records,
            too_short = self.too_short,
            malformed = self.malformed,
            invalid = self.invalid,
            orphan_halves = self.orphan_halves,
            unpaired_halves = self.unpaired_halves,
            periods = self.periods,
            compute_failures = self.compute_failures,
            pos_edges = self.edges.pos,
            neg_edges = self.edges.neg,
            "diagnostics"
        );
    }
}

pub struct Ingest {
    decoder: Decoder,
    assembler: PeriodAssembler,
    window: Arc<Mutex<CorrelationWindow>>,
    worker: HistogramWorker,
    diagnostics: Arc<Mutex<Diagnostics>>,
}

impl Ingest {
    pub fn new(
        decoder: Decoder,
        window: Arc<Mutex<CorrelationWindow>>,
        worker: HistogramWorker,
        diagnostics: Arc<Mutex<Diagnostics>>,
    ) -> Self {
        Ingest {
            decoder,
            assembler: PeriodAssembler::new(),
            window,
            worker,
            diagnostics,
        }
    }

    /// Process one raw buffer
    pub fn handle(&mut self, buf: &[u8]) {
        let mut diagnostics = self.diagnostics.lock();
        diagnostics.records += 1;
        let rec = match self.decoder.decode(buf) {
            Ok(rec) => rec,
            Err(e) => {
                debug!("dropping record: {}", e);
                match e {
                    DecodeError::TooShort { .. } => diagnostics.too_short += 1,
                    DecodeError::Malformed { .. } => diagnostics.malformed += 1,
                }
                return;
            }
        };
        diagnostics.edges.push(&rec);
        match self.assembler.push(&rec) {
            Ok(Some(period)) => {
                diagnostics.periods += 1;
                drop(diagnostics);
                self.window.lock().push(period);
                self.worker.notify();
            }
            Ok(None) => {}
            Err(a) => {
                debug!("{}", a);
                match a {
                    FramingAnomaly::OrphanHalf { .. } => diagnostics.orphan_halves += 1,
                    FramingAnomaly::UnpairedHalf { .. } => diagnostics.unpaired_halves += 1,
                    FramingAnomaly::Invalid { .. } => diagnostics.invalid += 1,
                }
            }
        }
    }

    /// Discard any partial period
    pub fn reset(&mut self) {
        self.assembler.reset();
    }

    /// Discard the partial period, every retained period and the counters
    pub fn clear(&mut self) {
        self.assembler.reset();
        self.window.lock().reset();
        *self.diagnostics.lock() = Diagnostics::default();
    }
}

enum Input {
    Buffer(Vec<u8>),
    Clear,
    NoClears,
    Closed,
}

/// Run the ingestion lane on its own thread until the capture source hangs
/// up, then hand the lane back. A message on `clears` empties the lane
/// between two buffers.
pub fn spawn(
    mut ingest: Ingest,
    receiver: flume::Receiver<Vec<u8>>,
    clears: flume::Receiver<()>,
) -> JoinHandle<Ingest> {
    std::thread::spawn(move || {
        let span = span!(Level::INFO, "ingest");
        let _enter = span.enter();
        let mut clears = Some(clears);
        loop {
            let input = match &clears {
                Some(c) => flume::Selector::new()
                    .recv(c, |r| match r {
                        Ok(()) => Input::Clear,
                        Err(_) => Input::NoClears,
                    })
                    .recv(&receiver, |r| match r {
                        Ok(buf) => Input::Buffer(buf),
                        Err(_) => Input::Closed,
                    })
                    .wait(),
                None => match receiver.recv() {
                    Ok(buf) => Input::Buffer(buf),
                    Err(_) => Input::Closed,
                },
            };
            match input {
                Input::Buffer(buf) => ingest.handle(&buf),
                Input::Clear => {
                    ingest.clear();
                    info!("window reset");
                }
                Input::NoClears => clears = None,
                Input::Closed => {
                    if clears.map_or(false, |c| c.drain().count() > 0) {
                        ingest.clear();
                        info!("window reset");
                    }
                    break;
                }
            }
        }
        debug!("capture closed");
        ingest
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use g2tools::corr::HistogramState;
    use g2tools::rec::{DecodeProfile, RECORD_LEN};
    use g2tools::PhotonRecord;
    use std::time::Duration;

    fn setup() -> (Ingest, Arc<Mutex<CorrelationWindow>>, Arc<Mutex<Diagnostics>>, flume::Receiver<HistogramState>) {
        let window = Arc::new(Mutex::new(CorrelationWindow::new(100, 50.0, 10.0).unwrap()));
        let diagnostics = Arc::new(Mutex::new(Diagnostics::default()));
        let (tx, rx) = flume::unbounded();
        let (worker, _) = HistogramWorker::spawn(window.clone(), tx, diagnostics.clone());
        let ingest = Ingest::new(Decoder::new(DecodeProfile::A, false), window.clone(), worker, diagnostics.clone());
        (ingest, window, diagnostics, rx)
    }

    fn buf(sequence_id: u16, valid: bool, period_flag: bool) -> Vec<u8> {
        let p = DecodeProfile::A;
        let rec = PhotonRecord {
            sequence_id,
            valid,
            period_flag,
            pos_edge: true,
            pos_count: 3,
            channel_a_timestamps: [p.timestamp(2), p.timestamp(4), 0.0, 0.0, 0.0, 0.0],
            channel_b_timestamps: [p.timestamp(2), 0.0, 0.0, 0.0, 0.0, 0.0],
            ..Default::default()
        };
        Decoder::new(p, false).encode(&rec)
    }

    #[test]
    fn counts_every_outcome() {
        let (mut ingest, window, diagnostics, rx) = setup();
        ingest.handle(&buf(1, true, false));
        ingest.handle(&[0u8; 12]);
        ingest.handle(&buf(2, true, true));
        ingest.handle(&buf(3, false, false));
        ingest.handle(&buf(4, true, false));
        ingest.handle(&buf(5, true, true));
        ingest.handle(&buf(6, true, true));

        let d = *diagnostics.lock();
        assert_eq!(d.records, 7);
        assert_eq!(d.too_short, 1);
        assert_eq!(d.orphan_halves, 1);
        assert_eq!(d.invalid, 1);
        assert_eq!(d.unpaired_halves, 1);
        assert_eq!(d.periods, 1);
        // Five valid records flagged pos_edge
        assert_eq!(d.edges.pos, 15);
        assert_eq!(window.lock().len(), 1);

        // Differences of 0 and 10 ns
        let state = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(state.total(), 2);
    }

    #[test]
    fn lane_returns_after_capture_closes() {
        let (ingest, window, _, _rx) = setup();
        let (tx, rx) = flume::unbounded();
        let handle = spawn(ingest, rx, flume::unbounded().1);
        for (i, flag) in [true, false, true, false, true].iter().enumerate() {
            tx.send(buf(i as u16, true, *flag)).unwrap();
        }
        tx.send(vec![0u8; RECORD_LEN - 10]).unwrap();
        drop(tx);
        let mut ingest = handle.join().unwrap();
        assert_eq!(window.lock().len(), 2);
        ingest.reset();
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out");
    }

    /// A first half seen before a clear never pairs with records after it
    #[test]
    fn clear_drops_partial_period() {
        let (ingest, window, diagnostics, _rx) = setup();
        let (tx, rx) = flume::unbounded();
        let (clear_tx, clear_rx) = flume::unbounded();
        let handle = spawn(ingest, rx, clear_rx);

        tx.send(buf(0, true, true)).unwrap();
        wait_for(|| diagnostics.lock().records == 1);
        let generation = window.lock().generation();
        clear_tx.send(()).unwrap();
        wait_for(|| window.lock().generation() > generation);
        assert_eq!(*diagnostics.lock(), Diagnostics::default());

        for (i, flag) in [false, true, false].iter().enumerate() {
            tx.send(buf(i as u16 + 1, true, *flag)).unwrap();
        }
        drop(tx);
        handle.join().unwrap();
        let d = *diagnostics.lock();
        assert_eq!(d.records, 3);
        assert_eq!(d.orphan_halves, 1);
        assert_eq!(d.periods, 1);
        assert_eq!(window.lock().len(), 1);
    }
}
