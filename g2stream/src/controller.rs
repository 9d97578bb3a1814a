//! Acquisition lifecycle: wire up the lanes, start and stop runs

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use g2tools::cfg::{Acquisition, RunLimit};
use g2tools::corr::{CorrelationWindow, HistogramState};

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::ingest::{self, Diagnostics, Ingest};
use crate::processor::HistogramWorker;
use crate::save::SaveHandle;
use crate::{capture, CliArgs, Event, Source};

/// How often the controller checks on a running acquisition
pub const TICK: Duration = Duration::from_millis(100);
/// Raw buffers in flight between capture and ingest
const CAPTURE_QUEUE: usize = 4096;

struct Running {
    shutdown: broadcast::Sender<()>,
    ingest: JoinHandle<Ingest>,
    clears: flume::Sender<()>,
    replay: Option<JoinHandle<Result<u64>>>,
    started: Instant,
}

pub struct Controller {
    acq: Acquisition,
    runtime: Handle,
    window: Arc<Mutex<CorrelationWindow>>,
    diagnostics: Arc<Mutex<Diagnostics>>,
    results: flume::Sender<HistogramState>,
    /// Present while idle, lent to the ingest thread while running
    ingest: Option<Ingest>,
    running: Option<Running>,
}

impl Controller {
    /// Set up an idle controller. Histograms are delivered on `results`.
    pub fn new(acq: Acquisition, runtime: Handle, results: flume::Sender<HistogramState>) -> Result<Self> {
        acq.validate()?;
        let window = Arc::new(Mutex::new(acq.window()?));
        let diagnostics = Arc::new(Mutex::new(Diagnostics::default()));
        let (worker, _) = HistogramWorker::spawn(window.clone(), results.clone(), diagnostics.clone());
        let ingest = Ingest::new(acq.decoder(), window.clone(), worker, diagnostics.clone());
        Ok(Controller {
            acq,
            runtime,
            window,
            diagnostics,
            results,
            ingest: Some(ingest),
            running: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        *self.diagnostics.lock()
    }

    pub fn window(&self) -> &Arc<Mutex<CorrelationWindow>> {
        &self.window
    }

    /// Clear the window and counters, then start capturing from `source`
    pub fn start(&mut self, source: Source) -> Result<()> {
        if self.running.is_some() {
            bail!("acquisition already running");
        }
        let mut lane = self.ingest.take().ok_or_else(|| anyhow!("ingest lane is missing"))?;
        lane.reset();
        self.window.lock().reset();
        *self.diagnostics.lock() = Diagnostics::default();

        let (sender_raw, receiver_raw) = flume::bounded(CAPTURE_QUEUE);
        let (shutdown, shutdown_receiver) = broadcast::channel(1);
        let (clears, receiver_clears) = flume::unbounded();
        let replay = match source {
            Source::Udp { addr, peer } => {
                self.runtime.spawn(async move {
                    if let Err(e) = capture::udp(addr, peer, sender_raw, shutdown_receiver).await {
                        error!("capture failed: {:#}", e);
                    }
                });
                None
            }
            Source::Replay(path) => {
                match capture::replay(path, self.acq.record_len, sender_raw, shutdown_receiver) {
                    Ok(h) => Some(h),
                    Err(e) => {
                        self.ingest = Some(lane);
                        return Err(e);
                    }
                }
            }
        };
        self.running = Some(Running {
            shutdown,
            ingest: ingest::spawn(lane, receiver_raw, receiver_clears),
            clears,
            replay,
            started: Instant::now(),
        });
        info!("acquisition started");
        Ok(())
    }

    /// The source ran dry or the run limit was reached
    pub fn finished(&self) -> bool {
        let run = match &self.running {
            Some(run) => run,
            None => return false,
        };
        if run.ingest.is_finished() {
            return true;
        }
        match self.acq.limit {
            Some(RunLimit::Duration(d)) => run.started.elapsed() >= d,
            Some(RunLimit::Periods(n)) => self.diagnostics.lock().periods >= n,
            None => false,
        }
    }

    /// Stop capturing, drop the partial period and deliver the final
    /// histogram. Does nothing when idle.
    pub fn stop(&mut self) -> Result<()> {
        let run = match self.running.take() {
            Some(run) => run,
            None => return Ok(()),
        };
        let _ = run.shutdown.send(());
        let mut lane = run.ingest.join().map_err(|_| anyhow!("ingest thread panicked"))?;
        lane.reset();
        self.ingest = Some(lane);
        if let Some(h) = run.replay {
            match h.join() {
                Ok(Ok(n)) => debug!("replay sent {} records", n),
                Ok(Err(e)) => error!("replay failed: {:#}", e),
                Err(_) => error!("replay thread panicked"),
            }
        }

        let state = {
            let mut window = self.window.lock();
            match window.recompute() {
                Ok(state) => state,
                Err(e) => {
                    warn!("final recompute failed, keeping previous histogram: {}", e);
                    self.diagnostics.lock().compute_failures += 1;
                    window.state().clone()
                }
            }
        };
        let _ = self.results.send(state);
        self.diagnostics().log();
        info!("acquisition stopped after {:.1?}", run.started.elapsed());
        Ok(())
    }

    /// Drop every retained period, any partial period and the counters. A
    /// running acquisition is reset by its ingest lane, in order with the
    /// records around it, and keeps going into the emptied window.
    pub fn reset(&mut self) {
        if let Some(run) = &self.running {
            if run.clears.send(()).is_ok() {
                return;
            }
        }
        if let Some(lane) = self.ingest.as_mut() {
            lane.clear();
        } else {
            self.window.lock().reset();
            *self.diagnostics.lock() = Diagnostics::default();
        }
        info!("window reset");
    }
}

/// Drive the controller from timer ticks and lifecycle events until the run
/// ends or a shutdown is requested
pub fn logic(mut controller: Controller, rx: flume::Receiver<Event>) -> Result<()> {
    let span = span!(Level::INFO, "controller");
    let _enter = span.enter();
    let mut last_summary = Instant::now();
    loop { match rx.recv() {
        Ok(Event::Tick) => {
            if !controller.is_running() {
                continue;
            }
            if last_summary.elapsed() >= controller.acq.summary_interval {
                controller.diagnostics().log();
                last_summary = Instant::now();
            }
            if controller.finished() {
                controller.stop()?;
                break;
            }
        }
        Ok(Event::Start(source)) => {
            controller.start(source)?;
            last_summary = Instant::now();
        }
        Ok(Event::Shutdown) | Err(_) => {
            controller.stop()?;
            break;
        }
    }}
    Ok(())
}

fn load(config: Option<&String>) -> Result<Acquisition> {
    match config {
        Some(path) => Acquisition::load(Path::new(path)),
        None => Ok(Acquisition::default()),
    }
}

pub async fn main(args: CliArgs) -> Result<()> {
    let acq = load(args.config.as_ref())?;
    let source = args.source()?;
    let dir = match &args.output {
        Some(d) => PathBuf::from(d),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir)?;
    info!(
        name = %acq.name,
        tau_max_ns = acq.tau_max_ns,
        bin_width_ns = acq.bin_width_ns,
        window_capacity = acq.window_capacity,
        decode_profile = ?acq.decode_profile,
        "starting"
    );

    let (sender_results, receiver_results) = flume::unbounded();
    let save = SaveHandle::new(&dir, &acq.name, receiver_results);
    info!("saving histograms to {}.{{json,tsv}}", save.stem.display());
    let controller = Controller::new(acq, Handle::current(), sender_results)?;

    let (sender_event, receiver_event) = flume::unbounded();
    crate::timer::main(TICK, sender_event.clone())?;
    sender_event.send(Event::Start(source))?;

    let (sender_done, receiver_done) = flume::bounded(1);
    std::thread::spawn(move || {
        let _ = sender_done.send(logic(controller, receiver_event));
    });

    let result = tokio::select! {
        r = receiver_done.recv_async() => r?,
        ctrl_c_signal = tokio::signal::ctrl_c() => {
            match ctrl_c_signal {
                Ok(()) => {
                    let span = span!(Level::INFO, "ctrl_c signal");
                    let _enter = span.enter();
                    info!("Manual shutdown signal received. Goodbye!");
                }
                Err(e) => {
                    let span = span!(Level::ERROR, "ctrl_c signal");
                    let _enter = span.enter();
                    error!("Unable to listen to shutdown signal: {}", e);
                }
            }
            sender_event.send(Event::Shutdown)?;
            receiver_done.recv_async().await?
        }
    };

    // The saver finishes once the controller and worker are gone
    let written = tokio::task::spawn_blocking(move || save.join_handle.join())
        .await?
        .map_err(|_| anyhow!("save thread panicked"))?;
    debug!("{} histograms written", written);
    result
}
