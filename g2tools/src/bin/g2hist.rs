use anyhow::Result;
use argh::FromArgs;
use std::io::{stdout, Write};
use std::path::PathBuf;

use g2tools::cfg::{Acquisition, RunLimit};
use g2tools::de::{self, Buffers};
use g2tools::period::PeriodAssembler;
use g2tools::ser;

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

#[derive(Debug, FromArgs, Clone)]
/// Replay a file of raw photon records through period assembly and
/// correlation, then print the cross-correlation histogram as
/// tab-separated (bin start in ns, count) pairs, or (bin start in ns, g2)
/// pairs with --g2.
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// acquisition configuration (JSON), defaults apply without one
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,
    /// print the histogram as JSON instead
    #[argh(switch)]
    pub json: bool,
    /// print the normalised g2 instead of raw counts
    #[argh(switch)]
    pub g2: bool,
    /// replay file of concatenated records, zstd-compressed if it ends in .zst
    #[argh(positional)]
    pub input: PathBuf,
}

fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();
    if args.version {
        let stdout = stdout();
        let mut stdout = stdout.lock();
        writeln!(stdout, concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION)?;
        return Ok(());
    }

    let acq = match &args.config {
        Some(path) => Acquisition::load(path)?,
        None => Acquisition::default(),
    };
    let max_periods = match acq.limit {
        Some(RunLimit::Periods(n)) => n,
        _ => u64::MAX,
    };
    let decoder = acq.decoder();
    let mut assembler = PeriodAssembler::new();
    let mut window = acq.window()?;

    let mut periods = 0;
    for buf in Buffers::new(de::replay(&args.input)?, acq.record_len) {
        if periods >= max_periods {
            break;
        }
        // Undecodable records and framing anomalies are skipped
        let rec = match decoder.decode(&buf?) {
            Ok(rec) => rec,
            Err(_) => continue,
        };
        if let Ok(Some(period)) = assembler.push(&rec) {
            window.push(period);
            periods += 1;
        }
    }
    let state = window.recompute()?;

    let stdout = stdout();
    let mut stdout = stdout.lock();
    if args.json && !args.g2 {
        ser::histogram_json(&mut stdout, &state)?;
        return Ok(());
    }
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_writer(stdout);
    if args.g2 {
        ser::g2_tsv(&mut wtr, &window)?;
    } else {
        ser::histogram_tsv(&mut wtr, &state)?;
    }
    Ok(())
}
