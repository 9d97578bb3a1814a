//! `checkacq myacq.json`
//!
//! Parse and validate `myacq.json`. No output and an exit code of 0
//! indicates success.

use anyhow::{bail, Result};
use std::env;
use std::path::PathBuf;
use g2tools::cfg::Acquisition;

fn main() -> Result<()> {
    let args = env::args().collect::<Vec<_>>();
    if args.len() != 2 {
        bail!("usage: checkacq ACQUISITION.json");
    }
    let path = PathBuf::from(&args[1]);
    let _acq = Acquisition::load(&path)?;

    Ok(())
}
