use anyhow::{bail, Result};
use argh::FromArgs;
use std::fs;
use std::io::{stdin, stdout, Read, Write};
use std::path::Path;

use g2tools::de::{self, Buffers};
use g2tools::rec::{DecodeProfile, Decoder, RECORD_LEN};
use g2tools::ser;

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

#[derive(Debug, FromArgs, Clone)]
/// Decode raw photon records and print them as tab-separated values, one
/// record per line. Records that fail to decode are reported on standard
/// error and skipped. recordcat is named in analogy to programs like
/// zcat(1) that output the decoded content of file(s).
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// timestamp layout of the firmware that wrote the records (A or B)
    #[argh(option, short = 'p', default = "DecodeProfile::A", from_str_fn(profile))]
    pub profile: DecodeProfile,
    /// reject records with reserved timestamp bits set
    #[argh(switch)]
    pub strict: bool,
    /// bytes per record
    #[argh(option, default = "RECORD_LEN")]
    pub record_len: usize,
    /// with no input or when input is '-', read from standard input
    #[argh(positional)]
    pub input: Vec<String>,
}

fn profile(s: &str) -> Result<DecodeProfile, String> {
    match s {
        "A" | "a" => Ok(DecodeProfile::A),
        "B" | "b" => Ok(DecodeProfile::B),
        _ => Err(format!("unknown decode profile {}", s)),
    }
}

fn cat<R: Read>(
    rdr: R,
    name: &str,
    args: &CliArgs,
    decoder: &Decoder,
    wtr: &mut csv::Writer<impl Write>,
) -> Result<()> {
    for (i, buf) in Buffers::new(rdr, args.record_len).enumerate() {
        match decoder.decode(&buf?) {
            Ok(rec) => ser::record_tsv(wtr, &rec)?,
            Err(e) => eprintln!("{}: record {}: {}", name, i, e),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();
    if args.version {
        let stdout = stdout();
        let mut stdout = stdout.lock();
        writeln!(stdout, concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION)?;
        return Ok(());
    }

    // Collect inputs, None is standard input
    let mut inputs: Vec<Option<&str>> = Vec::new();
    if args.input.is_empty() {
        inputs.push(None);
    } else {
        let mut contains_stdin = false;
        for i in &args.input {
            if i == "-" {
                if contains_stdin {
                    bail!("cannot specify '-' for stdin twice");
                }
                contains_stdin = true;
                inputs.push(None);
            } else if fs::metadata(i)?.is_file() {
                inputs.push(Some(i.as_str()));
            } else {
                bail!("{} is not a file", i);
            }
        }
    }

    let decoder = Decoder::new(args.profile, args.strict);
    let stdout = stdout();
    let stdout = stdout.lock();
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_writer(stdout);

    for i in inputs {
        match i {
            None => {
                let stdin = stdin();
                let stdin = stdin.lock();
                cat(stdin, "-", &args, &decoder, &mut wtr)?;
            }
            Some(path) => {
                let rdr = de::replay(Path::new(path))?;
                cat(rdr, path, &args, &decoder, &mut wtr)?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}
