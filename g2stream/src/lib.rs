pub mod capture;
pub mod controller;
pub mod ingest;
pub mod processor;
pub mod save;
pub mod timer;

use anyhow::{Context, Result};
use argh::FromArgs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

#[derive(Debug, FromArgs, Clone)]
/// Stream photon records from the detector (or a replay file), assemble
/// periods and keep a live channel A/B cross-correlation histogram
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// acquisition configuration (JSON)
    #[argh(option, short = 'c')]
    pub config: Option<String>,
    /// local UDP address to receive records on
    #[argh(option, default = "String::from(\"0.0.0.0:5006\")")]
    pub addr: String,
    /// only accept datagrams from this address
    #[argh(option)]
    pub peer: Option<String>,
    /// replay records from a file instead of listening on the network
    #[argh(option, short = 'r')]
    pub replay: Option<String>,
    /// directory for histogram files, defaults to the working directory
    #[argh(option, short = 'o')]
    pub output: Option<String>,
}

/// Where raw records come from
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Udp { addr: SocketAddr, peer: Option<SocketAddr> },
    Replay(PathBuf),
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("could not parse address {}", addr))?
        .next()
        .with_context(|| format!("no address found for {}", addr))
}

impl CliArgs {
    pub fn source(&self) -> Result<Source> {
        if let Some(path) = &self.replay {
            return Ok(Source::Replay(PathBuf::from(path)));
        }
        let peer = match &self.peer {
            Some(p) => Some(resolve(p)?),
            None => None,
        };
        Ok(Source::Udp { addr: resolve(&self.addr)?, peer })
    }
}

#[derive(Debug)]
pub enum Event {
    Tick,
    Start(Source),
    Shutdown,
}
