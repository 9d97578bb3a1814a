//! Sources of raw record buffers
//!
//! Every source sends one `Vec<u8>` per record, in arrival order, and drops
//! its sender when it is done or told to stop through the shutdown channel.

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread::JoinHandle;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use g2tools::de::{self, Buffers};

/// Larger than any record the hardware sends
const DATAGRAM: usize = 2048;

/// Receive one record per datagram. With `peer` set, datagrams from any
/// other address are ignored.
pub async fn udp(
    addr: SocketAddr,
    peer: Option<SocketAddr>,
    sender: flume::Sender<Vec<u8>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = UdpSocket::bind(addr).await?;
    info!("listening on {}", socket.local_addr()?);
    let mut buf = vec![0u8; DATAGRAM];
    loop {
        tokio::select! {
            r = socket.recv_from(&mut buf) => {
                let (n, from) = r?;
                if let Some(p) = peer {
                    if from != p {
                        debug!("ignoring datagram from {}", from);
                        continue;
                    }
                }
                if sender.send_async(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    info!("stopped listening on {}", addr);
    Ok(())
}

/// Replay a file of concatenated records on its own thread. Returns the
/// number of records sent.
pub fn replay(
    path: PathBuf,
    record_len: usize,
    sender: flume::Sender<Vec<u8>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<Result<u64>>> {
    let rdr = de::replay(&path)?;
    let join_handle = std::thread::spawn(move || -> Result<u64> {
        let span = span!(Level::INFO, "replay", path = %path.display());
        let _enter = span.enter();
        let mut sent = 0;
        for buf in Buffers::new(rdr, record_len) {
            if !matches!(shutdown.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
                break;
            }
            if sender.send(buf?).is_err() {
                break;
            }
            sent += 1;
        }
        info!("replayed {} records", sent);
        Ok(sent)
    });
    Ok(join_handle)
}
