use std::{collections::BTreeMap, io, time::Duration};

use log::{debug, info, trace};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time,
};

use super::{DistributedParams, LaunchErr, Result};

const CONNECT_RETRY: Duration = Duration::from_millis(100);

/// Membership of an initialized process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pub rank: usize,
    pub world_size: usize,
}

/// Runs the `MASTER_ADDR:MASTER_PORT` rendezvous for this process.
///
/// Rank 0 hosts the exchange, every other rank joins it. Returns once all
/// `world_size` processes have checked in, or fails after `timeout`.
pub async fn rendezvous(params: &DistributedParams, timeout: Duration) -> Result<ProcessGroup> {
    let rank = params
        .global_rank()
        .ok_or_else(|| LaunchErr::Rendezvous("the rank of this process is unknown".into()))?;
    let world_size = params.world_size;
    let addr = format!("{}:{}", params.master_addr, params.master_port);

    info!("rendezvous at {addr} as rank {rank} of {world_size}");

    let exchange = async {
        if rank == 0 {
            let listener = TcpListener::bind(&addr).await?;
            host(listener, world_size).await
        } else {
            join(&addr, rank, world_size).await
        }
    };

    time::timeout(timeout, exchange)
        .await
        .map_err(|_| LaunchErr::Rendezvous(format!("timed out after {timeout:?} at {addr}")))?
}

/// Accepts `world_size - 1` peers on `listener` and acknowledges them all.
pub async fn host(listener: TcpListener, world_size: usize) -> Result<ProcessGroup> {
    let mut peers: BTreeMap<usize, TcpStream> = BTreeMap::new();

    while peers.len() + 1 < world_size {
        let (mut stream, peer_addr) = listener.accept().await?;
        let rank = stream.read_u32().await? as usize;

        if rank == 0 || rank >= world_size {
            return Err(LaunchErr::Rendezvous(format!(
                "peer {peer_addr} announced rank {rank} outside 1..{world_size}"
            )));
        }
        if peers.contains_key(&rank) {
            return Err(LaunchErr::Rendezvous(format!(
                "rank {rank} joined twice (last from {peer_addr})"
            )));
        }

        debug!(rank = rank, joined = peers.len() + 2; "peer checked in");
        peers.insert(rank, stream);
    }

    let ack = encode(world_size)?;
    for stream in peers.values_mut() {
        stream.write_u32(ack).await?;
        stream.flush().await?;
    }

    Ok(ProcessGroup {
        rank: 0,
        world_size,
    })
}

/// Joins the rendezvous hosted at `addr`, retrying until the host is listening.
pub async fn join(addr: &str, rank: usize, world_size: usize) -> Result<ProcessGroup> {
    let mut stream = loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                trace!("rendezvous host {addr} not up yet");
                time::sleep(CONNECT_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    stream.write_u32(encode(rank)?).await?;
    stream.flush().await?;

    let acked = stream.read_u32().await? as usize;
    if acked != world_size {
        return Err(LaunchErr::Rendezvous(format!(
            "host runs a world of {acked}, expected {world_size}"
        )));
    }

    Ok(ProcessGroup { rank, world_size })
}

fn encode(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| LaunchErr::Rendezvous(format!("{value} does not fit the wire format")))
}
