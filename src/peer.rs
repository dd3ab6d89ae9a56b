use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex, mpsc},
};
use tracing::{debug, info, warn};

use crate::wire::{Notification, read_frame, read_notification, write_frame};

type ConnectionId = u64;

pub async fn run(port: u16, coordinator: SocketAddr) -> Result<()> {
    // Bind before registering so the peer is reachable the moment the
    // coordinator starts advertising it to later registrants.
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("failed to bind listening port {port}"))?;

    let connections = Arc::new(ConnectionSet::new());
    let established = register(coordinator, port, &connections).await?;
    write_stdout(&format!(
        "*** registered with coordinator ({established} existing peers)"
    ))
    .await?;

    spawn_accept_loop(listener, Arc::clone(&connections));
    run_send_loop(&connections).await?;
    connections.shutdown_all().await;

    Ok(())
}

/// Registers with the coordinator and connects to every advertised prior
/// peer. Returns the number of connections actually established; a peer that
/// cannot be reached is skipped, not fatal.
pub async fn register(
    coordinator: SocketAddr,
    self_port: u16,
    connections: &Arc<ConnectionSet>,
) -> Result<usize> {
    let stream = TcpStream::connect(coordinator)
        .await
        .with_context(|| format!("failed to reach coordinator at {coordinator}"))?;
    info!("registering with coordinator at {coordinator}");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    write_frame(&mut writer, &self_port.to_string()).await?;

    let mut established = 0;
    loop {
        match read_notification(&mut reader).await {
            Ok(Some(Notification::Peer { addr, port })) => {
                if connect_to_peer(&addr, port, connections).await? {
                    established += 1;
                }
            }
            Ok(Some(Notification::EndOfList)) => break,
            Ok(None) => {
                anyhow::bail!("coordinator closed the stream before the end-of-list sentinel")
            }
            // A garbled pair costs only that peer; the frame layer keeps the
            // stream aligned for the next notification.
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                warn!(error = ?err, "skipping malformed peer notification");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(established)
}

async fn connect_to_peer(
    addr: &str,
    port: u16,
    connections: &Arc<ConnectionSet>,
) -> Result<bool> {
    match TcpStream::connect((addr, port)).await {
        Ok(stream) => {
            attach_connection(stream, connections).await?;
            write_stdout(&format!("*** connected to {addr}:{port}")).await?;
            Ok(true)
        }
        Err(err) => {
            warn!(peer = %format!("{addr}:{port}"), error = ?err, "advertised peer unreachable, skipping");
            Ok(false)
        }
    }
}

fn spawn_accept_loop(listener: TcpListener, connections: Arc<ConnectionSet>) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => match attach_connection(stream, &connections).await {
                    Ok(()) => {
                        let _ = write_stdout(&format!("*** peer connected from {peer}")).await;
                    }
                    Err(err) => {
                        warn!(peer = %peer, error = ?err, "failed to attach inbound connection");
                    }
                },
                Err(err) => warn!(error = ?err, "failed to accept peer connection"),
            }
        }
    });
}

/// Splits the stream, registers its outbox with the [`ConnectionSet`], and
/// spawns the connection's send and receive tasks.
async fn attach_connection(
    stream: TcpStream,
    connections: &Arc<ConnectionSet>,
) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    let (reader, writer) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let id = connections.insert(peer, outbox_tx).await;
    spawn_send_task(writer, peer, outbox_rx);
    spawn_receive_task(reader, peer, id, Arc::clone(connections));
    Ok(())
}

/// Owns the write half: drains the outbox so broadcast never blocks on a
/// slow peer, and shuts the writer down once the outbox closes.
fn spawn_send_task(
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
    mut outbox: mpsc::Receiver<String>,
) {
    tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if let Err(err) = write_frame(&mut writer, &text).await {
                debug!(peer = %peer, error = ?err, "failed to deliver message");
                break;
            }
        }
        if let Err(error) = writer.shutdown().await {
            debug!(peer = %peer, ?error, "failed to shutdown peer writer cleanly");
        }
    });
}

fn spawn_receive_task(
    reader: OwnedReadHalf,
    peer: SocketAddr,
    id: ConnectionId,
    connections: Arc<ConnectionSet>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(text)) => {
                    let _ = write_stdout(&format!("[{peer}] {text}")).await;
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(peer = %peer, error = ?err, "read from peer failed");
                    break;
                }
            }
        }
        // Peer closed or errored out; drop the dead connection instead of
        // spinning on further reads.
        connections.remove(id).await;
        info!(peer = %peer, "peer disconnected");
    });
}

async fn run_send_loop(connections: &Arc<ConnectionSet>) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read?, &input, connections).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    Ok(())
}

async fn handle_stdin_input(
    bytes_read: usize,
    input: &str,
    connections: &Arc<ConnectionSet>,
) -> Result<bool> {
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving mesh").await?;
        return Ok(false);
    }

    if text.eq_ignore_ascii_case("/peers") {
        list_peers(connections).await?;
        return Ok(true);
    }

    connections.broadcast(text).await;
    Ok(true)
}

async fn list_peers(connections: &Arc<ConnectionSet>) -> Result<()> {
    let peers = connections.peers().await;
    if peers.is_empty() {
        write_stdout("*** no peers connected").await?;
    } else {
        let listing = peers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write_stdout(&format!("*** connected peers: {listing}")).await?;
    }
    Ok(())
}

// Frames queued per connection before broadcast starts dropping for that peer.
const OUTBOX_CAPACITY: usize = 128;

/// The live connections of this peer. Appended by the registration phase and
/// the accept loop, iterated by broadcast, pruned by receive tasks. Each
/// entry holds only the connection's outbox; the write half lives in its
/// send task, so the lock is never held across a socket write.
pub struct ConnectionSet {
    links: Mutex<Vec<PeerLink>>,
    next_id: AtomicU64,
}

struct PeerLink {
    id: ConnectionId,
    peer: SocketAddr,
    outbox: mpsc::Sender<String>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    async fn insert(&self, peer: SocketAddr, outbox: mpsc::Sender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut links = self.links.lock().await;
        links.push(PeerLink { id, peer, outbox });
        id
    }

    async fn remove(&self, id: ConnectionId) {
        let mut links = self.links.lock().await;
        links.retain(|link| link.id != id);
    }

    pub async fn len(&self) -> usize {
        self.links.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.lock().await.is_empty()
    }

    pub async fn peers(&self) -> Vec<SocketAddr> {
        self.links.lock().await.iter().map(|link| link.peer).collect()
    }

    /// Queues one frame for every current connection. Delivery is best
    /// effort: a full outbox drops the frame, a closed one prunes the link.
    pub async fn broadcast(&self, text: &str) {
        let mut links = self.links.lock().await;
        let mut dead = Vec::new();
        for link in links.iter() {
            match link.outbox.try_send(text.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(peer = %link.peer, "peer outbox full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(link.id),
            }
        }
        links.retain(|link| !dead.contains(&link.id));
    }

    async fn shutdown_all(&self) {
        // Dropping the outboxes ends each send task, which shuts its writer
        // down.
        self.links.lock().await.clear();
    }
}

impl Default for ConnectionSet {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_stdout(line: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
