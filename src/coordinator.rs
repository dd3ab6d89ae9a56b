use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    registry::{PeerEndpoint, Registry},
    wire::{Notification, parse_port, read_frame, write_notification},
};

/// The rendezvous coordinator: accepts registration connections, records each
/// peer in the [`Registry`], and replies with the list of previously
/// registered peers followed by the end-of-list sentinel.
pub struct Coordinator {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Coordinator {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Coordinator { listener, registry } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("coordinator shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
) {
    match result {
        Ok((stream, peer)) => spawn_registration_handler(stream, peer, registry),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_registration_handler(stream: TcpStream, peer: SocketAddr, registry: &Arc<Registry>) {
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        if let Err(err) = handle_registration(stream, registry).await {
            warn!(peer = %peer, error = ?err, "registration failed");
        }
    });
}

/// Serves one registration: reads the self-reported listening port, appends
/// the (transport address, port) pair to the registry, and notifies the new
/// peer of every prior registrant.
async fn handle_registration(stream: TcpStream, registry: Arc<Registry>) -> Result<()> {
    let remote = stream.peer_addr().context("peer address unavailable")?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let port_frame = match read_frame(&mut reader).await? {
        Some(frame) => frame,
        None => anyhow::bail!("connection closed before the port frame"),
    };
    let port = parse_port(&port_frame)?;

    // The address comes from the transport, never from the client, so only
    // the port is client-asserted.
    let endpoint = PeerEndpoint::new(remote.ip().to_string(), port);
    let snapshot = registry.register(endpoint.clone()).await;

    info!(peer = %endpoint, total = snapshot.len(), "peer registered");

    for notification in notifications_for(&snapshot, &endpoint) {
        write_notification(&mut writer, &notification).await?;
    }
    write_notification(&mut writer, &Notification::EndOfList).await?;

    writer.shutdown().await?;
    Ok(())
}

/// The notifications owed to a newly registered peer: every snapshot entry
/// that is not value-equal to the newcomer, in registration order. A peer
/// re-registering an identical endpoint is therefore not told about its own
/// earlier entry.
fn notifications_for(snapshot: &[PeerEndpoint], newcomer: &PeerEndpoint) -> Vec<Notification> {
    snapshot
        .iter()
        .filter(|existing| *existing != newcomer)
        .map(|existing| Notification::Peer {
            addr: existing.addr.clone(),
            port: existing.port,
        })
        .collect()
}
