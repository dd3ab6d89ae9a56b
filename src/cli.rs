use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the rendezvous coordinator that introduces peers to each other.
    Coordinator(CoordinatorArgs),
    /// Join the mesh as a peer and chat with every other peer.
    Peer(PeerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CoordinatorArgs {
    /// Socket address the coordinator should bind to. Use port 0 for an
    /// ephemeral port.
    #[arg(long, default_value = "127.0.0.1:1111")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    /// Port this peer listens on for connections from later registrants.
    pub port: u16,

    /// Address of the rendezvous coordinator.
    #[arg(long, default_value = "127.0.0.1:1111")]
    pub coordinator: SocketAddr,
}
