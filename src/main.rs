use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use rendezvous_mesh::{
    cli::{Cli, Command},
    coordinator, peer,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Coordinator(args) => {
            let listener = TcpListener::bind(args.listen).await?;
            let coordinator = coordinator::Coordinator::new(listener);
            let addr = coordinator.local_addr()?;
            info!("coordinator listening on {}", addr);
            if let Err(err) = coordinator.run_until_ctrl_c().await {
                warn!("coordinator exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Peer(args) => peer::run(args.port, args.coordinator).await?,
    }

    Ok(())
}
