use anyhow::Result;
use clap::Parser;
use tokio::{io::BufReader, net::TcpListener};
use tracing::warn;

use leader_kv_replication::{
    cli::{Cli, Command},
    client::ClientSession,
    console,
    node::ReplicaNode,
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
        Command::Node(args) => {
            let config = args.into_config()?;
            let listener = TcpListener::bind(config.topology.listen()).await?;
            let node = ReplicaNode::new(listener, config);
            if let Err(err) = node.run_until_ctrl_c().await {
                warn!("replica exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => {
            let mut session = ClientSession::new(args.into_config())?;
            let mut stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            console::run(&mut session, &mut stdin, &mut stdout).await?;
        }
    }

    Ok(())
}
