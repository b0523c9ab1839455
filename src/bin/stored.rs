use bucket_store::config::{ConfigOverrides, ServerConfig};
use bucket_store::server::Server;
use clap::Parser;
use log::info;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "bucket store http server", long_about = None)]
struct Args {
    #[arg(short, long)]
    port: Option<String>,

    /// Path of the store file.
    #[arg(short, long)]
    db: Option<String>,

    /// Octal permission bits for a newly created store file.
    #[arg(short, long)]
    mode: Option<String>,

    /// Request deadline in seconds.
    #[arg(long)]
    timeout_secs: Option<String>,

    /// Largest accepted PUT body in bytes.
    #[arg(long)]
    max_body: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let flags = ConfigOverrides {
        port: args.port,
        db_path: args.db,
        file_mode: args.mode,
        timeout_secs: args.timeout_secs,
        max_body_bytes: args.max_body,
    };
    let config = ServerConfig::resolve(flags.or(ConfigOverrides::from_env()))?;

    info!("Starting Bucket Store daemon with store {}", config.db_path.display());
    let server = Server::bind(config).await?;

    server
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received. Closing store...");
        })
        .await?;

    info!("Store closed. Exiting.");
    Ok(())
}
