use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use kmqtt::config::FileConfig;
use kmqtt::mqtt::KClient;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(FileConfig::default_path);
    info!("Loading client config from {}", path.display());

    let file_config = FileConfig::load(&path)?;
    let qos = file_config.qos()?;
    let mut client = KClient::from_config(file_config.client_config()?);
    client.add_topics(file_config.topics.iter().cloned());

    client.all_message(|_, msg| info!("{}", msg));
    client.on_connection_lost(|_, reason| warn!("Connection lost: {}", reason));

    client
        .connect()
        .await
        .map_err(|e| eyre!("Failed to connect: {}", e))?;

    let batch = client.subscribe_all(qos)?;
    for (topic, result) in batch.wait().await {
        match result {
            Ok(()) => info!("Subscribed to {}", topic),
            Err(e) => error!("{}", e),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.close().await?;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
