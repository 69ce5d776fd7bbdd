use clap::Parser;
use log::{error, info};
use server::config::{Args, ServerConfig};
use server::network::Server;
use server::BoxError;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ServerConfig::try_from(Args::parse())?;
    info!(
        "Race settings: {} laps, {} checkpoints, {}s countdown, up to {} players",
        config.race.total_laps,
        config.race.total_checkpoints,
        config.race.countdown_seconds(),
        config.race.max_players
    );

    let mut server = Server::bind(&config).await?;
    println!("{}", server.announcement());

    let handle = server.handle();
    let mut server_task = tokio::spawn(async move { server.run().await });

    let result = tokio::select! {
        result = &mut server_task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
            server_task.await
        }
    };

    match result {
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}
