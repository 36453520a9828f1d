use shoal::RelayConfig;
use shoal::signaling::SignalingServer;
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env();

    println!("   Shoal Signaling Relay");
    println!("   Binding to {}", config.bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::new();
    tokio::select! {
        result = server.run(&config.bind_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down relay");
            Ok(())
        }
    }
}
