//! Print every message received on a topic
//!
//! ```text
//! cargo run -p msgbus-fabric --example subscriber -- demo-configs/ipc.json publish_test
//! ```

use msgbus_fabric::{Client, Config};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("MSGBUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(config_file), Some(topic)) = (args.next(), args.next()) else {
        eprintln!("usage: subscriber <config.json> <topic>");
        std::process::exit(2);
    };

    let client = Client::new(Config::from_file(&config_file)?)?;
    let mut subscriber = client.new_subscriber(&topic).await?;
    info!(%topic, "subscribed, ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = subscriber.recv() => match received {
                Some(Ok(envelope)) => {
                    println!("-- Received [{}]: {:?}", envelope.name(), envelope.data());
                    if let Some(blob) = envelope.blob() {
                        println!("   blob: {} bytes", blob.len());
                    }
                }
                Some(Err(e)) => warn!(error = %e, "receive failed"),
                None => break,
            },
        }
    }

    subscriber.close();
    client.close();
    Ok(())
}
