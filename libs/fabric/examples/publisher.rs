//! Publish a sample message every second
//!
//! ```text
//! cargo run -p msgbus-fabric --example publisher -- demo-configs/ipc.json publish_test
//! ```

use std::time::Duration;

use msgbus_fabric::{Client, Config, Value};
use serde_json::json;
use tracing::{error, info};
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
        eprintln!("usage: publisher <config.json> <topic>");
        std::process::exit(2);
    };

    info!(%config_file, "loading configuration");
    let client = Client::new(Config::from_file(&config_file)?)?;
    let mut publisher = client.new_publisher(&topic).await?;

    let message = Value::from(json!({
        "str": "hello",
        "int": 2,
        "float": 55.5,
        "bool": true,
        "obj": {"nest": {"test": "hello"}, "hello": "world"},
        "arr": ["test", 123],
        "empty": null
    }));

    info!(%topic, "publishing every second, ctrl-c to stop");
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Err(e) = publisher.publish(&message).await {
                    error!(error = %e, "failed to publish message");
                    break;
                }
            }
        }
    }

    publisher.close()?;
    client.close();
    Ok(())
}
