//! Send a request to the echo service once a second and print the response
//!
//! ```text
//! cargo run -p msgbus-fabric --example echo_client -- demo-configs/ipc.json echo_service
//! ```

use std::time::Duration;

use msgbus_fabric::{Client, Config, ReceiveTimeout, Value};
use serde_json::json;
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
    let (Some(config_file), Some(name)) = (args.next(), args.next()) else {
        eprintln!("usage: echo_client <config.json> <service name>");
        std::process::exit(2);
    };

    let client = Client::new(Config::from_file(&config_file)?)?;
    let mut requester = client.get_service(&name).await?;
    info!(service = %name, "connected, ctrl-c to stop");

    let request = Value::from(json!({"int": 42, "float": 55.5, "str": "Hello, World!"}));
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                requester.request(&request).await?;
                match requester.receive_response(ReceiveTimeout::from_millis(5000)).await {
                    Ok(Some(response)) => println!("-- Received response: {:?}", response.data()),
                    Ok(None) => warn!(service = %name, "no response within 5s"),
                    Err(e) => {
                        warn!(error = %e, "failed to receive response");
                        break;
                    }
                }
            }
        }
    }

    requester.close();
    client.close();
    Ok(())
}
